//! Status command handler.

use anyhow::{Context, Result};
use passport_core::config::{self, Config};
use passport_core::sdk::CredentialCache;

pub fn run(config: &Config) -> Result<()> {
    let provider = config.provider.kind;
    let credentials_path = config::paths::credentials_path();
    let cache = CredentialCache::load_from(&credentials_path)
        .with_context(|| format!("load credentials for {}", provider.display_name()))?;

    match cache.valid_token(provider) {
        Some(token) => println!("{}: logged in ({})", provider.display_name(), token.redacted()),
        None => println!("{}: not logged in", provider.display_name()),
    }
    Ok(())
}
