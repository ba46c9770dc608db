//! Read-only credential cache.
//!
//! Credentials obtained elsewhere can be dropped into
//! `<base>/credentials.json`; the loopback SDK seeds its session from it.
//! Nothing in this crate writes the file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use passport_types::{CredentialToken, ProviderKind};
use serde::Deserialize;

fn now_millis_u64() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(u64::MAX)
}

/// One provider entry.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredCredential {
    /// The access token
    pub access: String,
    /// Expiry timestamp in milliseconds since epoch (absent = never expires)
    #[serde(default)]
    pub expires: Option<u64>,
}

impl StoredCredential {
    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|expires| now_millis_u64() >= expires)
    }
}

/// Provider name -> credential mapping.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CredentialCache {
    #[serde(flatten)]
    pub providers: HashMap<String, StoredCredential>,
}

impl CredentialCache {
    /// Loads the cache, returning an empty one if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials from {}", path.display()))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse credentials from {}", path.display()))
    }

    /// Returns the provider's token if present, non-empty and not expired.
    pub fn valid_token(&self, provider: ProviderKind) -> Option<CredentialToken> {
        let stored = self.providers.get(provider.as_str())?;
        if stored.is_expired() || stored.access.trim().is_empty() {
            return None;
        }
        Some(CredentialToken::new(stored.access.clone()))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_missing_file_is_empty_cache() {
        let dir = tempdir().unwrap();
        let cache = CredentialCache::load_from(&dir.path().join("credentials.json")).unwrap();
        assert!(cache.providers.is_empty());
        assert!(cache.valid_token(ProviderKind::Facebook).is_none());
    }

    #[test]
    fn test_valid_token_skips_expired_entries() {
        let now = now_millis_u64();
        let json = format!(
            r#"{{"facebook": {{"access": "cached1", "expires": {}}}}}"#,
            now + 60_000
        );
        let cache: CredentialCache = serde_json::from_str(&json).unwrap();
        assert_eq!(
            cache.valid_token(ProviderKind::Facebook).unwrap().expose(),
            "cached1"
        );

        let json = format!(
            r#"{{"facebook": {{"access": "stale", "expires": {}}}}}"#,
            now - 1000
        );
        let cache: CredentialCache = serde_json::from_str(&json).unwrap();
        assert!(cache.valid_token(ProviderKind::Facebook).is_none());
    }

    #[test]
    fn test_entry_without_expiry_never_expires() {
        let cache: CredentialCache =
            serde_json::from_str(r#"{"facebook": {"access": "forever"}}"#).unwrap();
        assert!(cache.valid_token(ProviderKind::Facebook).is_some());
    }

    #[test]
    fn test_corrupt_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = CredentialCache::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("credentials.json"));
    }
}
