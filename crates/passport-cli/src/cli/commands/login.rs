//! Login command handler.
//!
//! The terminal is the presentation surface: stdin lines are completion
//! envelopes (a pasted redirect URL), and Ctrl+C or end of input closes it.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use passport_core::bridge::{CompletionEnvelope, SdkBridge};
use passport_core::config::{self, Config};
use passport_core::controller::HandshakeController;
use passport_core::requester::{OneshotRequester, Requester, RequesterRegistry, ResultRouter};
use passport_core::sdk::{CredentialCache, LoopbackOptions, LoopbackSdk};
use passport_core::surface::{self, SurfaceHandle};
use passport_core::telemetry;
use passport_types::{CorrelationToken, HandshakeRequest, HandshakeResult, PermissionScope};

pub struct LoginOptions {
    pub scopes: Vec<String>,
    pub port: Option<u16>,
    pub no_browser: bool,
    pub json: bool,
    pub correlation: Option<String>,
}

pub async fn run(config: &Config, home: &Path, options: LoginOptions) -> Result<()> {
    let mut provider = config.provider.clone();
    if let Some(port) = options.port {
        provider.callback_port = port;
    }
    if options.no_browser {
        provider.open_browser = false;
    }
    let scope: PermissionScope = if options.scopes.is_empty() {
        provider.scope()
    } else {
        options.scopes.iter().map(String::as_str).collect()
    };

    let cache = CredentialCache::load_from(&config::paths::credentials_path())
        .context("load credential cache")?;
    let sdk = LoopbackSdk::new(LoopbackOptions::from_config(&provider).with_prompt(print_prompt))
        .with_cache(&cache);

    let correlation = options.correlation.map_or_else(
        || CorrelationToken::new(uuid::Uuid::new_v4().to_string()),
        CorrelationToken::new,
    );
    let registry = Arc::new(RequesterRegistry::new());
    let (requester, result_rx) = OneshotRequester::channel();
    let requester: Arc<dyn Requester> = requester;
    registry.register(correlation.clone(), &requester);

    let mut controller = HandshakeController::new(
        SdkBridge::new(sdk),
        Arc::clone(&registry) as Arc<dyn ResultRouter>,
        telemetry::from_config(config, home),
    );

    let (handle, mut events) = surface::channel();
    spawn_stdin_forwarder(handle.clone());
    let shutdown = tokio::spawn(close_on_ctrl_c(handle));

    let request = HandshakeRequest::new(correlation.clone(), scope, provider.kind);
    controller.run(request, &mut events).await;
    shutdown.abort();
    registry.unregister(&correlation);

    let result = result_rx
        .await
        .context("handshake finished without a result")?;
    print_result(&result, options.json)?;
    if !result.is_ok() {
        anyhow::bail!("login cancelled");
    }
    Ok(())
}

fn print_prompt(url: &str) {
    eprintln!("Open this URL to log in:\n\n{url}\n");
    eprintln!("Or paste the redirect URL here and press Enter.");
}

/// Forwards stdin lines as completion envelopes. End of input closes the
/// surface.
///
/// Runs on a plain thread: a blocking stdin read must not hold up runtime
/// shutdown.
fn spawn_stdin_forwarder(handle: SurfaceHandle) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if !handle.forward_envelope(CompletionEnvelope::new(line)) {
                return;
            }
        }
        handle.close();
    });
}

async fn close_on_ctrl_c(handle: SurfaceHandle) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::debug!("interrupted; closing login surface");
        handle.close();
    }
}

fn print_result(result: &HandshakeResult, json: bool) -> Result<()> {
    if json {
        let output = serde_json::to_string_pretty(result).context("serialize result")?;
        println!("{output}");
        return Ok(());
    }

    if let Some(token) = result.credential_token() {
        eprintln!("Logged in to {}.", result.provider_kind().display_name());
        println!("{}", token.expose());
    }
    Ok(())
}
