//! Configuration management for passport.
//!
//! Loads configuration from ${PASSPORT_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use passport_types::{PermissionScope, ProviderKind};
use serde::{Deserialize, Serialize};

/// Returns the default config template with comments.
///
/// This is embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

pub mod paths {
    //! Path resolution for passport configuration and data files.
    //!
    //! PASSPORT_HOME resolution order:
    //! 1. PASSPORT_HOME environment variable (if set)
    //! 2. ~/.config/passport (default)

    use std::path::{Path, PathBuf};

    /// Returns the passport home directory.
    pub fn passport_home() -> PathBuf {
        if let Ok(home) = std::env::var("PASSPORT_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".passport"),
            |h| h.join(".config").join("passport"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        passport_home().join("config.toml")
    }

    /// Returns the path to the read-only credential cache.
    pub fn credentials_path() -> PathBuf {
        passport_home().join("credentials.json")
    }

    /// Resolves `path` against `home` unless it is already absolute.
    pub fn resolve(home: &Path, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            home.join(path)
        }
    }
}

/// Identity provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// OAuth client id registered with the provider
    pub client_id: Option<String>,
    /// Provider login page
    pub authorize_url: String,
    /// Permissions requested when the caller does not pass any
    pub scopes: Vec<String>,
    /// Loopback port for the redirect listener (0 = OS chosen)
    pub callback_port: u16,
    pub callback_path: String,
    /// `code` redirects reach the listener; `token` needs a pasted URL
    pub response_type: String,
    pub open_browser: bool,
    /// Pending login timeout in seconds (0 disables)
    pub login_timeout_secs: u64,
}

impl ProviderConfig {
    const DEFAULT_AUTHORIZE_URL: &str = "https://www.facebook.com/v19.0/dialog/oauth";
    const DEFAULT_CALLBACK_PATH: &str = "/callback";
    const DEFAULT_RESPONSE_TYPE: &str = "code";
    const DEFAULT_LOGIN_TIMEOUT_SECS: u64 = 300;

    pub fn scope(&self) -> PermissionScope {
        self.scopes.iter().map(String::as_str).collect()
    }

    /// Returns the login timeout, or None when disabled.
    pub fn login_timeout(&self) -> Option<Duration> {
        (self.login_timeout_secs > 0).then(|| Duration::from_secs(self.login_timeout_secs))
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            client_id: None,
            authorize_url: Self::DEFAULT_AUTHORIZE_URL.to_string(),
            scopes: vec!["email".to_string(), "public_profile".to_string()],
            callback_port: 0,
            callback_path: Self::DEFAULT_CALLBACK_PATH.to_string(),
            response_type: Self::DEFAULT_RESPONSE_TYPE.to_string(),
            open_browser: true,
            login_timeout_secs: Self::DEFAULT_LOGIN_TIMEOUT_SECS,
        }
    }
}

/// Telemetry sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// Append events as JSON lines to this file
    pub jsonl_path: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jsonl_path: None,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when PASSPORT_LOG is not set
    pub filter: String,
    /// Write logs to this file instead of stderr
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            file: None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Writes the commented default template to `path`.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Resolved telemetry JSONL path, if configured.
    pub fn telemetry_jsonl_path(&self, home: &Path) -> Option<PathBuf> {
        self.telemetry
            .jsonl_path
            .as_deref()
            .map(|p| paths::resolve(home, p))
    }

    /// Resolved log file path, if configured.
    pub fn log_file_path(&self, home: &Path) -> Option<PathBuf> {
        self.logging.file.as_deref().map(|p| paths::resolve(home, p))
    }

    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("nonexistent.toml");

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Facebook);
        assert_eq!(config.provider.callback_path, "/callback");
        assert!(config.telemetry.enabled);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        fs::write(
            &config_path,
            "[provider]\nclient_id = \"42\"\ncallback_port = 8899\n",
        )
        .unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.provider.client_id.as_deref(), Some("42"));
        assert_eq!(config.provider.callback_port, 8899);
        assert_eq!(config.provider.response_type, "code");
        assert_eq!(config.provider.login_timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_load_invalid_toml_reports_path() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "[provider\n").unwrap();

        let err = Config::load_from(&config_path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }

    #[test]
    fn test_template_matches_defaults() {
        let config: Config = toml::from_str(default_config_template()).unwrap();
        let defaults = Config::default();
        assert_eq!(config.provider.authorize_url, defaults.provider.authorize_url);
        assert_eq!(config.provider.scopes, defaults.provider.scopes);
        assert_eq!(config.provider.response_type, defaults.provider.response_type);
        assert_eq!(
            config.provider.login_timeout_secs,
            defaults.provider.login_timeout_secs
        );
        assert_eq!(config.logging.filter, defaults.logging.filter);
    }

    #[test]
    fn test_init_creates_config_with_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("subdir").join("config.toml");

        Config::init(&config_path).unwrap();

        assert!(config_path.exists());
        let contents = fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("[provider]"));
        assert!(contents.contains("# client_id ="));
    }

    #[test]
    fn test_init_fails_if_exists() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        fs::write(&config_path, "").unwrap();

        let result = Config::init(&config_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_timeout_disables_login_timeout() {
        let provider = ProviderConfig {
            login_timeout_secs: 0,
            ..ProviderConfig::default()
        };
        assert_eq!(provider.login_timeout(), None);
    }

    #[test]
    fn test_relative_paths_resolve_against_home() {
        let config = Config {
            telemetry: TelemetryConfig {
                enabled: true,
                jsonl_path: Some("telemetry.jsonl".to_string()),
            },
            ..Config::default()
        };
        let home = Path::new("/tmp/passport-home");
        assert_eq!(
            config.telemetry_jsonl_path(home),
            Some(home.join("telemetry.jsonl"))
        );
        assert_eq!(config.log_file_path(home), None);
    }
}
