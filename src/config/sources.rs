use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "UPLINK_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/uplink.toml";
const ENV_PREFIX: &str = "UPLINK";
const ENV_SEPARATOR: &str = "__";
const AUTH_TOKEN_ENV_VAR: &str = "UPLINK_AUTH_TOKEN";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_with_secrets(config_path)
}

/// Like [`load`], but with an explicit file path
pub fn load_with_secrets(config_path: PathBuf) -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);
    Ok(config)
}

/// Secrets are never stored in TOML files, only in environment
fn load_secrets(config: &mut Config) {
    if let Ok(token) = env::var(AUTH_TOKEN_ENV_VAR) {
        config.transport.auth_token = Some(token);
    }
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // UPLINK__QUEUE__MAX_CONCURRENT_UPLOADS -> queue.max_concurrent_uploads
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportProvider;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.transport.provider, TransportProvider::Local);
        assert_eq!(config.queue.max_concurrent_uploads, 4);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[storage]
data_dir = "/var/lib/uplink"

[transport]
provider = "http"
base_url = "https://api.example.com"
request_timeout_secs = 600

[queue]
max_concurrent_uploads = 2

[deletion]
backoff_base_ms = 250
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/uplink"));
        assert_eq!(config.transport.provider, TransportProvider::Http);
        assert_eq!(config.transport.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.transport.request_timeout_secs, 600);
        assert_eq!(config.queue.max_concurrent_uploads, 2);
        assert_eq!(config.deletion.backoff_base_ms, 250);
    }

    // Environment variable overrides are not exercised here; set_var is unsafe
    // in edition 2024 and races with parallel tests.
}
