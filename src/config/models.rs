use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub deletion: DeletionConfig,
}

/// Durable state location
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/uplink")
}

/// Transport provider type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProvider {
    Http,
    #[default]
    Local,
}

/// Transport session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub provider: TransportProvider,
    /// API root deletes are sent to (http provider)
    pub base_url: Option<String>,
    /// Object directory (local provider)
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Bearer token (loaded from environment, not from config file)
    #[serde(skip)]
    pub auth_token: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            provider: TransportProvider::Local,
            base_url: None,
            local_root: default_local_root(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            auth_token: None,
        }
    }
}

fn default_local_root() -> PathBuf {
    PathBuf::from("data/objects")
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    300
}

/// Upload queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: default_max_concurrent_uploads(),
        }
    }
}

fn default_max_concurrent_uploads() -> usize {
    4
}

/// Deletion queue configuration
///
/// The retry budget itself is fixed; only the backoff is tunable.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeletionConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_backoff_base_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.storage.data_dir, PathBuf::from("data/uplink"));
        assert_eq!(config.transport.provider, TransportProvider::Local);
        assert_eq!(config.transport.request_timeout_secs, 300);
        assert_eq!(config.queue.max_concurrent_uploads, 4);
        assert_eq!(config.deletion.backoff_base_ms, 500);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
[transport]
provider = "http"
base_url = "https://api.example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.transport.provider, TransportProvider::Http);
        assert_eq!(config.transport.connect_timeout_secs, 10);
        assert_eq!(config.queue.max_concurrent_uploads, 4);
        assert!(config.transport.auth_token.is_none());
    }
}
