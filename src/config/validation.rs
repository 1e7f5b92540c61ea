use super::models::{Config, TransportProvider};
use thiserror::Error;

/// Largest accepted deletion.backoff_base_ms (one minute)
pub const MAX_BACKOFF_BASE_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("queue.max_concurrent_uploads must be at least 1")]
    NoUploadConcurrency,

    #[error("Transport provider is http but transport.base_url is not set")]
    MissingBaseUrl,

    #[error("Invalid transport.base_url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Invalid transport.base_url scheme '{scheme}', expected 'http://' or 'https://'")]
    InvalidBaseUrlScheme { scheme: String },

    #[error("{field} must be greater than zero")]
    ZeroTimeout { field: String },

    #[error("deletion.backoff_base_ms is {value}, the maximum is {max}")]
    BackoffTooLarge { value: u64, max: u64 },
}

/// Validate the complete configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_queue(config)?;
    validate_transport(config)?;
    validate_deletion(config)?;
    Ok(())
}

fn validate_deletion(config: &Config) -> Result<(), ValidationError> {
    let value = config.deletion.backoff_base_ms;
    if value > MAX_BACKOFF_BASE_MS {
        return Err(ValidationError::BackoffTooLarge {
            value,
            max: MAX_BACKOFF_BASE_MS,
        });
    }
    Ok(())
}

fn validate_queue(config: &Config) -> Result<(), ValidationError> {
    if config.queue.max_concurrent_uploads == 0 {
        return Err(ValidationError::NoUploadConcurrency);
    }
    Ok(())
}

/// Validate the http endpoint and timeouts
fn validate_transport(config: &Config) -> Result<(), ValidationError> {
    let transport = &config.transport;

    for (field, value) in [
        ("transport.connect_timeout_secs", transport.connect_timeout_secs),
        ("transport.request_timeout_secs", transport.request_timeout_secs),
    ] {
        if value == 0 {
            return Err(ValidationError::ZeroTimeout {
                field: field.to_string(),
            });
        }
    }

    if transport.provider != TransportProvider::Http {
        return Ok(());
    }

    let base_url = transport
        .base_url
        .as_deref()
        .ok_or(ValidationError::MissingBaseUrl)?;

    let url = reqwest::Url::parse(base_url).map_err(|e| ValidationError::InvalidBaseUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidBaseUrlScheme {
            scheme: url.scheme().to_string(),
        });
    }

    Ok(())
}
