//! Transport sessions the queues execute against
//!
//! The upload queue runs descriptors through an [`UploadSession`]; the
//! deletion coordinator issues remote deletes through a [`DeletionSession`].
//! Two adapters ship with the crate:
//!
//! - [`HttpSession`]: PUTs the file to the ticket's upload link and DELETEs
//!   `{base_url}{resource_uri}` (reqwest)
//! - [`ObjectStoreSession`]: writes and deletes objects keyed by resource uri
//!   (object_store, in-memory or local filesystem)

pub mod http;
pub mod objects;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{TransportConfig, TransportProvider};
use crate::descriptor::UploadDescriptor;

pub use self::http::{HttpConfig, HttpSession};
pub use self::objects::ObjectStoreSession;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Upload ticket for {0} has no upload link")]
    MissingUploadLink(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Session that moves a descriptor's file to its remote resource
#[async_trait]
pub trait UploadSession: Send + Sync {
    /// Upload the descriptor's source file. Runs until done or aborted.
    async fn upload(&self, descriptor: &UploadDescriptor) -> Result<()>;

    /// Best-effort notice that a descriptor was cancelled locally
    async fn cancel(&self, _descriptor: &UploadDescriptor) -> Result<()> {
        Ok(())
    }
}

/// Session that removes a remote resource
#[async_trait]
pub trait DeletionSession: Send + Sync {
    async fn delete(&self, resource_uri: &str) -> Result<()>;
}

pub type UploadSessionRef = Arc<dyn UploadSession>;
pub type DeletionSessionRef = Arc<dyn DeletionSession>;

/// The two sessions a coordinator is bound to
///
/// Uploads run on the background session; deletions on the foreground one.
#[derive(Clone)]
pub struct Sessions {
    pub background: UploadSessionRef,
    pub foreground: DeletionSessionRef,
}

impl Sessions {
    pub fn new(background: UploadSessionRef, foreground: DeletionSessionRef) -> Self {
        Self {
            background,
            foreground,
        }
    }

    /// Build both sessions from the transport configuration
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        match config.provider {
            TransportProvider::Http => {
                let base_url = config
                    .base_url
                    .clone()
                    .ok_or_else(|| SessionError::InvalidUrl("missing base_url".to_string()))?;

                let http_config = HttpConfig {
                    base_url,
                    auth_token: config.auth_token.clone(),
                    connect_timeout: Duration::from_secs(config.connect_timeout_secs),
                    request_timeout: Duration::from_secs(config.request_timeout_secs),
                    ..HttpConfig::default()
                };

                let background = Arc::new(HttpSession::new(http_config.clone())?);
                let foreground = Arc::new(HttpSession::new(http_config)?);
                Ok(Self::new(background, foreground))
            }
            TransportProvider::Local => {
                let session = Arc::new(ObjectStoreSession::local(&config.local_root)?);
                Ok(Self::new(session.clone(), session))
            }
        }
    }
}
