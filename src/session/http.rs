//! HTTP session for uploads and deletions

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use tracing::debug;

use super::{DeletionSession, Result, SessionError, UploadSession};
use crate::descriptor::UploadDescriptor;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// API root that resource uris are resolved against for deletes
    pub base_url: String,
    pub auth_token: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            auth_token: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            user_agent: "uplink/0.1.0".to_string(),
        }
    }
}

/// reqwest-backed session
///
/// Uploads are a single PUT of the whole file to the ticket's upload link.
/// Retries are left to the queue that owns the session.
pub struct HttpSession {
    client: Client,
    config: HttpConfig,
}

impl HttpSession {
    pub fn new(config: HttpConfig) -> Result<Self> {
        reqwest::Url::parse(&config.base_url)
            .map_err(|e| SessionError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| SessionError::RequestFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Absolute URL of a resource uri under the API root
    pub fn resource_url(&self, resource_uri: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            resource_uri.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                SessionError::Timeout
            } else {
                SessionError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::RequestFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl UploadSession for HttpSession {
    async fn upload(&self, descriptor: &UploadDescriptor) -> Result<()> {
        let link = descriptor
            .ticket
            .upload_link
            .as_deref()
            .ok_or_else(|| SessionError::MissingUploadLink(descriptor.identifier().to_string()))?;

        let body = tokio::fs::read(&descriptor.source).await?;
        let size = body.len();
        debug!(identifier = descriptor.identifier(), link, size, "Starting upload");

        let request = self.client.put(link).query(&descriptor.ticket.params).body(body);
        self.send(request).await?;

        debug!(identifier = descriptor.identifier(), size, "Upload completed");
        Ok(())
    }
}

#[async_trait]
impl DeletionSession for HttpSession {
    async fn delete(&self, resource_uri: &str) -> Result<()> {
        let url = self.resource_url(resource_uri);
        debug!(resource_uri, %url, "Sending delete");

        self.send(self.client.delete(&url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::UploadTicket;
    use axum::{Router, http::StatusCode, routing::{delete, put}};
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    async fn start_mock_server() -> String {
        let app = Router::new()
            .route("/slots/ok", put(|| async { StatusCode::OK }))
            .route("/slots/broken", put(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .route("/videos/{id}", delete(|| async { StatusCode::NO_CONTENT }));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}", address)
    }

    fn session_for(base_url: &str) -> HttpSession {
        HttpSession::new(HttpConfig {
            base_url: base_url.to_string(),
            auth_token: Some("token".to_string()),
            ..HttpConfig::default()
        })
        .unwrap()
    }

    fn descriptor_with_link(dir: &TempDir, link: Option<String>) -> UploadDescriptor {
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"frames").unwrap();

        let mut ticket = UploadTicket::for_resource("/videos/1");
        ticket.upload_link = link;
        UploadDescriptor::new(source, ticket).unwrap()
    }

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = HttpSession::new(HttpConfig {
            base_url: "not a url".to_string(),
            ..HttpConfig::default()
        });
        assert!(matches!(result, Err(SessionError::InvalidUrl(_))));
    }

    #[test]
    fn test_resource_url_joins_slashes() {
        let session = session_for("https://api.example.com/");
        assert_eq!(
            session.resource_url("/videos/123"),
            "https://api.example.com/videos/123"
        );
    }

    #[tokio::test]
    async fn test_upload_without_link_fails() {
        let dir = TempDir::new().unwrap();
        let session = session_for("http://127.0.0.1:1");
        let descriptor = descriptor_with_link(&dir, None);

        let result = session.upload(&descriptor).await;
        assert!(matches!(result, Err(SessionError::MissingUploadLink(uri)) if uri == "/videos/1"));
    }

    #[tokio::test]
    async fn test_upload_and_delete_against_server() {
        let base_url = start_mock_server().await;
        let dir = TempDir::new().unwrap();
        let session = session_for(&base_url);

        let ok = descriptor_with_link(&dir, Some(format!("{}/slots/ok", base_url)));
        session.upload(&ok).await.unwrap();

        let broken = descriptor_with_link(&dir, Some(format!("{}/slots/broken", base_url)));
        let error = session.upload(&broken).await.unwrap_err();
        assert!(error.to_string().contains("503"));

        session.delete("/videos/1").await.unwrap();
    }
}
