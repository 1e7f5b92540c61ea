//! Task descriptors for the upload and deletion queues.
//!
//! An [`UploadDescriptor`] is the unit of work the upload queue runs. Its
//! `identifier` is the remote resource URI taken from the [`UploadTicket`]
//! and is the key used for lookups and deduplication.
//!
//! ```json
//! {
//!   "version": 1,
//!   "task_id": "01937b8e-...",
//!   "identifier": "/videos/123",
//!   "source": "/tmp/clip.mp4",
//!   "ticket": {
//!     "resource": { "uri": "/videos/123" },
//!     "upload_link": "https://upload.example.com/slot/abc",
//!     "params": {}
//!   },
//!   "status": "failed",
//!   "error": "HTTP 503: Service Unavailable",
//!   "created_at": 1730000000000,
//!   "updated_at": 1730000004000
//! }
//! ```
//!
//! `source` is a plain string when the path is valid UTF-8. Other paths are
//! stored as raw platform units, e.g. `{"unix": [47, 116, ...]}`, so they
//! restore unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Rejections raised before a submission reaches the upload queue
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("upload ticket does not name a target resource uri")]
    MissingResourceUri,
}

/// Remote resource an upload slot was created for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Metadata returned by the "create upload slot" call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTicket {
    #[serde(default)]
    pub resource: Option<ResourceRef>,
    /// Where the bytes go (used by HTTP sessions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_link: Option<String>,
    /// Destination parameters passed through to the session
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl UploadTicket {
    pub fn for_resource(uri: impl Into<String>) -> Self {
        Self {
            resource: Some(ResourceRef {
                uri: uri.into(),
                name: None,
            }),
            ..Default::default()
        }
    }

    pub fn with_upload_link(mut self, link: impl Into<String>) -> Self {
        self.upload_link = Some(link.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// The target resource uri, if the ticket names a non-blank one
    pub fn resource_uri(&self) -> Option<&str> {
        self.resource
            .as_ref()
            .map(|resource| resource.uri.as_str())
            .filter(|uri| !uri.trim().is_empty())
    }
}

/// Lifecycle of a descriptor
///
/// `Pending -> Active -> {Succeeded | Failed | Cancelled}`, plus
/// `Pending -> Cancelled`. Only `Pending` and `Active` survive a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorStatus {
    Pending,
    Active,
    Succeeded,
    Failed,
    Cancelled,
}

impl DescriptorStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn is_resumable(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for DescriptorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// One upload of a local file to a remote resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDescriptor {
    pub task_id: Uuid,
    identifier: String,
    #[serde(with = "source_path")]
    pub source: PathBuf,
    pub ticket: UploadTicket,
    pub status: DescriptorStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl UploadDescriptor {
    /// Build a pending descriptor whose identifier is the ticket's resource uri
    pub fn new(source: impl Into<PathBuf>, ticket: UploadTicket) -> Result<Self, SubmitError> {
        let identifier = ticket
            .resource_uri()
            .ok_or(SubmitError::MissingResourceUri)?
            .to_string();
        let now = Utc::now();

        Ok(Self {
            task_id: Uuid::now_v7(),
            identifier,
            source: source.into(),
            ticket,
            status: DescriptorStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Resource uri this descriptor uploads to. Fixed at creation.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn transition(&mut self, status: DescriptorStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.transition(DescriptorStatus::Failed);
    }
}

mod source_path {
    use std::path::{Path, PathBuf};

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Raw(RawPath),
    }

    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    enum RawPath {
        Unix(Vec<u8>),
        Windows(Vec<u16>),
    }

    pub fn serialize<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match path.to_str() {
            Some(text) => Repr::Text(text.to_owned()),
            None => Repr::Raw(to_raw(path)),
        };
        repr.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => Ok(PathBuf::from(text)),
            Repr::Raw(raw) => from_raw(raw).map_err(D::Error::custom),
        }
    }

    #[cfg(unix)]
    fn to_raw(path: &Path) -> RawPath {
        use std::os::unix::ffi::OsStrExt;
        RawPath::Unix(path.as_os_str().as_bytes().to_vec())
    }

    #[cfg(windows)]
    fn to_raw(path: &Path) -> RawPath {
        use std::os::windows::ffi::OsStrExt;
        RawPath::Windows(path.as_os_str().encode_wide().collect())
    }

    #[cfg(not(any(unix, windows)))]
    fn to_raw(path: &Path) -> RawPath {
        RawPath::Unix(path.to_string_lossy().into_owned().into_bytes())
    }

    #[cfg(unix)]
    fn from_raw(raw: RawPath) -> Result<PathBuf, &'static str> {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;
        match raw {
            RawPath::Unix(bytes) => Ok(PathBuf::from(OsString::from_vec(bytes))),
            RawPath::Windows(_) => Err("windows source path cannot be restored on unix"),
        }
    }

    #[cfg(windows)]
    fn from_raw(raw: RawPath) -> Result<PathBuf, &'static str> {
        use std::ffi::OsString;
        use std::os::windows::ffi::OsStringExt;
        match raw {
            RawPath::Windows(units) => Ok(PathBuf::from(OsString::from_wide(&units))),
            RawPath::Unix(_) => Err("unix source path cannot be restored on windows"),
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn from_raw(raw: RawPath) -> Result<PathBuf, &'static str> {
        match raw {
            RawPath::Unix(bytes) => String::from_utf8(bytes)
                .map(PathBuf::from)
                .map_err(|_| "raw source path is not supported on this platform"),
            RawPath::Windows(_) => Err("raw source path is not supported on this platform"),
        }
    }
}

/// Remote delete of one resource with a bounded retry budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionRequest {
    pub request_id: Uuid,
    pub resource_uri: String,
    pub retries_remaining: u32,
    #[serde(default)]
    pub attempts: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub requested_at: DateTime<Utc>,
}

impl DeletionRequest {
    pub fn new(resource_uri: impl Into<String>, retry_count: u32) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            resource_uri: resource_uri.into(),
            retries_remaining: retry_count,
            attempts: 0,
            requested_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_comes_from_ticket() {
        let ticket = UploadTicket::for_resource("/videos/123").with_upload_link("https://up/1");
        let descriptor = UploadDescriptor::new("/tmp/clip.mp4", ticket).unwrap();

        assert_eq!(descriptor.identifier(), "/videos/123");
        assert_eq!(descriptor.status, DescriptorStatus::Pending);
        assert!(descriptor.error.is_none());
    }

    #[test]
    fn test_ticket_without_resource_is_rejected() {
        let result = UploadDescriptor::new("/tmp/clip.mp4", UploadTicket::default());
        assert_eq!(result.unwrap_err(), SubmitError::MissingResourceUri);

        let blank = UploadDescriptor::new("/tmp/clip.mp4", UploadTicket::for_resource("  "));
        assert_eq!(blank.unwrap_err(), SubmitError::MissingResourceUri);
    }

    #[test]
    fn test_terminal_states() {
        assert!(DescriptorStatus::Pending.is_resumable());
        assert!(DescriptorStatus::Active.is_resumable());
        assert!(DescriptorStatus::Succeeded.is_terminal());
        assert!(DescriptorStatus::Failed.is_terminal());
        assert!(DescriptorStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_fail_records_error() {
        let mut descriptor =
            UploadDescriptor::new("/tmp/a", UploadTicket::for_resource("/videos/1")).unwrap();
        descriptor.fail("connection reset");

        assert_eq!(descriptor.status, DescriptorStatus::Failed);
        assert_eq!(descriptor.error.as_deref(), Some("connection reset"));
        assert!(descriptor.updated_at >= descriptor.created_at);
    }

    #[test]
    fn test_descriptor_json_keeps_identity() {
        let ticket = UploadTicket::for_resource("/videos/9")
            .with_upload_link("https://up/9")
            .with_param("approach", "streaming");
        let descriptor = UploadDescriptor::new("/tmp/nine.mov", ticket).unwrap();

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["identifier"], "/videos/9");
        assert_eq!(json["status"], "pending");

        let decoded: UploadDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.identifier(), descriptor.identifier());
        assert_eq!(decoded.ticket, descriptor.ticket);
        assert_eq!(decoded.source, descriptor.source);
    }

    #[test]
    fn test_utf8_source_is_plain_string() {
        let descriptor =
            UploadDescriptor::new("/tmp/clip.mp4", UploadTicket::for_resource("/videos/1")).unwrap();

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["source"], "/tmp/clip.mp4");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_source_round_trips() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let source = PathBuf::from(OsStr::from_bytes(b"/tmp/clip-\xff.mp4"));
        let descriptor =
            UploadDescriptor::new(source.clone(), UploadTicket::for_resource("/videos/1")).unwrap();

        let bytes = crate::store::codec::encode(&descriptor).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json["source"]["unix"].is_array());

        let decoded: UploadDescriptor = crate::store::codec::decode(&bytes).unwrap();
        assert_eq!(decoded.source, source);
    }

    #[test]
    fn test_deletion_request_budget() {
        let request = DeletionRequest::new("/videos/1", 2);
        assert_eq!(request.retries_remaining, 2);
        assert_eq!(request.attempts, 0);
    }
}
