/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `uploads`: upload:{task_id} -> UploadDescriptor (versioned JSON)
/// - `deletions`: deletion:{request_id} -> DeletionRequest (versioned JSON)
/// - `coordinator`: meta:{key} -> coordinator record (versioned JSON)
use uuid::Uuid;

pub const UPLOADS_PARTITION: &str = "uploads";
pub const DELETIONS_PARTITION: &str = "deletions";
pub const COORDINATOR_PARTITION: &str = "coordinator";

/// Encode an upload key: upload:{task_id}
pub fn encode_upload_key(task_id: &Uuid) -> Vec<u8> {
    format!("upload:{}", task_id).into_bytes()
}

/// Decode an upload key: upload:{task_id} -> task_id
pub fn decode_upload_key(key: &[u8]) -> Option<Uuid> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("upload:")?.parse().ok()
}

/// Encode a deletion key: deletion:{request_id}
pub fn encode_deletion_key(request_id: &Uuid) -> Vec<u8> {
    format!("deletion:{}", request_id).into_bytes()
}

/// Decode a deletion key: deletion:{request_id} -> request_id
pub fn decode_deletion_key(key: &[u8]) -> Option<Uuid> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("deletion:")?.parse().ok()
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}
