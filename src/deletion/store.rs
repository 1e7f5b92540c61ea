use fjall::PartitionHandle;
use uuid::Uuid;

use crate::descriptor::DeletionRequest;
use crate::store::codec;
use crate::store::partitions::{decode_deletion_key, encode_deletion_key};
use crate::store::{Result, StoreError};

/// Durable deletion requests that still have attempts left
///
/// Layout: `deletions` partition, `deletion:{request_id}` -> DeletionRequest record.
#[derive(Clone)]
pub struct DeletionStore {
    deletions: PartitionHandle,
}

impl DeletionStore {
    pub fn new(deletions: PartitionHandle) -> Self {
        Self { deletions }
    }

    pub fn save(&self, request: &DeletionRequest) -> Result<()> {
        self.deletions
            .insert(encode_deletion_key(&request.request_id), codec::encode(request)?)?;
        Ok(())
    }

    pub fn remove(&self, request_id: &Uuid) -> Result<()> {
        self.deletions.remove(encode_deletion_key(request_id))?;
        Ok(())
    }

    pub fn load_all(&self) -> Result<Vec<DeletionRequest>> {
        let mut requests = Vec::new();

        for item in self.deletions.iter() {
            let (key, value) = item?;
            if decode_deletion_key(&key).is_none() {
                return Err(StoreError::InvalidKey(
                    String::from_utf8_lossy(&key).into_owned(),
                ));
            }
            requests.push(codec::decode(&value)?);
        }

        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use tempfile::TempDir;

    #[test]
    fn test_save_load_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path().join("uplink")).unwrap();
        let deletions = DeletionStore::new(store.deletions());

        let mut request = DeletionRequest::new("/videos/1", 2);
        deletions.save(&request).unwrap();

        request.retries_remaining = 1;
        request.attempts = 1;
        deletions.save(&request).unwrap();

        let loaded = deletions.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].retries_remaining, 1);
        assert_eq!(loaded[0].attempts, 1);

        deletions.remove(&request.request_id).unwrap();
        assert!(deletions.load_all().unwrap().is_empty());
    }
}
