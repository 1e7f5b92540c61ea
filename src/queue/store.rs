use fjall::PartitionHandle;
use tracing::debug;
use uuid::Uuid;

use crate::descriptor::UploadDescriptor;
use crate::store::codec;
use crate::store::partitions::{decode_upload_key, encode_upload_key};
use crate::store::{Result, StoreError};

/// DescriptorStore persists the upload queue's unfinished descriptors
///
/// Layout: `uploads` partition, `upload:{task_id}` -> UploadDescriptor record.
///
/// A descriptor is written when it is accepted and on every non-terminal
/// transition, and removed once it succeeds, fails or is cancelled. Whatever
/// is left after a crash is what the queue resumes.
#[derive(Clone)]
pub struct DescriptorStore {
    uploads: PartitionHandle,
}

impl DescriptorStore {
    pub fn new(uploads: PartitionHandle) -> Self {
        Self { uploads }
    }

    /// Insert or overwrite a descriptor
    pub fn save(&self, descriptor: &UploadDescriptor) -> Result<()> {
        let key = encode_upload_key(&descriptor.task_id);
        self.uploads.insert(key, codec::encode(descriptor)?)?;

        debug!(
            task_id = %descriptor.task_id,
            identifier = descriptor.identifier(),
            status = %descriptor.status,
            "Descriptor persisted"
        );
        Ok(())
    }

    pub fn get(&self, task_id: &Uuid) -> Result<Option<UploadDescriptor>> {
        match self.uploads.get(encode_upload_key(task_id))? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, task_id: &Uuid) -> Result<()> {
        self.uploads.remove(encode_upload_key(task_id))?;
        Ok(())
    }

    /// Load every persisted descriptor in task id (creation) order
    pub fn load_all(&self) -> Result<Vec<UploadDescriptor>> {
        let mut descriptors = Vec::new();

        for item in self.uploads.iter() {
            let (key, value) = item?;
            if decode_upload_key(&key).is_none() {
                return Err(StoreError::InvalidKey(
                    String::from_utf8_lossy(&key).into_owned(),
                ));
            }
            descriptors.push(codec::decode(&value)?);
        }

        Ok(descriptors)
    }
}
