/// Fjall-based persistence for the upload coordinator
///
/// One keyspace backs every durable component, each in its own partition:
///
/// - `uploads`: descriptors the upload queue has accepted but not finished
/// - `deletions`: deletion requests that still have attempts left
/// - `coordinator`: the coordinator's own record (the failure ledger)
///
/// The queues own their partitions; nothing else writes to them. Values are
/// version-tagged JSON records (see [`codec`]).
///
/// ## Usage
///
/// ```rust,ignore
/// use uplink::store::Store;
///
/// let store = Store::open("data/uplink")?;
/// let coordinator = UploadCoordinator::open(&store, sessions, options)?;
/// ```
pub mod codec;
pub mod error;
pub mod partitions;

use std::path::Path;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::info;

pub use error::{Result, StoreError};
use partitions::{COORDINATOR_PARTITION, DELETIONS_PARTITION, UPLOADS_PARTITION};

/// Fjall keyspace with the coordinator's partitions
#[derive(Clone)]
pub struct Store {
    keyspace: Keyspace,
    uploads: PartitionHandle,
    deletions: PartitionHandle,
    coordinator: PartitionHandle,
}

impl Store {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening Fjall store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let uploads = keyspace.open_partition(UPLOADS_PARTITION, PartitionCreateOptions::default())?;
        let deletions =
            keyspace.open_partition(DELETIONS_PARTITION, PartitionCreateOptions::default())?;
        let coordinator =
            keyspace.open_partition(COORDINATOR_PARTITION, PartitionCreateOptions::default())?;

        info!("Fjall store opened successfully");
        Ok(Self {
            keyspace,
            uploads,
            deletions,
            coordinator,
        })
    }

    pub fn uploads(&self) -> PartitionHandle {
        self.uploads.clone()
    }

    pub fn deletions(&self) -> PartitionHandle {
        self.deletions.clone()
    }

    pub fn coordinator(&self) -> PartitionHandle {
        self.coordinator.clone()
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Delete the uploads partition so every later write to it fails
    #[cfg(test)]
    pub(crate) fn drop_uploads(&self) -> Result<()> {
        self.keyspace.delete_partition(self.uploads.clone())?;
        Ok(())
    }

    /// Count records per partition (for debugging/monitoring)
    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            upload_count: count(&self.uploads)?,
            deletion_count: count(&self.deletions)?,
        })
    }
}

fn count(partition: &PartitionHandle) -> Result<usize> {
    let mut total = 0;
    for item in partition.iter() {
        item?;
        total += 1;
    }
    Ok(total)
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub upload_count: usize,
    pub deletion_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path().join("uplink"));
        assert!(store.is_ok());
    }

    #[test]
    fn test_empty_stats() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path().join("uplink")).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.upload_count, 0);
        assert_eq!(stats.deletion_count, 0);
    }

    #[test]
    fn test_partitions_are_separate() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path().join("uplink")).unwrap();

        store.uploads().insert("upload:x", "1").unwrap();
        store.persist().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.upload_count, 1);
        assert_eq!(stats.deletion_count, 0);
        assert!(store.coordinator().get(b"upload:x").unwrap().is_none());
    }
}
