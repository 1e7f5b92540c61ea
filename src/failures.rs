//! Failure ledger: the last failed upload per resource uri
//!
//! The ledger is the coordinator's only durable state. It is written
//! through to the `coordinator` partition as a single record on every
//! change:
//!
//! ```json
//! { "version": 1, "failed_descriptors": { "/videos/123": { ...descriptor... } } }
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use fjall::PartitionHandle;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::descriptor::UploadDescriptor;
use crate::store::codec;
use crate::store::partitions::encode_meta_key;
use crate::store::Result;

const COORDINATOR_RECORD_KEY: &str = "coordinator";

/// Durable record of the coordinator's own state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorRecord {
    #[serde(default)]
    pub failed_descriptors: BTreeMap<String, UploadDescriptor>,
}

impl CoordinatorRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}

/// Record as written: entries are encoded one by one so a single bad entry
/// cannot keep the rest from being saved
#[derive(Serialize)]
struct EncodedRecord<'a> {
    failed_descriptors: BTreeMap<&'a str, serde_json::Value>,
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(default)]
    failed_descriptors: BTreeMap<String, serde_json::Value>,
}

pub struct FailureLedger {
    partition: PartitionHandle,
    entries: Mutex<BTreeMap<String, UploadDescriptor>>,
}

impl FailureLedger {
    /// Load the ledger from the coordinator partition (empty if never saved)
    pub fn restore(partition: PartitionHandle) -> Result<Self> {
        let raw = match partition.get(encode_meta_key(COORDINATOR_RECORD_KEY))? {
            Some(bytes) => codec::decode::<RawRecord>(&bytes)?,
            None => RawRecord {
                failed_descriptors: BTreeMap::new(),
            },
        };

        let mut entries = BTreeMap::new();
        for (resource_uri, value) in raw.failed_descriptors {
            match serde_json::from_value::<UploadDescriptor>(value) {
                Ok(descriptor) => {
                    entries.insert(resource_uri, descriptor);
                }
                Err(e) => warn!(resource_uri, error = %e, "Dropping unreadable failure entry"),
            }
        }

        debug!(entries = entries.len(), "Failure ledger restored");
        Ok(Self {
            partition,
            entries: Mutex::new(entries),
        })
    }

    /// Remember a failed descriptor under its resource uri (last write wins)
    ///
    /// Descriptors whose ticket has no resource uri are ignored; returns
    /// whether the descriptor was recorded.
    pub fn record(&self, descriptor: UploadDescriptor) -> bool {
        let Some(resource_uri) = descriptor.ticket.resource_uri().map(str::to_owned) else {
            debug!(task_id = %descriptor.task_id, "Ignoring failure without resource uri");
            return false;
        };

        let mut entries = self.lock_entries();
        entries.insert(resource_uri.clone(), descriptor);
        self.write_through(&entries);

        debug!(resource_uri, "Failure recorded");
        true
    }

    pub fn get(&self, resource_uri: &str) -> Option<UploadDescriptor> {
        self.lock_entries().get(resource_uri).cloned()
    }

    pub fn remove(&self, resource_uri: &str) -> Option<UploadDescriptor> {
        let mut entries = self.lock_entries();
        let removed = entries.remove(resource_uri);
        if removed.is_some() {
            self.write_through(&entries);
            debug!(resource_uri, "Failure purged");
        }
        removed
    }

    /// Remove the entry for `resource_uri` unless it was updated after `cutoff`
    pub fn remove_if_older(
        &self,
        resource_uri: &str,
        cutoff: DateTime<Utc>,
    ) -> Option<UploadDescriptor> {
        let mut entries = self.lock_entries();
        if entries.get(resource_uri)?.updated_at > cutoff {
            debug!(resource_uri, "Keeping failure newer than cutoff");
            return None;
        }

        let removed = entries.remove(resource_uri);
        self.write_through(&entries);
        debug!(resource_uri, "Failure purged");
        removed
    }

    pub fn entries(&self) -> Vec<UploadDescriptor> {
        self.lock_entries().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    pub fn snapshot(&self) -> CoordinatorRecord {
        CoordinatorRecord {
            failed_descriptors: self.lock_entries().clone(),
        }
    }

    /// Write the current entries to the coordinator partition
    pub fn save(&self) -> Result<()> {
        let entries = self.lock_entries();
        self.save_entries(&entries)
    }

    fn save_entries(&self, entries: &BTreeMap<String, UploadDescriptor>) -> Result<()> {
        let mut encoded = BTreeMap::new();
        for (resource_uri, descriptor) in entries {
            match serde_json::to_value(descriptor) {
                Ok(value) => {
                    encoded.insert(resource_uri.as_str(), value);
                }
                Err(e) => warn!(resource_uri, error = %e, "Skipping failure that cannot be encoded"),
            }
        }

        let record = EncodedRecord {
            failed_descriptors: encoded,
        };
        self.partition
            .insert(encode_meta_key(COORDINATOR_RECORD_KEY), codec::encode(&record)?)?;
        Ok(())
    }

    fn write_through(&self, entries: &BTreeMap<String, UploadDescriptor>) {
        if let Err(e) = self.save_entries(entries) {
            warn!(error = %e, "Failed to persist failure ledger");
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, BTreeMap<String, UploadDescriptor>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::UploadTicket;
    use crate::store::Store;
    use tempfile::TempDir;

    fn failed(uri: &str, error: &str) -> UploadDescriptor {
        let mut descriptor =
            UploadDescriptor::new("/tmp/clip.mp4", UploadTicket::for_resource(uri)).unwrap();
        descriptor.fail(error);
        descriptor
    }

    #[test]
    fn test_record_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path().join("uplink")).unwrap();
        let ledger = FailureLedger::restore(store.coordinator()).unwrap();

        assert!(ledger.is_empty());
        assert!(ledger.record(failed("/videos/1", "timeout")));

        let entry = ledger.get("/videos/1").unwrap();
        assert_eq!(entry.error.as_deref(), Some("timeout"));
        assert!(ledger.get("/videos/2").is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path().join("uplink")).unwrap();
        let ledger = FailureLedger::restore(store.coordinator()).unwrap();

        ledger.record(failed("/videos/1", "first"));
        ledger.record(failed("/videos/1", "second"));

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("/videos/1").unwrap().error.as_deref(), Some("second"));
    }

    #[test]
    fn test_ticket_without_resource_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path().join("uplink")).unwrap();
        let ledger = FailureLedger::restore(store.coordinator()).unwrap();

        let mut descriptor = failed("/videos/1", "boom");
        descriptor.ticket.resource = None;

        assert!(!ledger.record(descriptor));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_survives_restore() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("uplink");

        {
            let store = Store::open(&path).unwrap();
            let ledger = FailureLedger::restore(store.coordinator()).unwrap();
            ledger.record(failed("/videos/1", "a"));
            ledger.record(failed("/videos/2", "b"));
            ledger.remove("/videos/2");
            store.persist().unwrap();
        }

        let store = Store::open(&path).unwrap();
        let ledger = FailureLedger::restore(store.coordinator()).unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(ledger.get("/videos/1").is_some());
        assert!(ledger.get("/videos/2").is_none());
    }

    #[test]
    fn test_unreadable_entry_does_not_hide_others() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path().join("uplink")).unwrap();

        let good = serde_json::to_value(failed("/videos/1", "a")).unwrap();
        let record = serde_json::json!({
            "version": 1,
            "failed_descriptors": {
                "/videos/1": good,
                "/videos/2": { "task_id": "not-a-uuid" }
            }
        });
        store
            .coordinator()
            .insert(
                encode_meta_key(COORDINATOR_RECORD_KEY),
                serde_json::to_vec(&record).unwrap(),
            )
            .unwrap();

        let ledger = FailureLedger::restore(store.coordinator()).unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(ledger.get("/videos/1").is_some());

        // Saving rewrites the record without the unreadable entry
        ledger.save().unwrap();
        let reloaded = FailureLedger::restore(store.coordinator()).unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_remove_if_older_keeps_newer_failure() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path().join("uplink")).unwrap();
        let ledger = FailureLedger::restore(store.coordinator()).unwrap();

        let entry = failed("/videos/1", "late failure");
        let updated_at = entry.updated_at;
        ledger.record(entry);

        let before = updated_at - chrono::Duration::seconds(1);
        assert!(ledger.remove_if_older("/videos/1", before).is_none());
        assert_eq!(ledger.len(), 1);

        let after = updated_at + chrono::Duration::seconds(1);
        assert!(ledger.remove_if_older("/videos/1", after).is_some());
        assert!(ledger.is_empty());
        assert!(ledger.remove_if_older("/videos/1", after).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_source_does_not_block_saves() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        use std::path::PathBuf;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("uplink");
        let odd_source = PathBuf::from(OsStr::from_bytes(b"/tmp/clip-\xff.mp4"));

        {
            let store = Store::open(&path).unwrap();
            let ledger = FailureLedger::restore(store.coordinator()).unwrap();

            let mut odd =
                UploadDescriptor::new(odd_source.clone(), UploadTicket::for_resource("/videos/a"))
                    .unwrap();
            odd.fail("boom");
            ledger.record(odd);
            ledger.record(failed("/videos/b", "boom"));

            ledger.save().unwrap();
            store.persist().unwrap();
        }

        let store = Store::open(&path).unwrap();
        let ledger = FailureLedger::restore(store.coordinator()).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get("/videos/a").unwrap().source, odd_source);
        assert!(ledger.get("/videos/b").is_some());
    }

    #[test]
    fn test_record_encoding() {
        let mut record = CoordinatorRecord::default();
        record
            .failed_descriptors
            .insert("/videos/1".to_string(), failed("/videos/1", "x"));

        let bytes = record.encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["version"], 1);
        assert!(json["failed_descriptors"]["/videos/1"].is_object());

        let decoded = CoordinatorRecord::decode(&bytes).unwrap();
        assert_eq!(
            decoded.failed_descriptors["/videos/1"].identifier(),
            "/videos/1"
        );
    }
}
