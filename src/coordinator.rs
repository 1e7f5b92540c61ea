//! Upload coordinator
//!
//! The coordinator is the application-facing entry point. It owns:
//!
//! - the upload queue ([`DescriptorQueue`]) bound to the background session
//! - the deletion queue ([`DeletionCoordinator`]) bound to the foreground session
//! - the [`FailureLedger`], fed by the upload queue's failure sink
//!
//! Construct exactly one per process at the composition root and pass it to
//! whatever needs it.
//!
//! Policies:
//!
//! - A submission for a resource that already has a queued upload is
//!   coalesced into the existing one; nothing new is enqueued.
//! - Lookups check queued uploads before the ledger, so a retry in flight
//!   shadows an older failure.
//! - A confirmed deletion purges the ledger entry for that resource.
//!   Cancelling an upload never touches the ledger.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::deletion::{DeletionCoordinator, DeletionEvent, DeletionObserver, DeletionStore};
use crate::descriptor::{SubmitError, UploadDescriptor, UploadTicket};
use crate::failures::{CoordinatorRecord, FailureLedger};
use crate::observability::{Metrics, MetricsSnapshot};
use crate::queue::{DescriptorQueue, DescriptorStore, FailureSink, QueueOptions, UploadEvent};
use crate::session::Sessions;
use crate::store::{Store, StoreError};

/// Identifier of the background session uploads run on
pub const BACKGROUND_SESSION_IDENTIFIER: &str = "com.uplink.upload";
/// Name of the upload queue
pub const UPLOAD_QUEUE_NAME: &str = "uploader";
/// Retries after the first failed delete attempt
pub const DELETION_RETRY_COUNT: u32 = 2;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Tuning that does not change coordinator semantics
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub max_concurrent_uploads: usize,
    pub deletion_backoff: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 4,
            deletion_backoff: Duration::from_millis(500),
        }
    }
}

/// What `submit_upload` did with a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// A new descriptor was handed to the upload queue
    Enqueued(UploadDescriptor),
    /// An upload for the same resource is already queued; this is it
    AlreadyActive(UploadDescriptor),
}

impl Submission {
    pub fn descriptor(&self) -> &UploadDescriptor {
        match self {
            Self::Enqueued(descriptor) | Self::AlreadyActive(descriptor) => descriptor,
        }
    }
}

/// Feeds queue outcomes into the ledger and metrics
struct LedgerRecorder {
    ledger: Arc<FailureLedger>,
    metrics: Arc<Metrics>,
}

impl FailureSink for LedgerRecorder {
    fn descriptor_failed(&self, descriptor: UploadDescriptor) {
        self.metrics.upload_failed();
        self.ledger.record(descriptor);
    }
}

impl DeletionObserver for LedgerRecorder {
    fn deletion_finished(&self, event: &DeletionEvent) {
        match event {
            DeletionEvent::Deleted {
                resource_uri,
                requested_at,
                ..
            } => {
                self.metrics.deletion_completed();
                // A failure recorded after the request is about a newer upload
                if self
                    .ledger
                    .remove_if_older(resource_uri, *requested_at)
                    .is_some()
                {
                    debug!(resource_uri, "Purged failure for deleted resource");
                }
            }
            DeletionEvent::Failed { .. } => self.metrics.deletion_failed(),
        }
    }
}

pub struct UploadCoordinator {
    uploads: DescriptorQueue,
    deletions: DeletionCoordinator,
    ledger: Arc<FailureLedger>,
    metrics: Arc<Metrics>,
}

impl UploadCoordinator {
    /// Build the coordinator and its queues over `store`
    ///
    /// Restores the failure ledger and reloads both queues' unfinished work
    /// without starting any of it. Must be called within a Tokio runtime.
    pub fn open(store: &Store, sessions: Sessions, options: CoordinatorOptions) -> Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let ledger = Arc::new(FailureLedger::restore(store.coordinator())?);
        let recorder = Arc::new(LedgerRecorder {
            ledger: ledger.clone(),
            metrics: metrics.clone(),
        });

        let uploads = DescriptorQueue::open(
            QueueOptions::builder()
                .name(UPLOAD_QUEUE_NAME)
                .session_identifier(BACKGROUND_SESSION_IDENTIFIER)
                .max_concurrent_uploads(options.max_concurrent_uploads)
                .build(),
            sessions.background,
            DescriptorStore::new(store.uploads()),
            recorder.clone(),
        )?;

        let deletions = DeletionCoordinator::open(
            sessions.foreground,
            DeletionStore::new(store.deletions()),
            DELETION_RETRY_COUNT,
            options.deletion_backoff,
            Some(recorder),
        )?;

        info!(failed = ledger.len(), "Upload coordinator ready");
        Ok(Self {
            uploads,
            deletions,
            ledger,
            metrics,
        })
    }

    /// Resume foreground work (deletions) left over from a previous run
    pub fn application_did_finish_launching(&self) -> usize {
        self.deletions.resume_pending()
    }

    /// Relaunch hook for background upload work
    ///
    /// Returns whether `session_identifier` names this coordinator's
    /// background session. When it does, persisted uploads are resumed and
    /// `completion` is called; otherwise `completion` is never called.
    pub fn handle_relaunch_events<F>(&self, session_identifier: &str, completion: F) -> bool
    where
        F: FnOnce(),
    {
        self.uploads
            .handle_relaunch_events(session_identifier, completion)
    }

    /// Submit `source` for upload to the resource named by `ticket`
    ///
    /// Only a ticket without a resource uri is rejected here. Anything that
    /// goes wrong later, including persisting the descriptor, ends up in the
    /// failure ledger and is found with [`Self::lookup_upload`].
    pub fn submit_upload(
        &self,
        source: impl Into<PathBuf>,
        ticket: UploadTicket,
    ) -> std::result::Result<Submission, SubmitError> {
        let descriptor = UploadDescriptor::new(source, ticket)?;
        let identifier = descriptor.identifier().to_string();
        let task_id = descriptor.task_id;
        let source = descriptor.source.display().to_string();

        let accepted = self.uploads.enqueue_unless(descriptor.clone(), |queued| {
            queued.ticket.resource_uri() == Some(identifier.as_str())
        });

        match accepted {
            Ok(()) => {
                info!(identifier, %task_id, source, "Submitted upload");
                self.metrics.upload_submitted();
                Ok(Submission::Enqueued(descriptor))
            }
            Err(existing) => {
                info!(
                    identifier,
                    task_id = %existing.task_id,
                    "Upload already queued, coalesced submission"
                );
                self.metrics.upload_coalesced();
                Ok(Submission::AlreadyActive(existing))
            }
        }
    }

    /// Cancel any queued upload for `resource_uri` and delete the resource
    ///
    /// The deletion is requested whether or not an upload was queued.
    pub fn delete_upload(&self, resource_uri: &str) {
        if let Some(descriptor) = self.lookup_upload(resource_uri) {
            // A ledger hit is not queued, so this is a no-op for it
            if self.uploads.cancel(&descriptor) {
                self.metrics.upload_cancelled();
            }
        }

        info!(resource_uri, "Requesting deletion");
        self.metrics.deletion_requested();
        self.deletions.request_deletion(resource_uri);
    }

    /// The queued upload for `resource_uri`, else its last recorded failure
    pub fn lookup_upload(&self, resource_uri: &str) -> Option<UploadDescriptor> {
        self.find_queued(resource_uri)
            .or_else(|| self.ledger.get(resource_uri))
    }

    /// All uploads currently pending or active
    pub fn queued_uploads(&self) -> Vec<UploadDescriptor> {
        self.uploads.queued()
    }

    /// Every failure in the ledger
    pub fn failed_uploads(&self) -> Vec<UploadDescriptor> {
        self.ledger.entries()
    }

    pub fn subscribe_uploads(&self) -> broadcast::Receiver<UploadEvent> {
        self.uploads.subscribe()
    }

    pub fn subscribe_deletions(&self) -> broadcast::Receiver<DeletionEvent> {
        self.deletions.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The coordinator's durable record (the failure ledger)
    pub fn to_record(&self) -> CoordinatorRecord {
        self.ledger.snapshot()
    }

    /// Write the coordinator record to its partition
    ///
    /// The ledger already writes through on every change; this is for
    /// explicit checkpoints before shutdown.
    pub fn save(&self) -> Result<()> {
        self.ledger.save()?;
        Ok(())
    }

    fn find_queued(&self, resource_uri: &str) -> Option<UploadDescriptor> {
        self.uploads.find_first(|descriptor| {
            descriptor.ticket.resource_uri() == Some(resource_uri)
        })
    }
}
