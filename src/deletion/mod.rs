//! Deletion queue with a fixed retry budget
//!
//! Runs remote deletes on the foreground session, separately from the
//! upload queue. Each request gets one attempt plus `retry_count` retries
//! with exponential backoff, then reports through its own event channel.

pub mod store;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::descriptor::DeletionRequest;
use crate::session::DeletionSessionRef;
pub use store::DeletionStore;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Longest wait between two attempts
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Outcome of a deletion request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionEvent {
    Deleted {
        request_id: Uuid,
        resource_uri: String,
        attempts: u32,
        requested_at: DateTime<Utc>,
    },
    Failed {
        request: DeletionRequest,
        error: String,
    },
}

impl DeletionEvent {
    pub fn resource_uri(&self) -> &str {
        match self {
            Self::Deleted { resource_uri, .. } => resource_uri,
            Self::Failed { request, .. } => &request.resource_uri,
        }
    }
}

/// Synchronous hook invoked for every deletion outcome, before broadcast
pub trait DeletionObserver: Send + Sync {
    fn deletion_finished(&self, event: &DeletionEvent);
}

struct Inner {
    session: DeletionSessionRef,
    store: DeletionStore,
    retry_count: u32,
    backoff_base: Duration,
    observer: Option<Arc<dyn DeletionObserver>>,
    // Restored from the store, waiting for `resume_pending`
    restored: Mutex<BTreeMap<Uuid, DeletionRequest>>,
    events: broadcast::Sender<DeletionEvent>,
}

#[derive(Clone)]
pub struct DeletionCoordinator {
    inner: Arc<Inner>,
}

impl DeletionCoordinator {
    /// Open the coordinator and load requests left over from a previous run
    ///
    /// Restored requests are not executed until [`Self::resume_pending`].
    pub fn open(
        session: DeletionSessionRef,
        store: DeletionStore,
        retry_count: u32,
        backoff_base: Duration,
        observer: Option<Arc<dyn DeletionObserver>>,
    ) -> crate::store::Result<Self> {
        let restored: BTreeMap<_, _> = store
            .load_all()?
            .into_iter()
            .map(|request| (request.request_id, request))
            .collect();

        info!(restored = restored.len(), retry_count, "Deletion coordinator opened");

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                session,
                store,
                retry_count,
                backoff_base,
                observer,
                restored: Mutex::new(restored),
                events,
            }),
        })
    }

    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count
    }

    /// Persist a deletion request for `resource_uri` and start it
    ///
    /// Must be called from within a Tokio runtime.
    pub fn request_deletion(&self, resource_uri: &str) -> Uuid {
        let request = DeletionRequest::new(resource_uri, self.inner.retry_count);
        let request_id = request.request_id;

        if let Err(e) = self.inner.store.save(&request) {
            // Still attempt it; it just won't survive a restart
            warn!(%request_id, resource_uri, error = %e, "Failed to persist deletion request");
        }

        debug!(%request_id, resource_uri, "Deletion requested");
        self.spawn(request);
        request_id
    }

    /// Start requests restored from the store. Returns how many were started.
    pub fn resume_pending(&self) -> usize {
        let restored = std::mem::take(&mut *self.inner.lock_restored());
        let started = restored.len();

        for request in restored.into_values() {
            self.spawn(request);
        }

        if started > 0 {
            info!(started, "Resumed persisted deletion requests");
        }
        started
    }

    /// Requests restored from the store that have not been resumed yet
    pub fn restored(&self) -> Vec<DeletionRequest> {
        self.inner.lock_restored().values().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeletionEvent> {
        self.inner.events.subscribe()
    }

    fn spawn(&self, request: DeletionRequest) {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run(request).await });
    }
}

/// Wait after the given failed attempt: base, 2x base, 4x base... capped at [`MAX_BACKOFF`]
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.checked_mul(factor)
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}

impl Inner {
    fn lock_restored(&self) -> MutexGuard<'_, BTreeMap<Uuid, DeletionRequest>> {
        self.restored
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run(&self, mut request: DeletionRequest) {
        loop {
            request.attempts += 1;

            match self.session.delete(&request.resource_uri).await {
                Ok(()) => {
                    if request.attempts > 1 {
                        debug!(
                            resource_uri = %request.resource_uri,
                            attempts = request.attempts,
                            "Deletion succeeded after retry"
                        );
                    }
                    info!(resource_uri = %request.resource_uri, "Resource deleted");
                    self.finish(DeletionEvent::Deleted {
                        request_id: request.request_id,
                        resource_uri: request.resource_uri.clone(),
                        attempts: request.attempts,
                        requested_at: request.requested_at,
                    });
                    return;
                }
                Err(e) => {
                    if request.retries_remaining == 0 {
                        warn!(
                            resource_uri = %request.resource_uri,
                            attempts = request.attempts,
                            error = %e,
                            "Deletion failed after retries"
                        );
                        self.finish(DeletionEvent::Failed {
                            request,
                            error: e.to_string(),
                        });
                        return;
                    }

                    request.retries_remaining -= 1;
                    if let Err(e) = self.store.save(&request) {
                        warn!(request_id = %request.request_id, error = %e, "Failed to persist retry budget");
                    }
                    warn!(
                        resource_uri = %request.resource_uri,
                        attempt = request.attempts,
                        retries_remaining = request.retries_remaining,
                        error = %e,
                        "Deletion failed, retrying"
                    );

                    tokio::time::sleep(backoff_delay(self.backoff_base, request.attempts)).await;
                }
            }
        }
    }

    fn finish(&self, event: DeletionEvent) {
        let request_id = match &event {
            DeletionEvent::Deleted { request_id, .. } => *request_id,
            DeletionEvent::Failed { request, .. } => request.request_id,
        };
        if let Err(e) = self.store.remove(&request_id) {
            warn!(%request_id, error = %e, "Failed to drop finished deletion request");
        }

        if let Some(observer) = &self.observer {
            observer.deletion_finished(&event);
        }
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
