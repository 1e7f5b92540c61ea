use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bon::Builder;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::DescriptorStore;
use crate::descriptor::{DescriptorStatus, UploadDescriptor};
use crate::session::{Result as SessionResult, UploadSessionRef};
use crate::store::Result;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Receives descriptors that reached `Failed`
///
/// Called from the queue's execution tasks in the order failures happen,
/// while the failed descriptor is still visible to [`DescriptorQueue::find_first`].
pub trait FailureSink: Send + Sync {
    fn descriptor_failed(&self, descriptor: UploadDescriptor);
}

/// Status transition broadcast to queue subscribers
#[derive(Debug, Clone)]
pub struct UploadEvent {
    pub queue: String,
    pub descriptor: UploadDescriptor,
}

#[derive(Debug, Clone, Builder)]
pub struct QueueOptions {
    /// Logical queue name, used in logs and events
    #[builder(into)]
    pub name: String,
    /// Background session the queue answers relaunch events for
    #[builder(into)]
    pub session_identifier: String,
    #[builder(default = 4)]
    pub max_concurrent_uploads: usize,
}

struct Entry {
    descriptor: UploadDescriptor,
    handle: Option<AbortHandle>,
}

struct Inner {
    options: QueueOptions,
    session: UploadSessionRef,
    store: DescriptorStore,
    sink: Arc<dyn FailureSink>,
    permits: Arc<Semaphore>,
    // Keyed by task id; v7 ids keep this in submission order
    entries: Mutex<BTreeMap<Uuid, Entry>>,
    events: broadcast::Sender<UploadEvent>,
}

/// DescriptorQueue runs upload descriptors against a session
///
/// Architecture:
/// 1. `enqueue` persists the descriptor, registers it as pending and spawns
///    an execution task
/// 2. The task waits for a concurrency permit, marks the descriptor active
///    and hands it to the session
/// 3. On failure the sink is told first, then the descriptor leaves the queue
/// 4. Terminal descriptors are dropped from the durable store
///
/// Descriptors found in the store at open time are registered as pending but
/// not started: no network work happens until `resume` or a matching
/// `handle_relaunch_events`.
///
/// The queue does not deduplicate by identifier.
#[derive(Clone)]
pub struct DescriptorQueue {
    inner: Arc<Inner>,
}

impl DescriptorQueue {
    /// Open the queue and reload descriptors left over from a previous run
    pub fn open(
        options: QueueOptions,
        session: UploadSessionRef,
        store: DescriptorStore,
        sink: Arc<dyn FailureSink>,
    ) -> Result<Self> {
        let mut entries = BTreeMap::new();

        for mut descriptor in store.load_all()? {
            if descriptor.status.is_terminal() {
                store.remove(&descriptor.task_id)?;
                continue;
            }
            // An upload that was running when the process died starts over
            descriptor.status = DescriptorStatus::Pending;
            entries.insert(
                descriptor.task_id,
                Entry {
                    descriptor,
                    handle: None,
                },
            );
        }

        info!(
            queue = %options.name,
            restored = entries.len(),
            max_concurrent_uploads = options.max_concurrent_uploads,
            "Upload queue opened"
        );

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let permits = Arc::new(Semaphore::new(options.max_concurrent_uploads.max(1)));

        Ok(Self {
            inner: Arc::new(Inner {
                options,
                session,
                store,
                sink,
                permits,
                entries: Mutex::new(entries),
                events,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    /// Accept a descriptor and schedule it
    ///
    /// Must be called from within a Tokio runtime. A descriptor that cannot
    /// be persisted is failed through the sink instead of being returned
    /// as an error.
    pub fn enqueue(&self, descriptor: UploadDescriptor) {
        let _ = self.enqueue_unless(descriptor, |_| false);
    }

    /// Like [`Self::enqueue`], unless a queued descriptor matches `conflict`
    ///
    /// The scan and the insert happen under one lock, so two callers racing
    /// on the same predicate cannot both get in. Returns the matching
    /// descriptor instead of enqueuing.
    pub fn enqueue_unless<P>(
        &self,
        mut descriptor: UploadDescriptor,
        conflict: P,
    ) -> std::result::Result<(), UploadDescriptor>
    where
        P: Fn(&UploadDescriptor) -> bool,
    {
        let mut entries = self.inner.lock_entries();

        if let Some(existing) = entries
            .values()
            .map(|entry| &entry.descriptor)
            .find(|queued| !queued.status.is_terminal() && conflict(queued))
        {
            return Err(existing.clone());
        }

        descriptor.transition(DescriptorStatus::Pending);

        if let Err(e) = self.inner.store.save(&descriptor) {
            drop(entries);
            warn!(
                task_id = %descriptor.task_id,
                identifier = descriptor.identifier(),
                error = %e,
                "Failed to persist descriptor"
            );
            descriptor.fail(format!("failed to persist descriptor: {}", e));
            self.inner.publish(&descriptor);
            self.inner.sink.descriptor_failed(descriptor);
            return Ok(());
        }

        let task_id = descriptor.task_id;
        debug!(
            queue = %self.inner.options.name,
            %task_id,
            identifier = descriptor.identifier(),
            "Descriptor enqueued"
        );
        self.inner.publish(&descriptor);

        let handle = self.spawn(task_id);
        entries.insert(
            task_id,
            Entry {
                descriptor,
                handle: Some(handle),
            },
        );
        Ok(())
    }

    /// Cancel a pending or active descriptor
    ///
    /// Local state changes immediately; the session is notified in the
    /// background. Returns false (and does nothing) if the descriptor is not
    /// queued, e.g. because it already finished.
    pub fn cancel(&self, descriptor: &UploadDescriptor) -> bool {
        let removed = {
            let mut entries = self.inner.lock_entries();
            match entries.get(&descriptor.task_id) {
                Some(entry) if !entry.descriptor.status.is_terminal() => {
                    entries.remove(&descriptor.task_id)
                }
                _ => None,
            }
        };

        let Some(mut entry) = removed else {
            debug!(
                task_id = %descriptor.task_id,
                identifier = descriptor.identifier(),
                "Cancel ignored, descriptor not queued"
            );
            return false;
        };

        if let Some(handle) = entry.handle.take() {
            handle.abort();
        }
        entry.descriptor.transition(DescriptorStatus::Cancelled);

        if let Err(e) = self.inner.store.remove(&entry.descriptor.task_id) {
            warn!(task_id = %entry.descriptor.task_id, error = %e, "Failed to drop cancelled descriptor");
        }

        info!(
            queue = %self.inner.options.name,
            task_id = %entry.descriptor.task_id,
            identifier = entry.descriptor.identifier(),
            "Descriptor cancelled"
        );
        self.inner.publish(&entry.descriptor);

        let session = self.inner.session.clone();
        let cancelled = entry.descriptor;
        tokio::spawn(async move {
            if let Err(e) = session.cancel(&cancelled).await {
                debug!(identifier = cancelled.identifier(), error = %e, "Session cancel failed");
            }
        });

        true
    }

    /// First queued (pending or active) descriptor matching the predicate
    pub fn find_first<P>(&self, predicate: P) -> Option<UploadDescriptor>
    where
        P: Fn(&UploadDescriptor) -> bool,
    {
        self.inner
            .lock_entries()
            .values()
            .map(|entry| &entry.descriptor)
            .find(|descriptor| !descriptor.status.is_terminal() && predicate(descriptor))
            .cloned()
    }

    /// Snapshot of all queued descriptors
    pub fn queued(&self) -> Vec<UploadDescriptor> {
        self.inner
            .lock_entries()
            .values()
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    /// Start descriptors restored from the store. Returns how many were started.
    ///
    /// Calling it again only starts descriptors that are still idle.
    pub fn resume(&self) -> usize {
        let mut entries = self.inner.lock_entries();
        let mut started = 0;

        for (task_id, entry) in entries.iter_mut() {
            if entry.handle.is_none() && entry.descriptor.status == DescriptorStatus::Pending {
                entry.handle = Some(self.spawn(*task_id));
                started += 1;
            }
        }

        if started > 0 {
            info!(queue = %self.inner.options.name, started, "Resumed persisted descriptors");
        }
        started
    }

    /// Reattach background work after a relaunch
    ///
    /// Returns false without calling `completion` when `session_identifier`
    /// is not this queue's background session. Otherwise resumes restored
    /// descriptors, calls `completion` and returns true.
    pub fn handle_relaunch_events<F>(&self, session_identifier: &str, completion: F) -> bool
    where
        F: FnOnce(),
    {
        if session_identifier != self.inner.options.session_identifier {
            debug!(
                queue = %self.inner.options.name,
                session_identifier,
                "Relaunch event for another session"
            );
            return false;
        }

        let resumed = self.resume();
        info!(queue = %self.inner.options.name, session_identifier, resumed, "Handled relaunch events");
        completion();
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.inner.events.subscribe()
    }

    fn spawn(&self, task_id: Uuid) -> AbortHandle {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run(task_id).await }).abort_handle()
    }
}

impl Inner {
    fn lock_entries(&self) -> MutexGuard<'_, BTreeMap<Uuid, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, descriptor: &UploadDescriptor) {
        // No subscribers is fine
        let _ = self.events.send(UploadEvent {
            queue: self.options.name.clone(),
            descriptor: descriptor.clone(),
        });
    }

    async fn run(self: Arc<Self>, task_id: Uuid) {
        let Ok(_permit) = self.permits.clone().acquire_owned().await else {
            return;
        };

        let Some(descriptor) = self.mark_active(task_id) else {
            return;
        };

        let result = self.session.upload(&descriptor).await;
        self.finish(task_id, result);
    }

    fn mark_active(&self, task_id: Uuid) -> Option<UploadDescriptor> {
        // Persist and publish under the guard so a concurrent cancel cannot
        // be followed by a stale write of the active record
        let mut entries = self.lock_entries();
        let entry = entries.get_mut(&task_id)?;
        if entry.descriptor.status != DescriptorStatus::Pending {
            return None;
        }
        entry.descriptor.transition(DescriptorStatus::Active);
        let descriptor = entry.descriptor.clone();

        if let Err(e) = self.store.save(&descriptor) {
            warn!(%task_id, error = %e, "Failed to persist active descriptor");
        }
        debug!(%task_id, identifier = descriptor.identifier(), "Descriptor active");
        self.publish(&descriptor);
        Some(descriptor)
    }

    fn finish(&self, task_id: Uuid, result: SessionResult<()>) {
        let descriptor = {
            let mut entries = self.lock_entries();
            let Some(entry) = entries.remove(&task_id) else {
                // Cancelled while the session was finishing
                return;
            };
            let mut descriptor = entry.descriptor;

            match result {
                Ok(()) => {
                    descriptor.transition(DescriptorStatus::Succeeded);
                    info!(
                        queue = %self.options.name,
                        %task_id,
                        identifier = descriptor.identifier(),
                        "Upload succeeded"
                    );
                }
                Err(e) => {
                    descriptor.fail(e.to_string());
                    warn!(
                        queue = %self.options.name,
                        %task_id,
                        identifier = descriptor.identifier(),
                        error = %e,
                        "Upload failed"
                    );
                    // Still under the guard: lookups see the queued entry or
                    // the recorded failure, and cancel sees nothing
                    self.sink.descriptor_failed(descriptor.clone());
                }
            }
            descriptor
        };

        if let Err(e) = self.store.remove(&task_id) {
            warn!(%task_id, error = %e, "Failed to drop finished descriptor");
        }
        self.publish(&descriptor);
    }
}
