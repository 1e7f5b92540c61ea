//! Scripted sessions and helpers shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use uplink::session::{DeletionSession, Result, SessionError, Sessions, UploadSession};
use uplink::store::Store;
use uplink::{CoordinatorOptions, UploadCoordinator, UploadDescriptor};

#[derive(Debug, Clone)]
pub enum Outcome {
    Succeed,
    Fail(String),
    Hang,
}

/// Upload session that plays back scripted outcomes per identifier
///
/// Identifiers without a script succeed.
#[derive(Default)]
pub struct ScriptedUploads {
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    calls: Mutex<Vec<UploadDescriptor>>,
}

impl ScriptedUploads {
    pub fn script(&self, identifier: &str, outcomes: Vec<Outcome>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(identifier.to_string(), outcomes.into());
    }

    pub fn calls(&self) -> Vec<UploadDescriptor> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadSession for ScriptedUploads {
    async fn upload(&self, descriptor: &UploadDescriptor) -> Result<()> {
        self.calls.lock().unwrap().push(descriptor.clone());

        let outcome = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(descriptor.identifier())
            .and_then(VecDeque::pop_front)
            .unwrap_or(Outcome::Succeed);

        match outcome {
            Outcome::Succeed => Ok(()),
            Outcome::Fail(message) => Err(SessionError::RequestFailed(message)),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

/// Deletion session that records every call
#[derive(Default)]
pub struct RecordingDeletions {
    pub fail: bool,
    calls: Mutex<Vec<String>>,
}

impl RecordingDeletions {
    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeletionSession for RecordingDeletions {
    async fn delete(&self, resource_uri: &str) -> Result<()> {
        self.calls.lock().unwrap().push(resource_uri.to_string());
        if self.fail {
            return Err(SessionError::RequestFailed("HTTP 500: Internal Server Error".to_string()));
        }
        Ok(())
    }
}

pub struct TestContext {
    pub coordinator: UploadCoordinator,
    pub uploads: Arc<ScriptedUploads>,
    pub deletions: Arc<RecordingDeletions>,
    pub store: Store,
}

pub fn options() -> CoordinatorOptions {
    CoordinatorOptions {
        max_concurrent_uploads: 4,
        deletion_backoff: Duration::from_millis(1),
    }
}

pub fn open_coordinator(
    dir: &TempDir,
    uploads: Arc<ScriptedUploads>,
    deletions: Arc<RecordingDeletions>,
) -> TestContext {
    let store = Store::open(dir.path().join("uplink")).expect("Failed to open test store");
    let sessions = Sessions::new(uploads.clone(), deletions.clone());
    let coordinator =
        UploadCoordinator::open(&store, sessions, options()).expect("Failed to open coordinator");

    TestContext {
        coordinator,
        uploads,
        deletions,
        store,
    }
}

pub fn default_context(dir: &TempDir) -> TestContext {
    open_coordinator(
        dir,
        Arc::new(ScriptedUploads::default()),
        Arc::new(RecordingDeletions::default()),
    )
}

/// Poll `condition` until it holds, panicking after a few seconds
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
