//! Object storage session
//! Uses Apache Arrow object_store crate

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{ObjectStore, local::LocalFileSystem, path::Path as StoragePath};

use super::{DeletionSession, Result, UploadSession};
use crate::descriptor::UploadDescriptor;

/// Session that stores each upload as an object keyed by its resource uri
#[derive(Clone)]
pub struct ObjectStoreSession {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreSession {
    /// Create a session over any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()))
    }

    /// Store objects under a local directory
    pub fn local(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let store = LocalFileSystem::new_with_prefix(root)?;
        Ok(Self::new(Arc::new(store)))
    }

    /// Check if an object exists for the resource uri
    pub async fn exists(&self, resource_uri: &str) -> Result<bool> {
        match self.store.head(&object_path(resource_uri)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn object_path(resource_uri: &str) -> StoragePath {
    StoragePath::from(resource_uri.trim_start_matches('/'))
}

#[async_trait]
impl UploadSession for ObjectStoreSession {
    async fn upload(&self, descriptor: &UploadDescriptor) -> Result<()> {
        let data = Bytes::from(tokio::fs::read(&descriptor.source).await?);
        let size = data.len();
        let path = object_path(descriptor.identifier());

        self.store.put(&path, data.into()).await?;

        tracing::info!(identifier = descriptor.identifier(), size, "Uploaded to object store");
        Ok(())
    }
}

#[async_trait]
impl DeletionSession for ObjectStoreSession {
    async fn delete(&self, resource_uri: &str) -> Result<()> {
        match self.store.delete(&object_path(resource_uri)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {
                tracing::info!(resource_uri, "Deleted from object store");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
