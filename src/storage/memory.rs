//! In-process storage for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{SlipStorage, SlipUpload, StorageError};

#[derive(Debug, Default)]
struct Files {
    by_ref: HashMap<String, Vec<u8>>,
    fail_store: bool,
    fail_delete: bool,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Files>>,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }

    pub async fn fail_store(&self, on: bool) { self.inner.lock().await.fail_store = on; }
    pub async fn fail_delete(&self, on: bool) { self.inner.lock().await.fail_delete = on; }

    pub async fn contains(&self, reference: &str) -> bool { self.inner.lock().await.by_ref.contains_key(reference) }
    pub async fn len(&self) -> usize { self.inner.lock().await.by_ref.len() }
    pub async fn is_empty(&self) -> bool { self.len().await == 0 }
}

#[async_trait]
impl SlipStorage for MemoryStorage {
    async fn store(&self, upload: &SlipUpload) -> Result<String, StorageError> {
        let mut files = self.inner.lock().await;
        if files.fail_store { return Err(StorageError::Injected); }
        let reference = format!("/uploads/slips/{}", upload.stored_name());
        files.by_ref.insert(reference.clone(), upload.bytes.clone());
        Ok(reference)
    }

    async fn delete(&self, reference: &str) -> Result<(), StorageError> {
        let mut files = self.inner.lock().await;
        if files.fail_delete { return Err(StorageError::Injected); }
        files.by_ref.remove(reference);
        Ok(())
    }
}
