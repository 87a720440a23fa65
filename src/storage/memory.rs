//! In-memory blob store for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;

use crate::error::Result;

use super::BlobStore;

pub struct MemoryBlobStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
    uploads: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(BTreeMap::new()),
            uploads: AtomicUsize::new(0),
        }
    }

    /// Seed an object without counting it as an upload.
    pub async fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.objects
            .lock()
            .await
            .insert(key.into(), (bytes, "application/octet-stream".to_string()));
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(key).map(|(b, _)| b.clone())
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects.lock().await.get(key).map(|(_, ct)| ct.clone())
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }

    /// Number of `upload` calls, including overwrites.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        let objects = self.objects.lock().await;
        Ok(objects
            .keys()
            .filter_map(|k| k.strip_prefix(&dir))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .await
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
