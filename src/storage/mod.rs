//! Blob storage for invoices and debug artifacts.
//!
//! [`DedupStore`] owns the invoice key layout and the "exists before work"
//! policy; backends only list and upload raw objects.

mod memory;
mod supabase;

pub use memory::MemoryBlobStore;
pub use supabase::SupabaseStorage;

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{sanitize_segment, UcCode};
use crate::pdf::is_pdf_signature;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Minimal object-store surface used by the pipeline.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Object names (not full keys) directly under `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Upload `bytes` at `key`, overwriting any existing object.
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Bucket name, passed on to the downstream script.
    fn bucket(&self) -> &str;
}

/// Deterministic object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageObjectKey(String);

impl StorageObjectKey {
    /// `{month}/{account}/{uc}.pdf`
    pub fn invoice(month_key: &str, account_name: &str, uc: &UcCode) -> Self {
        Self(format!(
            "{}/{}/{}.pdf",
            month_key,
            sanitize_segment(account_name),
            uc.sanitized()
        ))
    }

    /// `debug/{month}/{account}/{reason}_{timestamp_ms}.{ext}`
    pub fn debug(
        month_key: &str,
        account_name: &str,
        reason: &str,
        timestamp_ms: i64,
        extension: &str,
    ) -> Self {
        Self(format!(
            "debug/{}/{}/{}_{}.{}",
            month_key,
            sanitize_segment(account_name),
            sanitize_segment(reason),
            timestamp_ms,
            extension
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before the last `/`.
    pub fn parent_prefix(&self) -> &str {
        self.0.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit_once('/').map(|(_, f)| f).unwrap_or(&self.0)
    }
}

impl fmt::Display for StorageObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn build_storage_key(month_key: &str, account_name: &str, uc: &UcCode) -> StorageObjectKey {
    StorageObjectKey::invoice(month_key, account_name, uc)
}

/// Existence checks and idempotent invoice uploads.
#[derive(Clone)]
pub struct DedupStore {
    blobs: Arc<dyn BlobStore>,
}

impl DedupStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    pub fn bucket(&self) -> &str {
        self.blobs.bucket()
    }

    /// Whether this month's invoice for `uc` is already stored.
    pub async fn exists(&self, month_key: &str, account_name: &str, uc: &UcCode) -> Result<bool> {
        let key = build_storage_key(month_key, account_name, uc);
        let names = self.blobs.list(key.parent_prefix()).await?;
        Ok(names.iter().any(|name| name == key.file_name()))
    }

    /// Upload invoice bytes; anything without the PDF signature is refused.
    pub async fn put(
        &self,
        bytes: Vec<u8>,
        month_key: &str,
        account_name: &str,
        uc: &UcCode,
    ) -> Result<StorageObjectKey> {
        if !is_pdf_signature(&bytes) {
            return Err(Error::Storage(format!(
                "refusing to store {} bytes for UC {uc}: not a PDF",
                bytes.len()
            )));
        }
        let key = build_storage_key(month_key, account_name, uc);
        self.blobs
            .upload(key.as_str(), bytes, PDF_CONTENT_TYPE)
            .await?;
        Ok(key)
    }
}
