//! Screenshot + HTML dumps for failures.
//!
//! Dumps are diagnostic only: every write is best-effort and a failing disk or
//! bucket never turns into a pipeline error.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::sanitize_segment;
use crate::portal::DebugSnapshot;
use crate::storage::{BlobStore, StorageObjectKey};

/// Where one dump ended up.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DebugArtifact {
    pub reason: String,
    pub local: Vec<PathBuf>,
    pub uploaded: Vec<String>,
}

impl DebugArtifact {
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.uploaded.is_empty()
    }
}

#[derive(Clone, Default)]
pub struct DebugRecorder {
    local_dir: Option<PathBuf>,
    mirror: Option<Arc<dyn BlobStore>>,
}

impl DebugRecorder {
    pub fn new(local_dir: impl Into<PathBuf>) -> Self {
        Self {
            local_dir: Some(local_dir.into()),
            mirror: None,
        }
    }

    /// Records nothing locally; combine with [`Self::with_mirror`] for bucket-only dumps.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_mirror(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.mirror = Some(store);
        self
    }

    pub async fn record(
        &self,
        snapshot: &DebugSnapshot,
        month_key: &str,
        account_name: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DebugArtifact {
        let timestamp_ms = now.timestamp_millis();
        let mut artifact = DebugArtifact {
            reason: reason.to_string(),
            ..Default::default()
        };

        let html = snapshot.html.as_ref().map(|html| match &snapshot.url {
            Some(url) => format!("<!-- {url} -->\n{html}"),
            None => html.clone(),
        });
        let files: Vec<(&str, &str, Vec<u8>)> = [
            snapshot
                .screenshot
                .as_ref()
                .map(|png| ("png", "image/png", png.clone())),
            html.map(|h| ("html", "text/html; charset=utf-8", h.into_bytes())),
        ]
        .into_iter()
        .flatten()
        .collect();

        if files.is_empty() {
            tracing::warn!(account = account_name, reason, "Debug snapshot is empty");
            return artifact;
        }

        for (extension, content_type, bytes) in files {
            let key = StorageObjectKey::debug(month_key, account_name, reason, timestamp_ms, extension);

            if let Some(dir) = &self.local_dir {
                let path = dir.join(key.as_str().trim_start_matches("debug/"));
                match write_local(&path, &bytes).await {
                    Ok(()) => artifact.local.push(path),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to write debug dump"),
                }
            }

            if let Some(store) = &self.mirror {
                match store.upload(key.as_str(), bytes, content_type).await {
                    Ok(()) => artifact.uploaded.push(key.to_string()),
                    Err(e) => tracing::warn!(key = %key, error = %e, "Failed to mirror debug dump"),
                }
            }
        }

        tracing::info!(
            account = account_name,
            reason = %sanitize_segment(reason),
            local = artifact.local.len(),
            uploaded = artifact.uploaded.len(),
            "Saved debug dump"
        );
        artifact
    }
}

async fn write_local(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}
