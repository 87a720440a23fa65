//! Supabase Storage REST backend.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::BlobStore;

const LIST_PAGE_SIZE: usize = 1000;
const MAX_ERROR_BODY: usize = 300;

pub struct SupabaseStorage {
    client: Client,
    base_url: String,
    bucket: String,
    service_key: SecretString,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListRequest<'a> {
    prefix: &'a str,
    limit: usize,
    offset: usize,
    sort_by: SortBy,
    search: &'a str,
}

#[derive(Debug, Serialize)]
struct SortBy {
    column: &'static str,
    order: &'static str,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
}

impl SupabaseStorage {
    pub fn new(
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        service_key: SecretString,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| Error::Storage(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            service_key,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let key = self.service_key.expose_secret();
        request
            .header("apikey", key)
            .header("authorization", format!("Bearer {key}"))
    }

    async fn check(response: Response, action: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        Err(Error::Storage(format!("{action} failed ({status}): {body}")))
    }
}

#[async_trait::async_trait]
impl BlobStore for SupabaseStorage {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, self.bucket);
        let mut names = Vec::new();
        let mut offset = 0;

        loop {
            let body = ListRequest {
                prefix,
                limit: LIST_PAGE_SIZE,
                offset,
                sort_by: SortBy {
                    column: "name",
                    order: "asc",
                },
                search: "",
            };
            let response = self
                .authorized(self.client.post(&url))
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::Storage(format!("list {prefix}: {e}")))?;
            let page: Vec<ListedObject> = Self::check(response, "list")
                .await?
                .json()
                .await
                .map_err(|e| Error::Storage(format!("list {prefix}: invalid response: {e}")))?;

            let fetched = page.len();
            names.extend(page.into_iter().map(|o| o.name));
            if fetched < LIST_PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        Ok(names)
    }

    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, key);
        let size = bytes.len();
        let response = self
            .authorized(self.client.post(&url))
            .header("content-type", content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("upload {key}: {e}")))?;
        Self::check(response, "upload").await?;

        tracing::debug!(key, size, "Uploaded object");
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
