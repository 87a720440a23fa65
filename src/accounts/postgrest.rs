//! Supabase PostgREST account source.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use crate::models::Account;

use super::{assemble_accounts, AccountRow, AccountSource, TargetRow};

pub struct PostgrestAccountSource {
    client: Client,
    base_url: String,
    service_key: SecretString,
    accounts_table: String,
    targets_table: String,
    active_column: String,
}

impl PostgrestAccountSource {
    pub fn new(
        base_url: impl Into<String>,
        service_key: SecretString,
        accounts_table: impl Into<String>,
        targets_table: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key,
            accounts_table: accounts_table.into(),
            targets_table: targets_table.into(),
            active_column: "active".to_string(),
        })
    }

    /// Boolean column both tables are filtered on (`active` by default).
    pub fn with_active_column(mut self, column: impl Into<String>) -> Self {
        self.active_column = column.into();
        self
    }

    async fn fetch_active<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let key = self.service_key.expose_secret();
        let response = self
            .client
            .get(&url)
            .query(&[("select", "*"), (self.active_column.as_str(), "eq.true")])
            .header("apikey", key)
            .header("authorization", format!("Bearer {key}"))
            .header("accept", "application/json")
            .send()
            .await
            .with_context(|| format!("Failed to query {table}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Querying {table} failed ({status}): {body}");
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {table} rows"))
    }
}

#[async_trait::async_trait]
impl AccountSource for PostgrestAccountSource {
    async fn load(&self) -> Result<Vec<Account>> {
        let accounts: Vec<AccountRow> = self.fetch_active(&self.accounts_table).await?;
        let targets: Vec<TargetRow> = self.fetch_active(&self.targets_table).await?;
        tracing::debug!(
            accounts = accounts.len(),
            targets = targets.len(),
            "Loaded account rows"
        );
        Ok(assemble_accounts(accounts, targets))
    }
}
