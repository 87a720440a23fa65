//! Local TOML account source.
//!
//! ```toml
//! [[accounts]]
//! id = "1"
//! name = "Loja Centro"
//! document = "12.345.678/0001-90"
//! password_env = "LOJA_CENTRO_SENHA"
//!
//! [[accounts.targets]]
//! uc = "7001234"
//! day = 15
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::models::Account;

use super::{assemble_accounts, default_active, AccountRow, AccountSource, TargetRow};

#[derive(Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<FileAccount>,
}

#[derive(Deserialize)]
struct FileAccount {
    id: String,
    name: String,
    document: String,
    #[serde(default)]
    password: Option<String>,
    /// Environment variable holding the password; preferred over `password`.
    #[serde(default)]
    password_env: Option<String>,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    targets: Vec<FileTarget>,
}

#[derive(Deserialize)]
struct FileTarget {
    uc: String,
    #[serde(default)]
    day: Option<i64>,
    #[serde(default)]
    tolerance_days: Option<i64>,
    #[serde(default = "default_active")]
    active: bool,
}

pub struct FileAccountSource {
    path: PathBuf,
}

impl FileAccountSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(content: &str) -> Result<Vec<Account>> {
        let file: AccountsFile = toml::from_str(content).context("Invalid accounts file")?;

        let mut account_rows = Vec::new();
        let mut target_rows = Vec::new();
        for account in file.accounts {
            let password = match (&account.password_env, account.password) {
                (Some(var), _) => std::env::var(var)
                    .with_context(|| format!("Missing {var} for account {}", account.name))?,
                (None, Some(password)) => password,
                (None, None) => anyhow::bail!("Account {} has no password", account.name),
            };
            for target in account.targets {
                target_rows.push(TargetRow {
                    account_id: account.id.clone(),
                    uc_code: target.uc,
                    active: target.active,
                    day_of_month: target.day,
                    tolerance_days: target.tolerance_days,
                });
            }
            account_rows.push(AccountRow {
                id: account.id,
                name: account.name,
                document: account.document,
                password,
                active: account.active,
            });
        }

        Ok(assemble_accounts(account_rows, target_rows))
    }
}

#[async_trait::async_trait]
impl AccountSource for FileAccountSource {
    async fn load(&self) -> Result<Vec<Account>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read accounts file: {}", self.path.display()))?;
        Self::parse(&content)
    }
}
