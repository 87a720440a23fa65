//! Account and target sources.
//!
//! Every source produces the same two row shapes, which [`assemble_accounts`]
//! joins and normalizes: inactive rows are dropped, UC codes become digits,
//! duplicates collapse, bad days are ignored and tolerance defaults to 2.

mod file;
mod postgrest;

pub use file::FileAccountSource;
pub use postgrest::PostgrestAccountSource;

use std::collections::HashMap;

use anyhow::Result;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::models::{Account, Target, UcCode, DEFAULT_TOLERANCE_DAYS};

#[async_trait::async_trait]
pub trait AccountSource: Send + Sync {
    /// Load every active account with its active targets.
    async fn load(&self) -> Result<Vec<Account>>;
}

fn default_active() -> bool {
    true
}

/// Ids arrive as numbers from some tables and as UUID strings from others.
fn id_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

/// `{id, name, document, password, active}`
#[derive(Deserialize)]
pub struct AccountRow {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(alias = "nome")]
    pub name: String,
    #[serde(alias = "documento", alias = "cpf_cnpj")]
    pub document: String,
    #[serde(alias = "senha")]
    pub password: String,
    #[serde(default = "default_active", alias = "ativo")]
    pub active: bool,
}

/// `{accountId, ucCode, active, dayOfMonth, toleranceDays}`
#[derive(Debug, Deserialize)]
pub struct TargetRow {
    #[serde(alias = "accountId", alias = "conta_id", deserialize_with = "id_string")]
    pub account_id: String,
    #[serde(alias = "ucCode", alias = "uc")]
    pub uc_code: String,
    #[serde(default = "default_active", alias = "ativo")]
    pub active: bool,
    #[serde(default, alias = "dayOfMonth", alias = "dia")]
    pub day_of_month: Option<i64>,
    #[serde(default, alias = "toleranceDays", alias = "tolerancia")]
    pub tolerance_days: Option<i64>,
}

impl TargetRow {
    fn to_target(&self) -> Option<Target> {
        let uc = match UcCode::parse(&self.uc_code) {
            Ok(uc) => uc,
            Err(e) => {
                tracing::warn!(account_id = %self.account_id, error = %e, "Skipping target");
                return None;
            }
        };

        // Out-of-range values (including negatives) are rejected by `with_day`.
        let day = self.day_of_month.map(|d| u32::try_from(d).unwrap_or(0));
        let tolerance = match self.tolerance_days {
            Some(t) if t >= 0 => u32::try_from(t).unwrap_or(DEFAULT_TOLERANCE_DAYS),
            Some(t) => {
                tracing::warn!(uc = %uc, tolerance = t, "Ignoring negative tolerance");
                DEFAULT_TOLERANCE_DAYS
            }
            None => DEFAULT_TOLERANCE_DAYS,
        };

        Some(Target::new(uc).with_day(day).with_tolerance(tolerance))
    }
}

/// Join active account rows with their active target rows, keeping source order.
pub fn assemble_accounts(accounts: Vec<AccountRow>, targets: Vec<TargetRow>) -> Vec<Account> {
    let mut by_account: HashMap<&str, Vec<&TargetRow>> = HashMap::new();
    for row in targets.iter().filter(|t| t.active) {
        by_account.entry(row.account_id.as_str()).or_default().push(row);
    }

    let mut assembled = Vec::new();
    for row in accounts.into_iter().filter(|a| a.active) {
        let mut account = Account::new(
            row.id.clone(),
            row.name,
            row.document,
            SecretString::from(row.password),
        );
        for target_row in by_account.get(row.id.as_str()).into_iter().flatten() {
            if let Some(target) = target_row.to_target() {
                let uc = target.uc.clone();
                if !account.add_target(target) {
                    tracing::debug!(account = %account.name, uc = %uc, "Duplicate UC ignored");
                }
            }
        }
        if account.targets().is_empty() {
            tracing::info!(account = %account.name, "Account has no active targets");
        }
        assembled.push(account);
    }

    assembled
}
