use secrecy::{ExposeSecret, SecretString};

use super::uc::{digits_only, sanitize_segment, UcCode};

/// Tolerance applied when a target does not configure one.
pub const DEFAULT_TOLERANCE_DAYS: u32 = 2;

/// One UC to retrieve for an account, with its optional billing day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub uc: UcCode,
    /// Billing day of month (1-31). `None` means "every day".
    pub day: Option<u32>,
    pub tolerance_days: u32,
}

impl Target {
    pub fn new(uc: UcCode) -> Self {
        Self {
            uc,
            day: None,
            tolerance_days: DEFAULT_TOLERANCE_DAYS,
        }
    }

    /// Set the billing day. Days outside 1-31 are ignored and logged.
    pub fn with_day(mut self, day: Option<u32>) -> Self {
        self.day = match day {
            Some(d) if (1..=31).contains(&d) => Some(d),
            Some(d) => {
                tracing::warn!(uc = %self.uc, day = d, "Ignoring billing day outside 1-31");
                None
            }
            None => None,
        };
        self
    }

    pub fn with_tolerance(mut self, tolerance_days: u32) -> Self {
        self.tolerance_days = tolerance_days;
        self
    }
}

/// Portal login plus the UCs to retrieve for it. Immutable during a run.
#[derive(Debug)]
pub struct Account {
    pub id: String,
    pub name: String,
    /// Login document (CPF/CNPJ) as stored; typed digits-only.
    pub document: String,
    pub password: SecretString,
    targets: Vec<Target>,
}

impl Account {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        document: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            document: document.into(),
            password,
            targets: Vec::new(),
        }
    }

    /// Add a target. A UC already present is the same unit of work; the first
    /// definition wins and `false` is returned.
    pub fn add_target(&mut self, target: Target) -> bool {
        if self.targets.iter().any(|t| t.uc == target.uc) {
            return false;
        }
        self.targets.push(target);
        true
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.add_target(target);
        self
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn document_digits(&self) -> String {
        digits_only(&self.document)
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Account name as it appears in storage keys.
    pub fn sanitized_name(&self) -> String {
        sanitize_segment(&self.name)
    }
}
