//! Failure taxonomy for the retrieval pipeline.
//!
//! UC-level errors (`Timeout`, `StructuralUi`, `Extraction`, `Storage`, `Browser`) are
//! caught by the per-UC loop. `Auth` and `Challenge` end the current account only.

use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A bounded wait never resolved.
    #[error("timed out after {timeout:?} waiting for {waiting_for}")]
    Timeout {
        waiting_for: String,
        timeout: Duration,
    },

    /// An expected control or UI state never appeared.
    #[error("expected {element} was not found: {detail}")]
    StructuralUi { element: String, detail: String },

    #[error("login failed: {0}")]
    Auth(String),

    #[error("login blocked by interactive challenge: {0}")]
    Challenge(String),

    #[error("invoice extraction failed: {0}")]
    Extraction(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("browser error: {0}")]
    Browser(String),
}

impl Error {
    pub fn structural(element: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::StructuralUi {
            element: element.into(),
            detail: detail.into(),
        }
    }

    /// Errors that abandon the whole account rather than a single UC.
    pub fn is_account_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Challenge(_))
    }

    /// Short tag used as the debug-artifact reason prefix.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::StructuralUi { .. } => "structural",
            Self::Auth(_) => "auth",
            Self::Challenge(_) => "challenge",
            Self::Extraction(_) => "extraction",
            Self::Storage(_) => "storage",
            Self::Browser(_) => "browser",
        }
    }

    /// A precondition wait that timed out is reported as the missing element.
    pub fn missing(self, element: &str) -> Self {
        match self {
            Self::Timeout {
                waiting_for,
                timeout,
            } => Self::StructuralUi {
                element: element.to_string(),
                detail: format!("{waiting_for} not satisfied within {timeout:?}"),
            },
            other => other,
        }
    }
}

#[cfg(feature = "chrome")]
impl From<chromiumoxide::error::CdpError> for Error {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Self::Browser(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_login_failures_are_account_fatal() {
        assert!(Error::Auth("bad password".into()).is_account_fatal());
        assert!(Error::Challenge("captcha".into()).is_account_fatal());
        assert!(!Error::Extraction("none".into()).is_account_fatal());
        assert!(!Error::Storage("503".into()).is_account_fatal());
        assert!(!Error::structural("menu", "gone").is_account_fatal());
    }

    #[test]
    fn missing_turns_timeouts_into_structural_errors() {
        let err = Error::Timeout {
            waiting_for: "radio button".into(),
            timeout: Duration::from_secs(3),
        }
        .missing("invoice radio");

        match err {
            Error::StructuralUi { element, detail } => {
                assert_eq!(element, "invoice radio");
                assert!(detail.contains("radio button"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let passthrough = Error::Auth("x".into()).missing("anything");
        assert_eq!(passthrough.kind(), "auth");
    }
}
