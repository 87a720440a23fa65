use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid UC code {value:?}: no digits left after normalization")]
pub struct UcCodeError {
    value: String,
}

/// Utility-account ("UC") identifier, normalized to ASCII digits only.
///
/// The portal renders codes with separators and padding that vary between
/// screens, so every comparison happens on the digits-only form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UcCode(String);

impl UcCode {
    pub fn parse(raw: &str) -> Result<Self, UcCodeError> {
        let digits = digits_only(raw);
        if digits.is_empty() {
            Err(UcCodeError {
                value: raw.to_string(),
            })
        } else {
            Ok(Self(digits))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Code as it appears in storage keys.
    pub fn sanitized(&self) -> String {
        sanitize_segment(&self.0)
    }
}

impl fmt::Display for UcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UcCode {
    type Error = UcCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UcCode> for String {
    fn from(code: UcCode) -> Self {
        code.0
    }
}

/// Keep only ASCII digits.
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
///
/// An empty or all-dot result becomes `_` so the segment can never name the
/// current or parent directory.
pub fn sanitize_segment(raw: &str) -> String {
    let out: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.chars().all(|c| c == '.') {
        return "_".to_string();
    }
    out
}
