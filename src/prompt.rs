//! Operator confirmation for interactive runs (CAPTCHA hand-off).

use anyhow::Result;

pub trait OperatorPrompter: Send + Sync {
    /// Block until the operator answers. `true` means "continue".
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Always answers the same way; used by non-interactive runs and tests.
#[derive(Debug, Clone)]
pub struct FixedPrompter {
    allow: bool,
}

impl FixedPrompter {
    pub fn allow() -> Self {
        Self { allow: true }
    }

    pub fn deny() -> Self {
        Self { allow: false }
    }
}

impl OperatorPrompter for FixedPrompter {
    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(self.allow)
    }
}

#[cfg(feature = "cli")]
pub use terminal::TerminalPrompter;

#[cfg(feature = "cli")]
mod terminal {
    use anyhow::{Context, Result};
    use dialoguer::console::Term;
    use dialoguer::theme::ColorfulTheme;
    use dialoguer::Confirm;

    use super::OperatorPrompter;

    /// Asks on stderr so stdout stays clean for the JSON report.
    #[derive(Debug, Clone, Default)]
    pub struct TerminalPrompter;

    impl OperatorPrompter for TerminalPrompter {
        fn confirm(&self, prompt: &str) -> Result<bool> {
            let answer = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .default(true)
                .interact_on_opt(&Term::stderr())
                .context("Failed to prompt operator")?;
            Ok(answer.unwrap_or(false))
        }
    }
}
