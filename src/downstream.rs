//! Post-run document processing.
//!
//! After every account has been worked, the external reader script is pointed
//! at the month's folder in the bucket. Its failure is reported, never fatal.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

use crate::config::DownstreamConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum DownstreamReport {
    Succeeded,
    Failed { code: Option<i32>, stderr: String },
    TimedOut { after_secs: u64 },
    NotStarted { error: String },
}

#[derive(Debug, Clone)]
pub struct DownstreamScript {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl DownstreamScript {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &DownstreamConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone(), config.timeout)
    }

    pub fn build_args(&self, month_key: &str, bucket: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend([
            "--mes-ref".to_string(),
            month_key.to_string(),
            "--bucket".to_string(),
            bucket.to_string(),
        ]);
        args
    }

    pub async fn run(&self, month_key: &str, bucket: &str) -> DownstreamReport {
        let args = self.build_args(month_key, bucket);
        tracing::info!(program = %self.program, args = ?args, "Running downstream script");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(outcome = "WARN", program = %self.program, error = %e, "Downstream script did not start");
                return DownstreamReport::NotStarted {
                    error: e.to_string(),
                };
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(outcome = "WARN", error = %e, "Downstream script wait failed");
                return DownstreamReport::NotStarted {
                    error: e.to_string(),
                };
            }
            Err(_) => {
                tracing::warn!(outcome = "WARN", timeout = ?self.timeout, "Downstream script timed out");
                return DownstreamReport::TimedOut {
                    after_secs: self.timeout.as_secs(),
                };
            }
        };

        if output.status.success() {
            tracing::info!(outcome = "OK", "Downstream script finished");
            return DownstreamReport::Succeeded;
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = tail(stderr.trim(), 2000);
        tracing::warn!(
            outcome = "WARN",
            code = ?output.status.code(),
            stderr = %stderr,
            "Downstream script failed"
        );
        DownstreamReport::Failed {
            code: output.status.code(),
            stderr,
        }
    }
}

/// Last `max` characters, on a char boundary.
fn tail(text: &str, max: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(max)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> DownstreamScript {
        DownstreamScript::new(
            "sh",
            vec!["-c".to_string(), script.to_string(), "reader".to_string()],
            Duration::from_secs(5),
        )
    }

    #[test]
    fn month_and_bucket_follow_configured_args() {
        let script = DownstreamScript::from_config(&DownstreamConfig::default());
        assert_eq!(
            script.build_args("2025-11", "faturas"),
            vec![
                "leitor_fatura_elektroneoenergia.py",
                "--mes-ref",
                "2025-11",
                "--bucket",
                "faturas"
            ]
        );
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let report = sh(r#"test "$2" = 2025-11 && test "$4" = faturas"#)
            .run("2025-11", "faturas")
            .await;
        assert_eq!(report, DownstreamReport::Succeeded);
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let report = sh("echo broken >&2; exit 3").run("2025-11", "faturas").await;
        assert_eq!(
            report,
            DownstreamReport::Failed {
                code: Some(3),
                stderr: "broken".to_string()
            }
        );
    }

    #[tokio::test]
    async fn missing_program_does_not_start() {
        let script = DownstreamScript::new("/nonexistent/reader", vec![], Duration::from_secs(1));
        let report = script.run("2025-11", "faturas").await;
        assert!(matches!(report, DownstreamReport::NotStarted { .. }));
    }

    #[tokio::test]
    async fn slow_script_times_out() {
        let script = DownstreamScript::new(
            "sh",
            vec!["-c".to_string(), "sleep 5".to_string()],
            Duration::from_millis(100),
        );
        let report = script.run("2025-11", "faturas").await;
        assert!(matches!(report, DownstreamReport::TimedOut { .. }));
    }
}
