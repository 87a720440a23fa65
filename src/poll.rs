//! Bounded retry used for every "wait until the UI says so" in the pipeline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};

/// Default pause between checks.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(250);

/// Call `check` until it yields `Some`, or fail with [`Error::Timeout`] once
/// `timeout` has elapsed.
///
/// Errors returned by `check` are treated as "not yet" (frames detach, nodes
/// re-render) and logged at debug level. A single slow check is cut off at the
/// deadline, so the total wait never exceeds `timeout` by more than one
/// interval.
pub async fn poll<T, F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, check()).await {
            Ok(Ok(Some(value))) => return Ok(value),
            Ok(Ok(None)) => {}
            Ok(Err(err)) => tracing::debug!(waiting_for = what, error = %err, "poll check failed"),
            Err(_) => {}
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout {
                waiting_for: what.to_string(),
                timeout,
            });
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn returns_first_positive_result() {
        let calls = AtomicUsize::new(0);
        let value = poll("third call", Duration::from_secs(2), Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(if n >= 2 { Some(n) } else { None }) }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn errors_are_retried() {
        let calls = AtomicUsize::new(0);
        let value = poll("recovers", Duration::from_secs(2), Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::Browser("frame detached".into()))
                } else {
                    Ok(Some("ok"))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "ok");
    }

    #[tokio::test]
    async fn times_out_with_condition_name() {
        let started = std::time::Instant::now();
        let err = poll::<(), _, _>(
            "never",
            Duration::from_millis(50),
            Duration::from_millis(10),
            || async { Ok(None) },
        )
        .await
        .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(1));
        match err {
            Error::Timeout { waiting_for, .. } => assert_eq!(waiting_for, "never"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_check_is_cut_off_at_deadline() {
        let started = std::time::Instant::now();
        let err = poll::<(), _, _>(
            "slow",
            Duration::from_millis(50),
            Duration::from_millis(10),
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Some(()))
            },
        )
        .await
        .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(err.kind(), "timeout");
    }
}
