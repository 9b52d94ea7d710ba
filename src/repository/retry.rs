//! Backoff for transient connection errors on auto-commit statements.
//!
//! Idempotent statements retry on any connection failure. Statements that
//! must run at most once (the deduction gate and the stock decrement) retry
//! only when the failure proves the statement never reached the server.

use std::future::Future;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self { attempts: 3, base_delay: Duration::from_millis(100) } }
}

impl RetryPolicy {
    pub fn none() -> Self { Self { attempts: 1, base_delay: Duration::ZERO } }

    /// Delay after failed attempt `n` (1-based): base, 2x base, 4x base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// Connection-level failures worth another try. Constraint violations and
/// query errors are not.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|c| c.starts_with("08") || c == "57P01"),
        _ => false,
    }
}

/// Failures raised before a connection was handed out. An I/O error is not
/// one of them: the reply may have been lost after the server committed.
pub fn is_unsent(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|c| c == "08001" || c == "08004"),
        _ => false,
    }
}

pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    retry_when(policy, is_transient, op).await
}

/// Retry for statements that are not safe to run twice.
pub async fn with_retry_once<T, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    retry_when(policy, is_unsent, op).await
}

async fn retry_when<T, F, Fut>(policy: &RetryPolicy, retryable: fn(&sqlx::Error) -> bool, mut op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.attempts && retryable(&err) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient database error, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy { RetryPolicy { attempts, base_delay: Duration::from_millis(1) } }

    #[test]
    fn test_delay_doubles() {
        let p = RetryPolicy { attempts: 5, base_delay: Duration::from_millis(100) };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let out = with_retry(&fast(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 { Err(sqlx::Error::PoolTimedOut) } else { Ok(42) }
        }).await;
        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = with_retry(&fast(2), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(sqlx::Error::PoolTimedOut)
        }).await;
        assert!(matches!(out, Err(sqlx::Error::PoolTimedOut)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    fn reset() -> sqlx::Error {
        sqlx::Error::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset"))
    }

    #[tokio::test]
    async fn test_io_errors_retry_only_for_idempotent_statements() {
        let calls = AtomicU32::new(0);
        let out = with_retry(&fast(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 { Err(reset()) } else { Ok(1) }
        }).await;
        assert_eq!(out.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // a lost reply must surface, never run the decrement a second time
        let decrements = AtomicU32::new(0);
        let out: Result<(), _> = with_retry_once(&fast(3), || async {
            decrements.fetch_add(1, Ordering::SeqCst);
            Err(reset())
        }).await;
        assert!(matches!(out, Err(sqlx::Error::Io(_))));
        assert_eq!(decrements.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_once_still_retries_unacquired_connections() {
        let calls = AtomicU32::new(0);
        let out = with_retry_once(&fast(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 { Err(sqlx::Error::PoolTimedOut) } else { Ok(7) }
        }).await;
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!is_unsent(&reset()));
        assert!(is_transient(&reset()));
    }

    #[tokio::test]
    async fn test_does_not_retry_query_errors() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = with_retry(&fast(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(sqlx::Error::RowNotFound)
        }).await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
