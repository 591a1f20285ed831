//! Tests for the retry module

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use zqlz_core::{Connection, QueryResult, Result, StatementResult, Transaction, Value, ZqlzError};

use super::*;
use crate::error::PoolError;
use crate::pool::PoolOptions;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

// =============================================================================
// RetryPolicy tests
// =============================================================================

#[test]
fn test_linear_delays() {
    let policy = RetryPolicy::new(5, ms(500), ms(250));

    assert_eq!(policy.calculate_delay(0), ms(500));
    assert_eq!(policy.calculate_delay(1), ms(750));
    assert_eq!(policy.calculate_delay(2), ms(1000));
    assert_eq!(policy.calculate_delay(3), ms(1250));
}

#[test]
fn test_attempts_clamped_to_one() {
    let policy = RetryPolicy::new(0, ms(10), ms(10));
    assert_eq!(policy.max_attempts(), 1);
    assert!(!policy.retries_enabled());
}

#[test]
fn test_policy_from_options() {
    let options = PoolOptions::new()
        .with_max_retry(4)
        .with_retry_delay_ms(100)
        .with_extra_delay_ms(50);
    let policy = RetryPolicy::from_options(&options);

    assert_eq!(policy, RetryPolicy::new(4, ms(100), ms(50)));
    assert!(policy.retries_enabled());
}

#[test]
fn test_policy_from_options_without_retry() {
    let options = PoolOptions::new().with_should_retry(false).with_max_retry(9);
    let policy = RetryPolicy::from_options(&options);

    assert_eq!(policy.max_attempts(), 1);
    assert_eq!(policy, RetryPolicy::no_retry());
}

#[test]
fn test_default_policy() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_attempts(), 3);
    assert_eq!(policy.calculate_delay(0), ms(500));
    assert_eq!(policy.calculate_delay(1), ms(1000));
}

#[test]
fn test_delay_saturates() {
    let policy = RetryPolicy::new(2, Duration::MAX, ms(1));
    assert_eq!(policy.calculate_delay(u32::MAX), Duration::MAX);
}

#[tokio::test(start_paused = true)]
async fn test_run_succeeds_first_try() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::new(3, ms(100), ms(100));
    let start = Instant::now();

    let result: std::result::Result<u32, String> = policy
        .run(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await;

    assert_eq!(result, Ok(7));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_run_retries_until_success() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::new(3, ms(100), ms(50));
    let start = Instant::now();

    let result = policy
        .run(|| async {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            if call < 2 {
                Err(format!("attempt {call} failed"))
            } else {
                Ok("connected")
            }
        })
        .await;

    assert_eq!(result, Ok("connected"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // 100ms before the first retry, 150ms before the second.
    assert_eq!(start.elapsed(), ms(250));
}

#[tokio::test(start_paused = true)]
async fn test_run_reports_last_error() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::new(3, ms(10), ms(10));

    let result: std::result::Result<(), String> = policy
        .run(|| async {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            Err(format!("attempt {call} failed"))
        })
        .await;

    assert_eq!(result, Err("attempt 2 failed".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_no_retry_runs_once() {
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    let result: std::result::Result<(), &str> = RetryPolicy::no_retry()
        .run(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("refused")
        })
        .await;

    assert_eq!(result, Err("refused"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

// =============================================================================
// UnclosableConnection tests
// =============================================================================

/// Connection whose close fails a configurable number of times
struct StubbornConnection {
    close_failures: AtomicU32,
    close_calls: AtomicU32,
    closed: AtomicBool,
}

impl StubbornConnection {
    fn new(close_failures: u32) -> Self {
        Self {
            close_failures: AtomicU32::new(close_failures),
            close_calls: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Connection for StubbornConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<StatementResult> {
        Ok(StatementResult::affected(0))
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
        Ok(QueryResult::empty())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        Err(ZqlzError::NotSupported("no transactions".into()))
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.close_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.close_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ZqlzError::Connection("socket busy".into()));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn unclosable(conn: Arc<StubbornConnection>, policy: RetryPolicy) -> UnclosableConnection {
    UnclosableConnection::new(
        42,
        conn,
        Arc::new(ZqlzError::Connection("socket busy".into())),
        policy,
    )
}

#[tokio::test(start_paused = true)]
async fn test_unclosable_close_retries() {
    let conn = Arc::new(StubbornConnection::new(2));
    let handle = unclosable(conn.clone(), RetryPolicy::new(3, ms(10), ms(10)));

    assert_eq!(handle.connection_id(), 42);
    assert_eq!(handle.driver_name(), "mock");
    assert!(handle.last_error().to_string().contains("socket busy"));

    handle.close().await.unwrap();
    assert!(conn.is_closed());
    assert_eq!(conn.close_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unclosable_close_gives_up() {
    let conn = Arc::new(StubbornConnection::new(10));
    let handle = unclosable(conn.clone(), RetryPolicy::new(2, ms(10), ms(10)));

    let err = handle.close().await.unwrap_err();
    assert!(matches!(err, PoolError::Close { connection_id: 42, .. }));
    assert!(!conn.is_closed());
    assert_eq!(conn.close_calls.load(Ordering::SeqCst), 2);

    // Clones share the same connection.
    let clone = handle.clone();
    conn.close_failures.store(0, Ordering::SeqCst);
    clone.close().await.unwrap();
    assert!(conn.is_closed());
}
