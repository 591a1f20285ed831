//! End-to-end pool scenarios
//!
//! Drives the pool through its public API against an in-memory driver:
//! capacity limits, FIFO hand-off, use-after-release, idle eviction, queue
//! timeouts and the shutdown guard.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use zqlz_core::{
    Connection, ConnectionConfig, DatabaseDriver, QueryResult, StatementResult, Transaction,
    Value, ZqlzError,
};
use zqlz_pool::{ConnectionPool, DriverFactory, PoolError, PoolEvent, PoolLoad, PoolOptions};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

struct MemoryConnection {
    closed: AtomicBool,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn driver_name(&self) -> &str {
        "memory"
    }

    async fn execute(&self, _sql: &str, _params: &[Value]) -> zqlz_core::Result<StatementResult> {
        Ok(StatementResult::affected(1))
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> zqlz_core::Result<QueryResult> {
        Ok(QueryResult::from_rows(
            vec!["sql".into()],
            vec![vec![Value::from(sql)]],
        ))
    }

    async fn begin_transaction(&self) -> zqlz_core::Result<Box<dyn Transaction>> {
        Err(ZqlzError::NotSupported("memory driver has no transactions".into()))
    }

    async fn close(&self) -> zqlz_core::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct MemoryDriver {
    opened: AtomicU64,
    refuse: AtomicBool,
    connections: Mutex<Vec<Arc<MemoryConnection>>>,
}

impl MemoryDriver {
    fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    fn all_closed(&self) -> bool {
        self.connections.lock().iter().all(|conn| conn.is_closed())
    }
}

#[async_trait]
impl DatabaseDriver for MemoryDriver {
    fn id(&self) -> &'static str {
        "memory"
    }

    fn name(&self) -> &'static str {
        "In-Memory"
    }

    async fn connect(&self, config: &ConnectionConfig) -> zqlz_core::Result<Arc<dyn Connection>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ZqlzError::Connection(format!("cannot reach {}", config.host)));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let conn = Arc::new(MemoryConnection {
            closed: AtomicBool::new(false),
        });
        self.connections.lock().push(conn.clone());
        Ok(conn)
    }
}

fn pool_with(options: PoolOptions) -> (ConnectionPool, Arc<MemoryDriver>) {
    init_tracing();
    let driver = Arc::new(MemoryDriver::default());
    let config = ConnectionConfig::new("memory").with_host("localhost", 0);
    let pool = ConnectionPool::new(options, DriverFactory::new(driver.clone(), config));
    (pool, driver)
}

async fn wait_for_queue(pool: &ConnectionPool, queued: usize) -> Result<()> {
    for _ in 0..100 {
        if pool.queued_count() == queued {
            return Ok(());
        }
        tokio::task::yield_now().await;
    }
    anyhow::bail!("queue never reached {queued} (now {})", pool.queued_count())
}

#[tokio::test]
async fn test_driver_identity_and_convenience_query() -> Result<()> {
    let (pool, driver) = pool_with(PoolOptions::default());

    assert_eq!(pool.driver_name(), "memory");
    let result = pool.query("SELECT 42", &[]).await?;
    assert_eq!(result.rows[0].get(0), Some(&Value::from("SELECT 42")));

    assert_eq!(pool.acquired_count(), 0);
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(driver.opened(), 1);
    Ok(())
}

#[rstest]
#[case::single(1)]
#[case::pair(2)]
#[case::several(5)]
#[tokio::test]
async fn test_max_connection_without_queue(#[case] max: usize) -> Result<()> {
    let (pool, driver) = pool_with(
        PoolOptions::new()
            .with_max_connection(max)
            .with_should_queue(false),
    );

    let mut leases = Vec::new();
    for _ in 0..max {
        leases.push(pool.request().await?);
    }
    let err = pool.request().await.unwrap_err();

    assert!(matches!(err, PoolError::MaxConnections { max: m } if m == max));
    assert_eq!(pool.acquired_count(), max);
    assert_eq!(driver.opened(), max as u64);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_queue_full_then_hand_off() -> Result<()> {
    let options = PoolOptions::new()
        .with_max_connection(1)
        .with_max_queue_size(1);
    let (pool, driver) = pool_with(options);

    let first = pool.request().await?;
    assert_eq!(pool.acquired_count(), 1);

    let waiting = pool.clone();
    let second = tokio::spawn(async move { waiting.request().await });
    wait_for_queue(&pool, 1).await?;

    let third = pool.request().await;
    assert!(matches!(third, Err(PoolError::QueueFull { max: 1 })));

    pool.release(&first)?;
    let second = second.await??;

    assert_eq!(second.connection_id(), first.connection_id());
    assert_ne!(second.id(), first.id());
    assert_eq!(pool.acquired_count(), 1);
    assert_eq!(pool.queued_count(), 0);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(driver.opened(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_fifo_fairness_across_releases() -> Result<()> {
    let options = PoolOptions::new()
        .with_max_connection(1)
        .with_max_queue_size(3);
    let (pool, _driver) = pool_with(options);

    let mut current = pool.request().await?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    for (position, name) in ["q1", "q2", "q3"].into_iter().enumerate() {
        let waiting = pool.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let lease = waiting.request().await;
            let _ = tx.send((name, lease));
        });
        wait_for_queue(&pool, position + 1).await?;
    }

    let mut served = Vec::new();
    for _ in 0..3 {
        pool.release(&current)?;
        let (name, lease) = rx.recv().await.context("waiter vanished")?;
        served.push(name);
        current = lease?;
    }

    assert_eq!(served, vec!["q1", "q2", "q3"]);
    assert_eq!(pool.queued_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_use_after_release_is_rejected() -> Result<()> {
    let (pool, _driver) = pool_with(PoolOptions::default());
    let lease = pool.request().await?;
    pool.release(&lease)?;

    assert!(matches!(
        lease.query("SELECT 1", &[]).await,
        Err(PoolError::LeaseReleased)
    ));
    assert!(matches!(
        lease.execute("DELETE FROM t", &[]).await,
        Err(PoolError::LeaseReleased)
    ));
    assert!(matches!(
        lease.begin_transaction().await,
        Err(PoolError::LeaseReleased)
    ));
    assert!(matches!(lease.commit().await, Err(PoolError::LeaseReleased)));
    assert!(matches!(lease.rollback().await, Err(PoolError::LeaseReleased)));
    assert!(matches!(pool.release(&lease), Err(PoolError::LeaseReleased)));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_idle_connection_evicted_after_max_idle_time() -> Result<()> {
    let (pool, driver) = pool_with(PoolOptions::new().with_max_idle_time_ms(500));

    let lease = pool.request().await?;
    pool.release(&lease)?;
    assert_eq!(pool.idle_count(), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(pool.idle_count(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;
    assert_eq!(pool.idle_count(), 0);
    assert!(driver.all_closed());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_request_is_not_served() -> Result<()> {
    let options = PoolOptions::new()
        .with_max_connection(1)
        .with_max_queue_time_ms(100);
    let (pool, _driver) = pool_with(options);
    let held = pool.request().await?;

    let waiting = pool.clone();
    let waiter = tokio::spawn(async move { waiting.request().await });
    wait_for_queue(&pool, 1).await?;

    let outcome = waiter.await?;
    assert!(matches!(outcome, Err(PoolError::QueueTimeout { .. })));
    assert_eq!(pool.queued_count(), 0);

    pool.release(&held)?;
    assert_eq!(pool.acquired_count(), 0);
    assert_eq!(pool.idle_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_guard_and_terminal_state() -> Result<()> {
    let (pool, driver) = pool_with(PoolOptions::default());
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();
    pool.events().subscribe(move |event| {
        if matches!(
            event,
            PoolEvent::ShutdownSucceeded | PoolEvent::ShutdownFailed { .. }
        ) {
            sink.lock().push(event.name());
        }
    });

    let lease = pool.request().await?;
    assert!(matches!(
        pool.shutdown().await,
        Err(PoolError::ShutdownPending { acquired: 1, .. })
    ));
    assert!(!pool.is_closed());

    pool.release(&lease)?;
    pool.shutdown().await?;

    assert!(pool.is_closed());
    assert!(driver.all_closed());
    assert!(matches!(pool.request().await, Err(PoolError::Closed)));
    assert!(matches!(pool.release(&lease), Err(PoolError::Closed)));
    assert!(matches!(pool.query("SELECT 1", &[]).await, Err(PoolError::Closed)));
    assert!(matches!(pool.shutdown().await, Err(PoolError::Closed)));
    assert_eq!(*outcomes.lock(), vec!["shutdown-fail", "shutdown-success"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_database_surfaces_create_error() -> Result<()> {
    let (pool, driver) = pool_with(PoolOptions::new().with_max_retry(2));
    driver.refuse.store(true, Ordering::SeqCst);

    let err = pool.request().await.unwrap_err();
    let source = err.driver_error().context("driver error expected")?;
    assert!(source.to_string().contains("cannot reach localhost"));
    assert!(source.is_transient());
    assert_eq!(pool.stats().total(), 0);

    driver.refuse.store(false, Ordering::SeqCst);
    let lease = pool.request().await?;
    assert_eq!(pool.load(), PoolLoad::Healthy);
    pool.release(&lease)?;
    Ok(())
}

#[rstest]
#[case::zero(json!({ "maxConnection": 0 }))]
#[case::negative(json!({ "maxConnection": -3 }))]
#[case::fractional(json!({ "maxConnection": 1.5 }))]
#[case::text(json!({ "maxConnection": "ten" }))]
#[case::missing(json!({}))]
fn test_malformed_max_connection_falls_back(#[case] input: serde_json::Value) -> Result<()> {
    let options = PoolOptions::from_json(&input)?;
    assert_eq!(options.max_connection(), 10);
    Ok(())
}

#[rstest]
#[case::camel(json!({ "maxConnection": 3, "shouldQueue": false }))]
#[case::snake(json!({ "max_connection": 3, "should_queue": false }))]
fn test_options_accept_either_key_style(#[case] input: serde_json::Value) -> Result<()> {
    let options = PoolOptions::from_json(&input)?;
    assert_eq!(options.max_connection(), 3);
    assert!(!options.should_queue());
    Ok(())
}
