//! ZQLZ Pool - Database connection pooling
//!
//! This crate lends out a bounded set of database connections to concurrent
//! callers, reclaims and evicts them, retries transient creation and close
//! failures, and shuts down cleanly. It knows nothing about SQL dialects: it
//! creates, validates, lends, reclaims and destroys connections obtained
//! from a pluggable [`ConnectionFactory`].

mod error;
pub mod events;
mod factory;
pub mod health;
pub mod pool;
pub mod retry;

pub use error::{ErrorKind, PoolError, Result};
pub use events::{EventBus, PoolEvent, SubscriptionId};
pub use factory::{ConnectionFactory, DriverFactory};
pub use health::{LoadThresholds, PoolLoad, ProbeError, probe_connection};
pub use pool::{ConnectionPool, LeaseId, PoolOptions, PoolStats, PooledConnection};
pub use retry::{RetryPolicy, UnclosableConnection};
