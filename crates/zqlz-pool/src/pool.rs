//! Connection pooling for database connections
//!
//! This module provides the pool itself: admission control with an optional
//! FIFO wait queue, idle eviction, liveness probing on reuse, and a guarded
//! one-way shutdown.
//!
//! # Example
//!
//! ```ignore
//! use zqlz_pool::pool::{ConnectionPool, PoolOptions};
//!
//! let options = PoolOptions::new()
//!     .with_max_connection(5)
//!     .with_max_queue_size(20)
//!     .with_max_queue_time_ms(2000);
//!
//! let pool = ConnectionPool::new(options, connection_factory);
//! let conn = pool.request().await?;
//! let rows = conn.query("SELECT * FROM users", &[]).await?;
//! pool.release(&conn)?;
//! ```

mod config;
mod lease;
mod pool;
mod stats;


pub use config::PoolOptions;
pub use lease::{LeaseId, PooledConnection};
pub use pool::ConnectionPool;
pub use stats::PoolStats;
