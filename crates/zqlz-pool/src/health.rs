//! Liveness probing and load rating
//!
//! # Example
//!
//! ```ignore
//! use zqlz_pool::health::{probe_connection, PoolLoad};
//!
//! let latency = probe_connection(&*connection).await?;
//! let load = PoolLoad::from_counts(pool.acquired_count(), pool.options().max_connection());
//! ```

mod ping;
mod status;


pub use ping::{ProbeError, ProbeResult, probe_connection};
pub use status::{LoadThresholds, PoolLoad};
