//! Liveness probe for idle connections
//!
//! Runs a trivial statement every supported dialect understands and measures
//! the round trip. The pool uses it to vet an idle connection before handing
//! it out again.

use std::time::{Duration, Instant};

use thiserror::Error;
use zqlz_core::Connection;

/// Result of a probe: the round-trip time on success
pub type ProbeResult = Result<Duration, ProbeError>;

/// Why a connection failed its liveness probe
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Connection is closed")]
    ConnectionClosed,
    #[error("Probe query failed: {0}")]
    QueryFailed(String),
}

/// Probe a connection to check that it is still usable.
///
/// # Example
///
/// ```ignore
/// use zqlz_pool::health::probe_connection;
///
/// let latency = probe_connection(&*connection).await?;
/// ```
pub async fn probe_connection(conn: &dyn Connection) -> ProbeResult {
    if conn.is_closed() {
        return Err(ProbeError::ConnectionClosed);
    }

    let start = Instant::now();
    let probe_query = probe_query(conn.dialect_id().unwrap_or(conn.driver_name()));

    match conn.query(probe_query, &[]).await {
        Ok(_) => Ok(start.elapsed()),
        Err(e) => Err(ProbeError::QueryFailed(e.to_string())),
    }
}

/// The probe statement for a given dialect.
///
/// Oracle needs a FROM clause; everything else accepts a bare `SELECT 1`.
pub(super) fn probe_query(dialect: &str) -> &'static str {
    match dialect {
        "oracle" => "SELECT 1 FROM DUAL",
        _ => "SELECT 1",
    }
}
