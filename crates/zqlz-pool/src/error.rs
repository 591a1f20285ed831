//! Error types for the connection pool

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use zqlz_core::ZqlzError;

/// Coarse classification of a [`PoolError`]
///
/// Callers usually only need to know whether to back off (admission), whether
/// the database itself misbehaved (resource), or whether they misused the API
/// (usage, shutdown).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Admission control rejected the request; never retried by the pool
    Admission,
    /// Creating, closing or using a raw connection failed
    Resource,
    /// Unknown or released lease, malformed configuration, closed pool
    Usage,
    /// Shutdown attempted while work was still outstanding
    Shutdown,
}

/// Error returned by pool operations
///
/// Driver errors are shared behind an `Arc` so the same failure can be both
/// returned to the caller and published on the event bus.
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Maximum number of connections ({max}) reached")]
    MaxConnections { max: usize },

    #[error("Request queue is full ({max} pending requests)")]
    QueueFull { max: usize },

    #[error("Timed out after {waited:?} waiting in the request queue")]
    QueueTimeout { waited: Duration },

    #[error("Failed to create connection: {0}")]
    Create(#[source] Arc<ZqlzError>),

    #[error("Failed to close connection {connection_id}: {source}")]
    Close {
        connection_id: u64,
        #[source]
        source: Arc<ZqlzError>,
    },

    #[error(transparent)]
    Driver(Arc<ZqlzError>),

    #[error("Connection has already been released")]
    LeaseReleased,

    #[error("Connection was not acquired from this pool")]
    UnknownLease,

    #[error("No transaction in progress")]
    NoTransaction,

    #[error("A transaction is already in progress")]
    TransactionInProgress,

    #[error("Invalid pool options: {0}")]
    InvalidOptions(String),

    #[error("Cannot shut down: {acquired} connection(s) acquired, {queued} request(s) queued")]
    ShutdownPending { acquired: usize, queued: usize },

    #[error("Pool is closed")]
    Closed,
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::MaxConnections { .. }
            | PoolError::QueueFull { .. }
            | PoolError::QueueTimeout { .. } => ErrorKind::Admission,
            PoolError::Create(_) | PoolError::Close { .. } | PoolError::Driver(_) => {
                ErrorKind::Resource
            }
            PoolError::LeaseReleased
            | PoolError::UnknownLease
            | PoolError::NoTransaction
            | PoolError::TransactionInProgress
            | PoolError::InvalidOptions(_)
            | PoolError::Closed => ErrorKind::Usage,
            PoolError::ShutdownPending { .. } => ErrorKind::Shutdown,
        }
    }

    /// The underlying driver error, if this failure came from the database
    pub fn driver_error(&self) -> Option<&ZqlzError> {
        match self {
            PoolError::Create(e) | PoolError::Driver(e) => Some(&**e),
            PoolError::Close { source, .. } => Some(&**source),
            _ => None,
        }
    }
}

impl From<ZqlzError> for PoolError {
    fn from(err: ZqlzError) -> Self {
        PoolError::Driver(Arc::new(err))
    }
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;
