//! Errors reported by drivers and raw connections

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZqlzError {
    /// The server could not be reached or dropped the connection
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The server rejected a statement
    #[error("Query failed: {0}")]
    Query(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not supported by this driver: {0}")]
    NotSupported(String),

    #[error("Connection is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

impl ZqlzError {
    /// Whether retrying the same operation may succeed: network failures and
    /// timeouts, as opposed to rejected statements or bad configuration.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ZqlzError::Connection(_) | ZqlzError::Io(_) | ZqlzError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ZqlzError>;
