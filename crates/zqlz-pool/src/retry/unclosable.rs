//! Handle for connections whose close attempts were exhausted

use std::fmt;
use std::sync::Arc;

use zqlz_core::{Connection, ZqlzError};

use super::RetryPolicy;
use crate::error::{PoolError, Result};

/// A raw connection the pool failed to close.
///
/// The pool has already forgotten about it (it counts against neither the
/// idle nor the acquired set); the handle exists so the application can try
/// again out of band. Cloning is cheap and every clone refers to the same
/// connection.
#[derive(Clone)]
pub struct UnclosableConnection {
    connection_id: u64,
    connection: Arc<dyn Connection>,
    last_error: Arc<ZqlzError>,
    policy: RetryPolicy,
}

impl UnclosableConnection {
    pub(crate) fn new(
        connection_id: u64,
        connection: Arc<dyn Connection>,
        last_error: Arc<ZqlzError>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            connection_id,
            connection,
            last_error,
            policy,
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// The error from the final failed close attempt
    pub fn last_error(&self) -> &ZqlzError {
        &self.last_error
    }

    pub fn driver_name(&self) -> &str {
        self.connection.driver_name()
    }

    /// Try to close the connection again, retrying per the pool's policy
    pub async fn close(&self) -> Result<()> {
        self.policy
            .run(|| self.connection.close())
            .await
            .map_err(|err| PoolError::Close {
                connection_id: self.connection_id,
                source: Arc::new(err),
            })?;
        tracing::debug!(connection_id = self.connection_id, "unclosable connection closed");
        Ok(())
    }
}

impl fmt::Debug for UnclosableConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnclosableConnection")
            .field("connection_id", &self.connection_id)
            .field("driver", &self.connection.driver_name())
            .field("last_error", &self.last_error.to_string())
            .finish()
    }
}
