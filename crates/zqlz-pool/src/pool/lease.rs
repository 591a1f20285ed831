//! Leased connection handed out by the pool

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use uuid::Uuid;
use zqlz_core::{Connection, QueryResult, StatementResult, Transaction, Value};

use super::pool::PoolShared;
use crate::error::{PoolError, Result};
use crate::events::{EventBus, PoolEvent};

/// Opaque identity of a single lease
///
/// Every hand-out gets a fresh id, even when the same raw connection is
/// passed straight from one caller to a queued one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(Uuid);

impl LeaseId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A raw connection tagged with the id the pool assigned when creating it
#[derive(Clone)]
pub(crate) struct RawConnection {
    pub(crate) id: u64,
    pub(crate) connection: Arc<dyn Connection>,
}

/// A connection borrowed from the pool
///
/// Forwards statements to the raw connection and publishes their outcome on
/// the pool's event bus. Once released, every operation fails with
/// [`PoolError::LeaseReleased`]; a lease is never revived.
///
/// Dropping a lease that was not released returns it to the pool.
pub struct PooledConnection {
    id: LeaseId,
    raw: RawConnection,
    released: AtomicBool,
    transaction: Mutex<Option<Box<dyn Transaction>>>,
    events: Arc<EventBus>,
    pool: Weak<PoolShared>,
}

impl PooledConnection {
    pub(crate) fn new(raw: RawConnection, events: Arc<EventBus>, pool: Weak<PoolShared>) -> Self {
        Self {
            id: LeaseId::new(),
            raw,
            released: AtomicBool::new(false),
            transaction: Mutex::new(None),
            events,
            pool,
        }
    }

    pub fn id(&self) -> LeaseId {
        self.id
    }

    /// Id of the underlying raw connection, stable across leases
    pub fn connection_id(&self) -> u64 {
        self.raw.id
    }

    pub fn driver_name(&self) -> &str {
        self.raw.connection.driver_name()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Run a query, inside the open transaction if there is one
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_active()?;
        let outcome = {
            let mut transaction = self.transaction.lock().await;
            let outcome = match transaction.as_ref() {
                Some(tx) => tx.query(sql, params).await,
                None => self.raw.connection.query(sql, params).await,
            };
            self.drop_transaction_if_released(&mut transaction);
            outcome
        };

        match outcome {
            Ok(result) => {
                if self.events.has_listeners() {
                    self.events.emit(&PoolEvent::QuerySucceeded {
                        lease_id: self.id,
                        result: result.clone(),
                    });
                }
                Ok(result)
            }
            Err(err) => Err(self.fail(err.into(), |lease_id, error| PoolEvent::QueryFailed {
                lease_id,
                error,
            })),
        }
    }

    /// Run a data-modifying statement, inside the open transaction if there is one
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.ensure_active()?;
        let outcome = {
            let mut transaction = self.transaction.lock().await;
            let outcome = match transaction.as_ref() {
                Some(tx) => tx.execute(sql, params).await,
                None => self.raw.connection.execute(sql, params).await,
            };
            self.drop_transaction_if_released(&mut transaction);
            outcome
        };

        match outcome {
            Ok(result) => {
                self.events.emit(&PoolEvent::ExecuteSucceeded {
                    lease_id: self.id,
                    affected_rows: result.affected_rows,
                });
                Ok(result)
            }
            Err(err) => Err(self.fail(err.into(), |lease_id, error| PoolEvent::QueryFailed {
                lease_id,
                error,
            })),
        }
    }

    pub async fn begin_transaction(&self) -> Result<()> {
        self.ensure_active()?;
        let mut slot = self.transaction.lock().await;
        if slot.is_some() {
            return Err(PoolError::TransactionInProgress);
        }

        match self.raw.connection.begin_transaction().await {
            Ok(tx) => {
                *slot = Some(tx);
                if self.drop_transaction_if_released(&mut slot) {
                    return Err(PoolError::LeaseReleased);
                }
                self.events
                    .emit(&PoolEvent::TransactionBegan { lease_id: self.id });
                Ok(())
            }
            Err(err) => Err(self.fail(err.into(), |lease_id, error| {
                PoolEvent::TransactionFailed { lease_id, error }
            })),
        }
    }

    pub async fn commit(&self) -> Result<()> {
        self.ensure_active()?;
        let tx = self
            .transaction
            .lock()
            .await
            .take()
            .ok_or(PoolError::NoTransaction)?;

        match tx.commit().await {
            Ok(()) => {
                self.events.emit(&PoolEvent::Committed { lease_id: self.id });
                Ok(())
            }
            Err(err) => Err(self.fail(err.into(), |lease_id, error| PoolEvent::CommitFailed {
                lease_id,
                error,
            })),
        }
    }

    pub async fn rollback(&self) -> Result<()> {
        self.ensure_active()?;
        let tx = self
            .transaction
            .lock()
            .await
            .take()
            .ok_or(PoolError::NoTransaction)?;

        match tx.rollback().await {
            Ok(()) => {
                self.events.emit(&PoolEvent::RolledBack { lease_id: self.id });
                Ok(())
            }
            Err(err) => Err(self.fail(err.into(), |lease_id, error| {
                PoolEvent::RollbackFailed { lease_id, error }
            })),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_released() {
            return Err(PoolError::LeaseReleased);
        }
        Ok(())
    }

    fn fail(&self, error: PoolError, event: impl FnOnce(LeaseId, PoolError) -> PoolEvent) -> PoolError {
        tracing::debug!(lease_id = %self.id, connection_id = self.raw.id, %error, "operation failed on leased connection");
        self.events.emit(&event(self.id, error.clone()));
        error
    }

    /// Make the lease inert. Called by the pool with its state lock held.
    ///
    /// An uncommitted transaction is abandoned; dropping it is the driver's
    /// cue to roll back. While a statement holds the transaction slot, the
    /// statement drops it on completion instead.
    pub(crate) fn mark_released(&self) {
        self.released.store(true, Ordering::SeqCst);
        match self.transaction.try_lock() {
            Ok(mut slot) => {
                if slot.take().is_some() {
                    tracing::warn!(lease_id = %self.id, "connection released with an open transaction");
                }
            }
            Err(_) => {
                tracing::warn!(lease_id = %self.id, "connection released while a statement is running");
            }
        }
    }

    /// Drop a transaction the lease was released under. Returns whether one was dropped.
    fn drop_transaction_if_released(&self, slot: &mut Option<Box<dyn Transaction>>) -> bool {
        if !self.is_released() {
            return false;
        }
        let abandoned = slot.take().is_some();
        if abandoned {
            tracing::warn!(lease_id = %self.id, "open transaction dropped after release");
        }
        abandoned
    }

    /// Make the lease inert without returning its connection anywhere.
    ///
    /// Used when a hand-off to a queued request fails because the requester
    /// went away; the pool keeps ownership of the raw connection.
    pub(crate) fn disarm(self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.is_released() {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            match pool.release_lease(self) {
                Ok(()) => {
                    tracing::debug!(lease_id = %self.id, "unreleased connection returned on drop")
                }
                Err(error) => {
                    tracing::debug!(lease_id = %self.id, %error, "could not return dropped connection")
                }
            }
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("connection_id", &self.raw.id)
            .field("driver", &self.raw.connection.driver_name())
            .field("released", &self.is_released())
            .finish()
    }
}
