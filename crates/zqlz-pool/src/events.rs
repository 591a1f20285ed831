//! Observer list for pool lifecycle events
//!
//! Every pool owns its own [`EventBus`]. Subscribers register a callback and
//! receive each [`PoolEvent`] by reference, in subscription order. Events are
//! always emitted after the pool has released its internal lock, so a
//! callback may freely call back into the pool.
//!
//! # Example
//!
//! ```ignore
//! let id = pool.events().subscribe(|event| {
//!     if let PoolEvent::CloseFailed { handle, .. } = event {
//!         tracing::warn!(connection_id = handle.connection_id(), "connection leaked");
//!     }
//! });
//! // ...
//! pool.events().unsubscribe(id);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use zqlz_core::QueryResult;

use crate::error::PoolError;
use crate::health::ProbeError;
use crate::pool::LeaseId;
use crate::retry::UnclosableConnection;

/// Something observable that happened inside a pool
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A raw connection was created and leased out
    CreateSucceeded { connection_id: u64, lease_id: LeaseId },
    /// Creating a raw connection failed after all retries
    CreateFailed { error: PoolError },
    /// A raw connection was closed
    CloseSucceeded { connection_id: u64 },
    /// Closing failed after all retries; `handle` allows a later attempt
    CloseFailed {
        handle: UnclosableConnection,
        error: PoolError,
    },
    /// An idle connection outlived `max_idle_time` and is being closed
    Evicted { connection_id: u64 },
    /// An idle connection failed its liveness probe and was discarded
    ProbeFailed {
        connection_id: u64,
        error: ProbeError,
    },
    QuerySucceeded {
        lease_id: LeaseId,
        result: QueryResult,
    },
    ExecuteSucceeded {
        lease_id: LeaseId,
        affected_rows: u64,
    },
    /// A query or statement failed on a leased connection
    QueryFailed { lease_id: LeaseId, error: PoolError },
    TransactionBegan { lease_id: LeaseId },
    TransactionFailed { lease_id: LeaseId, error: PoolError },
    Committed { lease_id: LeaseId },
    CommitFailed { lease_id: LeaseId, error: PoolError },
    RolledBack { lease_id: LeaseId },
    RollbackFailed { lease_id: LeaseId, error: PoolError },
    /// A leased connection was returned to the pool
    Released {
        lease_id: LeaseId,
        connection_id: u64,
    },
    /// A queued request waited longer than `max_queue_time`
    MaxQueueTime { error: PoolError },
    /// A request was rejected because the queue was full
    MaxQueueSize { error: PoolError },
    /// A request was rejected because the pool is at capacity and does not queue
    MaxConnection { error: PoolError },
    ShutdownSucceeded,
    ShutdownFailed { error: PoolError },
}

impl PoolEvent {
    /// Stable, kebab-case name of the event
    pub fn name(&self) -> &'static str {
        match self {
            PoolEvent::CreateSucceeded { .. } => "create-success",
            PoolEvent::CreateFailed { .. } => "create-fail",
            PoolEvent::CloseSucceeded { .. } => "close-success",
            PoolEvent::CloseFailed { .. } => "close-fail",
            PoolEvent::Evicted { .. } => "evicted",
            PoolEvent::ProbeFailed { .. } => "probe-fail",
            PoolEvent::QuerySucceeded { .. } => "query-success",
            PoolEvent::ExecuteSucceeded { .. } => "execute-success",
            PoolEvent::QueryFailed { .. } => "query-fail",
            PoolEvent::TransactionBegan { .. } => "transaction-success",
            PoolEvent::TransactionFailed { .. } => "transaction-fail",
            PoolEvent::Committed { .. } => "commit-success",
            PoolEvent::CommitFailed { .. } => "commit-fail",
            PoolEvent::RolledBack { .. } => "rollback-success",
            PoolEvent::RollbackFailed { .. } => "rollback-fail",
            PoolEvent::Released { .. } => "released",
            PoolEvent::MaxQueueTime { .. } => "max-queue-time",
            PoolEvent::MaxQueueSize { .. } => "max-queue-size",
            PoolEvent::MaxConnection { .. } => "max-connection",
            PoolEvent::ShutdownSucceeded => "shutdown-success",
            PoolEvent::ShutdownFailed { .. } => "shutdown-fail",
        }
    }

    /// Whether the event reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PoolEvent::CreateFailed { .. }
                | PoolEvent::CloseFailed { .. }
                | PoolEvent::ProbeFailed { .. }
                | PoolEvent::QueryFailed { .. }
                | PoolEvent::TransactionFailed { .. }
                | PoolEvent::CommitFailed { .. }
                | PoolEvent::RollbackFailed { .. }
                | PoolEvent::MaxQueueTime { .. }
                | PoolEvent::MaxQueueSize { .. }
                | PoolEvent::MaxConnection { .. }
                | PoolEvent::ShutdownFailed { .. }
        )
    }
}

/// Callback invoked for every emitted event
pub type EventCallback = Arc<dyn Fn(&PoolEvent) + Send + Sync>;

/// Identifies a subscription so it can be removed again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Publish/subscribe channel owned by a single pool
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(SubscriptionId, EventCallback)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for all future events
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&PoolEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(sub, _)| *sub != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.read().is_empty()
    }

    /// Deliver an event to every registered callback
    pub fn emit(&self, event: &PoolEvent) {
        tracing::trace!(event = event.name(), "pool event");
        // Snapshot so callbacks can subscribe/unsubscribe without deadlocking.
        let listeners: Vec<EventCallback> = self
            .listeners
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in listeners {
            callback(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
