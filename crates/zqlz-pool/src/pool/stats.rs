//! Pool statistics types

use serde::{Deserialize, Serialize};

use crate::health::PoolLoad;

/// Statistics about a connection pool's current state
///
/// Taken under the pool lock, so the counters are mutually consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections parked in the pool
    idle: usize,
    /// Connections leased to callers
    acquired: usize,
    /// Requests waiting for a connection
    queued: usize,
    /// Slots held by creations or liveness probes still in flight
    pending: usize,
    /// Configured capacity
    max_connection: usize,
}

impl PoolStats {
    pub fn new(
        idle: usize,
        acquired: usize,
        queued: usize,
        pending: usize,
        max_connection: usize,
    ) -> Self {
        Self {
            idle,
            acquired,
            queued,
            pending,
            max_connection,
        }
    }

    /// Idle plus acquired connections
    pub fn total(&self) -> usize {
        self.idle + self.acquired
    }

    pub fn idle(&self) -> usize {
        self.idle
    }

    pub fn acquired(&self) -> usize {
        self.acquired
    }

    pub fn queued(&self) -> usize {
        self.queued
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn max_connection(&self) -> usize {
        self.max_connection
    }

    /// Share of the capacity currently acquired (0.0 to 1.0)
    ///
    /// Returns 0.0 if the capacity is 0 to avoid division by zero.
    pub fn utilization(&self) -> f64 {
        if self.max_connection == 0 {
            0.0
        } else {
            self.acquired as f64 / self.max_connection as f64
        }
    }

    /// Whether no further connection can be created right now
    pub fn is_full(&self) -> bool {
        self.total() + self.pending >= self.max_connection
    }

    pub fn load(&self) -> PoolLoad {
        PoolLoad::from_counts(self.acquired, self.max_connection)
    }
}
