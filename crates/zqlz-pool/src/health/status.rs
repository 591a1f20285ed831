//! Pool load classification
//!
//! Classifies how busy a pool is from the share of its capacity currently
//! acquired by callers.

use serde::{Deserialize, Serialize};

/// Coarse load rating of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolLoad {
    /// Under half of the capacity is acquired
    Healthy,
    /// Between half and 80% of the capacity is acquired
    Degraded,
    /// 80% or more of the capacity is acquired
    Saturated,
}

impl PoolLoad {
    /// Classify load from acquired/max counts using default thresholds.
    ///
    /// # Example
    ///
    /// ```
    /// use zqlz_pool::health::PoolLoad;
    ///
    /// assert_eq!(PoolLoad::from_counts(4, 10), PoolLoad::Healthy);
    /// assert_eq!(PoolLoad::from_counts(5, 10), PoolLoad::Degraded);
    /// assert_eq!(PoolLoad::from_counts(8, 10), PoolLoad::Saturated);
    /// ```
    pub fn from_counts(acquired: usize, max_connection: usize) -> Self {
        Self::from_counts_with_thresholds(acquired, max_connection, &LoadThresholds::default())
    }

    /// Classify load using custom thresholds.
    pub fn from_counts_with_thresholds(
        acquired: usize,
        max_connection: usize,
        thresholds: &LoadThresholds,
    ) -> Self {
        if max_connection == 0 {
            return PoolLoad::Saturated;
        }
        let ratio = acquired as f64 / max_connection as f64;
        if ratio < thresholds.degraded_at {
            PoolLoad::Healthy
        } else if ratio < thresholds.saturated_at {
            PoolLoad::Degraded
        } else {
            PoolLoad::Saturated
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, PoolLoad::Healthy)
    }
}

impl std::fmt::Display for PoolLoad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolLoad::Healthy => write!(f, "healthy"),
            PoolLoad::Degraded => write!(f, "degraded"),
            PoolLoad::Saturated => write!(f, "saturated"),
        }
    }
}

/// Utilization ratios at which the rating changes
#[derive(Debug, Clone, PartialEq)]
pub struct LoadThresholds {
    /// Ratio from which the pool is considered degraded
    pub degraded_at: f64,
    /// Ratio from which the pool is considered saturated
    pub saturated_at: f64,
}

impl LoadThresholds {
    pub fn new(degraded_at: f64, saturated_at: f64) -> Self {
        Self {
            degraded_at,
            saturated_at: saturated_at.max(degraded_at),
        }
    }
}

impl Default for LoadThresholds {
    /// Default thresholds: degraded from 50%, saturated from 80%
    fn default() -> Self {
        Self::new(0.5, 0.8)
    }
}
