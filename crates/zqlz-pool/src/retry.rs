//! Retry with backoff for raw connection creation and closing
//!
//! The pool only retries resource operations: opening a connection and
//! closing one. Admission errors and statement failures are never retried.
//!
//! # Example
//!
//! ```ignore
//! use zqlz_pool::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, Duration::from_millis(500), Duration::from_millis(500));
//! let conn = policy.run(|| factory.create()).await?;
//! ```

mod backoff;
mod unclosable;

#[cfg(test)]
mod tests;

pub use backoff::RetryPolicy;
pub use unclosable::UnclosableConnection;
