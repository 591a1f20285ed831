//! ZQLZ Core - Driver and connection contracts
//!
//! This crate provides the traits and types that sit at the boundary between
//! database drivers and the connection pool. It defines:
//!
//! - `DatabaseDriver` - Factory for raw connections, identified by dialect
//! - `Connection` / `Transaction` - The raw, independently failable resources
//! - Common types like `Value`, `Row`, `QueryResult`
//! - `ZqlzError`, the error every driver reports

mod connection;
mod driver;
mod error;
mod types;

pub use connection::*;
pub use driver::*;
pub use error::*;
pub use types::*;
