//! Raw connection contract
//!
//! A raw connection is an independently failable resource: every operation
//! may fail on its own and none of them knows about pooling.

use async_trait::async_trait;

use crate::{QueryResult, Result, StatementResult, Value};

/// A live connection opened by a [`DatabaseDriver`](crate::DatabaseDriver)
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identifier of the driver that opened this connection
    fn driver_name(&self) -> &str;

    /// SQL dialect spoken by the server, when it differs from the driver id
    fn dialect_id(&self) -> Option<&'static str> {
        None
    }

    /// Run a statement that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Run a statement that modifies data
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>>;

    async fn close(&self) -> Result<()>;

    /// Whether the connection is known to be unusable
    fn is_closed(&self) -> bool;
}

/// An open transaction. Dropping it without committing rolls it back.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
