//! Connection factories consumed by the pool

use std::sync::Arc;

use async_trait::async_trait;
use zqlz_core::{Connection, ConnectionConfig, DatabaseDriver, Result};

/// Factory trait for creating new raw connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Create a new connection
    async fn create(&self) -> Result<Arc<dyn Connection>>;

    /// Identity of the driver behind this factory (e.g. "postgres")
    fn driver_name(&self) -> &str;
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        (**self).create().await
    }

    fn driver_name(&self) -> &str {
        (**self).driver_name()
    }
}

/// Adapts a [`DatabaseDriver`] and a fixed [`ConnectionConfig`] into a factory
pub struct DriverFactory {
    driver: Arc<dyn DatabaseDriver>,
    config: ConnectionConfig,
}

impl DriverFactory {
    pub fn new(driver: Arc<dyn DatabaseDriver>, config: ConnectionConfig) -> Self {
        Self { driver, config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[async_trait]
impl ConnectionFactory for DriverFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        tracing::debug!(driver = self.driver.id(), target = %self.config, "opening raw connection");
        self.driver.connect(&self.config).await
    }

    fn driver_name(&self) -> &str {
        self.driver.id()
    }
}
