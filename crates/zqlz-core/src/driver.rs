//! Drivers open raw connections from a connection target

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{Connection, Result};

/// Opens raw connections for one database dialect.
///
/// A driver knows how to reach a database described by a [`ConnectionConfig`];
/// reuse, limits and eviction are left to whoever holds the connections.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Stable identifier, e.g. "postgres" or "sqlite"
    fn id(&self) -> &'static str;

    /// Display name, e.g. "PostgreSQL"
    fn name(&self) -> &'static str {
        self.id()
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>>;
}

/// Where and as whom a driver connects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub driver: String,
    /// Empty for file-based databases
    pub host: String,
    /// Zero means the driver's default port
    pub port: u16,
    /// Database name, or file path for file-based databases
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Driver-specific settings such as `sslmode`
    pub params: BTreeMap<String, String>,
}

impl ConnectionConfig {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            host: String::new(),
            port: 0,
            database: None,
            username: None,
            password: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    /// Set a driver-specific parameter; non-string JSON values are stored in
    /// their JSON text form
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        let value = match value.into() {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        self.params.insert(key.into(), value);
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Renders the target without the password, suitable for logs
impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.driver)?;
        if let Some(user) = &self.username {
            f.write_str(user)?;
            if self.password.is_some() {
                f.write_str(":***")?;
            }
            f.write_str("@")?;
        }
        f.write_str(&self.host)?;
        if self.port != 0 {
            write!(f, ":{}", self.port)?;
        }
        if let Some(database) = &self.database {
            write!(f, "/{database}")?;
        }
        Ok(())
    }
}
