//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};

const DEFAULT_MAX_CONNECTION: usize = 10;
const DEFAULT_MAX_IDLE_TIME_MS: u64 = 60_000;
const DEFAULT_MAX_QUEUE_TIME_MS: u64 = 1_000;
const DEFAULT_MAX_RETRY: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_EXTRA_DELAY_MS: u64 = 500;

/// Configuration for a connection pool
///
/// Every field is optional and validated on its own: a missing or malformed
/// value (zero, negative, fractional, wrong type) silently falls back to its
/// default, so the pool never runs on a half-valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawPoolOptions")]
pub struct PoolOptions {
    /// Upper bound on idle + acquired connections
    max_connection: usize,
    /// Milliseconds a released connection may sit idle before it is closed
    max_idle_time_ms: u64,
    /// Whether requests wait when the pool is at capacity
    should_queue: bool,
    /// Maximum number of waiting requests (`None` = unbounded)
    max_queue_size: Option<usize>,
    /// Milliseconds a request may wait in the queue
    max_queue_time_ms: u64,
    /// Whether connection creation and closing are retried
    should_retry: bool,
    /// Total attempts for a retried operation
    max_retry: u32,
    /// Base delay in milliseconds between attempts
    retry_delay_ms: u64,
    /// Additional delay in milliseconds added per attempt
    extra_delay_ms: u64,
    /// Whether idle connections are probed before reuse
    should_check: bool,
}

impl PoolOptions {
    /// Create options with every field at its default
    pub fn new() -> Self {
        Self {
            max_connection: DEFAULT_MAX_CONNECTION,
            max_idle_time_ms: DEFAULT_MAX_IDLE_TIME_MS,
            should_queue: true,
            max_queue_size: None,
            max_queue_time_ms: DEFAULT_MAX_QUEUE_TIME_MS,
            should_retry: true,
            max_retry: DEFAULT_MAX_RETRY,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            extra_delay_ms: DEFAULT_EXTRA_DELAY_MS,
            should_check: true,
        }
    }

    /// Build options from a JSON object, e.g. `{"maxConnection": 5}`
    ///
    /// Keys may be camelCase or snake_case. Anything other than an object is
    /// rejected; individual bad fields are not.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(PoolError::InvalidOptions(format!(
                "expected an object, got {}",
                json_type_name(value)
            )));
        }
        serde_json::from_value::<RawPoolOptions>(value.clone())
            .map(Self::from)
            .map_err(|e| PoolError::InvalidOptions(e.to_string()))
    }

    /// Build options from a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str::<RawPoolOptions>(source)
            .map(Self::from)
            .map_err(|e| PoolError::InvalidOptions(e.to_string()))
    }

    pub fn with_max_connection(mut self, max: usize) -> Self {
        self.max_connection = if max > 0 { max } else { DEFAULT_MAX_CONNECTION };
        self
    }

    pub fn with_max_idle_time_ms(mut self, ms: u64) -> Self {
        self.max_idle_time_ms = positive_or(ms, DEFAULT_MAX_IDLE_TIME_MS);
        self
    }

    pub fn with_should_queue(mut self, should_queue: bool) -> Self {
        self.should_queue = should_queue;
        self
    }

    /// Bound the request queue; zero leaves it unbounded
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = (size > 0).then_some(size);
        self
    }

    pub fn with_max_queue_time_ms(mut self, ms: u64) -> Self {
        self.max_queue_time_ms = positive_or(ms, DEFAULT_MAX_QUEUE_TIME_MS);
        self
    }

    pub fn with_should_retry(mut self, should_retry: bool) -> Self {
        self.should_retry = should_retry;
        self
    }

    pub fn with_max_retry(mut self, attempts: u32) -> Self {
        self.max_retry = if attempts > 0 { attempts } else { DEFAULT_MAX_RETRY };
        self
    }

    pub fn with_retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = positive_or(ms, DEFAULT_RETRY_DELAY_MS);
        self
    }

    pub fn with_extra_delay_ms(mut self, ms: u64) -> Self {
        self.extra_delay_ms = positive_or(ms, DEFAULT_EXTRA_DELAY_MS);
        self
    }

    pub fn with_should_check(mut self, should_check: bool) -> Self {
        self.should_check = should_check;
        self
    }

    pub fn max_connection(&self) -> usize {
        self.max_connection
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_millis(self.max_idle_time_ms)
    }

    pub fn should_queue(&self) -> bool {
        self.should_queue
    }

    pub fn max_queue_size(&self) -> Option<usize> {
        self.max_queue_size
    }

    pub fn max_queue_time(&self) -> Duration {
        Duration::from_millis(self.max_queue_time_ms)
    }

    pub fn should_retry(&self) -> bool {
        self.should_retry
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn extra_delay(&self) -> Duration {
        Duration::from_millis(self.extra_delay_ms)
    }

    pub fn should_check(&self) -> bool {
        self.should_check
    }
}

impl Default for PoolOptions {
    /// Defaults:
    /// - max_connection: 10
    /// - max_idle_time: 60 seconds
    /// - should_queue: true, unbounded, max_queue_time: 1 second
    /// - should_retry: true, 3 attempts, 500ms delay + 500ms per attempt
    /// - should_check: true
    fn default() -> Self {
        Self::new()
    }
}

/// Loosely typed mirror of [`PoolOptions`] used while deserializing, so that
/// one bad field cannot fail the whole document.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPoolOptions {
    #[serde(alias = "maxConnection")]
    max_connection: Option<serde_json::Value>,
    #[serde(alias = "maxIdleTime", alias = "maxIdleTimeMs")]
    max_idle_time_ms: Option<serde_json::Value>,
    #[serde(alias = "shouldQueue")]
    should_queue: Option<serde_json::Value>,
    #[serde(alias = "maxQueueSize")]
    max_queue_size: Option<serde_json::Value>,
    #[serde(alias = "maxQueueTime", alias = "maxQueueTimeMs")]
    max_queue_time_ms: Option<serde_json::Value>,
    #[serde(alias = "shouldRetry")]
    should_retry: Option<serde_json::Value>,
    #[serde(alias = "maxRetry")]
    max_retry: Option<serde_json::Value>,
    #[serde(alias = "retryDelay", alias = "retryDelayMs")]
    retry_delay_ms: Option<serde_json::Value>,
    #[serde(alias = "extraDelay", alias = "extraDelayMs")]
    extra_delay_ms: Option<serde_json::Value>,
    #[serde(alias = "shouldCheck")]
    should_check: Option<serde_json::Value>,
}

impl From<RawPoolOptions> for PoolOptions {
    fn from(raw: RawPoolOptions) -> Self {
        let defaults = PoolOptions::new();
        Self {
            max_connection: positive_int(raw.max_connection.as_ref())
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(defaults.max_connection),
            max_idle_time_ms: positive_int(raw.max_idle_time_ms.as_ref())
                .unwrap_or(defaults.max_idle_time_ms),
            should_queue: flag(raw.should_queue.as_ref()).unwrap_or(defaults.should_queue),
            max_queue_size: positive_int(raw.max_queue_size.as_ref())
                .and_then(|v| usize::try_from(v).ok()),
            max_queue_time_ms: positive_int(raw.max_queue_time_ms.as_ref())
                .unwrap_or(defaults.max_queue_time_ms),
            should_retry: flag(raw.should_retry.as_ref()).unwrap_or(defaults.should_retry),
            max_retry: positive_int(raw.max_retry.as_ref())
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.max_retry),
            retry_delay_ms: positive_int(raw.retry_delay_ms.as_ref())
                .unwrap_or(defaults.retry_delay_ms),
            extra_delay_ms: positive_int(raw.extra_delay_ms.as_ref())
                .unwrap_or(defaults.extra_delay_ms),
            should_check: flag(raw.should_check.as_ref()).unwrap_or(defaults.should_check),
        }
    }
}

fn positive_or(value: u64, default: u64) -> u64 {
    if value > 0 { value } else { default }
}

/// Accepts positive integers, including integral floats such as `5.0`
fn positive_int(value: Option<&serde_json::Value>) -> Option<u64> {
    let serde_json::Value::Number(number) = value? else {
        return None;
    };
    if let Some(v) = number.as_u64() {
        return (v > 0).then_some(v);
    }
    let f = number.as_f64()?;
    (f >= 1.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}

fn flag(value: Option<&serde_json::Value>) -> Option<bool> {
    value?.as_bool()
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
