use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use super::headers::{DEFAULT_HEADERS, Headers};
use crate::error::{Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Multipart bodies with a payload below this size are encoded in memory.
pub const DEFAULT_MULTIPART_MEMORY_THRESHOLD: u64 = 10_000_000;

/// Session-wide defaults.
///
/// Requests that do not pick their own timeout or retry policy get these.
///
/// # Examples
///
/// ```
/// use courier::data::SessionConfig;
///
/// let config = SessionConfig::from_toml_str(r#"
///     max_retries = 5
///     retry_delay_ms = 250
///
///     [default_headers]
///     X-Client = "courier-tests"
/// "#).unwrap();
///
/// assert_eq!(config.max_retries, 5);
/// assert_eq!(config.default_headers.get("x-client"), Some("courier-tests"));
/// assert!(config.default_headers.contains("User-Agent"));
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Retries granted by the default retry policy.
    ///
    /// Default: 3
    pub max_retries: u32,

    /// Delay before each retry of the default policy, in milliseconds.
    ///
    /// Default: 0
    pub retry_delay_ms: u64,

    /// Payload size at which multipart uploads are spooled to disk.
    ///
    /// Default: 10,000,000 bytes
    pub multipart_memory_threshold: u64,

    /// Request timeout for requests that do not set one, in milliseconds.
    ///
    /// Default: 30,000
    pub default_timeout_ms: u64,

    /// Headers seeded into every request builder.
    ///
    /// When loaded from TOML the table is merged over the built-in defaults.
    #[serde(deserialize_with = "headers_over_defaults")]
    pub default_headers: Headers,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 0,
            multipart_memory_threshold: DEFAULT_MULTIPART_MEMORY_THRESHOLD,
            default_timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            default_headers: DEFAULT_HEADERS.clone(),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn multipart_memory_threshold(mut self, threshold: u64) -> Self {
        self.multipart_memory_threshold = threshold;
        self
    }

    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn retry_delay_duration(&self) -> Duration { Duration::from_millis(self.retry_delay_ms) }

    pub fn default_timeout_duration(&self) -> Duration { Duration::from_millis(self.default_timeout_ms) }
}

fn headers_over_defaults<'de, D>(deserializer: D) -> std::result::Result<Headers, D::Error>
where
    D: Deserializer<'de>,
{
    let extra = BTreeMap::<String, String>::deserialize(deserializer)?;
    let mut headers = DEFAULT_HEADERS.clone();
    for (name, value) in extra {
        headers.insert(name, value);
    }
    Ok(headers)
}
