//! Client configuration.
//!
//! A [`ClientConfig`] can be built in code, deserialized with serde (for
//! example from a service's config file), or read from `INFLUXDB_*`
//! environment variables.

use std::fmt;
use std::time::Duration;

use go_parse_duration::parse_duration;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

/// Request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Connection settings for one InfluxDB database.
#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the server (e.g. "http://localhost:8086").
    pub url: String,

    /// Database (`db` parameter) the queries run against.
    pub database: String,

    /// Basic auth user name.
    #[serde(default)]
    pub username: Option<String>,

    /// Basic auth password.
    #[serde(default)]
    pub password: Option<String>,

    /// Bound on one whole query, from connect to the last body byte.
    /// Written as a Go-style duration ("30s", "5m") in config files.
    #[serde(default = "default_timeout", deserialize_with = "deserialize_timeout")]
    pub timeout: Duration,

    /// Points per chunk requested from the server.
    #[serde(default)]
    pub chunk_size: Option<u32>,

    /// Timestamp precision (`ns`, `u`, `ms`, `s`, `m`, `h`). Timestamps are
    /// RFC3339 strings when unset.
    #[serde(default)]
    pub epoch: Option<String>,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn deserialize_timeout<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timeout(&raw).map_err(serde::de::Error::custom)
}

/// Parses a Go-style duration. Zero means the default timeout.
pub fn parse_timeout(raw: &str) -> Result<Duration> {
    let nanos = parse_duration(raw.trim())
        .map_err(|_| Error::Config(format!("invalid timeout '{}'", raw)))?;
    match u64::try_from(nanos) {
        Ok(0) => Ok(DEFAULT_TIMEOUT),
        Ok(n) => Ok(Duration::from_nanos(n)),
        Err(_) => Err(Error::Config(format!("negative timeout '{}'", raw))),
    }
}

const EPOCHS: [&str; 6] = ["ns", "u", "ms", "s", "m", "h"];

impl ClientConfig {
    /// Create a config with no credentials and the default timeout.
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            username: None,
            password: None,
            timeout: DEFAULT_TIMEOUT,
            chunk_size: None,
            epoch: None,
        }
    }

    /// Read the config from `INFLUXDB_URL`, `INFLUXDB_DATABASE` and the
    /// optional `INFLUXDB_USERNAME`, `INFLUXDB_PASSWORD`, `INFLUXDB_TIMEOUT`,
    /// `INFLUXDB_CHUNK_SIZE`, `INFLUXDB_EPOCH`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| Error::Config(format!("{} is not set", key)))
        };
        let mut config = Self::new(required("INFLUXDB_URL")?, required("INFLUXDB_DATABASE")?);
        config.username = lookup("INFLUXDB_USERNAME");
        config.password = lookup("INFLUXDB_PASSWORD");
        if let Some(raw) = lookup("INFLUXDB_TIMEOUT") {
            config.timeout = parse_timeout(&raw)?;
        }
        if let Some(raw) = lookup("INFLUXDB_CHUNK_SIZE") {
            let size = raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid chunk size '{}'", raw)))?;
            config.chunk_size = Some(size);
        }
        config.epoch = lookup("INFLUXDB_EPOCH");
        Ok(config)
    }

    /// Set basic auth credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the request timeout. `Duration::ZERO` restores the default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout };
        self
    }

    /// Ask the server for chunks of `size` points.
    pub fn with_chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Ask for epoch timestamps in the given precision.
    pub fn with_epoch(mut self, epoch: impl Into<String>) -> Self {
        self.epoch = Some(epoch.into());
        self
    }

    /// Credentials to send, or `None` when both user name and password are blank.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let username = self.username.as_deref().unwrap_or_default();
        let password = self.password.as_deref().unwrap_or_default();
        if username.trim().is_empty() && password.trim().is_empty() {
            None
        } else {
            Some((username, password))
        }
    }

    /// Check the values a client cannot work without.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::Config("url is empty".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(Error::Config("database is empty".to_string()));
        }
        if self.chunk_size == Some(0) {
            return Err(Error::Config("chunk size must be positive".to_string()));
        }
        if let Some(epoch) = &self.epoch {
            if !EPOCHS.contains(&epoch.as_str()) {
                return Err(Error::Config(format!("unknown epoch precision '{}'", epoch)));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("chunk_size", &self.chunk_size)
            .field("epoch", &self.epoch)
            .finish()
    }
}
