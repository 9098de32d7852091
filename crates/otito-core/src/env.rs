//! Environment-driven settings.
//!
//! Reads `OTITO_*` variables with `envy` and turns them into a
//! [`CaptureConfigBuilder`]. Closures (`app_id_fn`, `filter_fn`) cannot come
//! from the environment; set them on the returned builder.
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `OTITO_API_KEY` | API key (required) |
//! | `OTITO_ENDPOINT` | Ingestion base URL |
//! | `OTITO_FLUSH_THRESHOLD` | Records per batch |
//! | `OTITO_IP_STRATEGY` | `proxy-header`, `forwarded` or `remote` |
//! | `OTITO_HEADERS_TO_STRIP` | Comma separated header names |
//! | `OTITO_MAX_BODY_SIZE` | Request body limit in bytes |
//! | `OTITO_FLUSH_INTERVAL_SECS` | Periodic flush, in seconds |
//!
//! ```ignore
//! use otito_core::env::{load_dotenv, CaptureSettings};
//!
//! load_dotenv();
//! let config = CaptureSettings::from_env()?
//!     .into_builder()?
//!     .filter_fn(|parts| parts.uri.path() != "/health")
//!     .build()?;
//! ```

use serde::Deserialize;
use std::time::Duration;

use crate::config::{CaptureConfig, CaptureConfigBuilder};
use crate::error::ConfigError;
use crate::ip::IpStrategy;

/// Prefix of every recognised variable.
pub const ENV_PREFIX: &str = "OTITO_";

/// Raw settings as read from the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureSettings {
    /// API key
    pub api_key: Option<String>,
    /// Ingestion base URL
    pub endpoint: Option<String>,
    /// Records per batch
    pub flush_threshold: Option<i64>,
    /// IP strategy name
    pub ip_strategy: Option<String>,
    /// Request headers to mask
    pub headers_to_strip: Option<Vec<String>>,
    /// Request body limit in bytes
    pub max_body_size: Option<usize>,
    /// Periodic flush in seconds
    pub flush_interval_secs: Option<u64>,
}

impl CaptureSettings {
    /// Read `OTITO_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        envy::prefixed(ENV_PREFIX)
            .from_env::<Self>()
            .map_err(|e| ConfigError::Environment(e.to_string()))
    }

    /// Read settings from an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX)
            .from_iter::<_, Self>(vars)
            .map_err(|e| ConfigError::Environment(e.to_string()))
    }

    /// Apply the settings on top of the builder defaults.
    pub fn into_builder(self) -> Result<CaptureConfigBuilder, ConfigError> {
        let mut builder = CaptureConfig::builder();

        if let Some(key) = self.api_key {
            builder = builder.api_key(key);
        }
        if let Some(endpoint) = self.endpoint {
            builder = builder.endpoint(endpoint);
        }
        if let Some(threshold) = self.flush_threshold {
            builder = builder.flush_threshold(threshold);
        }
        if let Some(strategy) = self.ip_strategy {
            builder = builder.ip_strategy(strategy.parse::<IpStrategy>()?);
        }
        if let Some(headers) = self.headers_to_strip {
            builder = builder.headers_to_strip(
                headers
                    .into_iter()
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty()),
            );
        }
        if let Some(limit) = self.max_body_size {
            builder = builder.max_body_size(Some(limit));
        }
        if let Some(secs) = self.flush_interval_secs {
            builder = builder.flush_interval(Some(Duration::from_secs(secs)));
        }

        Ok(builder)
    }

    /// Build a validated configuration straight from the settings.
    pub fn into_config(self) -> Result<CaptureConfig, ConfigError> {
        self.into_builder()?.build()
    }
}

/// Load variables from a `.env` file in the current directory, if any.
///
/// Existing variables take precedence. A missing file is not an error.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}
