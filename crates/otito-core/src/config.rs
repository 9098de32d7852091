//! Configuration for the capture middleware.
//!
//! [`CaptureConfig`] is built once through [`CaptureConfigBuilder`] and is
//! immutable afterwards. Validation happens in [`CaptureConfigBuilder::build`]
//! so that a bad option fails before any request is served.
//!
//! ```ignore
//! use otito_core::{CaptureConfig, IpStrategy};
//!
//! let config = CaptureConfig::builder()
//!     .api_key("sk_live_...")
//!     .flush_threshold(50)
//!     .ip_strategy(IpStrategy::ProxyHeader)
//!     .app_id_fn(|parts| {
//!         parts.headers.get("x-app-id")
//!             .and_then(|v| v.to_str().ok())
//!             .unwrap_or_default()
//!             .to_string()
//!     })
//!     .filter_fn(|parts| parts.uri.path() != "/health")
//!     .build()?;
//! ```

use http::request::Parts;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::ip::IpStrategy;
use crate::mask::HeaderMasker;

/// Records buffered before a flush is triggered, by default.
pub const DEFAULT_FLUSH_THRESHOLD: i64 = 100;
/// Hard upper bound for the flush threshold.
pub const MAX_FLUSH_THRESHOLD: i64 = 1000;
/// Default request body limit: 25 MiB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 25 * 1024 * 1024;
/// Default ingestion endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.otito.dev/v1";
/// Request headers masked by default.
pub const DEFAULT_HEADERS_TO_STRIP: &[&str] = &["Authorization"];

/// Resolves the application identifier of a request.
pub type AppIdFn = Arc<dyn Fn(&Parts) -> String + Send + Sync>;

/// Decides whether a request is recorded. Returning `false` skips it.
pub type FilterFn = Arc<dyn Fn(&Parts) -> bool + Send + Sync>;

/// Validated capture configuration.
#[derive(Clone)]
pub struct CaptureConfig {
    pub(crate) app_id_fn: AppIdFn,
    pub(crate) filter_fn: FilterFn,
    pub(crate) ip_strategy: IpStrategy,
    pub(crate) flush_threshold: usize,
    pub(crate) masker: HeaderMasker,
    pub(crate) max_body_size: Option<usize>,
    pub(crate) flush_interval: Option<Duration>,
    pub(crate) api_key: String,
    pub(crate) endpoint: String,
    pub(crate) publish_timeout: Duration,
}

impl CaptureConfig {
    /// Start building a configuration.
    pub fn builder() -> CaptureConfigBuilder {
        CaptureConfigBuilder::default()
    }

    /// Application identifier for a request.
    pub fn app_id(&self, parts: &Parts) -> String {
        (self.app_id_fn)(parts)
    }

    /// Whether a request should be recorded.
    pub fn should_record(&self, parts: &Parts) -> bool {
        (self.filter_fn)(parts)
    }

    /// Configured IP strategy.
    pub fn ip_strategy(&self) -> IpStrategy {
        self.ip_strategy
    }

    /// Buffered records that trigger a flush.
    pub fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    /// Masker built from the strip list.
    pub fn masker(&self) -> &HeaderMasker {
        &self.masker
    }

    /// Maximum accepted request body, if enforced.
    pub fn max_body_size(&self) -> Option<usize> {
        self.max_body_size
    }

    /// Period of the background flush, if any.
    pub fn flush_interval(&self) -> Option<Duration> {
        self.flush_interval
    }

    /// API key used to authenticate publishes.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Base URL of the ingestion service.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Timeout for one publish request.
    pub fn publish_timeout(&self) -> Duration {
        self.publish_timeout
    }
}

impl fmt::Debug for CaptureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureConfig")
            .field("ip_strategy", &self.ip_strategy)
            .field("flush_threshold", &self.flush_threshold)
            .field("headers_to_strip", &self.masker.names())
            .field("max_body_size", &self.max_body_size)
            .field("flush_interval", &self.flush_interval)
            .field("api_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("publish_timeout", &self.publish_timeout)
            .finish()
    }
}

/// Builder for [`CaptureConfig`].
#[derive(Clone)]
pub struct CaptureConfigBuilder {
    app_id_fn: AppIdFn,
    filter_fn: FilterFn,
    ip_strategy: IpStrategy,
    flush_threshold: i64,
    headers_to_strip: Vec<String>,
    max_body_size: Option<usize>,
    flush_interval: Option<Duration>,
    api_key: Option<String>,
    endpoint: String,
    publish_timeout: Duration,
}

impl Default for CaptureConfigBuilder {
    fn default() -> Self {
        Self {
            app_id_fn: Arc::new(|_| String::new()),
            filter_fn: Arc::new(|_| true),
            ip_strategy: IpStrategy::default(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            headers_to_strip: DEFAULT_HEADERS_TO_STRIP
                .iter()
                .map(|h| h.to_string())
                .collect(),
            max_body_size: Some(DEFAULT_MAX_BODY_SIZE),
            flush_interval: None,
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            publish_timeout: Duration::from_secs(30),
        }
    }
}

impl CaptureConfigBuilder {
    /// Set the application identifier resolver.
    pub fn app_id_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts) -> String + Send + Sync + 'static,
    {
        self.app_id_fn = Arc::new(f);
        self
    }

    /// Set the record filter. Requests for which it returns `false` are
    /// served normally but never recorded.
    pub fn filter_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts) -> bool + Send + Sync + 'static,
    {
        self.filter_fn = Arc::new(f);
        self
    }

    /// Set the client IP strategy.
    pub fn ip_strategy(mut self, strategy: IpStrategy) -> Self {
        self.ip_strategy = strategy;
        self
    }

    /// Set how many buffered records trigger a flush (1..=1000).
    pub fn flush_threshold(mut self, threshold: i64) -> Self {
        self.flush_threshold = threshold;
        self
    }

    /// Replace the list of request headers to mask.
    pub fn headers_to_strip(mut self, headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.headers_to_strip = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Add one request header to mask.
    pub fn strip_header(mut self, header: impl Into<String>) -> Self {
        self.headers_to_strip.push(header.into());
        self
    }

    /// Set the request body limit. `None` disables the check.
    pub fn max_body_size(mut self, limit: Option<usize>) -> Self {
        self.max_body_size = limit;
        self
    }

    /// Also flush on a fixed period, independently of the threshold.
    pub fn flush_interval(mut self, interval: Option<Duration>) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the API key (required).
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the ingestion base URL.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the timeout of one publish request.
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<CaptureConfig, ConfigError> {
        let api_key = self
            .api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        if self.flush_threshold <= 0 || self.flush_threshold > MAX_FLUSH_THRESHOLD {
            return Err(ConfigError::InvalidFlushThreshold {
                value: self.flush_threshold,
                max: MAX_FLUSH_THRESHOLD,
            });
        }

        if self.max_body_size == Some(0) {
            return Err(ConfigError::InvalidMaxBodySize);
        }

        let masker = HeaderMasker::new(&self.headers_to_strip)?;
        let endpoint = validate_endpoint(&self.endpoint)?;

        Ok(CaptureConfig {
            app_id_fn: self.app_id_fn,
            filter_fn: self.filter_fn,
            ip_strategy: self.ip_strategy,
            flush_threshold: self.flush_threshold as usize,
            masker,
            max_body_size: self.max_body_size,
            flush_interval: self.flush_interval.filter(|d| !d.is_zero()),
            api_key,
            endpoint,
            publish_timeout: self.publish_timeout,
        })
    }
}

fn validate_endpoint(endpoint: &str) -> Result<String, ConfigError> {
    let invalid = || ConfigError::InvalidEndpoint(endpoint.to_string());
    let uri: http::Uri = endpoint.trim().parse().map_err(|_| invalid())?;

    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => return Err(invalid()),
    }
    if uri.authority().is_none() {
        return Err(invalid());
    }

    Ok(endpoint.trim().trim_end_matches('/').to_string())
}
