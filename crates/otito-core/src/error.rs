//! Error types for traffic capture.
//!
//! Failures fall into three families:
//!
//! - [`ConfigError`] - invalid or missing options, raised while building the
//!   [`CaptureConfig`](crate::CaptureConfig) and before any request is served.
//! - [`CaptureError`] - a single request could not be captured (body too
//!   large or unreadable). Only these ever reach the HTTP client, as a
//!   structured JSON error body.
//! - [`PublishError`] - a batch could not be delivered. The batch is dropped.

use bytes::Bytes;
use http::{header, StatusCode};
use http_body_util::Full;
use serde::Serialize;

/// Result type alias for otito operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Result type for publish operations.
pub type PublishResult<T> = std::result::Result<T, PublishError>;

/// Top level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A request could not be captured.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// A batch could not be published.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Errors raised while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No API key was provided.
    #[error("please provide an api key")]
    MissingApiKey,

    /// The flush threshold is outside `1..=max`.
    #[error("flush threshold must be between 1 and {max}, got {value}")]
    InvalidFlushThreshold {
        /// Rejected value
        value: i64,
        /// Upper bound
        max: i64,
    },

    /// A header name in the strip list is not a valid HTTP header name.
    #[error("invalid header name to strip: {0:?}")]
    InvalidHeaderName(String),

    /// The ingestion endpoint is not an absolute http(s) URL.
    #[error("invalid ingestion endpoint: {0:?}")]
    InvalidEndpoint(String),

    /// The configured maximum request body size is zero.
    #[error("max body size must be greater than zero")]
    InvalidMaxBodySize,

    /// An unknown IP strategy name.
    #[error("unknown ip strategy: {0:?}")]
    UnknownIpStrategy(String),

    /// Environment variable deserialization failed.
    #[error("environment configuration error: {0}")]
    Environment(String),
}

/// Errors raised while capturing one request.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The request body exceeded the configured limit.
    #[error("request body exceeds limit of {limit} bytes")]
    BodyTooLarge {
        /// Configured limit in bytes
        limit: usize,
    },

    /// The request body could not be read.
    #[error("failed to read request body: {0}")]
    BodyRead(String),
}

impl CaptureError {
    /// Status code sent to the client for this error.
    pub fn status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Render the error as the JSON response sent back to the client.
    pub fn into_response(self) -> http::Response<Full<Bytes>> {
        let message = match &self {
            CaptureError::BodyTooLarge { .. } => "request body too large",
            CaptureError::BodyRead(_) => "internal error",
        };

        let body = serde_json::to_vec(&ErrorResponse {
            status: false,
            message,
        })
        .unwrap_or_else(|_| br#"{"status":false,"message":"internal error"}"#.to_vec());

        let mut response = http::Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = self.status();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        response
    }
}

/// JSON body of a capture failure response
#[derive(Serialize)]
pub(crate) struct ErrorResponse<'a> {
    pub status: bool,
    pub message: &'a str,
}

/// Errors raised while publishing a batch.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The request never completed (connect, TLS, timeout...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The ingestion service answered with a non-success status.
    #[error("ingestion service returned status {0}")]
    Status(u16),

    /// The ingestion service accepted the request but rejected the batch.
    #[error("ingestion service rejected the batch")]
    Rejected,

    /// The batch could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The publisher is not able to accept batches.
    #[error("publisher unavailable: {0}")]
    Unavailable(String),
}
