//! HTTP publisher for the ingestion API.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::Publisher;
use crate::config::CaptureConfig;
use crate::error::{PublishError, PublishResult};
use crate::record::{BatchEnvelope, CaptureRecord};

/// Highest HTTP status treated as success.
const MAX_SUCCESS_STATUS: u16 = 202;

/// Body returned by the ingestion service.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishResponse {
    /// Whether the batch was accepted
    pub status: bool,
    /// Optional explanation
    #[serde(default)]
    pub message: Option<String>,
}

/// Publisher that POSTs batches as JSON to `{endpoint}/messages`.
///
/// Authenticates with `Authorization: Bearer <api key>`. A batch counts as
/// delivered only when the service answers with a status of 202 or lower
/// and a body of `{"status": true}`.
#[derive(Clone)]
pub struct HttpPublisher {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpPublisher {
    /// Create a publisher for the given base URL.
    pub fn new(
        endpoint: impl AsRef<str>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> PublishResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("{}/messages", endpoint.as_ref().trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    /// Create a publisher from a validated configuration.
    pub fn from_config(config: &CaptureConfig) -> PublishResult<Self> {
        Self::new(config.endpoint(), config.api_key(), config.publish_timeout())
    }

    /// Full URL batches are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for HttpPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPublisher")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, batch: &[CaptureRecord]) -> PublishResult<()> {
        let body = serde_json::to_vec(&BatchEnvelope { messages: batch })?;

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status > MAX_SUCCESS_STATUS {
            return Err(PublishError::Status(status));
        }

        let accepted: PublishResponse = response
            .json()
            .await
            .map_err(|e| PublishError::Transport(format!("invalid response body: {}", e)))?;

        if !accepted.status {
            tracing::debug!(
                message = accepted.message.as_deref().unwrap_or_default(),
                "Ingestion service rejected batch"
            );
            return Err(PublishError::Rejected);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let publisher =
            HttpPublisher::new("http://localhost:9000/v1/", "key", Duration::from_secs(1)).unwrap();
        assert_eq!(publisher.url(), "http://localhost:9000/v1/messages");
    }

    #[test]
    fn test_from_config() {
        let config = CaptureConfig::builder()
            .api_key("key")
            .endpoint("https://ingest.example.com")
            .build()
            .unwrap();
        let publisher = HttpPublisher::from_config(&config).unwrap();
        assert_eq!(publisher.url(), "https://ingest.example.com/messages");
        assert!(format!("{:?}", publisher).contains("[REDACTED]"));
    }
}
