//! Message store: the configured entry point.

use std::sync::Arc;

use crate::buffer::BatchBuffer;
use crate::config::CaptureConfig;
use crate::error::Result;
use crate::interceptor::CaptureLayer;
use crate::publisher::Publisher;

/// Owns the capture configuration and the batch buffer.
///
/// Hand [`layer`](Self::layer) to your service stack and call
/// [`close`](Self::close) during shutdown so the last partial batch is
/// published. Clones share the same buffer.
#[derive(Clone)]
pub struct MessageStore {
    config: Arc<CaptureConfig>,
    buffer: BatchBuffer,
}

impl MessageStore {
    /// Create a store publishing through `publisher`.
    ///
    /// Starts the periodic flush when the configuration sets an interval;
    /// this requires a running Tokio runtime.
    pub fn new<P: Publisher>(config: CaptureConfig, publisher: P) -> Self {
        let buffer = BatchBuffer::new(
            config.flush_threshold(),
            config.masker().clone(),
            publisher,
        );

        if let Some(period) = config.flush_interval() {
            buffer.start_interval_flush(period);
        }

        tracing::debug!(
            threshold = config.flush_threshold(),
            endpoint = config.endpoint(),
            ip_strategy = %config.ip_strategy(),
            "Message store created"
        );

        Self {
            config: Arc::new(config),
            buffer,
        }
    }

    /// Create a store publishing to the configured ingestion endpoint.
    #[cfg(feature = "http-publisher")]
    pub fn from_config(config: CaptureConfig) -> Result<Self> {
        let publisher = crate::publisher::HttpPublisher::from_config(&config)?;
        Ok(Self::new(config, publisher))
    }

    /// Tower layer capturing into this store.
    pub fn layer(&self) -> CaptureLayer {
        CaptureLayer::new(self.config.clone(), self.buffer.clone())
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Get a reference to the underlying buffer.
    pub fn buffer(&self) -> &BatchBuffer {
        &self.buffer
    }

    /// Number of records waiting to be published.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Publish everything buffered now.
    pub async fn flush(&self) -> Result<()> {
        self.buffer.flush_now().await?;
        Ok(())
    }

    /// Wait for in-flight captures and publish the remainder.
    pub async fn close(&self) -> Result<()> {
        self.buffer.close().await?;
        tracing::debug!("Message store closed");
        Ok(())
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("config", &self.config)
            .field("buffer", &self.buffer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::MemoryPublisher;
    use crate::record::CaptureRecord;
    use crate::Error;
    use std::time::Duration;

    fn config(threshold: i64) -> CaptureConfig {
        CaptureConfig::builder()
            .api_key("key")
            .flush_threshold(threshold)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_close_publishes_remainder() {
        let publisher = MemoryPublisher::new();
        let store = MessageStore::new(config(10), publisher.clone());

        for i in 0..4 {
            store.buffer().append(CaptureRecord::new("GET", format!("/{}", i)));
        }
        assert_eq!(store.buffered(), 4);
        assert_eq!(publisher.attempts(), 0);

        store.close().await.unwrap();
        assert_eq!(store.buffered(), 0);
        assert_eq!(publisher.records().len(), 4);
    }

    #[tokio::test]
    async fn test_store_flush_reports_error() {
        let publisher = MemoryPublisher::failing();
        let store = MessageStore::new(config(10), publisher.clone());
        store.buffer().append(CaptureRecord::new("GET", "/"));

        let err = store.flush().await.unwrap_err();
        assert!(matches!(err, Error::Publish(_)));
        assert_eq!(store.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_starts_interval_flush() {
        let publisher = MemoryPublisher::new();
        let config = CaptureConfig::builder()
            .api_key("key")
            .flush_interval(Some(Duration::from_secs(5)))
            .build()
            .unwrap();
        let store = MessageStore::new(config, publisher.clone());
        store.buffer().append(CaptureRecord::new("GET", "/"));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(publisher.records().len(), 1);

        store.close().await.unwrap();
    }

    #[cfg(feature = "http-publisher")]
    #[test]
    fn test_from_config() {
        let store = MessageStore::from_config(config(5)).unwrap();
        assert_eq!(store.config().flush_threshold(), 5);
        assert!(!format!("{:?}", store).contains("\"key\""));
    }
}
