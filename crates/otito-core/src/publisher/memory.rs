//! In-memory publisher.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::Publisher;
use crate::error::{PublishError, PublishResult};
use crate::record::CaptureRecord;

/// Publisher that keeps every accepted batch in memory.
///
/// Clones share the same storage, so a test can hand one clone to the
/// buffer and inspect the other.
///
/// ```ignore
/// let publisher = MemoryPublisher::new();
/// let store = MessageStore::new(config, publisher.clone());
/// // ... serve requests, close the store
/// assert_eq!(publisher.records().len(), 3);
/// ```
#[derive(Clone, Default)]
pub struct MemoryPublisher {
    batches: Arc<Mutex<Vec<Vec<CaptureRecord>>>>,
    failing: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl MemoryPublisher {
    /// Create an empty publisher that accepts every batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a publisher that rejects every batch.
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.set_failing(true);
        publisher
    }

    /// Wait this long inside every publish call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Toggle rejection of subsequent batches.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Accepted batches, in publish order.
    pub fn batches(&self) -> Vec<Vec<CaptureRecord>> {
        self.batches
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    /// Every accepted record, flattened.
    pub fn records(&self) -> Vec<CaptureRecord> {
        self.batches().into_iter().flatten().collect()
    }

    /// Number of publish calls, accepted or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of publish calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, batch: &[CaptureRecord]) -> PublishResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let result = if self.failing.load(Ordering::SeqCst) {
            Err(PublishError::Rejected)
        } else {
            self.batches
                .lock()
                .map_err(|e| PublishError::Unavailable(e.to_string()))
                .map(|mut batches| batches.push(batch.to_vec()))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
