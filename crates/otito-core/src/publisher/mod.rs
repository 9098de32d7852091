//! Batch publishing.
//!
//! A [`Publisher`] delivers one batch of [`CaptureRecord`]s to the ingestion
//! service. Delivery is best effort: the buffer drops a batch whose publish
//! fails, it never retries or requeues it.
//!
//! Implementations:
//!
//! - [`HttpPublisher`] - POSTs JSON batches to the ingestion API (feature
//!   `http-publisher`, on by default)
//! - [`MemoryPublisher`] - keeps batches in memory, for tests and local runs

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::PublishResult;
use crate::record::CaptureRecord;

#[cfg(feature = "http-publisher")]
mod client;
mod memory;

#[cfg(feature = "http-publisher")]
pub use self::client::{HttpPublisher, PublishResponse};
pub use self::memory::MemoryPublisher;

/// Delivers batches to the ingestion service.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Publish one batch, in order.
    ///
    /// `Ok(())` means the service accepted the batch. Any error means it
    /// should be considered lost.
    async fn publish(&self, batch: &[CaptureRecord]) -> PublishResult<()>;
}

#[async_trait]
impl<P> Publisher for Arc<P>
where
    P: Publisher + ?Sized,
{
    async fn publish(&self, batch: &[CaptureRecord]) -> PublishResult<()> {
        (**self).publish(batch).await
    }
}
