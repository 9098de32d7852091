//! Bounded in-memory batch buffer.
//!
//! [`BatchBuffer`] collects [`CaptureRecord`]s from every request and hands
//! them to a [`Publisher`] in batches. Appends take a short exclusive lock
//! and never wait on I/O. Reaching the flush threshold schedules a flush on
//! a background task tracked by the buffer, so that [`BatchBuffer::close`]
//! can wait for it.
//!
//! A flush:
//!
//! 1. waits for the flush gate, so at most one publish is in flight,
//! 2. takes the exclusive lock, moves every record out, releases the lock,
//! 3. masks the drained records and publishes them.
//!
//! Records drained by a flush whose publish fails are dropped. There is no
//! retry and no requeue, and a crash loses whatever is still buffered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::PublishResult;
use crate::mask::HeaderMasker;
use crate::publisher::Publisher;
use crate::record::CaptureRecord;

/// Shared, thread-safe record buffer with threshold-triggered flushing.
///
/// Cloning is cheap; clones share the same records.
#[derive(Clone)]
pub struct BatchBuffer {
    inner: Arc<Inner>,
}

struct Inner {
    records: Mutex<Vec<CaptureRecord>>,
    threshold: usize,
    masker: HeaderMasker,
    publisher: Arc<dyn Publisher>,
    flush_gate: tokio::sync::Mutex<()>,
    flush_pending: AtomicBool,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl BatchBuffer {
    /// Create a buffer flushing every `threshold` records.
    pub fn new<P: Publisher>(threshold: usize, masker: HeaderMasker, publisher: P) -> Self {
        Self::with_shared_publisher(threshold, masker, Arc::new(publisher))
    }

    /// Create a buffer around an already shared publisher.
    pub fn with_shared_publisher(
        threshold: usize,
        masker: HeaderMasker,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let threshold = threshold.max(1);
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(Vec::with_capacity(threshold)),
                threshold,
                masker,
                publisher,
                flush_gate: tokio::sync::Mutex::new(()),
                flush_pending: AtomicBool::new(false),
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Records that trigger a flush.
    pub fn threshold(&self) -> usize {
        self.inner.threshold
    }

    /// Records currently buffered.
    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a record, scheduling a background flush once the threshold
    /// is reached. Never blocks on the publisher.
    pub fn append(&self, record: CaptureRecord) {
        let len = {
            let mut records = self.lock_records();
            records.push(record);
            records.len()
        };

        if len >= self.inner.threshold {
            self.schedule_flush();
        }
    }

    /// Append on a tracked background task.
    ///
    /// Used by the interceptor so that the response is never held back by
    /// the buffer. [`close`](Self::close) waits for these tasks.
    pub fn append_in_background(&self, record: CaptureRecord) {
        if tokio::runtime::Handle::try_current().is_err() {
            self.append(record);
            return;
        }

        let buffer = self.clone();
        self.inner.tasks.spawn(async move {
            buffer.append(record);
        });
    }

    /// Drain the buffer and publish its contents now.
    ///
    /// Returns the publish error, if any. The drained records are dropped
    /// either way. An empty buffer is a successful no-op.
    pub async fn flush_now(&self) -> PublishResult<()> {
        let _gate = self.inner.flush_gate.lock().await;

        let mut batch = {
            let mut records = self.lock_records();
            self.inner.flush_pending.store(false, Ordering::SeqCst);
            std::mem::take(&mut *records)
        };

        if batch.is_empty() {
            return Ok(());
        }

        self.inner.masker.mask_all(&mut batch);
        let count = batch.len();

        match self.inner.publisher.publish(&batch).await {
            Ok(()) => {
                tracing::debug!(count, "Published capture batch");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(count, error = %e, "Dropping capture batch after failed publish");
                Err(e)
            }
        }
    }

    /// Stop background work, wait for in-flight tasks and publish whatever
    /// is left.
    ///
    /// Call this before the process exits; buffered records are otherwise
    /// lost. Stop serving traffic first: `close` waits until no tracked task
    /// is left, and every captured request spawns one. Records appended
    /// after `close` stay buffered until the next flush.
    pub async fn close(&self) -> PublishResult<()> {
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();

        self.flush_now().await
    }

    /// Flush on a fixed period until [`close`](Self::close) is called.
    ///
    /// Must be called from within a Tokio runtime; outside of one the
    /// periodic flush is not started.
    pub fn start_interval_flush(&self, period: Duration) {
        if period.is_zero() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!(
                period_ms = period.as_millis() as u64,
                "No Tokio runtime, periodic capture flush disabled"
            );
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let token = self.inner.shutdown.clone();

        self.inner.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let buffer = BatchBuffer { inner };
                        if let Err(e) = buffer.flush_now().await {
                            tracing::error!(error = %e, "Periodic capture flush failed");
                        }
                    }
                }
            }
        });
    }

    fn schedule_flush(&self) {
        if self.inner.flush_pending.swap(true, Ordering::SeqCst) {
            return;
        }

        if tokio::runtime::Handle::try_current().is_err() {
            self.inner.flush_pending.store(false, Ordering::SeqCst);
            tracing::warn!(
                threshold = self.inner.threshold,
                "No Tokio runtime, capture flush deferred"
            );
            return;
        }

        let buffer = self.clone();
        self.inner.tasks.spawn(async move {
            if let Err(e) = buffer.flush_now().await {
                tracing::error!(error = %e, "Background capture flush failed");
            }
        });
    }

    fn lock_records(&self) -> MutexGuard<'_, Vec<CaptureRecord>> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.inner
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for BatchBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchBuffer")
            .field("threshold", &self.inner.threshold)
            .field("len", &self.len())
            .finish()
    }
}
