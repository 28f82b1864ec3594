//! DiskBackedQueue - the public queue handle.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::{QueueConfig, Result};
use crate::queue::core::QueueCore;
use crate::queue::StatsSnapshot;
use crate::storage::Serializer;

/// Outcome of a non-blocking or timed insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer<E> {
    /// The element is enqueued.
    Accepted,
    /// The disk was over its byte ceiling; the element is handed back.
    Rejected(E),
}

impl<E> Offer<E> {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Offer::Accepted)
    }

    /// The rejected element, if any.
    pub fn into_rejected(self) -> Option<E> {
        match self {
            Offer::Accepted => None,
            Offer::Rejected(element) => Some(element),
        }
    }
}

/// A FIFO queue that keeps a bounded number of pages in memory and spills
/// the rest to a directory.
///
/// The handle is `Send + Sync`; share it between producer and consumer
/// threads behind an `Arc`. Elements survive [`close`](Self::close) and are
/// found again by the next `open` of the same directory.
///
/// # Example
/// ```no_run
/// use spillq::{DiskBackedQueue, I64Serializer, QueueConfig};
///
/// let config = QueueConfig::new("/tmp/spillq-example").page_size(128);
/// let queue = DiskBackedQueue::<i64>::open(config, I64Serializer)?;
///
/// for i in 0..1_000 {
///     queue.put(i)?;
/// }
/// assert_eq!(queue.poll()?, Some(0));
/// queue.close()?;
/// # Ok::<(), spillq::Error>(())
/// ```
pub struct DiskBackedQueue<E: Send + 'static> {
    core: Arc<QueueCore<E>>,
}

impl<E: Send + 'static> DiskBackedQueue<E> {
    /// Open (or create) the queue stored in `config.directory`.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` for out-of-range parameters
    /// - I/O or corruption errors from the existing page files
    pub fn open<S>(config: QueueConfig, serializer: S) -> Result<Self>
    where
        S: Serializer<E> + 'static,
    {
        Self::with_serializer(config, Arc::new(serializer))
    }

    /// Like [`open`](Self::open), for a serializer already behind an `Arc`.
    pub fn with_serializer(config: QueueConfig, serializer: Arc<dyn Serializer<E>>) -> Result<Self> {
        let core = QueueCore::open(config, serializer)?;
        Ok(Self { core })
    }

    // ========================================================================
    // Insert
    // ========================================================================

    /// Insert without waiting.
    ///
    /// # Errors
    /// - `Error::Closed` after close
    /// - `Error::Background` after a background write failure
    /// - `Error::Io` if spilling the previous page failed; the element is
    ///   enqueued regardless
    pub fn offer(&self, element: E) -> Result<Offer<E>> {
        self.offer_until(element, Some(Instant::now()))
    }

    /// Insert, waiting up to `timeout` for disk space.
    pub fn offer_timeout(&self, element: E, timeout: Duration) -> Result<Offer<E>> {
        self.offer_until(element, Instant::now().checked_add(timeout))
    }

    /// Insert, waiting as long as it takes for disk space.
    ///
    /// # Errors
    /// Returns `Error::Interrupted` if the queue is closed while waiting.
    pub fn put(&self, element: E) -> Result<()> {
        match self.core.offer(element, None)? {
            None => Ok(()),
            // An unbounded wait only ends in success or an error.
            Some(_) => Err(crate::common::Error::Interrupted),
        }
    }

    fn offer_until(&self, element: E, deadline: Option<Instant>) -> Result<Offer<E>> {
        Ok(match self.core.offer(element, deadline)? {
            None => Offer::Accepted,
            Some(element) => Offer::Rejected(element),
        })
    }

    // ========================================================================
    // Remove
    // ========================================================================

    /// Remove the head element without waiting.
    ///
    /// Returns `None` if the queue is empty, or if the head element sits in
    /// a page that is still being written.
    pub fn poll(&self) -> Result<Option<E>> {
        self.core.poll(Some(Instant::now()))
    }

    /// Remove the head element, waiting up to `timeout` for one.
    ///
    /// The wait covers both new elements and pages still being written.
    pub fn poll_timeout(&self, timeout: Duration) -> Result<Option<E>> {
        self.core.poll(Instant::now().checked_add(timeout))
    }

    /// Remove the head element, waiting as long as it takes.
    ///
    /// # Errors
    /// Returns `Error::Interrupted` if the queue is closed while waiting.
    pub fn take(&self) -> Result<E> {
        loop {
            if let Some(element) = self.core.poll(None)? {
                return Ok(element);
            }
        }
    }

    /// Copy of the head element. Never waits, like [`poll`](Self::poll).
    pub fn peek(&self) -> Result<Option<E>>
    where
        E: Clone,
    {
        self.core.peek()
    }

    /// Move up to `max` elements into `sink` without waiting for new ones.
    ///
    /// Returns how many were moved.
    pub fn drain_to<S: Extend<E>>(&self, sink: &mut S, max: usize) -> Result<usize> {
        self.core.drain_to(sink, max)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Drop every element, in memory and on disk.
    pub fn clear(&self) -> Result<()> {
        self.core.clear()
    }

    /// Flush pending pages and stop background writers.
    ///
    /// Idempotent; every caller sees the first close's outcome. Work that
    /// does not finish within `termination_wait` is dropped with a warning.
    pub fn close(&self) -> Result<()> {
        self.core.close()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Elements currently enqueued.
    pub fn len(&self) -> u64 {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    /// Bytes held by page files.
    pub fn disk_byte_usage(&self) -> u64 {
        self.core.disk_byte_usage()
    }

    /// Directory holding the page files.
    pub fn external_path(&self) -> &Path {
        self.core.store().path()
    }

    /// Pages absorbed in memory per page written by a producer.
    pub fn fast_slow_write_ratio(&self) -> f64 {
        self.core.stats().fast_slow_write_ratio()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats().snapshot()
    }

    pub fn config(&self) -> &QueueConfig {
        self.core.config()
    }
}

impl<E: Send + 'static> Drop for DiskBackedQueue<E> {
    fn drop(&mut self) {
        if self.core.config().close_on_drop {
            if let Err(e) = self.core.close() {
                log::error!(
                    "closing {} on drop failed: {}",
                    self.core.store().path().display(),
                    e
                );
            }
        } else {
            self.core.abandon();
        }
    }
}

impl<E: Send + 'static> std::fmt::Debug for DiskBackedQueue<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskBackedQueue")
            .field("path", &self.external_path())
            .field("len", &self.len())
            .field("disk_bytes", &self.disk_byte_usage())
            .field("closed", &self.is_closed())
            .finish()
    }
}
