//! Queue statistics tracking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics tracked by a disk-backed queue.
///
/// All fields are atomic for lock-free, thread-safe updates.
///
/// # Memory Ordering
/// We use `Ordering::Relaxed` for all operations: counters are independent
/// and only need to be eventually consistent.
///
/// # Example
/// ```
/// use spillq::QueueStats;
/// use std::sync::atomic::Ordering;
///
/// let stats = QueueStats::new();
/// stats.fast_writes.fetch_add(3, Ordering::Relaxed);
/// stats.slow_writes.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(stats.fast_slow_write_ratio(), 3.0);
/// ```
#[derive(Debug)]
pub struct QueueStats {
    /// Full pages absorbed without touching disk on the producer's thread.
    pub fast_writes: AtomicU64,

    /// Full pages the producer had to write itself.
    pub slow_writes: AtomicU64,

    /// Page files written, by any thread.
    pub pages_written: AtomicU64,

    /// Page files read back.
    pub pages_read: AtomicU64,

    /// Consumed page files deleted.
    pub pages_deleted: AtomicU64,
}

impl QueueStats {
    /// Create a new stats tracker with all counters at zero.
    pub fn new() -> Self {
        Self {
            fast_writes: AtomicU64::new(0),
            slow_writes: AtomicU64::new(0),
            pages_written: AtomicU64::new(0),
            pages_read: AtomicU64::new(0),
            pages_deleted: AtomicU64::new(0),
        }
    }

    /// Ratio of in-memory page absorbs to forced foreground writes.
    ///
    /// A low value means producers keep stalling on disk: the memory budget
    /// is too small for the consumer lag.
    pub fn fast_slow_write_ratio(&self) -> f64 {
        self.snapshot().fast_slow_write_ratio()
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fast_writes: self.fast_writes.load(Ordering::Relaxed),
            slow_writes: self.slow_writes.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
            pages_read: self.pages_read.load(Ordering::Relaxed),
            pages_deleted: self.pages_deleted.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.fast_writes.store(0, Ordering::Relaxed);
        self.slow_writes.store(0, Ordering::Relaxed);
        self.pages_written.store(0, Ordering::Relaxed);
        self.pages_read.store(0, Ordering::Relaxed);
        self.pages_deleted.store(0, Ordering::Relaxed);
    }
}

impl Default for QueueStats {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of queue statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub fast_writes: u64,
    pub slow_writes: u64,
    pub pages_written: u64,
    pub pages_read: u64,
    pub pages_deleted: u64,
}

impl StatsSnapshot {
    /// Fast writes per slow write; with no slow writes, the fast count.
    pub fn fast_slow_write_ratio(&self) -> f64 {
        self.fast_writes as f64 / self.slow_writes.max(1) as f64
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats {{ fast: {}, slow: {}, written: {}, read: {}, deleted: {}, ratio: {:.2} }}",
            self.fast_writes,
            self.slow_writes,
            self.pages_written,
            self.pages_read,
            self.pages_deleted,
            self.fast_slow_write_ratio()
        )
    }
}
