//! Configuration for disk-backed queues.
//!
//! Constants describing the on-disk format live next to [`QueueConfig`],
//! the builder-style parameter set every queue is constructed from.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::{Error, Result};
use crate::storage::Codec;

/// Default number of elements per page.
pub const DEFAULT_PAGE_SIZE: usize = 1024;

/// File name of the element-count marker written on close.
pub const SIZE_MARKER: &str = "size";

/// Suffix of a page file that is still being written.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Default gzip compression level.
pub const DEFAULT_GZIP_LEVEL: u32 = 9;

/// Default gzip stream buffer size in bytes.
pub const DEFAULT_GZIP_BUFFER: usize = 1024;

/// Default period between background flush passes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Default bound on how long `close()` waits for pending writes.
pub const DEFAULT_TERMINATION_WAIT: Duration = Duration::from_secs(30);

/// Parameters of a [`DiskBackedQueue`](crate::DiskBackedQueue).
///
/// # Memory budget
/// Besides the write page and the read page, up to `max_pages` pages wait
/// in memory for a background writer, which drains them down to
/// `min_pages`. Pages read back from disk are loaded `min_pages` (at least
/// one) at a time.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use spillq::{Codec, QueueConfig};
///
/// let config = QueueConfig::new("/tmp/spillq-doc")
///     .page_size(256)
///     .pages(2, 8)
///     .writer_threads(1)
///     .compression(Codec::gzip())
///     .termination_wait(Duration::from_secs(5));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Directory owned by the queue.
    pub directory: PathBuf,
    /// Elements per page.
    pub page_size: usize,
    /// Low-water mark of the disk queue, and read-ahead batch size.
    pub min_pages: usize,
    /// Capacity of the disk queue. `<= 1` disables asynchronous spilling.
    pub max_pages: usize,
    /// Disk usage ceiling in bytes; 0 means unbounded.
    pub disk_max_bytes: u64,
    /// Background writer threads; 0 makes every spill synchronous.
    pub writer_threads: usize,
    /// Register with the process-wide scheduler instead of owning threads.
    pub shared_scheduler: bool,
    /// Period between background flush passes.
    pub flush_interval: Duration,
    /// How long `close()` may spend flushing.
    pub termination_wait: Duration,
    /// Close the queue when its handle is dropped.
    pub close_on_drop: bool,
    /// Page file compression.
    pub compression: Codec,
    /// Keep each element's serialized bytes next to it.
    pub memory_doubling: bool,
    /// Suppress warnings (data-loss estimates on close).
    pub silent: bool,
}

impl QueueConfig {
    /// Configuration with defaults for everything but the directory.
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            page_size: DEFAULT_PAGE_SIZE,
            min_pages: 1,
            max_pages: 4,
            disk_max_bytes: 0,
            writer_threads: 1,
            shared_scheduler: false,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            termination_wait: DEFAULT_TERMINATION_WAIT,
            close_on_drop: false,
            compression: Codec::None,
            memory_doubling: false,
            silent: false,
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the disk queue low and high water marks.
    pub fn pages(mut self, min_pages: usize, max_pages: usize) -> Self {
        self.min_pages = min_pages;
        self.max_pages = max_pages;
        self
    }

    pub fn disk_max_bytes(mut self, bytes: u64) -> Self {
        self.disk_max_bytes = bytes;
        self
    }

    pub fn writer_threads(mut self, threads: usize) -> Self {
        self.writer_threads = threads;
        self
    }

    pub fn shared_scheduler(mut self, shared: bool) -> Self {
        self.shared_scheduler = shared;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn termination_wait(mut self, wait: Duration) -> Self {
        self.termination_wait = wait;
        self
    }

    pub fn close_on_drop(mut self, close_on_drop: bool) -> Self {
        self.close_on_drop = close_on_drop;
        self
    }

    pub fn compression(mut self, codec: Codec) -> Self {
        self.compression = codec;
        self
    }

    pub fn memory_doubling(mut self, enabled: bool) -> Self {
        self.memory_doubling = enabled;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Whether pages can be handed to a background writer.
    pub fn has_background_writer(&self) -> bool {
        self.max_pages > 1 && (self.writer_threads > 0 || self.shared_scheduler)
    }

    /// Check every parameter.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` naming the first offending parameter.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::InvalidConfig("page_size must be > 0".into()));
        }
        if self.page_size > u32::MAX as usize {
            return Err(Error::InvalidConfig(
                "page_size must fit the u32 element count of a page file".into(),
            ));
        }
        if self.min_pages > self.max_pages {
            return Err(Error::InvalidConfig(format!(
                "min_pages ({}) exceeds max_pages ({})",
                self.min_pages, self.max_pages
            )));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::InvalidConfig("flush_interval must be > 0".into()));
        }
        if self.directory.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("directory must be set".into()));
        }
        if let Codec::Gzip { level, buffer_size } = self.compression {
            if level > 9 {
                return Err(Error::InvalidConfig(format!(
                    "gzip level {} is out of range 0..=9",
                    level
                )));
            }
            if buffer_size == 0 {
                return Err(Error::InvalidConfig("gzip buffer_size must be > 0".into()));
            }
        }
        Ok(())
    }
}
