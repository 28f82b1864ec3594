//! spillq - A FIFO queue that spills to disk.
//!
//! Elements are buffered in fixed-size pages. A bounded number of pages
//! stays in memory; the rest are written to numbered files in the queue's
//! directory and read back, in order, when consumers reach them.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            spillq                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Queue Layer (queue/)                           │   │
//! │  │   DiskBackedQueue → QueueCore (pages, waits, close)      │   │
//! │  │          FlushScheduler (dedicated | shared)             │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Storage Layer (storage/)                       │   │
//! │  │   PageStore + Page + PageHeader + Serializer + Codec     │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │                  <directory>/0  1  2  …  size                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, Error, QueueConfig)
//! - [`queue`] - The queue, its core and background writers
//! - [`storage`] - Page files, serialization and compression
//!
//! # Quick Start
//! ```no_run
//! use spillq::{DiskBackedQueue, Offer, QueueConfig, StringSerializer};
//!
//! let config = QueueConfig::new("/tmp/spillq-quickstart").page_size(64);
//! let queue = DiskBackedQueue::<String>::open(config, StringSerializer)?;
//!
//! if let Offer::Rejected(event) = queue.offer("event".to_string())? {
//!     eprintln!("disk full, dropped {}", event);
//! }
//! let next = queue.poll()?;
//! queue.close()?;
//! # Ok::<(), spillq::Error>(())
//! ```

// Core modules
pub mod common;
pub mod queue;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::{Error, PageId, QueueConfig, Result};

pub use queue::{DiskBackedQueue, FlushScheduler, Offer, QueueStats, StatsSnapshot};
pub use storage::page::{Page, PageHeader};
pub use storage::{BytesSerializer, Codec, I64Serializer, PageStore, Serializer, StringSerializer};
