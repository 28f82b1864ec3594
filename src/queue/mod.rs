//! Queue layer - the disk-backed FIFO and its background writers.
//!
//! # Components
//! - [`DiskBackedQueue`] - The public queue handle
//! - [`QueueCore`] - Page coordination, waits and the close protocol
//! - [`FlushScheduler`] - Background writer threads, dedicated or shared
//! - [`QueueStats`] - Write path statistics

mod core;
mod disk_backed_queue;
mod stats;
mod writer;

pub use self::core::QueueCore;
pub use disk_backed_queue::{DiskBackedQueue, Offer};
pub use stats::{QueueStats, StatsSnapshot};
pub use writer::{FlushScheduler, FlushTask, TaskId};
