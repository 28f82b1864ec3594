//! Common types and utilities shared across spillq.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and [`QueueConfig`](config::QueueConfig)
//! - Error types
//! - Identifiers (PageId)

pub mod config;
pub mod error;
mod page_id;

pub use config::QueueConfig;
pub use error::{Error, Result};
pub use page_id::PageId;
