//! Storage layer - page files, serialization and compression.
//!
//! This module handles persistent storage:
//! - [`PageStore`] - Directory of numbered page files
//! - [`page`] - Page types and file layout
//! - [`Serializer`] - Element encoding supplied by the caller
//! - [`Codec`] - Optional body compression

mod codec;
pub mod page;
mod page_store;
mod serializer;

pub use codec::Codec;
pub use page_store::{PageStore, StoredPages};
pub use serializer::{BytesSerializer, I64Serializer, Serializer, StringSerializer};
