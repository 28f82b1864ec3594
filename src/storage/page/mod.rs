//! Page types and layout.
//!
//! This module contains:
//! - [`Page`] - A bounded batch of queue elements
//! - [`PageHeader`] - Metadata at the start of every page file

#[allow(clippy::module_inception)]
mod page;
mod page_header;

pub use page::Page;
pub use page_header::PageHeader;
