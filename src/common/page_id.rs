//! Page identifier type.

use std::fmt;

/// Identifies a page of queue elements.
///
/// Ids are handed out in strictly increasing order as the write page
/// rotates, so they double as the queue's page sequence number. The
/// decimal form of the id is the page's file name on disk.
///
/// # Example
/// ```
/// use spillq::PageId;
///
/// let page_id = PageId::new(41);
/// assert_eq!(page_id.next(), PageId::new(42));
/// assert_eq!(page_id.file_name(), "41");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PageId(pub u64);

impl PageId {
    /// Id of the first page of an empty queue.
    pub const FIRST: PageId = PageId(0);

    /// Create a new PageId.
    #[inline]
    pub fn new(id: u64) -> Self {
        PageId(id)
    }

    /// The id that follows this one.
    #[inline]
    pub fn next(self) -> Self {
        PageId(self.0 + 1)
    }

    /// Name of the file holding this page.
    pub fn file_name(self) -> String {
        self.0.to_string()
    }

    /// Parse a page file name; anything but a plain decimal number is rejected.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        name.parse().ok().map(PageId)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({})", self.0)
    }
}
