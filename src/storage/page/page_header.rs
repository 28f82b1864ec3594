//! Page file header.
//!
//! Every page file starts with a [`PageHeader`] describing its body:
//! - magic and format version
//! - compression flag
//! - element count
//! - CRC32 checksum of the body as stored

use crate::common::{Error, PageId, Result};

/// Metadata stored at the beginning of every page file.
///
/// # Layout (24 bytes)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     magic (b"SQPG")
/// 4       1     format version
/// 5       1     flags (bit 0: body is gzip)
/// 6       2     reserved (zero)
/// 8       4     element count (little-endian)
/// 12      4     checksum (CRC32 of the stored body, little-endian)
/// 16      8     page id (little-endian)
/// ```
///
/// # Checksum
/// The checksum covers the body exactly as it sits on disk (after
/// compression), so a torn or truncated file is detected before any
/// decompression is attempted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// Whether the body is gzip-compressed.
    pub compressed: bool,
    /// Number of elements framed in the body.
    pub count: u32,
    /// CRC32 checksum of the stored body.
    pub checksum: u32,
    /// Id of the page this file holds.
    pub page_id: PageId,
}

impl PageHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 24;

    /// File magic.
    pub const MAGIC: [u8; 4] = *b"SQPG";

    /// Current format version.
    pub const VERSION: u8 = 1;

    /// Flag bit marking a gzip body.
    pub const FLAG_COMPRESSED: u8 = 0b0000_0001;

    /// Offset of each field within the header.
    pub const OFFSET_VERSION: usize = 4;
    pub const OFFSET_FLAGS: usize = 5;
    pub const OFFSET_COUNT: usize = 8;
    pub const OFFSET_CHECKSUM: usize = 12;
    pub const OFFSET_PAGE_ID: usize = 16;

    /// Build the header for a stored body.
    pub fn for_body(page_id: PageId, count: u32, compressed: bool, body: &[u8]) -> Self {
        Self {
            compressed,
            count,
            checksum: Self::compute_checksum(body),
            page_id,
        }
    }

    /// Read a header from the beginning of a byte slice.
    ///
    /// # Errors
    /// Returns `Error::CorruptPage` if the slice is too short or carries the
    /// wrong magic or version. `page` names the file for the error message.
    pub fn from_bytes(page: PageId, data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::corrupt(page.0, format!("truncated header ({} bytes)", data.len())));
        }
        if data[..4] != Self::MAGIC {
            return Err(Error::corrupt(page.0, "bad magic"));
        }
        if data[Self::OFFSET_VERSION] != Self::VERSION {
            return Err(Error::corrupt(
                page.0,
                format!("unsupported version {}", data[Self::OFFSET_VERSION]),
            ));
        }

        let flags = data[Self::OFFSET_FLAGS];
        let count = u32::from_le_bytes(le_array(&data[Self::OFFSET_COUNT..]));
        let checksum = u32::from_le_bytes(le_array(&data[Self::OFFSET_CHECKSUM..]));
        let page_id = u64::from_le_bytes(le_array(&data[Self::OFFSET_PAGE_ID..]));

        Ok(Self {
            compressed: flags & Self::FLAG_COMPRESSED != 0,
            count,
            checksum,
            page_id: PageId(page_id),
        })
    }

    /// Write this header to the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < PageHeader::SIZE`.
    pub fn write_to(&self, data: &mut [u8]) {
        assert!(data.len() >= Self::SIZE, "buffer too small for PageHeader");

        data[..4].copy_from_slice(&Self::MAGIC);
        data[Self::OFFSET_VERSION] = Self::VERSION;
        data[Self::OFFSET_FLAGS] = if self.compressed { Self::FLAG_COMPRESSED } else { 0 };
        data[Self::OFFSET_FLAGS + 1..Self::OFFSET_COUNT].fill(0);
        data[Self::OFFSET_COUNT..Self::OFFSET_COUNT + 4].copy_from_slice(&self.count.to_le_bytes());
        data[Self::OFFSET_CHECKSUM..Self::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&self.checksum.to_le_bytes());
        data[Self::OFFSET_PAGE_ID..Self::OFFSET_PAGE_ID + 8]
            .copy_from_slice(&self.page_id.0.to_le_bytes());
    }

    /// Serialize into a fresh buffer.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buffer = [0u8; Self::SIZE];
        self.write_to(&mut buffer);
        buffer
    }

    /// Compute the CRC32 checksum of a stored body.
    pub fn compute_checksum(body: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(body);
        hasher.finalize()
    }

    /// Verify that the stored checksum matches the body.
    pub fn verify_checksum(&self, body: &[u8]) -> bool {
        self.checksum == Self::compute_checksum(body)
    }
}

/// Copy the first `N` bytes of `data` into an array.
fn le_array<const N: usize>(data: &[u8]) -> [u8; N] {
    let mut raw = [0u8; N];
    raw.copy_from_slice(&data[..N]);
    raw
}

// ============================================================================
// TESTS
// ============================================================================
