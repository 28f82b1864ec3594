//! Element serialization.
//!
//! Queues never look inside their elements. A [`Serializer`] supplied at
//! construction turns each element into bytes when its page is spilled and
//! back when the page is read in again.

use crate::common::{Error, Result};

/// Converts queue elements to and from bytes.
///
/// Implementations must be thread-safe: background writers serialize pages
/// while producers and consumers keep using the queue.
pub trait Serializer<E>: Send + Sync {
    /// Append the encoded form of `element` to `out`.
    fn serialize(&self, element: &E, out: &mut Vec<u8>) -> Result<()>;

    /// Decode one element from exactly `bytes`.
    fn deserialize(&self, bytes: &[u8]) -> Result<E>;
}

/// Raw byte vectors, stored verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl Serializer<Vec<u8>> for BytesSerializer {
    fn serialize(&self, element: &Vec<u8>, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(element);
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// UTF-8 strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl Serializer<String> for StringSerializer {
    fn serialize(&self, element: &String, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(element.as_bytes());
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// 64-bit signed integers, little-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Serializer;

impl Serializer<i64> for I64Serializer {
    fn serialize(&self, element: &i64, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&element.to_le_bytes());
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<i64> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| {
            Error::Serialization(format!("expected 8 bytes for i64, got {}", bytes.len()))
        })?;
        Ok(i64::from_le_bytes(raw))
    }
}
