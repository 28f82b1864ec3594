//! Page - the unit of buffering and disk I/O.
//!
//! A [`Page`] is a bounded, ordered batch of queue elements. Producers fill
//! the write page, consumers drain the read page, and whole pages move
//! between memory and disk.

use std::collections::VecDeque;

use crate::common::{Error, PageId, Result};
use crate::storage::Serializer;

/// Size of the length prefix framing each element in a page body.
const LEN_PREFIX: usize = 4;

/// A fixed-capacity batch of elements.
///
/// # Body format
/// When a page is written, its remaining elements are framed back to back:
/// ```text
/// ┌────────────┬───────────┬────────────┬───────────┬─────
/// │ len0 (u32) │ bytes0 …  │ len1 (u32) │ bytes1 …  │ …
/// └────────────┴───────────┴────────────┴───────────┴─────
/// ```
/// Lengths are little-endian. The body is what a [`Codec`](crate::Codec)
/// compresses and what the header's element count describes.
///
/// # Memory doubling
/// A page created with `retain_encoded` keeps the serialized form of every
/// element next to the element itself, so writing the page skips the
/// serializer entirely.
pub struct Page<E> {
    id: PageId,
    capacity: usize,
    elements: VecDeque<E>,
    /// Serialized elements, kept in step with `elements` when retained.
    encoded: Option<VecDeque<Vec<u8>>>,
    /// Elements removed since the page was created or loaded.
    taken: usize,
    /// Size of the file currently holding this page, if any.
    file_bytes: Option<u64>,
}

impl<E> Page<E> {
    /// Create an empty page.
    pub fn new(id: PageId, capacity: usize, retain_encoded: bool) -> Self {
        assert!(capacity > 0, "page capacity must be > 0");
        Self {
            id,
            capacity,
            elements: VecDeque::with_capacity(capacity),
            encoded: retain_encoded.then(|| VecDeque::with_capacity(capacity)),
            taken: 0,
            file_bytes: None,
        }
    }

    #[inline]
    pub fn id(&self) -> PageId {
        self.id
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of elements still in the page.
    #[inline]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Whether the page has received `capacity` elements.
    ///
    /// Consumed elements still count: a page never accepts new elements
    /// once it has been filled, even if a reader has drained part of it.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.elements.len() + self.taken >= self.capacity
    }

    /// Whether this page carries serialized copies of its elements.
    #[inline]
    pub fn retains_encoded(&self) -> bool {
        self.encoded.is_some()
    }

    /// Size of the backing file, when the page is on disk.
    #[inline]
    pub fn file_bytes(&self) -> Option<u64> {
        self.file_bytes
    }

    /// Record that the page now lives in a file of `bytes` bytes (or none).
    pub fn set_file_bytes(&mut self, bytes: Option<u64>) {
        self.file_bytes = bytes;
        if bytes.is_some() {
            self.taken = 0;
        }
    }

    /// Whether the in-memory contents differ from what is on disk.
    ///
    /// Empty pages never need writing; a page that was read from a file
    /// needs rewriting only once a consumer has removed elements from it.
    pub fn needs_flush(&self) -> bool {
        !self.is_empty() && (self.file_bytes.is_none() || self.taken > 0)
    }

    /// Append an element.
    ///
    /// `encoded` is stored only when the page retains serialized forms.
    ///
    /// # Panics
    /// Panics if the page is full.
    pub fn add(&mut self, element: E, encoded: Option<Vec<u8>>) {
        assert!(!self.is_full(), "add to full {}", self.id);
        if let (Some(store), Some(bytes)) = (self.encoded.as_mut(), encoded) {
            store.push_back(bytes);
        } else if self.encoded.is_some() {
            // An element without bytes would desynchronize the two queues.
            self.encoded = None;
        }
        self.elements.push_back(element);
    }

    /// Head element, without removing it.
    #[inline]
    pub fn peek(&self) -> Option<&E> {
        self.elements.front()
    }

    /// Remove and return the head element.
    pub fn poll(&mut self) -> Option<E> {
        let element = self.elements.pop_front()?;
        if let Some(store) = self.encoded.as_mut() {
            store.pop_front();
        }
        self.taken += 1;
        Some(element)
    }

    /// Move elements into `sink` until `max` have been moved in total.
    ///
    /// `already_moved` is the number moved by earlier calls of the same
    /// drain; the updated total is returned.
    pub fn drain_to<S: Extend<E>>(&mut self, sink: &mut S, already_moved: usize, max: usize) -> usize {
        let n = max.saturating_sub(already_moved).min(self.elements.len());
        sink.extend(self.elements.drain(..n));
        if let Some(store) = self.encoded.as_mut() {
            store.drain(..n);
        }
        self.taken += n;
        already_moved + n
    }

    /// Release every element without writing.
    pub fn clear(&mut self) {
        self.taken += self.elements.len();
        self.elements.clear();
        if let Some(store) = self.encoded.as_mut() {
            store.clear();
        }
    }

    /// Frame the remaining elements into a page body.
    ///
    /// Retained serialized forms are reused; otherwise every element goes
    /// through `serializer`.
    pub fn encode_body(&self, serializer: &dyn Serializer<E>) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        match self.encoded.as_ref() {
            Some(store) => {
                for bytes in store {
                    push_frame(&mut body, bytes, self.id)?;
                }
            }
            None => {
                let mut scratch = Vec::new();
                for element in &self.elements {
                    scratch.clear();
                    serializer.serialize(element, &mut scratch)?;
                    push_frame(&mut body, &scratch, self.id)?;
                }
            }
        }
        Ok(body)
    }

    /// Rebuild a page from a body produced by [`Page::encode_body`].
    ///
    /// # Errors
    /// Returns `Error::CorruptPage` if the framing does not hold exactly
    /// `count` elements.
    pub fn decode_body(
        id: PageId,
        capacity: usize,
        count: usize,
        body: &[u8],
        serializer: &dyn Serializer<E>,
        retain_encoded: bool,
    ) -> Result<Self> {
        let mut page = Page::new(id, capacity.max(count).max(1), retain_encoded);
        let mut rest = body;

        for index in 0..count {
            if rest.len() < LEN_PREFIX {
                return Err(Error::corrupt(id.0, format!("element {} has no length prefix", index)));
            }
            let (prefix, tail) = rest.split_at(LEN_PREFIX);
            let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
            if tail.len() < len {
                return Err(Error::corrupt(id.0, format!("element {} is truncated", index)));
            }
            let (bytes, tail) = tail.split_at(len);
            let element = serializer.deserialize(bytes)?;
            page.add(element, retain_encoded.then(|| bytes.to_vec()));
            rest = tail;
        }

        if !rest.is_empty() {
            return Err(Error::corrupt(id.0, format!("{} trailing bytes", rest.len())));
        }
        Ok(page)
    }
}

fn push_frame(body: &mut Vec<u8>, bytes: &[u8], id: PageId) -> Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::Serialization(format!("element in {} exceeds 4 GiB", id)))?;
    body.extend_from_slice(&len.to_le_bytes());
    body.extend_from_slice(bytes);
    Ok(())
}

impl<E> std::fmt::Debug for Page<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("len", &self.elements.len())
            .field("capacity", &self.capacity)
            .field("taken", &self.taken)
            .field("file_bytes", &self.file_bytes)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{I64Serializer, StringSerializer};

    fn filled(id: u64, values: &[i64]) -> Page<i64> {
        let mut page = Page::new(PageId::new(id), 4, false);
        for &v in values {
            page.add(v, None);
        }
        page
    }

    #[test]
    fn test_page_fills_up() {
        let page = filled(0, &[1, 2, 3]);
        assert_eq!(page.len(), 3);
        assert!(!page.is_full());

        let page = filled(0, &[1, 2, 3, 4]);
        assert!(page.is_full());
    }

    #[test]
    #[should_panic(expected = "add to full")]
    fn test_add_to_full_page_panics() {
        let mut page = filled(0, &[1, 2, 3, 4]);
        page.add(5, None);
    }

    #[test]
    fn test_poll_and_peek_in_order() {
        let mut page = filled(0, &[10, 20]);
        assert_eq!(page.peek(), Some(&10));
        assert_eq!(page.poll(), Some(10));
        assert_eq!(page.poll(), Some(20));
        assert_eq!(page.poll(), None);
        assert!(page.is_empty());
    }

    #[test]
    fn test_consumed_slots_stay_used() {
        let mut page = filled(0, &[1, 2]);
        page.poll();
        page.add(3, None);
        page.add(4, None);
        assert!(page.is_full());
        assert_eq!(page.len(), 3);
    }

    #[test]
    fn test_drain_to_respects_max() {
        let mut page = filled(0, &[1, 2, 3, 4]);
        let mut sink = Vec::new();

        let moved = page.drain_to(&mut sink, 1, 3);
        assert_eq!(moved, 3);
        assert_eq!(sink, vec![1, 2]);
        assert_eq!(page.len(), 2);

        let moved = page.drain_to(&mut sink, moved, 10);
        assert_eq!(moved, 5);
        assert_eq!(sink, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_body_roundtrip_skips_consumed() {
        let mut page = filled(3, &[5, -6, 7]);
        page.poll();

        let body = page.encode_body(&I64Serializer).unwrap();
        assert_eq!(body.len(), 2 * (LEN_PREFIX + 8));

        let mut back = Page::decode_body(PageId::new(3), 4, 2, &body, &I64Serializer, false).unwrap();
        assert_eq!(back.poll(), Some(-6));
        assert_eq!(back.poll(), Some(7));
    }

    #[test]
    fn test_retained_encoding_is_reused() {
        let mut page: Page<String> = Page::new(PageId::new(1), 2, true);
        // Retained bytes win over the serializer output.
        page.add("a".to_string(), Some(b"zz".to_vec()));
        page.add("b".to_string(), Some(b"b".to_vec()));
        page.poll();

        let body = page.encode_body(&StringSerializer).unwrap();
        let mut back = Page::decode_body(PageId::new(1), 2, 1, &body, &StringSerializer, true).unwrap();
        assert!(back.retains_encoded());
        assert_eq!(back.poll().as_deref(), Some("b"));
    }

    #[test]
    fn test_decode_detects_bad_framing() {
        let page = filled(0, &[1, 2]);
        let body = page.encode_body(&I64Serializer).unwrap();

        assert!(Page::decode_body(PageId::FIRST, 4, 3, &body, &I64Serializer, false).is_err());
        assert!(Page::decode_body(PageId::FIRST, 4, 1, &body, &I64Serializer, false).is_err());
        assert!(Page::decode_body(PageId::FIRST, 4, 2, &body[..body.len() - 1], &I64Serializer, false).is_err());
    }

    #[test]
    fn test_needs_flush_tracks_file_state() {
        let mut page = filled(0, &[1, 2]);
        assert!(page.needs_flush());

        page.set_file_bytes(Some(64));
        assert!(!page.needs_flush());

        page.poll();
        assert!(page.needs_flush());

        page.clear();
        assert!(!page.needs_flush());
    }
}
