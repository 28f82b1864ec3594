//! Page body compression.
//!
//! A [`Codec`] transforms the framed element payload of a page before it
//! reaches disk. The page header records whether the body is compressed, so
//! a queue can read files written under a different setting.

use std::io::{self, BufReader, BufWriter, Read, Write};

use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::common::config::{DEFAULT_GZIP_BUFFER, DEFAULT_GZIP_LEVEL};

/// Compression applied to page bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Bodies are stored as-is.
    #[default]
    None,
    /// Bodies are gzip streams.
    Gzip {
        /// Compression level, 0 (store) to 9 (best).
        level: u32,
        /// Stream buffer size in bytes.
        buffer_size: usize,
    },
}

impl Codec {
    /// Gzip with the default level and buffer size.
    pub fn gzip() -> Self {
        Codec::Gzip {
            level: DEFAULT_GZIP_LEVEL,
            buffer_size: DEFAULT_GZIP_BUFFER,
        }
    }

    /// Whether this codec transforms the body.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        matches!(self, Codec::Gzip { .. })
    }

    /// Encode a raw body for storage.
    pub fn compress(&self, raw: &[u8]) -> io::Result<Vec<u8>> {
        match *self {
            Codec::None => Ok(raw.to_vec()),
            Codec::Gzip { level, buffer_size } => {
                let encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::new(level));
                let mut writer = BufWriter::with_capacity(buffer_size, encoder);
                writer.write_all(raw)?;
                let encoder = writer.into_inner().map_err(|e| e.into_error())?;
                encoder.finish()
            }
        }
    }

    /// Decode a stored body.
    pub fn decompress(&self, stored: &[u8]) -> io::Result<Vec<u8>> {
        match *self {
            Codec::None => Ok(stored.to_vec()),
            Codec::Gzip { buffer_size, .. } => {
                let mut decoder = GzDecoder::new(BufReader::with_capacity(buffer_size, stored));
                let mut raw = Vec::with_capacity(stored.len() * 2);
                decoder.read_to_end(&mut raw)?;
                Ok(raw)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_identity() {
        let codec = Codec::None;
        assert!(!codec.is_compressed());
        assert_eq!(codec.compress(b"abc").unwrap(), b"abc");
        assert_eq!(codec.decompress(b"abc").unwrap(), b"abc");
    }

    #[test]
    fn test_gzip_shrinks_repetitive_data() {
        let codec = Codec::gzip();
        let raw = vec![7u8; 64 * 1024];

        let stored = codec.compress(&raw).unwrap();
        assert!(stored.len() < raw.len() / 10);
        assert_eq!(codec.decompress(&stored).unwrap(), raw);
    }

    #[test]
    fn test_gzip_rejects_garbage() {
        let codec = Codec::gzip();
        assert!(codec.decompress(b"definitely not gzip").is_err());
    }
}
