//! Error types for spillq.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors raised by a disk-backed queue.
///
/// `Error` is `Clone` so the outcome of `close()` can be handed to every
/// thread that raced to close the same queue. I/O errors are therefore held
/// behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// I/O error from a page file, the size marker, or the queue directory.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// A background writer failed earlier; the queue refuses further work.
    ///
    /// The first failure is sticky and reported by every later call.
    #[error("background page writer failed: {0}")]
    Background(Arc<Error>),

    /// The queue has been closed.
    #[error("queue is closed")]
    Closed,

    /// A blocked call was woken because the queue started closing.
    #[error("blocking operation interrupted by close")]
    Interrupted,

    /// A page file failed validation (bad magic, checksum, or framing).
    #[error("corrupt page {page}: {reason}")]
    CorruptPage { page: u64, reason: String },

    /// The caller-supplied serializer rejected an element or byte sequence.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Build a corrupt-page error.
    pub fn corrupt(page: u64, reason: impl Into<String>) -> Self {
        Error::CorruptPage {
            page,
            reason: reason.into(),
        }
    }

    /// Whether this error came from disk I/O, in the foreground or background.
    pub fn is_io(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Background(cause) => cause.is_io(),
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}
