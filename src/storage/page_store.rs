//! Page Store - directory-backed persistence for queue pages.
//!
//! The [`PageStore`] handles all direct file operations:
//! - Writing a page to a numbered file and reading it back
//! - Deleting consumed page files
//! - Tracking disk byte usage
//! - Persisting and recovering the element-count marker

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::config::{SIZE_MARKER, TEMP_SUFFIX};
use crate::common::{Error, PageId, Result};
use crate::storage::page::{Page, PageHeader};
use crate::storage::{Codec, Serializer};

/// What a queue directory held when it was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredPages {
    /// Ids of the page files found, ascending.
    pub ids: Vec<PageId>,
    /// Element count from the size marker, if one was present and readable.
    pub size_marker: Option<u64>,
}

impl StoredPages {
    /// Lowest stored page id.
    pub fn first(&self) -> Option<PageId> {
        self.ids.first().copied()
    }

    /// Highest stored page id.
    pub fn last(&self) -> Option<PageId> {
        self.ids.last().copied()
    }
}

/// Manages the page files of a single queue directory.
///
/// # Directory Layout
/// ```text
/// <dir>/
/// ├── 0        page 0 (header + body)
/// ├── 1        page 1
/// ├── 7.tmp    page 7, write in progress
/// └── size     decimal element count as of the last close
/// ```
///
/// # Thread Safety
/// `PageStore` is `Sync`: every method works on a single file named by the
/// page id, and the byte counter is atomic. The queue core guarantees that
/// no two threads touch the same page file at once.
///
/// # Durability
/// Pages are written to a temporary file, `fsync`ed, then renamed over the
/// final name, so a crash leaves either the complete page or no page.
#[derive(Debug)]
pub struct PageStore {
    dir: PathBuf,
    codec: Codec,
    /// Bytes currently held by page files.
    disk_bytes: AtomicU64,
}

impl PageStore {
    /// Open (creating if needed) a queue directory.
    ///
    /// Leftover temporary files from an interrupted write are removed and
    /// the size marker is consumed: it is only trusted for the run that
    /// follows the close which wrote it.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or listed.
    pub fn open<P: AsRef<Path>>(dir: P, codec: Codec) -> Result<(Self, StoredPages)> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut stored = StoredPages::default();
        let mut disk_bytes = 0u64;

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            if name.ends_with(TEMP_SUFFIX) {
                log::debug!("removing interrupted page write {}", name);
                fs::remove_file(entry.path())?;
            } else if let Some(id) = PageId::from_file_name(name) {
                disk_bytes += entry.metadata()?.len();
                stored.ids.push(id);
            }
        }
        stored.ids.sort_unstable();
        stored.size_marker = Self::take_size_marker(&dir)?;

        let store = Self {
            dir,
            codec,
            disk_bytes: AtomicU64::new(disk_bytes),
        };
        Ok((store, stored))
    }

    /// Directory holding the page files.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Bytes currently held by page files.
    #[inline]
    pub fn disk_byte_usage(&self) -> u64 {
        self.disk_bytes.load(Ordering::Relaxed)
    }

    fn page_path(&self, id: PageId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    /// Write the remaining elements of a page to its file.
    ///
    /// An existing file for the same page is replaced, and its bytes are
    /// released from the usage counter. Returns the new file size.
    ///
    /// # Durability
    /// This method calls `fsync()` before the file becomes visible under
    /// its final name.
    pub fn write_page<E>(&self, page: &Page<E>, serializer: &dyn Serializer<E>) -> Result<u64> {
        let raw = page.encode_body(serializer)?;
        let body = self.codec.compress(&raw)?;
        let count = u32::try_from(page.len())
            .map_err(|_| Error::Serialization(format!("{} holds too many elements", page.id())))?;
        let header = PageHeader::for_body(page.id(), count, self.codec.is_compressed(), &body);

        let final_path = self.page_path(page.id());
        let temp_path = self.dir.join(format!("{}{}", page.id().file_name(), TEMP_SUFFIX));
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(&header.to_bytes())?;
            file.write_all(&body)?;
            file.sync_all()?; // fsync for durability
        }
        fs::rename(&temp_path, &final_path)?;

        let written = (PageHeader::SIZE + body.len()) as u64;
        self.disk_bytes.fetch_add(written, Ordering::Relaxed);
        if let Some(previous) = page.file_bytes() {
            self.release_bytes(previous);
        }
        Ok(written)
    }

    /// Read a page back from its file.
    ///
    /// Returns `Ok(None)` if no file exists for `id`. The file stays on disk
    /// until [`PageStore::delete_page`] is called for it.
    ///
    /// # Errors
    /// Returns `Error::CorruptPage` if the header or checksum do not verify.
    pub fn read_page<E>(
        &self,
        id: PageId,
        capacity: usize,
        serializer: &dyn Serializer<E>,
        retain_encoded: bool,
    ) -> Result<Option<Page<E>>> {
        let mut file = match File::open(self.page_path(id)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let header = PageHeader::from_bytes(id, &data)?;
        if header.page_id != id {
            return Err(Error::corrupt(id.0, format!("file holds {}", header.page_id)));
        }
        let body = &data[PageHeader::SIZE..];
        if !header.verify_checksum(body) {
            return Err(Error::corrupt(id.0, "checksum mismatch"));
        }

        // The header, not the current setting, says how the body was stored.
        let raw = if header.compressed {
            match self.codec {
                Codec::Gzip { .. } => self.codec.decompress(body)?,
                Codec::None => Codec::gzip().decompress(body)?,
            }
        } else {
            body.to_vec()
        };

        let mut page = Page::decode_body(
            id,
            capacity,
            header.count as usize,
            &raw,
            serializer,
            retain_encoded,
        )?;
        page.set_file_bytes(Some(data.len() as u64));
        Ok(Some(page))
    }

    /// Read only the header of a page file.
    pub fn read_header(&self, id: PageId) -> Result<PageHeader> {
        let mut file = File::open(self.page_path(id))?;
        let mut buffer = [0u8; PageHeader::SIZE];
        file.read_exact(&mut buffer).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => Error::corrupt(id.0, "truncated header"),
            _ => e.into(),
        })?;
        PageHeader::from_bytes(id, &buffer)
    }

    /// Delete a consumed page file, returning the bytes freed.
    ///
    /// Deleting a page that has no file is not an error.
    pub fn delete_page(&self, id: PageId) -> Result<u64> {
        let path = self.page_path(id);
        let len = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        }
        self.release_bytes(len);
        Ok(len)
    }

    /// Persist the queue's element count.
    pub fn write_size_marker(&self, size: u64) -> Result<()> {
        let path = self.dir.join(SIZE_MARKER);
        let mut file = File::create(path)?;
        file.write_all(size.to_string().as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Remove everything in the directory, keeping the directory itself.
    pub fn clear(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        self.disk_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn release_bytes(&self, bytes: u64) {
        // Saturating: the counter is advisory and must never wrap.
        let _ = self
            .disk_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    /// Read and remove the size marker.
    fn take_size_marker(dir: &Path) -> Result<Option<u64>> {
        let path = dir.join(SIZE_MARKER);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        fs::remove_file(&path)?;

        match text.trim().parse::<u64>() {
            Ok(size) => Ok(Some(size)),
            Err(_) => {
                log::warn!("ignoring unreadable size marker in {}", dir.display());
                Ok(None)
            }
        }
    }
}
