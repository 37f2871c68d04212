//! # File Segment Backing Store
//!
//! `FileSegment` is the ranged channel for a single local file: every page
//! owns the fixed window `[id * page_size, (id + 1) * page_size)` of one
//! shared file handle.
//!
//! ## Positional I/O
//!
//! All segments share one `SharedFile` and use positional reads and writes
//! (`pread`/`pwrite` on Unix, `seek_read`/`seek_write` on Windows), so there
//! is no shared cursor to race on and no lock is held across I/O.
//!
//! ```text
//! file offset:  0          page_size     2*page_size
//!               +------------+------------+-----------
//!               |  page 0    |  page 1    |  page 2 ...
//!               +------------+------------+-----------
//!                  ^ FileSegment{offset: 0}
//!                               ^ FileSegment{offset: page_size}
//! ```
//!
//! Reads loop until the window is full or end-of-file is reached, so a page
//! past the current end of file loads with fewer bytes (possibly zero).
//! Writes extend the file as needed.
//!
//! ## Lifecycle
//!
//! Closing any segment closes the shared file: subsequent loads and flushes
//! of every page on that file fail with an error rather than silently
//! reopening.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{eyre, Result, WrapErr};
use parking_lot::RwLock;
use tracing::debug;

use super::channel::ByteChannel;
use super::error::CacheError;
use super::page::{Page, PageId};

/// Byte offset of page `id`, failing if it does not fit in a `u64`.
pub(crate) fn page_offset(id: PageId, page_size: usize) -> Result<u64> {
    id.checked_mul(page_size as u64).ok_or_else(|| {
        CacheError::IllegalState(format!(
            "page {} with page size {} overflows the address space",
            id, page_size
        ))
        .into()
    })
}

#[derive(Debug)]
pub struct SharedFile {
    path: Option<PathBuf>,
    file: RwLock<Option<File>>,
}

impl SharedFile {
    pub fn new(file: File) -> Arc<Self> {
        Arc::new(Self {
            path: None,
            file: RwLock::new(Some(file)),
        })
    }

    /// Opens `path` for reading and writing, creating it if missing.
    /// Existing contents are kept.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .wrap_err_with(|| format!("failed to open backing file '{}'", path.display()))?;

        Ok(Arc::new(Self {
            path: Some(path.to_path_buf()),
            file: RwLock::new(Some(file)),
        }))
    }

    /// Opens `path` read-only. Flushing a page over this file fails.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let file = File::open(path)
            .wrap_err_with(|| format!("failed to open backing file '{}'", path.display()))?;

        Ok(Arc::new(Self {
            path: Some(path.to_path_buf()),
            file: RwLock::new(Some(file)),
        }))
    }

    /// Creates `path`, truncating any existing file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create backing file '{}'", path.display()))?;

        Ok(Arc::new(Self {
            path: Some(path.to_path_buf()),
            file: RwLock::new(Some(file)),
        }))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.file.read().is_some()
    }

    pub fn close(&self) -> Result<()> {
        if let Some(file) = self.file.write().take() {
            file.sync_all().wrap_err("failed to sync backing file on close")?;
            debug!(path = ?self.path, "closed backing file");
        }
        Ok(())
    }

    pub fn len(&self) -> Result<u64> {
        let guard = self.file.read();
        let file = guard.as_ref().ok_or_else(|| eyre!("backing file is closed"))?;
        Ok(file.metadata().wrap_err("failed to stat backing file")?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn sync(&self) -> Result<()> {
        let guard = self.file.read();
        let file = guard.as_ref().ok_or_else(|| eyre!("backing file is closed"))?;
        file.sync_data().wrap_err("failed to sync backing file")
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let guard = self.file.read();
        let file = guard.as_ref().ok_or_else(|| eyre!("backing file is closed"))?;

        let mut filled = 0;
        while filled < buf.len() {
            match pread(file, &mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!("failed to read {} bytes at offset {}", buf.len(), offset)
                    })
                }
            }
        }
        Ok(filled)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let guard = self.file.read();
        let file = guard.as_ref().ok_or_else(|| eyre!("backing file is closed"))?;

        let mut written = 0;
        while written < buf.len() {
            match pwrite(file, &buf[written..], offset + written as u64) {
                Ok(0) => {
                    return Err(eyre!(
                        "backing file accepted no bytes at offset {}",
                        offset + written as u64
                    ))
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!("failed to write {} bytes at offset {}", buf.len(), offset)
                    })
                }
            }
        }
        Ok(written)
    }
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(unix)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(windows)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

/// Ranged channel over one window of a `SharedFile`.
#[derive(Debug, Clone)]
pub struct FileSegment {
    file: Arc<SharedFile>,
    offset: u64,
}

impl FileSegment {
    pub fn new(file: Arc<SharedFile>, offset: u64) -> Self {
        Self { file, offset }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl ByteChannel for FileSegment {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.file.read_at(self.offset, buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.file.write_at(self.offset, buf)
    }

    fn close(&self) -> Result<()> {
        self.file.close()
    }

    fn is_open(&self) -> bool {
        self.file.is_open()
    }
}

/// Page factory binding page `id` to its window of `file`.
pub fn segment_factory(
    file: Arc<SharedFile>,
    page_size: usize,
) -> impl Fn(PageId) -> Result<Page> + Send + Sync + 'static {
    move |id| {
        let offset = page_offset(id, page_size)?;
        let channel = FileSegment::new(Arc::clone(&file), offset);
        Ok(Page::new(id, page_size, Arc::new(channel)))
    }
}
