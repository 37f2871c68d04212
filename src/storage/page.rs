//! # Cached Page
//!
//! A `Page` is one fixed-capacity buffer caching one aligned region of the
//! backing store. It tracks how many of its bytes are meaningful and whether
//! it holds writes that have not reached the backing channel yet.
//!
//! ## State
//!
//! ```text
//! Page {
//!     id: PageId,                  // offset / page_size
//!     capacity: usize,             // buffer size, fixed at construction
//!     channel: Arc<dyn ByteChannel>, // shared, used only by load/flush
//!     pins: AtomicU32,             // eviction guard, managed by PageCache
//!     state: RwLock<PageState {
//!         data: Box<[u8]>,         // exclusively owned buffer
//!         valid_len: usize,        // bytes defined by load or writes
//!         dirty: bool,             // writes not yet flushed
//!     }>,
//! }
//! ```
//!
//! ## Valid Length
//!
//! `valid_len` is set by `load()` to the number of bytes the channel
//! returned and only grows afterwards (`max(valid_len, offset + len)` on each
//! write). Reads never expose bytes at or beyond `valid_len`, so a page over
//! a short or fresh region yields short reads instead of fabricated zeros.
//!
//! ## Dirty Flag
//!
//! | Event                 | dirty after |
//! |-----------------------|-------------|
//! | `load()`              | false       |
//! | empty write           | unchanged   |
//! | non-empty write       | true        |
//! | successful `flush()`  | false       |
//! | failed `flush()`      | true        |
//!
//! ## Locking
//!
//! The buffer and flags sit behind a `parking_lot::RwLock`. `shared()` yields
//! a `PageReadGuard` for reads; `exclusive()` yields a `PageWriteGuard` for
//! writes, `load()` and `flush()`. The lock is independent of cache
//! membership: holding a guard does not keep a page resident, the pin taken
//! by `PageCache::get` does.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use eyre::Result;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use super::channel::ByteChannel;
use super::error::{CacheError, IoOp};

pub type PageId = u64;

struct PageState {
    data: Box<[u8]>,
    valid_len: usize,
    dirty: bool,
}

impl PageState {
    fn read(&self, offset: usize, dst: &mut [u8]) -> usize {
        if offset >= self.valid_len {
            return 0;
        }
        let n = (self.valid_len - offset).min(dst.len());
        dst[..n].copy_from_slice(&self.data[offset..offset + n]);
        n
    }
}

pub struct Page {
    id: PageId,
    capacity: usize,
    channel: Arc<dyn ByteChannel>,
    pins: AtomicU32,
    state: RwLock<PageState>,
}

impl Page {
    /// Creates an empty page bound to `channel`. The page holds no valid
    /// data until `load()` is called.
    pub fn new(id: PageId, capacity: usize, channel: Arc<dyn ByteChannel>) -> Self {
        Self {
            id,
            capacity,
            channel,
            pins: AtomicU32::new(0),
            state: RwLock::new(PageState {
                data: vec![0u8; capacity].into_boxed_slice(),
                valid_len: 0,
                dirty: false,
            }),
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channel(&self) -> &Arc<dyn ByteChannel> {
        &self.channel
    }

    pub fn shared(&self) -> PageReadGuard<'_> {
        PageReadGuard {
            state: self.state.read(),
        }
    }

    pub fn exclusive(&self) -> PageWriteGuard<'_> {
        PageWriteGuard {
            page: self,
            state: self.state.write(),
        }
    }

    pub fn load(&self) -> Result<()> {
        self.exclusive().load()
    }

    pub fn flush(&self) -> Result<bool> {
        self.exclusive().flush()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    pub fn valid_len(&self) -> usize {
        self.state.read().valid_len
    }

    pub fn pin_count(&self) -> u32 {
        self.pins.load(Ordering::Acquire)
    }

    pub(crate) fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    pub(crate) fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unpin(&self) {
        let prev = self.pins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin called on unpinned page");
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("pins", &self.pin_count())
            .finish_non_exhaustive()
    }
}

/// Shared access to a page buffer.
pub struct PageReadGuard<'a> {
    state: RwLockReadGuard<'a, PageState>,
}

impl PageReadGuard<'_> {
    /// Copies up to `dst.len()` valid bytes starting at `offset`.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> usize {
        self.state.read(offset, dst)
    }

    pub fn valid_len(&self) -> usize {
        self.state.valid_len
    }

    pub fn is_dirty(&self) -> bool {
        self.state.dirty
    }
}

/// Exclusive access to a page buffer.
pub struct PageWriteGuard<'a> {
    page: &'a Page,
    state: RwLockWriteGuard<'a, PageState>,
}

impl PageWriteGuard<'_> {
    pub fn write(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        let end = offset.checked_add(src.len()).filter(|&end| end <= self.page.capacity);
        let Some(end) = end else {
            return Err(CacheError::IllegalState(format!(
                "write of {} bytes at offset {} exceeds page {} capacity {}",
                src.len(),
                offset,
                self.page.id,
                self.page.capacity
            ))
            .into());
        };

        self.state.data[offset..end].copy_from_slice(src);
        self.state.dirty = true;
        self.state.valid_len = self.state.valid_len.max(end);
        Ok(())
    }

    pub fn read(&self, offset: usize, dst: &mut [u8]) -> usize {
        self.state.read(offset, dst)
    }

    /// Replaces the buffer with the channel's current contents.
    pub fn load(&mut self) -> Result<()> {
        let state = &mut *self.state;
        state.data.fill(0);
        state.valid_len = 0;
        state.dirty = false;

        let n = self
            .page
            .channel
            .read(&mut state.data)
            .map_err(|e| CacheError::BackingStore {
                page: self.page.id,
                op: IoOp::Load,
                source: e.into(),
            })?;
        if n > self.page.capacity {
            return Err(CacheError::IllegalState(format!(
                "channel reported {} bytes for page {} of capacity {}",
                n, self.page.id, self.page.capacity
            ))
            .into());
        }

        state.valid_len = n;
        trace!(page = self.page.id, valid_len = n, "loaded page");
        Ok(())
    }

    /// Writes the valid prefix back to the channel if the page is dirty.
    /// Returns whether any I/O was performed.
    pub fn flush(&mut self) -> Result<bool> {
        if !self.state.dirty {
            return Ok(false);
        }

        let valid_len = self.state.valid_len;
        let written = self
            .page
            .channel
            .write(&self.state.data[..valid_len])
            .map_err(|e| CacheError::BackingStore {
                page: self.page.id,
                op: IoOp::Flush,
                source: e.into(),
            })?;
        if written != valid_len {
            return Err(CacheError::BackingStore {
                page: self.page.id,
                op: IoOp::Flush,
                source: format!("short write: {} of {} bytes", written, valid_len).into(),
            }
            .into());
        }

        self.state.dirty = false;
        trace!(page = self.page.id, bytes = valid_len, "flushed page");
        Ok(true)
    }

    pub fn valid_len(&self) -> usize {
        self.state.valid_len
    }

    pub fn is_dirty(&self) -> bool {
        self.state.dirty
    }
}
