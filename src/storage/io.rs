//! # Byte-Addressed Dispatcher
//!
//! `PageIo` exposes a flat byte address space on top of `PageCache`. Every
//! request is split into page-sized chunks; each chunk is served by exactly
//! one page under that page's lock.
//!
//! ## Address Arithmetic
//!
//! The page size is a power of two, so the split is shifts and masks:
//!
//! ```text
//! pos            = offset + consumed
//! page_id        = pos >> page_shift
//! offset_in_page = pos &  (page_size - 1)
//! chunk          = min(remaining, page_size - offset_in_page)
//! ```
//!
//! A request of `len` bytes at `offset` touches
//! `ceil(((offset mod page_size) + len) / page_size)` pages. An empty request
//! touches none.
//!
//! ## Short Reads
//!
//! `read` stops at the first chunk that comes back short. Bytes a page never
//! held are not padded with zeros, so the returned count marks the end of
//! valid data reachable from `offset`.
//!
//! ## Atomicity
//!
//! Each chunk is atomic with respect to other accesses to the same page. A
//! request spanning pages is not atomic as a whole: a concurrent reader can
//! observe the first page of a two-page write before the second.

use std::path::Path;
use std::sync::Arc;

use eyre::Result;
use tracing::debug;

use super::builder::PageIoBuilder;
use super::cache::{CacheStatsSnapshot, PageCache};
use super::error::CacheError;
use super::file::{self, SharedFile};
use super::memory::{self, MemoryStore};
use super::object::{self, ObjectStore};
use super::page::{Page, PageId};
use crate::config::{MAX_PAGE_SIZE, MIN_MAX_PAGES, MIN_PAGE_SIZE};

fn validate(max_pages: usize, page_size: usize) -> Result<()> {
    if max_pages < MIN_MAX_PAGES {
        return Err(CacheError::Config(format!(
            "max pages must be at least {}, got {}",
            MIN_MAX_PAGES, max_pages
        ))
        .into());
    }
    if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(CacheError::Config(format!(
            "page size must be a power of two in [{}, {}], got {}",
            MIN_PAGE_SIZE, MAX_PAGE_SIZE, page_size
        ))
        .into());
    }
    Ok(())
}

pub struct PageIo {
    page_size: usize,
    page_shift: u32,
    cache: PageCache,
}

impl PageIo {
    /// Creates a dispatcher over pages produced by `factory`.
    ///
    /// Fails with `CacheError::Config` if `page_size` is not a power of two
    /// within range or `max_pages` is zero. Every page the factory returns
    /// must have a capacity of exactly `page_size`.
    pub fn new<F>(max_pages: usize, page_size: usize, factory: F) -> Result<Self>
    where
        F: Fn(PageId) -> Result<Page> + Send + Sync + 'static,
    {
        validate(max_pages, page_size)?;

        let checked = move |id: PageId| -> Result<Page> {
            let page = factory(id)?;
            if page.capacity() != page_size {
                return Err(CacheError::IllegalState(format!(
                    "factory built page {} with capacity {}, expected {}",
                    id,
                    page.capacity(),
                    page_size
                ))
                .into());
            }
            Ok(page)
        };
        let cache = PageCache::new(max_pages, checked)?;

        debug!(page_size, max_pages, "created page io");
        Ok(Self {
            page_size,
            page_shift: page_size.trailing_zeros(),
            cache,
        })
    }

    pub fn builder() -> PageIoBuilder {
        PageIoBuilder::new()
    }

    /// Opens (or creates) the file at `path` as a ranged backing store.
    pub fn open_file<P: AsRef<Path>>(path: P, max_pages: usize, page_size: usize) -> Result<Self> {
        validate(max_pages, page_size)?;
        Self::with_file(SharedFile::open(path)?, max_pages, page_size)
    }

    pub fn with_file(file: Arc<SharedFile>, max_pages: usize, page_size: usize) -> Result<Self> {
        Self::new(max_pages, page_size, file::segment_factory(file, page_size))
    }

    pub fn with_memory(store: Arc<MemoryStore>, max_pages: usize, page_size: usize) -> Result<Self> {
        Self::new(max_pages, page_size, memory::segment_factory(store, page_size))
    }

    pub fn with_object_store(
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
        max_pages: usize,
        page_size: usize,
    ) -> Result<Self> {
        Self::new(max_pages, page_size, object::object_factory(store, prefix, page_size))
    }

    fn mask(&self) -> u64 {
        self.page_size as u64 - 1
    }

    fn end_of(&self, offset: u64, len: usize) -> Result<u64> {
        offset.checked_add(len as u64).ok_or_else(|| {
            CacheError::IllegalState(format!(
                "request of {} bytes at offset {} overflows the address space",
                len, offset
            ))
            .into()
        })
    }

    /// Writes `data` at byte `offset`, loading pages as needed. The data is
    /// written back on eviction or `flush_all`.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.end_of(offset, data.len())?;

        let mut done = 0;
        while done < data.len() {
            let pos = offset + done as u64;
            let id = pos >> self.page_shift;
            let in_page = (pos & self.mask()) as usize;
            let chunk = (data.len() - done).min(self.page_size - in_page);

            let page = self.cache.get(id)?;
            page.exclusive().write(in_page, &data[done..done + chunk])?;

            done += chunk;
        }
        Ok(())
    }

    /// Reads into `dst` from byte `offset`. Returns the number of bytes
    /// read, which is less than `dst.len()` if valid data ends early.
    pub fn read(&self, offset: u64, dst: &mut [u8]) -> Result<usize> {
        self.end_of(offset, dst.len())?;

        let mut done = 0;
        while done < dst.len() {
            let pos = offset + done as u64;
            let id = pos >> self.page_shift;
            let in_page = (pos & self.mask()) as usize;
            let want = (dst.len() - done).min(self.page_size - in_page);

            let page = self.cache.get(id)?;
            let n = page.shared().read(in_page, &mut dst[done..done + want]);

            done += n;
            if n < want {
                break;
            }
        }
        Ok(done)
    }

    /// Writes back every dirty page. See `PageCache::flush_all`.
    pub fn flush_all(&self) -> Result<usize> {
        self.cache.flush_all()
    }

    pub fn evict_all(&self) -> Result<usize> {
        self.cache.evict_all()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn max_page_count(&self) -> usize {
        self.cache.capacity()
    }

    /// Number of resident pages.
    pub fn page_count(&self) -> usize {
        self.cache.size()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }
}

impl std::fmt::Debug for PageIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageIo")
            .field("page_size", &self.page_size)
            .field("cache", &self.cache)
            .finish()
    }
}
