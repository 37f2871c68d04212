//! # In-Memory Ranged Backing Store
//!
//! `MemoryStore` is a growable byte vector shared by many `MemorySegment`
//! channels, one per page. It behaves like a sparse file: reads past the end
//! return fewer bytes (or none), writes past the end extend it with zeros.
//!
//! Beyond tests, it is useful as a scratch backend for pipelines that want
//! the cache's write-back behaviour without touching disk.
//!
//! ## Observability Hooks
//!
//! The store counts reads and writes and records the offset and length of
//! every write. Fault injection (`fail_reads`, `fail_writes`) makes channel
//! calls return errors so load and flush failure paths can be exercised.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use parking_lot::{Mutex, RwLock};

use super::channel::ByteChannel;
use super::page::{Page, PageId};

#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Vec<u8>>,
    write_log: Mutex<Vec<(u64, usize)>>,
    reads: AtomicU64,
    writes: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-filled with `len` zero bytes.
    pub fn with_len(len: usize) -> Self {
        Self::from_bytes(vec![0u8; len])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(bytes),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Copies `len` bytes starting at `offset`, zero-filled past the end.
    pub fn slice(&self, offset: usize, len: usize) -> Vec<u8> {
        let data = self.data.read();
        let mut out = vec![0u8; len];
        if offset < data.len() {
            let n = (data.len() - offset).min(len);
            out[..n].copy_from_slice(&data[offset..offset + n]);
        }
        out
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// `(offset, len)` of every successful write, in order.
    pub fn write_log(&self) -> Vec<(u64, usize)> {
        self.write_log.lock().clone()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Release);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        ensure!(self.is_open(), "memory store is closed");
        if self.fail_reads.load(Ordering::Acquire) {
            bail!("injected read failure at offset {}", offset);
        }
        self.reads.fetch_add(1, Ordering::Relaxed);

        let data = self.data.read();
        let Ok(offset) = usize::try_from(offset) else {
            return Ok(0);
        };
        if offset >= data.len() {
            return Ok(0);
        }
        let n = (data.len() - offset).min(buf.len());
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        ensure!(self.is_open(), "memory store is closed");
        if self.fail_writes.load(Ordering::Acquire) {
            bail!("injected write failure at offset {}", offset);
        }
        let start = usize::try_from(offset)?;
        let end = start + buf.len();

        let mut data = self.data.write();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        drop(data);

        self.writes.fetch_add(1, Ordering::Relaxed);
        self.write_log.lock().push((offset, buf.len()));
        Ok(buf.len())
    }
}

/// A page-sized window into a `MemoryStore`.
#[derive(Debug, Clone)]
pub struct MemorySegment {
    store: Arc<MemoryStore>,
    offset: u64,
}

impl MemorySegment {
    pub fn new(store: Arc<MemoryStore>, offset: u64) -> Self {
        Self { store, offset }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl ByteChannel for MemorySegment {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.store.read_at(self.offset, buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.store.write_at(self.offset, buf)
    }

    fn close(&self) -> Result<()> {
        self.store.close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.store.is_open()
    }
}

/// Page factory binding page `id` to `[id * page_size, (id + 1) * page_size)`.
pub fn segment_factory(
    store: Arc<MemoryStore>,
    page_size: usize,
) -> impl Fn(PageId) -> Result<Page> + Send + Sync + 'static {
    move |id| {
        let offset = super::file::page_offset(id, page_size)?;
        let channel = MemorySegment::new(Arc::clone(&store), offset);
        Ok(Page::new(id, page_size, Arc::new(channel)))
    }
}
