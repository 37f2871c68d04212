//! # Whole-Object Backing Store
//!
//! Object stores have no partial-range writes: a page maps to one complete
//! object addressed by key. `ObjectBlock` adapts that model to the
//! `ByteChannel` trait:
//!
//! - `read` fetches the entire object. A missing object reads as zero bytes,
//!   which loads the page empty (`valid_len == 0`).
//! - `write` replaces the entire object with the page's valid prefix.
//!
//! ## Key Layout
//!
//! ```text
//! {prefix}/{page_id:016x}
//! blocks/0000000000000000
//! blocks/0000000000000001
//! ...
//! ```
//!
//! Fixed-width hex keys keep lexicographic listing in page order.
//!
//! ## Store Trait
//!
//! `ObjectStore` is the narrow client surface the channel needs. Network
//! clients implement it outside this crate; `MemoryObjectStore` is the
//! in-process implementation used for tests and local pipelines.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::RwLock;

use super::channel::{ByteChannel, ChannelKind};
use super::page::{Page, PageId};
use crate::config::OBJECT_CONTENT_TYPE;

pub trait ObjectStore: Send + Sync {
    /// Returns the full object, or `None` if it does not exist.
    fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Creates or replaces the object.
    fn put_object(&self, key: &str, data: &[u8], content_type: &str) -> Result<()>;
}

pub fn object_key(prefix: &str, id: PageId) -> String {
    format!("{}/{:016x}", prefix, id)
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    gets: AtomicU64,
    puts: AtomicU64,
    fail_puts: AtomicBool,
    fail_gets: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        self.objects.write().insert(key.into(), data);
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::Release);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::Release);
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.fail_gets.load(Ordering::Acquire) {
            bail!("injected get failure for '{}'", key);
        }
        self.gets.fetch_add(1, Ordering::Relaxed);
        Ok(self.objects.read().get(key).cloned())
    }

    fn put_object(&self, key: &str, data: &[u8], _content_type: &str) -> Result<()> {
        if self.fail_puts.load(Ordering::Acquire) {
            bail!("injected put failure for '{}'", key);
        }
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.objects.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

/// Whole-object channel for one page.
pub struct ObjectBlock {
    store: Arc<dyn ObjectStore>,
    key: String,
    open: AtomicBool,
}

impl ObjectBlock {
    pub fn new(store: Arc<dyn ObjectStore>, key: String) -> Self {
        Self {
            store,
            key,
            open: AtomicBool::new(true),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl ByteChannel for ObjectBlock {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        ensure!(self.is_open(), "object channel '{}' is closed", self.key);

        let object = self
            .store
            .get_object(&self.key)
            .wrap_err_with(|| format!("failed to fetch object '{}'", self.key))?;
        let Some(object) = object else {
            return Ok(0);
        };
        ensure!(
            object.len() <= buf.len(),
            "object '{}' is {} bytes, larger than the {} byte page",
            self.key,
            object.len(),
            buf.len()
        );

        buf[..object.len()].copy_from_slice(&object);
        Ok(object.len())
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        ensure!(self.is_open(), "object channel '{}' is closed", self.key);

        self.store
            .put_object(&self.key, buf, OBJECT_CONTENT_TYPE)
            .wrap_err_with(|| format!("failed to store object '{}'", self.key))?;
        Ok(buf.len())
    }

    fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::WholeObject
    }
}

/// Page factory binding page `id` to object `{prefix}/{id:016x}`.
pub fn object_factory(
    store: Arc<dyn ObjectStore>,
    prefix: impl Into<String>,
    page_size: usize,
) -> impl Fn(PageId) -> Result<Page> + Send + Sync + 'static {
    let prefix = prefix.into();
    move |id| {
        let channel = ObjectBlock::new(Arc::clone(&store), object_key(&prefix, id));
        Ok(Page::new(id, page_size, Arc::new(channel)))
    }
}
