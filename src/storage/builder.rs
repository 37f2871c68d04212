//! # PageIo Builder
//!
//! `PageIoBuilder` configures a `PageIo` from a backing store choice plus
//! optional page geometry. Unset values fall back to the defaults in
//! [`crate::config`].
//!
//! ## Backing Selection
//!
//! | Method           | Backing                 | Channel kind  |
//! |------------------|-------------------------|---------------|
//! | `path(p)`        | file at `p` (created)   | `Ranged`      |
//! | `file(f)`        | already open file       | `Ranged`      |
//! | `memory(s)`      | `MemoryStore`           | `Ranged`      |
//! | `object_store(s)`| any `ObjectStore`       | `WholeObject` |
//!
//! ## Usage
//!
//! ```ignore
//! let io = PageIo::builder()
//!     .path("./volume.img")
//!     .page_size(4096)
//!     .max_pages(256)
//!     .build()?;
//! ```
//!
//! `build()` validates geometry before opening anything, so a bad page size
//! never creates a file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{bail, Result};

use super::file::SharedFile;
use super::io::PageIo;
use super::memory::MemoryStore;
use super::object::ObjectStore;
use crate::config::{DEFAULT_MAX_PAGES, DEFAULT_OBJECT_PREFIX, DEFAULT_PAGE_SIZE};

/// Backing store selected for a `PageIo`.
#[derive(Clone)]
pub enum Backing {
    File(PathBuf),
    SharedFile(Arc<SharedFile>),
    Memory(Arc<MemoryStore>),
    Objects {
        store: Arc<dyn ObjectStore>,
        prefix: String,
    },
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::File(path) => f.debug_tuple("File").field(path).finish(),
            Backing::SharedFile(file) => f.debug_tuple("SharedFile").field(&file.path()).finish(),
            Backing::Memory(store) => f.debug_tuple("Memory").field(&store.len()).finish(),
            Backing::Objects { prefix, .. } => {
                f.debug_struct("Objects").field("prefix", prefix).finish_non_exhaustive()
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct PageIoBuilder {
    backing: Option<Backing>,
    page_size: Option<usize>,
    max_pages: Option<usize>,
}

impl PageIoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.backing = Some(Backing::File(path.as_ref().to_path_buf()));
        self
    }

    pub fn file(mut self, file: Arc<SharedFile>) -> Self {
        self.backing = Some(Backing::SharedFile(file));
        self
    }

    pub fn memory(mut self, store: Arc<MemoryStore>) -> Self {
        self.backing = Some(Backing::Memory(store));
        self
    }

    /// Stores each page as one object under `DEFAULT_OBJECT_PREFIX` unless
    /// `object_prefix` is also called.
    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.backing = Some(Backing::Objects {
            store,
            prefix: DEFAULT_OBJECT_PREFIX.to_string(),
        });
        self
    }

    /// Sets the key prefix for object-store pages. Has no effect on other
    /// backings.
    pub fn object_prefix(mut self, prefix: impl Into<String>) -> Self {
        if let Some(Backing::Objects { prefix: current, .. }) = &mut self.backing {
            *current = prefix.into();
        }
        self
    }

    pub fn backing(mut self, backing: Backing) -> Self {
        self.backing = Some(backing);
        self
    }

    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = Some(bytes);
        self
    }

    pub fn max_pages(mut self, pages: usize) -> Self {
        self.max_pages = Some(pages);
        self
    }

    pub fn build(self) -> Result<PageIo> {
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        let max_pages = self.max_pages.unwrap_or(DEFAULT_MAX_PAGES);

        let Some(backing) = self.backing else {
            bail!("no backing store configured: call path(), file(), memory() or object_store()");
        };

        match backing {
            Backing::File(path) => PageIo::open_file(path, max_pages, page_size),
            Backing::SharedFile(file) => PageIo::with_file(file, max_pages, page_size),
            Backing::Memory(store) => PageIo::with_memory(store, max_pages, page_size),
            Backing::Objects { store, prefix } => {
                PageIo::with_object_store(store, prefix, max_pages, page_size)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::error::CacheError;
    use crate::storage::object::{object_key, MemoryObjectStore};
    use tempfile::tempdir;

    #[test]
    fn defaults_apply() {
        let io = PageIoBuilder::new()
            .memory(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();

        assert_eq!(io.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(io.max_page_count(), DEFAULT_MAX_PAGES);
    }

    #[test]
    fn missing_backing_fails() {
        assert!(PageIoBuilder::new().page_size(64).build().is_err());
    }

    #[test]
    fn bad_page_size_creates_no_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("volume.img");

        let err = PageIo::builder().path(&path).page_size(1000).build().unwrap_err();

        assert!(err.downcast_ref::<CacheError>().unwrap().is_config());
        assert!(!path.exists());
    }

    #[test]
    fn object_prefix_applies_to_keys() {
        let store = Arc::new(MemoryObjectStore::new());
        let io = PageIo::builder()
            .object_store(store.clone())
            .object_prefix("vol7")
            .page_size(32)
            .max_pages(2)
            .build()
            .unwrap();

        io.write(40, b"abc").unwrap();
        io.flush_all().unwrap();

        let object = store.object(&object_key("vol7", 1)).unwrap();
        assert_eq!(object.len(), 11);
        assert_eq!(&object[8..], b"abc");
    }
}
