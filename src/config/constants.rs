//! # blockio Configuration Constants
//!
//! This module centralizes the numeric defaults and limits used by the page
//! cache and its backends. Values that constrain each other are co-located and
//! checked at compile time.
//!
//! ## Dependency Graph
//!
//! ```text
//! MIN_PAGE_SIZE (1)
//!       │
//!       └─> MAX_PAGE_SIZE (1 GiB, must be >= and both powers of two)
//!             Offsets inside a page are usize, page ids are u64. Capping the
//!             page size keeps `offset & mask` and `page_size - offset`
//!             within usize on 32-bit targets.
//!
//! DEFAULT_PAGE_SIZE (8192)
//!       │
//!       └─> must lie in [MIN_PAGE_SIZE, MAX_PAGE_SIZE] and be a power of two
//!
//! DEFAULT_MAX_PAGES (1024)
//!       │
//!       └─> must be >= MIN_MAX_PAGES (1)
//!             Default resident footprint = DEFAULT_PAGE_SIZE * DEFAULT_MAX_PAGES
//!             = 8 MiB of page buffers.
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `DEFAULT_PAGE_SIZE` is a power of two inside the allowed range
//! 2. `MIN_PAGE_SIZE <= MAX_PAGE_SIZE`, both powers of two
//! 3. `DEFAULT_MAX_PAGES >= MIN_MAX_PAGES`
//!
//! ## Usage
//!
//! ```ignore
//! use blockio::config::{DEFAULT_PAGE_SIZE, DEFAULT_MAX_PAGES};
//! ```

// ============================================================================
// PAGE GEOMETRY
// ============================================================================

/// Default page size in bytes used by `PageIoBuilder` when none is given.
pub const DEFAULT_PAGE_SIZE: usize = 8192;

/// Smallest accepted page size.
pub const MIN_PAGE_SIZE: usize = 1;

/// Largest accepted page size (1 GiB).
pub const MAX_PAGE_SIZE: usize = 1 << 30;

const _: () = assert!(
    DEFAULT_PAGE_SIZE.is_power_of_two(),
    "DEFAULT_PAGE_SIZE must be a power of two"
);

const _: () = assert!(
    MIN_PAGE_SIZE.is_power_of_two() && MAX_PAGE_SIZE.is_power_of_two(),
    "page size bounds must be powers of two"
);

const _: () = assert!(
    MIN_PAGE_SIZE <= DEFAULT_PAGE_SIZE && DEFAULT_PAGE_SIZE <= MAX_PAGE_SIZE,
    "DEFAULT_PAGE_SIZE outside [MIN_PAGE_SIZE, MAX_PAGE_SIZE]"
);

// ============================================================================
// CACHE CAPACITY
// ============================================================================

/// Default number of resident pages.
pub const DEFAULT_MAX_PAGES: usize = 1024;

/// A cache must be able to hold at least one page.
pub const MIN_MAX_PAGES: usize = 1;

const _: () = assert!(
    DEFAULT_MAX_PAGES >= MIN_MAX_PAGES,
    "DEFAULT_MAX_PAGES must be at least MIN_MAX_PAGES"
);

// ============================================================================
// OBJECT STORE BACKEND
// ============================================================================

/// Key prefix for page objects when the caller does not supply one.
/// Objects are named `{prefix}/{page_id:016x}`.
pub const DEFAULT_OBJECT_PREFIX: &str = "blocks";

/// Content type recorded for page objects.
pub const OBJECT_CONTENT_TYPE: &str = "binary/octet-stream";

// ============================================================================
// COPY PIPELINE (blockcopy)
// ============================================================================

/// Page size of the read-side cache in the copy pipeline.
pub const COPY_READ_PAGE_SIZE: usize = 512;

/// Page size of the write-side cache in the copy pipeline.
pub const COPY_WRITE_PAGE_SIZE: usize = 8192;

/// Size of each transfer chunk moved between the two caches.
pub const COPY_CHUNK_SIZE: usize = 64;

/// Resident pages per cache in the copy pipeline.
pub const COPY_MAX_PAGES: usize = 64 * 1024;

const _: () = assert!(
    COPY_READ_PAGE_SIZE.is_power_of_two() && COPY_WRITE_PAGE_SIZE.is_power_of_two(),
    "copy pipeline page sizes must be powers of two"
);
