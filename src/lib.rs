//! # blockio - Fixed-Page Write-Back Byte Cache
//!
//! blockio presents a flat, byte-addressed read/write interface over a slow
//! backing store, buffering it in a bounded number of fixed-size pages held
//! in memory. Writes are absorbed by cached pages and written back lazily,
//! when a page is evicted or when the caller flushes.
//!
//! ## Quick Start
//!
//! ```ignore
//! use blockio::PageIo;
//!
//! let io = PageIo::builder()
//!     .path("./volume.img")
//!     .page_size(4096)
//!     .max_pages(256)
//!     .build()?;
//!
//! io.write(10_000, b"hello")?;
//! let mut buf = [0u8; 5];
//! let n = io.read(10_000, &mut buf)?;
//! io.flush_all()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      PageIo (byte dispatcher)        │
//! ├─────────────────────────────────────┤
//! │    PageCache (bounded, LRU, pins)    │
//! ├─────────────────────────────────────┤
//! │     Page (buffer, valid_len, dirty)  │
//! ├─────────────────────────────────────┤
//! │  ByteChannel: file │ memory │ object │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - At most one `Page` exists per page id; concurrent misses share one load
//! - Resident pages never exceed capacity while an unpinned victim exists
//! - A dirty page is written back before it leaves the cache
//! - Reads return only bytes that were loaded or written, never padding
//!
//! ## Module Overview
//!
//! - [`config`]: default page geometry and limits
//! - [`storage`]: pages, cache, dispatcher and backing stores

pub mod config;
pub mod storage;

pub use storage::{
    Backing, ByteChannel, CacheError, CacheStatsSnapshot, ChannelKind, FlushCause, FlushFailure,
    Page, PageCache, PageId, PageIo, PageIoBuilder, PinnedPage,
};
