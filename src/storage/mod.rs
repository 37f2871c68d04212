//! # Storage Module
//!
//! This module implements blockio's fixed-page write-back cache and the
//! backing stores it runs over.
//!
//! ## Architecture Overview
//!
//! ```text
//!             write(offset, bytes) / read(offset, buf)
//!                            │
//!                 ┌──────────▼──────────┐
//!                 │       PageIo        │  splits requests at page
//!                 │   (dispatcher)      │  boundaries: id = pos >> shift
//!                 └──────────┬──────────┘
//!                            │ get(id) -> PinnedPage
//!                 ┌──────────▼──────────┐
//!                 │      PageCache      │  bounded, LRU, single-flight
//!                 │  id -> Slot         │  loads, write-back on eviction
//!                 └──────────┬──────────┘
//!                            │ load() / flush()
//!                 ┌──────────▼──────────┐
//!                 │        Page         │  fixed buffer, valid_len, dirty
//!                 └──────────┬──────────┘
//!                            │ ByteChannel
//!          ┌─────────────────┼──────────────────┐
//!   ┌──────▼──────┐   ┌──────▼───────┐   ┌──────▼──────┐
//!   │ FileSegment │   │MemorySegment │   │ ObjectBlock │
//!   │  (ranged)   │   │  (ranged)    │   │(whole object│
//!   └─────────────┘   └──────────────┘   └─────────────┘
//! ```
//!
//! ## Write-Back Model
//!
//! Writes land in page buffers and mark pages dirty. Dirty data reaches the
//! backing store only when:
//!
//! - the page is chosen as an eviction victim, or
//! - `flush_all` / `evict_all` is called.
//!
//! Dropping a `PageIo` does not flush. Call `flush_all` before discarding it.
//!
//! ## Module Organization
//!
//! - `page`: `Page` buffer, valid length, dirty flag, lock guards
//! - `cache`: `PageCache` with pinning, eviction and statistics
//! - `io`: `PageIo` byte-addressed dispatcher
//! - `builder`: `PageIoBuilder` and `Backing`
//! - `error`: `CacheError` kinds and flush failure records
//! - `channel`: `ByteChannel` trait
//! - `file`, `memory`, `object`: backing stores
//!
//! ## Thread Safety
//!
//! `PageIo` and `PageCache` are `Send + Sync` and meant to be shared through
//! an `Arc`. Different pages are read and written in parallel; accesses to
//! one page serialize on its lock.

mod builder;
mod cache;
pub mod channel;
mod error;
pub mod file;
mod io;
pub mod memory;
pub mod object;
mod page;

pub use builder::{Backing, PageIoBuilder};
pub use cache::{CacheStats, CacheStatsSnapshot, PageCache, PageFactory, PinnedPage};
pub use channel::{ByteChannel, ChannelKind};
pub use error::{BoxError, CacheError, FlushCause, FlushFailure, IoOp};
pub use file::{FileSegment, SharedFile};
pub use io::PageIo;
pub use memory::{MemorySegment, MemoryStore};
pub use object::{MemoryObjectStore, ObjectBlock, ObjectStore};
pub use page::{Page, PageId, PageReadGuard, PageWriteGuard};
