//! # Backing Channel Abstraction
//!
//! A `ByteChannel` is the minimal capability a page needs from its backing
//! store: fill a buffer from the page's region, and persist a buffer back to
//! it. Each page is bound to exactly one channel at construction.
//!
//! ## Channel Kinds
//!
//! | Kind          | Addressing                         | Example         |
//! |---------------|------------------------------------|-----------------|
//! | `Ranged`      | `page_id * page_size` in one file  | `FileSegment`   |
//! | `WholeObject` | one independent object per page    | `ObjectBlock`   |
//!
//! Both kinds sit behind the same trait, so `Page`, `PageCache` and `PageIo`
//! never branch on the backend. For whole-object channels a write always
//! replaces the full object and a read returns the full object, or zero
//! bytes if the object does not exist yet.
//!
//! ## Contract
//!
//! - `read` returns the number of bytes available in the region, which may
//!   be less than `buf.len()` (short or never-written region) and may be 0.
//! - `write` persists exactly `buf` and returns `buf.len()` on success.
//! - Implementations must be internally synchronized: the cache may call a
//!   channel of one page while other pages' channels to the same resource
//!   are in use on other threads.

use std::sync::Arc;

use eyre::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Ranged,
    WholeObject,
}

pub trait ByteChannel: Send + Sync {
    /// Reads the page region into `buf`, returning the number of bytes read.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Persists `buf` as the page region, returning the number of bytes written.
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Releases the underlying resource.
    fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;

    fn kind(&self) -> ChannelKind {
        ChannelKind::Ranged
    }
}

impl<T> ByteChannel for Arc<T>
where
    T: ByteChannel + ?Sized,
{
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn kind(&self) -> ChannelKind {
        (**self).kind()
    }
}
