//! # Cache Error Kinds
//!
//! Every fallible operation in blockio returns `eyre::Result`. When a caller
//! needs to branch on *why* something failed, the report carries a
//! [`CacheError`] that can be recovered with `downcast_ref`:
//!
//! ```ignore
//! match io.flush_all() {
//!     Ok(n) => println!("wrote back {} pages", n),
//!     Err(e) => match e.downcast_ref::<CacheError>() {
//!         Some(CacheError::FlushFailed(failures)) => retry_later(failures),
//!         _ => return Err(e),
//!     },
//! }
//! ```
//!
//! ## Kinds
//!
//! | Variant        | Raised by                          | Recoverable |
//! |----------------|------------------------------------|-------------|
//! | `Config`       | construction (`PageIo`, builder)   | no          |
//! | `BackingStore` | page load / single page flush      | caller retry|
//! | `FlushFailed`  | eviction write-back, `flush_all`   | caller retry|
//! | `IllegalState` | out-of-range page access           | no (bug)    |
//!
//! Nothing in the cache retries on its own.

use std::error::Error;
use std::fmt;

use super::page::PageId;

pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Backing-store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Load,
    Flush,
}

impl IoOp {
    pub fn name(&self) -> &'static str {
        match self {
            IoOp::Load => "load",
            IoOp::Flush => "flush",
        }
    }
}

/// What triggered a write-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushCause {
    /// Capacity-driven eviction inside `PageCache::get`.
    Eviction,
    /// Explicit `flush_all`.
    FlushAll,
    /// Explicit `evict_all`.
    EvictAll,
}

impl FlushCause {
    pub fn name(&self) -> &'static str {
        match self {
            FlushCause::Eviction => "eviction",
            FlushCause::FlushAll => "flush_all",
            FlushCause::EvictAll => "evict_all",
        }
    }
}

/// A single page that could not be written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushFailure {
    pub page: PageId,
    pub cause: FlushCause,
    pub reason: String,
}

impl FlushFailure {
    pub fn new(page: PageId, cause: FlushCause, err: &eyre::Report) -> Self {
        Self {
            page,
            cause,
            reason: format!("{:#}", err),
        }
    }
}

impl fmt::Display for FlushFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page {} ({}): {}",
            self.page,
            self.cause.name(),
            self.reason
        )
    }
}

#[derive(Debug)]
pub enum CacheError {
    Config(String),
    BackingStore {
        page: PageId,
        op: IoOp,
        source: BoxError,
    },
    FlushFailed(Vec<FlushFailure>),
    IllegalState(String),
}

impl CacheError {
    pub fn is_config(&self) -> bool {
        matches!(self, CacheError::Config(_))
    }

    pub fn is_backing_store(&self) -> bool {
        matches!(
            self,
            CacheError::BackingStore { .. } | CacheError::FlushFailed(_)
        )
    }

    pub fn is_illegal_state(&self) -> bool {
        matches!(self, CacheError::IllegalState(_))
    }

    /// Pages whose write-back failed, empty for other kinds.
    pub fn failed_pages(&self) -> Vec<PageId> {
        match self {
            CacheError::FlushFailed(failures) => failures.iter().map(|f| f.page).collect(),
            CacheError::BackingStore {
                page,
                op: IoOp::Flush,
                ..
            } => vec![*page],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            CacheError::BackingStore { page, op, source } => {
                write!(f, "failed to {} page {}: {}", op.name(), page, source)
            }
            CacheError::FlushFailed(failures) => {
                write!(f, "failed to write back {} page(s)", failures.len())?;
                for failure in failures {
                    write!(f, "; {}", failure)?;
                }
                Ok(())
            }
            CacheError::IllegalState(msg) => write!(f, "illegal state: {}", msg),
        }
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CacheError::BackingStore { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_failed_lists_every_page() {
        let err = CacheError::FlushFailed(vec![
            FlushFailure {
                page: 3,
                cause: FlushCause::Eviction,
                reason: "disk full".into(),
            },
            FlushFailure {
                page: 9,
                cause: FlushCause::FlushAll,
                reason: "disk full".into(),
            },
        ]);

        let text = err.to_string();
        assert!(text.contains("2 page(s)"));
        assert!(text.contains("page 3 (eviction)"));
        assert!(text.contains("page 9 (flush_all)"));
        assert_eq!(err.failed_pages(), vec![3, 9]);
        assert!(err.is_backing_store());
    }

    #[test]
    fn backing_store_error_exposes_source() {
        let err = CacheError::BackingStore {
            page: 7,
            op: IoOp::Load,
            source: "connection reset".into(),
        };

        assert_eq!(err.to_string(), "failed to load page 7: connection reset");
        assert_eq!(err.source().unwrap().to_string(), "connection reset");
        assert!(err.failed_pages().is_empty());
    }

    #[test]
    fn report_downcasts_to_cache_error() {
        let report: eyre::Report = CacheError::Config("page size 3".into()).into();

        let kind = report.downcast_ref::<CacheError>().unwrap();
        assert!(kind.is_config());
        assert!(!kind.is_illegal_state());
    }
}
