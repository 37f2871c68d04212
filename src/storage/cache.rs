//! # Bounded Write-Back Page Cache
//!
//! This module implements `PageCache`, a bounded map from page id to `Page`
//! with single-flight loading, LRU eviction and mandatory write-back of dirty
//! victims.
//!
//! ## Slots
//!
//! Every id in the map is in exactly one state:
//!
//! ```text
//!            get (miss)                 load ok
//!   absent ─────────────> Loading ─────────────────> Resident
//!      ^                     │ load failed               │ chosen as victim
//!      └─────────────────────┘                           v
//!      ^                                              Evicting
//!      └──────────────────────────────────────────────────┘
//!                         flushed (or flush failed) and removed
//! ```
//!
//! `Loading` and `Evicting` slots carry a shared `InFlight` handle. A `get`
//! that finds one blocks on it instead of building a second `Page`, so at
//! most one `Page` exists per id and concurrent misses share one load. After
//! an eviction completes the waiter retries, reloading from the backing store
//! that now holds the flushed data.
//!
//! ## Pin/Unpin Protocol
//!
//! 1. `get(id)` increments the page's pin count while holding the map lock
//!    and returns a `PinnedPage`
//! 2. The caller takes the page's shared or exclusive lock and works on it
//! 3. Dropping the `PinnedPage` decrements the pin count
//! 4. Victim selection runs under the same map lock and skips pinned pages
//!
//! Because pins are only taken under the map lock and a victim's slot is
//! switched to `Evicting` under that lock, no caller can be between "got the
//! page" and "locked the page" when its page is flushed and dropped.
//!
//! ## Eviction
//!
//! Recency is a strictly increasing access tick kept in a `BTreeMap`, so the
//! victim is the least recently used unpinned page and selection is
//! deterministic for a fixed access sequence. Eviction runs synchronously in
//! the `get` whose load needs room:
//!
//! 1. Under the map lock: while the cache is full, pick a victim, mark its
//!    slot `Evicting` and stop counting it as resident; then admit the new page
//! 2. Take the victim's exclusive lock, flush if dirty
//! 3. Remove the slot, wake waiters
//!
//! Detaching and admitting in one critical section keeps the resident count
//! within capacity even when many loads finish at once.
//!
//! A failed write-back still removes the page. The failure is returned to the
//! caller of `get` and retained for the next `flush_all`.
//!
//! If every resident page is pinned the cache admits the new page anyway and
//! runs over capacity until a later `get` finds an unpinned victim. These
//! events are counted in `CacheStatsSnapshot::overflow_events`.
//!
//! A loader that unwinds out of the factory or the backing read releases its
//! `Loading` slot on the way out, so waiters fail instead of blocking.
//!
//! ## Flush-All Gate
//!
//! `flush_all` and `evict_all` hold the write side of a gate lock that every
//! miss takes on the read side before installing a `Loading` slot. No page can
//! be admitted while a flush-all pass runs, so no page escapes it.
//!
//! ## Thread Safety
//!
//! - The map, recency index and resident count sit behind one
//!   `parking_lot::Mutex`; no I/O runs while it is held
//! - Backing-store I/O runs under the individual page's lock only
//! - A caller must not hold a page lock while calling `get`

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, trace};

use super::error::{CacheError, FlushCause, FlushFailure, IoOp};
use super::page::{Page, PageId};
use crate::config::MIN_MAX_PAGES;

pub type PageFactory = dyn Fn(PageId) -> Result<Page> + Send + Sync;

/// Counters for monitoring cache behaviour.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
    write_backs: AtomicU64,
    overflow_events: AtomicU64,
}

impl CacheStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            overflow_events: self.overflow_events.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    /// Successful page loads. Equals misses minus failed loads.
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
    /// Dirty pages written to the backing store, from any cause.
    pub write_backs: u64,
    /// Times an admission found every resident page pinned.
    pub overflow_events: u64,
}

/// Why a load failed, kept so every waiter sees the loader's error kind.
#[derive(Clone)]
enum LoadFailure {
    Config(Arc<str>),
    IllegalState(Arc<str>),
    BackingStore(Arc<str>),
}

impl LoadFailure {
    fn from_report(err: &eyre::Report) -> Self {
        match err.downcast_ref::<CacheError>() {
            Some(CacheError::Config(msg)) => LoadFailure::Config(msg.as_str().into()),
            Some(CacheError::IllegalState(msg)) => LoadFailure::IllegalState(msg.as_str().into()),
            _ => LoadFailure::BackingStore(format!("{:#}", err).into()),
        }
    }

    fn to_error(&self, page: PageId) -> CacheError {
        match self {
            LoadFailure::Config(msg) => CacheError::Config(msg.to_string()),
            LoadFailure::IllegalState(msg) => CacheError::IllegalState(msg.to_string()),
            LoadFailure::BackingStore(reason) => CacheError::BackingStore {
                page,
                op: IoOp::Load,
                source: reason.to_string().into(),
            },
        }
    }
}

#[derive(Clone)]
enum Outcome {
    Loaded,
    Failed(LoadFailure),
    Evicted,
}

struct InFlight {
    outcome: Mutex<Option<Outcome>>,
    ready: Condvar,
}

impl InFlight {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        })
    }

    fn complete(&self, outcome: Outcome) {
        *self.outcome.lock() = Some(outcome);
        self.ready.notify_all();
    }

    fn wait(&self) -> Outcome {
        let mut guard = self.outcome.lock();
        loop {
            if let Some(outcome) = guard.as_ref() {
                return outcome.clone();
            }
            self.ready.wait(&mut guard);
        }
    }
}

enum Slot {
    Resident { page: Arc<Page>, tick: u64 },
    Loading(Arc<InFlight>),
    Evicting(Arc<InFlight>),
}

struct CacheState {
    slots: HashMap<PageId, Slot>,
    recency: BTreeMap<u64, PageId>,
    resident: usize,
    tick: u64,
}

impl CacheState {
    fn new(capacity: usize) -> Self {
        Self {
            slots: HashMap::with_capacity(capacity),
            recency: BTreeMap::new(),
            resident: 0,
            tick: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Pins and returns a resident page, marking it most recently used.
    fn touch(&mut self, id: PageId) -> Option<Arc<Page>> {
        let now = self.next_tick();
        let Some(Slot::Resident { page, tick }) = self.slots.get_mut(&id) else {
            return None;
        };
        let old = mem::replace(tick, now);
        page.pin();
        let page = Arc::clone(page);

        self.recency.remove(&old);
        self.recency.insert(now, id);
        Some(page)
    }

    fn admit(&mut self, id: PageId, page: Arc<Page>) {
        let tick = self.next_tick();
        self.slots.insert(id, Slot::Resident { page, tick });
        self.recency.insert(tick, id);
        self.resident += 1;
    }

    /// Detaches the least recently used unpinned page and marks its slot
    /// `Evicting`.
    fn take_victim(&mut self) -> Option<Victim> {
        let (tick, id) = self.recency.iter().find_map(|(&tick, &id)| {
            match self.slots.get(&id) {
                Some(Slot::Resident { page, .. }) if !page.is_pinned() => Some((tick, id)),
                _ => None,
            }
        })?;

        let inflight = InFlight::new();
        let slot = self.slots.insert(id, Slot::Evicting(Arc::clone(&inflight)));
        let Some(Slot::Resident { page, .. }) = slot else {
            unreachable!("recency index points at a non-resident slot");
        };
        self.recency.remove(&tick);
        self.resident -= 1;

        Some(Victim { id, page, inflight })
    }
}

struct Victim {
    id: PageId,
    page: Arc<Page>,
    inflight: Arc<InFlight>,
}

/// Owns a `Loading` slot until the load resolves. If the loader unwinds
/// before resolving it, the slot is removed and waiters are released with
/// a failure instead of blocking forever.
struct LoadGuard<'a> {
    cache: &'a PageCache,
    id: PageId,
    inflight: Option<Arc<InFlight>>,
}

impl LoadGuard<'_> {
    fn loaded(mut self) {
        if let Some(inflight) = self.inflight.take() {
            inflight.complete(Outcome::Loaded);
        }
    }

    fn failed(mut self, failure: LoadFailure) {
        self.abort(failure);
    }

    fn abort(&mut self, failure: LoadFailure) {
        let Some(inflight) = self.inflight.take() else {
            return;
        };
        {
            let mut state = self.cache.state.lock();
            let ours = matches!(
                state.slots.get(&self.id),
                Some(Slot::Loading(current)) if Arc::ptr_eq(current, &inflight)
            );
            if ours {
                state.slots.remove(&self.id);
            }
        }
        inflight.complete(Outcome::Failed(failure));
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if self.inflight.is_some() {
            error!(page = self.id, "page load panicked");
            self.abort(LoadFailure::BackingStore("page load panicked".into()));
        }
    }
}

enum Lookup {
    Hit { page: Arc<Page>, over: bool },
    Wait(Arc<InFlight>),
    Miss,
}

pub struct PageCache {
    capacity: usize,
    factory: Box<PageFactory>,
    state: Mutex<CacheState>,
    gate: RwLock<()>,
    failures: Mutex<Vec<FlushFailure>>,
    stats: CacheStats,
}

impl PageCache {
    pub fn new<F>(capacity: usize, factory: F) -> Result<Self>
    where
        F: Fn(PageId) -> Result<Page> + Send + Sync + 'static,
    {
        if capacity < MIN_MAX_PAGES {
            return Err(CacheError::Config(format!(
                "cache size must be at least {} page(s), got {}",
                MIN_MAX_PAGES, capacity
            ))
            .into());
        }

        debug!(capacity, "initializing page cache");
        Ok(Self {
            capacity,
            factory: Box::new(factory),
            state: Mutex::new(CacheState::new(capacity)),
            gate: RwLock::new(()),
            failures: Mutex::new(Vec::new()),
            stats: CacheStats::default(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of resident pages.
    pub fn size(&self) -> usize {
        self.state.lock().resident
    }

    pub fn len(&self) -> usize {
        self.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn contains(&self, id: PageId) -> bool {
        matches!(self.state.lock().slots.get(&id), Some(Slot::Resident { .. }))
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the pinned page for `id`, loading it on a miss.
    pub fn get(&self, id: PageId) -> Result<PinnedPage> {
        loop {
            match self.lookup(id) {
                Lookup::Hit { page, over } => {
                    CacheStats::bump(&self.stats.hits);
                    let pinned = PinnedPage::new(page);
                    if over {
                        self.evict_excess()?;
                    }
                    return Ok(pinned);
                }
                Lookup::Wait(inflight) => {
                    if let Outcome::Failed(failure) = inflight.wait() {
                        return Err(failure.to_error(id).into());
                    }
                }
                Lookup::Miss => {
                    let _gate = self.gate.read();
                    let inflight = {
                        let mut state = self.state.lock();
                        if state.slots.contains_key(&id) {
                            continue;
                        }
                        let inflight = InFlight::new();
                        state.slots.insert(id, Slot::Loading(Arc::clone(&inflight)));
                        inflight
                    };
                    return self.load(id, inflight);
                }
            }
        }
    }

    fn lookup(&self, id: PageId) -> Lookup {
        let mut state = self.state.lock();
        if let Some(page) = state.touch(id) {
            let over = state.resident > self.capacity;
            return Lookup::Hit { page, over };
        }
        match state.slots.get(&id) {
            Some(Slot::Loading(inflight)) | Some(Slot::Evicting(inflight)) => {
                Lookup::Wait(Arc::clone(inflight))
            }
            _ => Lookup::Miss,
        }
    }

    fn load(&self, id: PageId, inflight: Arc<InFlight>) -> Result<PinnedPage> {
        CacheStats::bump(&self.stats.misses);
        trace!(page = id, "loading page");
        let guard = LoadGuard {
            cache: self,
            id,
            inflight: Some(inflight),
        };

        let loaded = (self.factory)(id).and_then(|page| {
            page.load()?;
            Ok(page)
        });

        let page = match loaded {
            Ok(page) => Arc::new(page),
            Err(e) => {
                CacheStats::bump(&self.stats.load_failures);
                error!(page = id, error = %e, "failed to load page");
                guard.failed(LoadFailure::from_report(&e));
                return Err(e);
            }
        };

        page.pin();
        let victims = {
            let mut state = self.state.lock();
            let victims = self.make_room(&mut state);
            state.admit(id, Arc::clone(&page));
            victims
        };
        guard.loaded();
        CacheStats::bump(&self.stats.loads);

        let pinned = PinnedPage::new(page);
        self.write_back_victims(victims)?;
        Ok(pinned)
    }

    /// Detaches victims until one more page fits. Called under the map lock
    /// in the same critical section as the admission it makes room for.
    fn make_room(&self, state: &mut CacheState) -> Vec<Victim> {
        let mut victims = Vec::new();
        while state.resident >= self.capacity {
            match state.take_victim() {
                Some(victim) => victims.push(victim),
                None => {
                    CacheStats::bump(&self.stats.overflow_events);
                    debug!(
                        resident = state.resident,
                        capacity = self.capacity,
                        "all resident pages pinned, running over capacity"
                    );
                    break;
                }
            }
        }
        victims
    }

    /// Reclaims excess left by an earlier over-capacity admission once
    /// unpinned pages are available again.
    fn evict_excess(&self) -> Result<()> {
        let victims = {
            let mut state = self.state.lock();
            let mut victims = Vec::new();
            while state.resident > self.capacity {
                match state.take_victim() {
                    Some(victim) => victims.push(victim),
                    None => break,
                }
            }
            victims
        };
        self.write_back_victims(victims)
    }

    fn write_back_victims(&self, victims: Vec<Victim>) -> Result<()> {
        let mut failures = Vec::new();
        for victim in victims {
            if let Err(failure) = self.write_back(victim, FlushCause::Eviction) {
                failures.push(failure);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CacheError::FlushFailed(failures).into())
        }
    }

    /// Flushes and removes a detached victim. Eviction failures are also
    /// retained for the next `flush_all`.
    fn write_back(&self, victim: Victim, cause: FlushCause) -> std::result::Result<(), FlushFailure> {
        let Victim { id, page, inflight } = victim;

        let flushed = page.exclusive().flush();
        self.state.lock().slots.remove(&id);
        CacheStats::bump(&self.stats.evictions);

        let result = match flushed {
            Ok(written) => {
                if written {
                    CacheStats::bump(&self.stats.write_backs);
                }
                debug!(page = id, dirty = written, cause = cause.name(), "evicted page");
                Ok(())
            }
            Err(e) => {
                error!(page = id, error = %e, cause = cause.name(), "failed to flush evicted page");
                let failure = FlushFailure::new(id, cause, &e);
                if cause == FlushCause::Eviction {
                    self.failures.lock().push(failure.clone());
                }
                Err(failure)
            }
        };

        inflight.complete(Outcome::Evicted);
        result
    }

    /// Waits for evictions already in progress and returns their handles'
    /// completion. Must be called with the gate held for writing.
    fn drain_evictions(&self) {
        let pending: Vec<Arc<InFlight>> = self
            .state
            .lock()
            .slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Evicting(inflight) => Some(Arc::clone(inflight)),
                _ => None,
            })
            .collect();

        for inflight in pending {
            inflight.wait();
        }
    }

    /// Writes back every dirty resident page, keeping all pages resident.
    ///
    /// Every page is attempted even after a failure. Failures from this pass
    /// and eviction failures since the previous `flush_all` are reported
    /// together as `CacheError::FlushFailed`. Returns the number of pages
    /// written.
    pub fn flush_all(&self) -> Result<usize> {
        let _gate = self.gate.write();
        self.drain_evictions();

        let mut pages: Vec<PinnedPage> = {
            let state = self.state.lock();
            state
                .slots
                .values()
                .filter_map(|slot| match slot {
                    Slot::Resident { page, .. } => {
                        page.pin();
                        Some(PinnedPage::new(Arc::clone(page)))
                    }
                    _ => None,
                })
                .collect()
        };
        pages.sort_by_key(|page| page.id());

        let mut failures = mem::take(&mut *self.failures.lock());
        let mut flushed = 0;
        for page in &pages {
            match page.exclusive().flush() {
                Ok(true) => flushed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(page = page.id(), error = %e, "failed to flush page");
                    failures.push(FlushFailure::new(page.id(), FlushCause::FlushAll, &e));
                }
            }
        }
        self.stats.write_backs.fetch_add(flushed as u64, Ordering::Relaxed);

        debug!(
            resident = pages.len(),
            flushed,
            failed = failures.len(),
            "flushed all pages"
        );

        if failures.is_empty() {
            Ok(flushed)
        } else {
            Err(CacheError::FlushFailed(failures).into())
        }
    }

    /// Flushes and drops every unpinned resident page. Returns the number of
    /// pages dropped; pinned pages stay resident.
    pub fn evict_all(&self) -> Result<usize> {
        let _gate = self.gate.write();
        self.drain_evictions();

        let mut failures = mem::take(&mut *self.failures.lock());
        let mut evicted = 0;
        loop {
            let Some(victim) = self.state.lock().take_victim() else {
                break;
            };
            if let Err(failure) = self.write_back(victim, FlushCause::EvictAll) {
                failures.push(failure);
            }
            evicted += 1;
        }

        debug!(evicted, failed = failures.len(), "evicted all unpinned pages");

        if failures.is_empty() {
            Ok(evicted)
        } else {
            Err(CacheError::FlushFailed(failures).into())
        }
    }
}

impl fmt::Debug for PageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageCache")
            .field("capacity", &self.capacity)
            .field("resident", &self.size())
            .finish_non_exhaustive()
    }
}

/// A page handed out by `PageCache::get`. The page cannot be evicted while
/// this handle is alive.
pub struct PinnedPage {
    page: Arc<Page>,
}

impl PinnedPage {
    /// Wraps a page whose pin count was already incremented.
    fn new(page: Arc<Page>) -> Self {
        Self { page }
    }
}

impl Deref for PinnedPage {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.page
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        self.page.unpin();
    }
}

impl fmt::Debug for PinnedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PinnedPage").field(&self.page).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{segment_factory, MemoryStore};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    const PAGE: usize = 16;

    fn cache_over(store: &Arc<MemoryStore>, capacity: usize) -> PageCache {
        PageCache::new(capacity, segment_factory(Arc::clone(store), PAGE)).unwrap()
    }

    fn dirty(cache: &PageCache, id: PageId, fill: u8) {
        let page = cache.get(id).unwrap();
        page.exclusive().write(0, &[fill; PAGE]).unwrap();
    }

    #[test]
    fn rejects_zero_capacity() {
        let store = Arc::new(MemoryStore::new());
        let err = PageCache::new(0, segment_factory(store, PAGE)).unwrap_err();

        assert!(err.downcast_ref::<CacheError>().unwrap().is_config());
    }

    #[test]
    fn get_returns_same_page_on_hit() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_over(&store, 4);

        let a = cache.get(1).unwrap();
        let b = cache.get(1).unwrap();

        assert!(std::ptr::eq(&*a, &*b));
        assert_eq!(a.pin_count(), 2);
        drop(a);
        assert_eq!(b.pin_count(), 1);
        drop(b);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_over(&store, 2);

        drop(cache.get(0).unwrap());
        drop(cache.get(1).unwrap());
        drop(cache.get(0).unwrap());
        drop(cache.get(2).unwrap());

        assert!(cache.contains(0));
        assert!(!cache.contains(1));
        assert!(cache.contains(2));
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn eviction_writes_back_dirty_victim() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_over(&store, 1);

        dirty(&cache, 0, 0xAA);
        dirty(&cache, 1, 0xBB);

        assert_eq!(store.write_log(), vec![(0, PAGE)]);
        assert_eq!(store.slice(0, PAGE), vec![0xAA; PAGE]);
        assert_eq!(cache.stats().write_backs, 1);
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn clean_victims_cause_no_writes() {
        let store = Arc::new(MemoryStore::with_len(PAGE * 8));
        let cache = cache_over(&store, 2);

        for id in 0..8 {
            drop(cache.get(id).unwrap());
        }

        assert_eq!(store.write_count(), 0);
        assert_eq!(cache.stats().evictions, 6);
    }

    #[test]
    fn pinned_pages_are_never_evicted() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_over(&store, 1);

        let held = cache.get(0).unwrap();
        let other = cache.get(1).unwrap();

        assert!(cache.contains(0));
        assert!(cache.contains(1));
        assert_eq!(cache.size(), 2);
        assert_eq!(cache.stats().overflow_events, 1);

        drop(held);
        drop(other);
        drop(cache.get(1).unwrap());

        assert_eq!(cache.size(), 1);
        assert!(!cache.contains(0));
    }

    #[test]
    fn failed_load_leaves_nothing_resident() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_over(&store, 4);
        store.fail_reads(true);

        let err = cache.get(3).unwrap_err();

        assert!(err.downcast_ref::<CacheError>().unwrap().is_backing_store());
        assert_eq!(cache.size(), 0);
        assert!(!cache.contains(3));
        assert_eq!(cache.stats().load_failures, 1);

        store.fail_reads(false);
        assert!(cache.get(3).is_ok());
    }

    #[test]
    fn eviction_failure_reported_to_caller_and_flush_all() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_over(&store, 1);

        dirty(&cache, 0, 1);
        store.fail_writes(true);

        let err = cache.get(1).unwrap_err();
        let kind = err.downcast_ref::<CacheError>().unwrap();
        assert_eq!(kind.failed_pages(), vec![0]);
        assert!(!cache.contains(0), "victim is dropped even when its flush fails");

        store.fail_writes(false);
        let err = cache.flush_all().unwrap_err();
        match err.downcast_ref::<CacheError>() {
            Some(CacheError::FlushFailed(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].page, 0);
                assert_eq!(failures[0].cause, FlushCause::Eviction);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert_eq!(cache.flush_all().unwrap(), 0);
    }

    #[test]
    fn flush_all_keeps_pages_resident() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_over(&store, 8);

        for id in 0..4 {
            dirty(&cache, id, id as u8);
        }

        assert_eq!(cache.flush_all().unwrap(), 4);
        assert_eq!(cache.size(), 4);
        assert_eq!(cache.flush_all().unwrap(), 0);
        assert_eq!(store.write_count(), 4);
    }

    #[test]
    fn flush_all_aggregates_every_failure() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_over(&store, 8);
        for id in 0..3 {
            dirty(&cache, id, 7);
        }
        store.fail_writes(true);

        let err = cache.flush_all().unwrap_err();

        let kind = err.downcast_ref::<CacheError>().unwrap();
        assert_eq!(kind.failed_pages(), vec![0, 1, 2]);

        store.fail_writes(false);
        assert_eq!(cache.flush_all().unwrap(), 3, "pages stay dirty after failure");
    }

    #[test]
    fn evict_all_flushes_and_drops() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_over(&store, 8);
        dirty(&cache, 0, 1);
        dirty(&cache, 1, 2);
        let held = cache.get(2).unwrap();

        assert_eq!(cache.evict_all().unwrap(), 2);

        assert_eq!(cache.size(), 1);
        assert!(cache.contains(2));
        assert_eq!(store.slice(PAGE, PAGE), vec![2; PAGE]);
        drop(held);
    }

    #[test]
    fn concurrent_misses_load_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(MemoryStore::new());
        let factory = {
            let loads = Arc::clone(&loads);
            let inner = segment_factory(Arc::clone(&store), PAGE);
            move |id| {
                loads.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                inner(id)
            }
        };
        let cache = Arc::new(PageCache::new(4, factory).unwrap());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let page = cache.get(5).unwrap();
                    Arc::as_ptr(&page.page) as usize
                })
            })
            .collect();

        let ptrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(ptrs.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn waiters_see_load_failure() {
        let store = Arc::new(MemoryStore::new());
        let factory = {
            let inner = segment_factory(Arc::clone(&store), PAGE);
            move |id| {
                thread::sleep(Duration::from_millis(20));
                inner(id)
            }
        };
        let cache = Arc::new(PageCache::new(4, factory).unwrap());
        store.fail_reads(true);
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get(1).is_err()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn waiters_see_the_loaders_error_kind() {
        let factory = |_id: PageId| -> Result<Page> {
            thread::sleep(Duration::from_millis(20));
            Err(CacheError::IllegalState("page capacity mismatch".into()).into())
        };
        let cache = Arc::new(PageCache::new(4, factory).unwrap());
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let err = cache.get(2).unwrap_err();
                    err.downcast_ref::<CacheError>().unwrap().is_illegal_state()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn panicking_load_releases_its_slot() {
        let store = Arc::new(MemoryStore::new());
        let panicked = Arc::new(AtomicBool::new(false));
        let entered = Arc::new(Barrier::new(2));
        let factory = {
            let panicked = Arc::clone(&panicked);
            let entered = Arc::clone(&entered);
            let inner = segment_factory(Arc::clone(&store), PAGE);
            move |id| {
                if !panicked.swap(true, Ordering::SeqCst) {
                    entered.wait();
                    thread::sleep(Duration::from_millis(30));
                    panic!("factory blew up");
                }
                inner(id)
            }
        };
        let cache = Arc::new(PageCache::new(4, factory).unwrap());

        let loader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get(7).map(|_| ()))
        };
        entered.wait();
        let waiter = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get(7).map(|_| ()))
        };

        assert!(loader.join().is_err());
        // Either released with the failure or loaded after the slot was freed.
        let _ = waiter.join().unwrap();

        assert!(cache.get(7).is_ok());
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn capacity_holds_under_concurrent_access() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(cache_over(&store, 4));

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200u64 {
                        let id = (i * 7 + t) % 32;
                        let page = cache.get(id).unwrap();
                        page.exclusive().write(0, &[t as u8; 4]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.size() <= 4);
        cache.flush_all().unwrap();
    }
}
