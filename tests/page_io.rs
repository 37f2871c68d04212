//! # PageIo Behaviour Tests
//!
//! End-to-end tests of the byte dispatcher over an in-memory backing store
//! with 128-byte pages and a 64-page cache.
//!
//! ## Test Goals
//!
//! 1. **Round Trip**: data written in small chunks reaches the backing store
//!    intact after `flush_all`
//! 2. **Page Arithmetic**: a write touches exactly the pages it overlaps
//! 3. **Write-Back**: exceeding capacity by k pages causes exactly k
//!    write-backs, each with the evicted page's data
//! 4. **Short Reads**: reads stop at the end of valid data

use std::sync::Arc;

use blockio::storage::MemoryStore;
use blockio::{CacheError, PageIo};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

const PAGE_SIZE: usize = 128;
const MAX_PAGES: usize = 64;
const BACKEND_LEN: usize = 64 * 4096;

fn setup() -> (Arc<MemoryStore>, PageIo) {
    let store = Arc::new(MemoryStore::with_len(BACKEND_LEN));
    let io = PageIo::with_memory(Arc::clone(&store), MAX_PAGES, PAGE_SIZE).unwrap();
    (store, io)
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(0).fill_bytes(&mut data);
    data
}

#[test]
fn written_data_matches_backend_after_flush() {
    let (store, io) = setup();
    let data = random_bytes(8192);

    for (i, chunk) in data.chunks(64).enumerate() {
        io.write(i as u64 * 64, chunk).unwrap();
    }
    io.flush_all().unwrap();

    assert_eq!(store.slice(0, data.len()), data, "invalid data");
}

#[test]
fn read_matches_backend() {
    let backend = random_bytes(BACKEND_LEN);
    let store = Arc::new(MemoryStore::from_bytes(backend.clone()));
    let io = PageIo::with_memory(store, MAX_PAGES, PAGE_SIZE).unwrap();

    let mut data = vec![0u8; 8192];
    for (i, chunk) in data.chunks_mut(64).enumerate() {
        assert_eq!(io.read(i as u64 * 64, chunk).unwrap(), 64);
    }

    assert_eq!(&data[..], &backend[..8192], "invalid data");
}

#[test]
fn small_write_allocates_one_page() {
    let (_store, io) = setup();

    io.write(0, &[0u8; 5]).unwrap();

    assert_eq!(io.page_count(), 1);
}

#[test]
fn small_write_at_later_offset_allocates_one_page() {
    let (_store, io) = setup();

    io.write(PAGE_SIZE as u64 + 16, &[0u8; 5]).unwrap();

    assert_eq!(io.page_count(), 1);
}

#[test]
fn unaligned_write_allocates_two_pages() {
    let (_store, io) = setup();

    io.write(PAGE_SIZE as u64 - 1, &[0u8; 5]).unwrap();

    assert_eq!(io.page_count(), 2);
}

#[test]
fn big_write_allocates_multiple_pages() {
    let (_store, io) = setup();

    io.write(0, &vec![0u8; PAGE_SIZE * 4]).unwrap();

    assert_eq!(io.page_count(), 4);
}

#[test]
fn flush_per_write_matches_backend() {
    let (store, io) = setup();
    let data = random_bytes(8192);

    for (i, chunk) in data.chunks(64).enumerate() {
        io.write(i as u64 * 64, chunk).unwrap();
        io.flush_all().unwrap();
    }

    assert_eq!(store.slice(0, data.len()), data, "invalid data");
}

#[test]
fn exceeding_capacity_flushes_extra_pages() {
    let (store, io) = setup();
    let extra_pages = 3;

    for i in 0..io.max_page_count() + extra_pages {
        let fill = [i as u8; PAGE_SIZE];
        io.write((i * PAGE_SIZE) as u64, &fill).unwrap();
    }

    assert_eq!(store.write_count(), extra_pages as u64);
    assert_eq!(io.stats().write_backs, extra_pages as u64);
    assert_eq!(io.page_count(), MAX_PAGES);
    for (offset, len) in store.write_log() {
        let page = offset as usize / PAGE_SIZE;
        assert_eq!(len, PAGE_SIZE);
        assert_eq!(store.slice(offset as usize, len), vec![page as u8; PAGE_SIZE]);
    }
}

#[test]
fn flush_all_is_idempotent() {
    let (store, io) = setup();
    io.write(10, b"hello").unwrap();
    io.write(300, b"world").unwrap();

    assert_eq!(io.flush_all().unwrap(), 2);
    let writes = store.write_count();
    assert_eq!(io.flush_all().unwrap(), 0);

    assert_eq!(store.write_count(), writes);
}

#[test]
fn read_on_fresh_store_is_empty() {
    let store = Arc::new(MemoryStore::new());
    let io = PageIo::with_memory(store, MAX_PAGES, PAGE_SIZE).unwrap();

    let mut buf = [0xFFu8; 256];
    assert_eq!(io.read(0, &mut buf).unwrap(), 0);
    assert_eq!(buf, [0xFFu8; 256]);
}

#[test]
fn read_is_short_past_end_of_data() {
    let store = Arc::new(MemoryStore::new());
    let io = PageIo::with_memory(store, MAX_PAGES, PAGE_SIZE).unwrap();
    io.write(0, &[9u8; 200]).unwrap();

    let mut buf = [0u8; 512];
    assert_eq!(io.read(0, &mut buf).unwrap(), 200);
    assert_eq!(io.read(150, &mut buf).unwrap(), 50);
}

#[test]
fn overlapping_unaligned_writes_round_trip() {
    let store = Arc::new(MemoryStore::new());
    let io = PageIo::with_memory(Arc::clone(&store), 4, PAGE_SIZE).unwrap();
    let mut model = vec![0u8; 2048];
    let mut rng = StdRng::seed_from_u64(7);

    for round in 0..200u32 {
        let offset = (rng.next_u32() % 1900) as usize;
        let len = (rng.next_u32() % 140) as usize + 1;
        let fill = vec![(round % 251) as u8; len];
        io.write(offset as u64, &fill).unwrap();
        model[offset..offset + len].copy_from_slice(&fill);
    }
    io.flush_all().unwrap();

    let written = store.len();
    assert_eq!(store.snapshot(), model[..written].to_vec());

    io.evict_all().unwrap();
    let mut buf = vec![0u8; written];
    assert_eq!(io.read(0, &mut buf).unwrap(), written);
    assert_eq!(buf, model[..written].to_vec());
}

#[test]
fn evict_all_empties_cache_and_persists() {
    let (store, io) = setup();
    io.write(0, &[5u8; 1000]).unwrap();

    let dropped = io.evict_all().unwrap();

    assert_eq!(dropped, 8);
    assert_eq!(io.page_count(), 0);
    assert_eq!(store.slice(0, 1000), vec![5u8; 1000]);
}

#[test]
fn construction_rejects_invalid_geometry() {
    let store = Arc::new(MemoryStore::new());

    let err = PageIo::with_memory(Arc::clone(&store), MAX_PAGES, 100).unwrap_err();
    assert!(err.downcast_ref::<CacheError>().unwrap().is_config());

    let err = PageIo::with_memory(store, 0, PAGE_SIZE).unwrap_err();
    assert!(err.downcast_ref::<CacheError>().unwrap().is_config());
}

#[test]
fn backing_write_failure_surfaces_from_write() {
    let store = Arc::new(MemoryStore::new());
    let io = PageIo::with_memory(Arc::clone(&store), 1, PAGE_SIZE).unwrap();
    io.write(0, &[1u8; 8]).unwrap();
    store.fail_writes(true);

    let err = io.write(PAGE_SIZE as u64, &[2u8; 8]).unwrap_err();

    let kind = err.downcast_ref::<CacheError>().unwrap();
    assert_eq!(kind.failed_pages(), vec![0]);

    store.fail_writes(false);
    let err = io.flush_all().unwrap_err();
    assert_eq!(err.downcast_ref::<CacheError>().unwrap().failed_pages(), vec![0]);
    assert_eq!(io.flush_all().unwrap(), 0);
}
