//! Fuzz testing for the page cache dispatcher.
//!
//! This fuzz target drives a small `PageIo` with arbitrary reads, writes,
//! flushes and evictions and checks every read against a flat byte model.
//! The cache is tiny so most operations force evictions and write-backs.

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use blockio::storage::MemoryStore;
use blockio::PageIo;

const SPAN: u64 = 4096;

#[derive(Debug, Arbitrary)]
struct PageIoInput {
    page_shift: u8,
    max_pages: u8,
    operations: Vec<Operation>,
}

#[derive(Debug, Arbitrary)]
enum Operation {
    Write { offset: u16, data: Vec<u8> },
    Read { offset: u16, len: u16 },
    FlushAll,
    EvictAll,
}

/// Flat model of the address space. `len` is the high-water mark of
/// written bytes; everything below it reads back.
struct Model {
    bytes: Vec<u8>,
    len: usize,
}

impl Model {
    fn write(&mut self, offset: usize, data: &[u8]) {
        let end = offset + data.len();
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        self.bytes[offset..end].copy_from_slice(data);
        if !data.is_empty() {
            self.len = self.len.max(end);
        }
    }
}

fuzz_target!(|input: PageIoInput| {
    let page_size = 1usize << (input.page_shift % 9);
    let max_pages = (input.max_pages % 8) as usize + 1;

    let store = Arc::new(MemoryStore::new());
    let io = PageIo::with_memory(Arc::clone(&store), max_pages, page_size).unwrap();
    let mut model = Model {
        bytes: Vec::new(),
        len: 0,
    };

    for op in input.operations.into_iter().take(256) {
        match op {
            Operation::Write { offset, mut data } => {
                let offset = offset as u64 % SPAN;
                data.truncate(256);
                io.write(offset, &data).unwrap();
                model.write(offset as usize, &data);
            }
            Operation::Read { offset, len } => {
                let offset = (offset as u64 % SPAN) as usize;
                let mut buf = vec![0u8; len as usize % 512];
                let n = io.read(offset as u64, &mut buf).unwrap();

                assert!(n <= buf.len());
                if n > 0 {
                    assert!(offset + n <= model.len);
                    assert_eq!(&buf[..n], &model.bytes[offset..offset + n]);
                }
            }
            Operation::FlushAll => {
                io.flush_all().unwrap();
            }
            Operation::EvictAll => {
                io.evict_all().unwrap();
            }
        }
        assert!(io.page_count() <= max_pages);
    }

    io.flush_all().unwrap();
    let persisted = store.slice(0, model.len);
    assert_eq!(&persisted[..], &model.bytes[..model.len]);
});
