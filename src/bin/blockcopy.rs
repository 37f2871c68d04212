//! # blockcopy
//!
//! Copies a file through two page caches: a small-page cache over the source
//! and a large-page cache over the destination, moving fixed-size chunks
//! between them. Useful for exercising the cache end to end on real files.
//!
//! ## Usage
//!
//! ```bash
//! # Copy with the default geometry (512 B read pages, 8 KiB write pages)
//! blockcopy ./input.bin ./output.bin
//!
//! # Custom geometry
//! blockcopy --read-page-size 4096 --write-page-size 65536 --chunk 1024 in out
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Instant;

use blockio::config::{COPY_CHUNK_SIZE, COPY_MAX_PAGES, COPY_READ_PAGE_SIZE, COPY_WRITE_PAGE_SIZE};
use blockio::storage::SharedFile;
use blockio::PageIo;
use eyre::{bail, ensure, Result, WrapErr};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

struct Options {
    src: PathBuf,
    dst: PathBuf,
    read_page_size: usize,
    write_page_size: usize,
    chunk: usize,
    max_pages: usize,
}

fn parse_size(flag: &str, value: Option<&String>) -> Result<usize> {
    let Some(value) = value else {
        bail!("Missing value for {}", flag);
    };
    value
        .parse()
        .wrap_err_with(|| format!("Invalid value for {}: {}", flag, value))
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let mut read_page_size = COPY_READ_PAGE_SIZE;
    let mut write_page_size = COPY_WRITE_PAGE_SIZE;
    let mut chunk = COPY_CHUNK_SIZE;
    let mut max_pages = COPY_MAX_PAGES;
    let mut paths: Vec<PathBuf> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--version" | "-v" => {
                println!("blockcopy {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            flag @ ("--read-page-size" | "-r") => {
                i += 1;
                read_page_size = parse_size(flag, args.get(i))?;
            }
            flag @ ("--write-page-size" | "-w") => {
                i += 1;
                write_page_size = parse_size(flag, args.get(i))?;
            }
            flag @ ("--chunk" | "-c") => {
                i += 1;
                chunk = parse_size(flag, args.get(i))?;
            }
            flag @ ("--max-pages" | "-m") => {
                i += 1;
                max_pages = parse_size(flag, args.get(i))?;
            }
            arg if arg.starts_with('-') => {
                bail!("Unknown option: {}", arg);
            }
            path => {
                if paths.len() == 2 {
                    bail!("Too many paths specified");
                }
                paths.push(PathBuf::from(path));
            }
        }
        i += 1;
    }

    let mut paths = paths.into_iter();
    let (Some(src), Some(dst)) = (paths.next(), paths.next()) else {
        print_usage();
        return Ok(());
    };
    ensure!(chunk > 0, "Chunk size must be at least 1 byte");

    copy(&Options {
        src,
        dst,
        read_page_size,
        write_page_size,
        chunk,
        max_pages,
    })
}

fn copy(opts: &Options) -> Result<()> {
    let input = SharedFile::open_read_only(&opts.src)?;
    let output = SharedFile::create(&opts.dst)?;

    let reader = PageIo::with_file(input, opts.max_pages, opts.read_page_size)
        .wrap_err("failed to set up source cache")?;
    let writer = PageIo::with_file(output.clone(), opts.max_pages, opts.write_page_size)
        .wrap_err("failed to set up destination cache")?;

    let started = Instant::now();
    let mut buf = vec![0u8; opts.chunk];
    let mut offset = 0u64;
    loop {
        let n = reader
            .read(offset, &mut buf)
            .wrap_err_with(|| format!("failed to read source at offset {}", offset))?;
        if n == 0 {
            break;
        }
        writer
            .write(offset, &buf[..n])
            .wrap_err_with(|| format!("failed to write destination at offset {}", offset))?;
        offset += n as u64;
    }

    let flushed = writer.flush_all().wrap_err("failed to flush destination")?;
    output.sync()?;

    let stats = writer.stats();
    println!(
        "copied {} bytes in {:.2?} ({} pages written back, {} evictions, {} flushed at end)",
        offset,
        started.elapsed(),
        stats.write_backs,
        stats.evictions,
        flushed
    );
    Ok(())
}

fn print_usage() {
    println!("blockcopy - Copy a file through two page caches");
    println!();
    println!("USAGE:");
    println!("    blockcopy [OPTIONS] <SRC> <DST>");
    println!();
    println!("ARGS:");
    println!("    <SRC>    File to read");
    println!("    <DST>    File to create (truncated if it exists)");
    println!();
    println!("OPTIONS:");
    println!("    -r, --read-page-size <BYTES>     Source cache page size (default {})", COPY_READ_PAGE_SIZE);
    println!("    -w, --write-page-size <BYTES>    Destination cache page size (default {})", COPY_WRITE_PAGE_SIZE);
    println!("    -c, --chunk <BYTES>              Bytes moved per step (default {})", COPY_CHUNK_SIZE);
    println!("    -m, --max-pages <PAGES>          Resident pages per cache (default {})", COPY_MAX_PAGES);
    println!("    -h, --help                       Print help information");
    println!("    -v, --version                    Print version information");
}
