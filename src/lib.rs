//! # apkmux
//!
//! A byte-level ZIP/APK container engine.
//!
//! This library reads and writes ZIP archives through a buffered random-access
//! storage handle, with zip64 support and APK-style alignment of stored
//! entries. On top of that it can multiplex an APK: entries that also exist
//! inside a stored, embedded archive are turned into central directory records
//! pointing into the embedded bytes, so their data is kept only once.
//!
//! ## Features
//!
//! - Read archives, including zip64 and archives nested in a stored entry
//! - Stream entries into a new archive, stored or deflated, with headers
//!   patched in place once sizes are known
//! - 4-byte alignment of stored entries, 4096 for `.so` files and host entries
//! - Data multiplexing and a content equivalence check
//! - Section layout for APK signing
//!
//! ## Example
//!
//! ```no_run
//! use std::io::Write;
//! use std::path::Path;
//! use apkmux::{ZipArchive, ZipWriter};
//!
//! fn main() -> apkmux::Result<()> {
//!     let mut writer = ZipWriter::create(Path::new("out.zip"))?;
//!     writer.put_next_entry("hello.txt")?;
//!     writer.write_all(b"hello")?;
//!     writer.finish()?;
//!
//!     let archive = ZipArchive::open(Path::new("out.zip"))?;
//!     for entry in archive.entries() {
//!         println!("{} {:08x}", entry.name, entry.crc32);
//!     }
//!     archive.close()
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{Result, ZipError};
pub use io::{BufferedFile, DataSource, StorageError};
pub use zip::{
    CompressionMethod, MultiplexReport, ZipArchive, ZipEntry, ZipSections, ZipWriter,
    archives_equivalent, multiplex,
};
