//! ZIP archive reading, writing and repackaging.
//!
//! ## Architecture
//!
//! - [`structures`]: fixed records (EOCD, zip64 EOCD and locator), [`ZipEntry`], DOS time
//! - [`extra`]: extra-field records
//! - [`parser`]: [`ZipArchive`], the reader
//! - [`stream`]: raw and decompressing entry readers
//! - [`header`] and [`writer`]: [`ZipWriter`], which streams entries and patches
//!   their local headers once sizes are known
//! - [`multiplex`]: sharing entry data between an APK and an archive embedded in it
//! - [`layout`]: the sections an APK signer digests
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and data for each entry
//! 2. Central Directory with metadata for all entries
//! 3. End of Central Directory (EOCD) record at the end, preceded by the
//!    ZIP64 EOCD and its locator when 32-bit fields are not enough
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - STORED and DEFLATE methods only

pub mod extra;
mod header;
mod layout;
mod multiplex;
mod parser;
mod stream;
mod structures;
mod writer;

pub use header::{CentralHeader, Declared, EntrySizes, ZIP64_RESERVE_THRESHOLD, Zip64Need};
pub use layout::{APK_SIG_BLOCK_MAGIC_HI, APK_SIG_BLOCK_MAGIC_LO, ZipSections};
pub use multiplex::{
    ContentMatch, MultiplexReport, VirtualEntry, archives_equivalent, collect_duplicates,
    compare_content, decompressed_bytes_equal, multiplex, raw_bytes_equal,
};
pub use parser::{SkippedEntry, ZipArchive};
pub use stream::{EntryReader, RawEntryReader, streams_equal};
pub use structures::*;
pub use writer::{HostEntry, ZipWriter};
