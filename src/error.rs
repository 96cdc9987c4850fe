//! Error types shared by the archive reader, writer and multiplexer.

use std::io;

use thiserror::Error;

/// Errors raised while reading, writing or rewriting an archive.
#[derive(Debug, Error)]
pub enum ZipError {
    /// No end-of-central-directory record inside the search window.
    #[error("Not a ZIP archive: end of central directory not found")]
    NotAZipArchive,

    /// The archive declares more than one disk.
    #[error("Spanned archives not supported: {0}")]
    SpannedArchive(String),

    /// A record was missing or carried a bad signature where one was required.
    #[error("Malformed archive: {0}")]
    Malformed(String),

    /// A 32-bit field held the zip64 sentinel but the entry had no zip64 record.
    #[error(
        "File contains no zip64 extended information: name={name}, compressed_size={compressed_size}, size={size}, header_offset={header_offset}"
    )]
    MissingZip64Extra {
        name: String,
        compressed_size: u64,
        size: u64,
        header_offset: u64,
    },

    #[error("Unsupported compression method {method} ({name})")]
    UnsupportedCompression { name: String, method: u16 },

    /// Nested archives can only be opened from stored entries.
    #[error("Entry must be packaged with the stored method: {0}")]
    EntryNotStored(String),

    #[error("Invalid host entry name: {0}")]
    InvalidHostEntryName(String),

    /// The entry outgrew 32-bit fields after its local header was laid out without zip64 room.
    #[error("Zip entry size needs zip64: name={name}, compressed_size={compressed_size}, size={size}")]
    SizeRequiresZip64 {
        name: String,
        compressed_size: u64,
        size: u64,
    },

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Entry bytes were written while no entry was open.
    #[error("No entry is open for writing")]
    NoEntryOpen,

    #[error("No multiplexable data found")]
    NoMultiplexableData,

    #[error("Extra field record too large: {0} bytes")]
    ExtraFieldTooLarge(usize),

    #[error("Archive comment too long: {0} bytes")]
    CommentTooLong(usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ZipError>;
