//! Random-access storage that all archive parsing and rewriting sits on.
//!
//! Two layers:
//!
//! - [`Backing`]: the raw byte store, either a plain file ([`LocalFile`]) or a
//!   read-only window into another store ([`Fragment`]).
//! - [`BufferedFile`]: a handle with a 128 KiB write-back cache over a backing
//!   store. This is what the reader and writer talk to.
//!
//! [`DataSource`] views expose finished byte ranges to consumers that only need
//! sequential reads (for example an APK signer).

mod buffered;
mod fragment;
mod local;
mod source;

pub use buffered::{BUFFER_SIZE, BufferedFile};
pub use fragment::Fragment;
pub use local::LocalFile;
pub use source::{
    BytesDataSource, ChainedDataSource, DataSource, FileDataSource, align, from_bytes, from_file,
    link,
};

use std::io;

use thiserror::Error;

/// Misuse of a storage handle. Carried as the payload of an [`io::Error`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage handle is closed")]
    Closed,

    #[error("{0} is readonly")]
    ReadOnly(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("fragment.offset={offset}, fragment.length={length}, data.length={data_length}")]
    FragmentOutOfBounds {
        offset: u64,
        length: u64,
        data_length: u64,
    },
}

impl StorageError {
    /// Returns the storage error carried by `err`, if any.
    pub fn from_io(err: &io::Error) -> Option<&StorageError> {
        err.get_ref().and_then(|e| e.downcast_ref::<StorageError>())
    }
}

impl From<StorageError> for io::Error {
    fn from(err: StorageError) -> Self {
        let kind = match err {
            StorageError::ReadOnly(_) => io::ErrorKind::PermissionDenied,
            StorageError::Unsupported(_) => io::ErrorKind::Unsupported,
            StorageError::FragmentOutOfBounds { .. } => io::ErrorKind::InvalidInput,
            StorageError::Closed => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Capability interface shared by every backing store.
pub trait RandomAccessData {
    /// Move the store's cursor to `pos`.
    fn seek(&mut self, pos: u64) -> io::Result<()>;

    /// Read into `buf`, returning 0 at end of data.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    fn len(&self) -> io::Result<u64>;

    fn set_len(&mut self, len: u64) -> io::Result<()>;

    fn position(&self) -> u64;

    fn sync(&mut self) -> io::Result<()>;

    /// Whether writes and resizes are accepted.
    fn is_writable(&self) -> bool;

    fn name(&self) -> String;

    /// Open another store called `name` next to this one.
    fn sibling(&self, name: &str) -> io::Result<Backing>;

    /// Open an independent store over the same bytes, positioned at zero.
    fn reopen(&self) -> io::Result<Backing>;

    /// Open a read-only view of `[offset, offset + length)`.
    fn fragment(&self, offset: u64, length: u64) -> io::Result<Backing> {
        Ok(Backing::Fragment(Fragment::new(
            self.reopen()?,
            offset,
            length,
        )?))
    }
}

/// The closed set of backing stores.
pub enum Backing {
    File(LocalFile),
    Fragment(Fragment),
}

impl Backing {
    fn as_dyn(&self) -> &dyn RandomAccessData {
        match self {
            Backing::File(f) => f,
            Backing::Fragment(f) => f,
        }
    }

    fn as_dyn_mut(&mut self) -> &mut dyn RandomAccessData {
        match self {
            Backing::File(f) => f,
            Backing::Fragment(f) => f,
        }
    }
}

impl RandomAccessData for Backing {
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.as_dyn_mut().seek(pos)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.as_dyn_mut().read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.as_dyn_mut().write(buf)
    }

    fn len(&self) -> io::Result<u64> {
        self.as_dyn().len()
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.as_dyn_mut().set_len(len)
    }

    fn position(&self) -> u64 {
        self.as_dyn().position()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.as_dyn_mut().sync()
    }

    fn is_writable(&self) -> bool {
        self.as_dyn().is_writable()
    }

    fn name(&self) -> String {
        self.as_dyn().name()
    }

    fn sibling(&self, name: &str) -> io::Result<Backing> {
        self.as_dyn().sibling(name)
    }

    fn reopen(&self) -> io::Result<Backing> {
        self.as_dyn().reopen()
    }

    fn fragment(&self, offset: u64, length: u64) -> io::Result<Backing> {
        self.as_dyn().fragment(offset, length)
    }
}
