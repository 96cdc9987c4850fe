use super::{Backing, RandomAccessData, StorageError};
use std::io;

/// Read-only window `[offset, offset + length)` over another backing store.
///
/// Positions are relative to the start of the window.
pub struct Fragment {
    inner: Box<Backing>,
    offset: u64,
    length: u64,
    pos: u64,
}

impl Fragment {
    pub fn new(inner: Backing, offset: u64, length: u64) -> io::Result<Self> {
        let data_length = inner.len()?;
        if offset.checked_add(length).is_none_or(|end| end > data_length) {
            return Err(StorageError::FragmentOutOfBounds {
                offset,
                length,
                data_length,
            }
            .into());
        }
        let mut fragment = Self {
            inner: Box::new(inner),
            offset,
            length,
            pos: 0,
        };
        fragment.seek(0)?;
        Ok(fragment)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_only(&self) -> io::Error {
        StorageError::ReadOnly(self.name()).into()
    }
}

impl RandomAccessData for Fragment {
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.inner.seek(pos + self.offset)?;
        self.pos = self.inner.position() - self.offset;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.length.saturating_sub(self.pos);
        if available == 0 {
            return Ok(0);
        }
        let len = buf.len().min(available.min(usize::MAX as u64) as usize);
        let n = self.inner.read(&mut buf[..len])?;
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> io::Result<()> {
        Err(self.read_only())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.length)
    }

    fn set_len(&mut self, _len: u64) -> io::Result<()> {
        Err(self.read_only())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn sync(&mut self) -> io::Result<()> {
        self.inner.sync()
    }

    fn is_writable(&self) -> bool {
        false
    }

    fn name(&self) -> String {
        format!(
            "{}-Fragment({},{})",
            self.inner.name(),
            self.offset,
            self.length
        )
    }

    fn sibling(&self, _name: &str) -> io::Result<Backing> {
        Err(StorageError::Unsupported("sibling of a fragment").into())
    }

    fn reopen(&self) -> io::Result<Backing> {
        Ok(Backing::Fragment(Fragment::new(
            self.inner.reopen()?,
            self.offset,
            self.length,
        )?))
    }
}
