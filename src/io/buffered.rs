//! Write-back cached storage handle.
//!
//! [`BufferedFile`] keeps one 128 KiB window `[lo, hi)` of the backing store in
//! memory. Reads and writes inside the window never touch the backing store;
//! leaving the window flushes dirty bytes and loads the block containing the new
//! position.
//!
//! Invariant: every dirty byte lies below the current position. Seeking
//! backwards inside the window flushes first so that a later flush of
//! `[lo, curr)` never drops bytes written further ahead.

use super::{Backing, LocalFile, RandomAccessData, StorageError};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

const LOG_BUFFER_SIZE: u32 = 17;

/// Size of the cache window (128 KiB).
pub const BUFFER_SIZE: usize = 1 << LOG_BUFFER_SIZE;

const BUFFER_MASK: u64 = !((BUFFER_SIZE as u64) - 1);

/// Buffered random-access handle over a [`Backing`] store.
pub struct BufferedFile {
    backing: Backing,
    buffer: Box<[u8]>,
    /// True iff unflushed bytes exist.
    dirty: bool,
    closed: bool,
    curr: u64,
    lo: u64,
    hi: u64,
    /// `lo + BUFFER_SIZE`
    max_hi: u64,
    /// The window holds the last block of the backing store.
    hit_eof: bool,
    disk_pos: u64,
    backing_len: Option<u64>,
}

impl BufferedFile {
    pub fn new(backing: Backing) -> Self {
        Self {
            backing,
            buffer: vec![0u8; BUFFER_SIZE].into_boxed_slice(),
            dirty: false,
            closed: false,
            curr: 0,
            lo: 0,
            hi: 0,
            max_hi: BUFFER_SIZE as u64,
            hit_eof: false,
            disk_pos: 0,
            backing_len: None,
        }
    }

    /// Open an existing file read-only.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(Backing::File(LocalFile::open(path)?)))
    }

    /// Open a file for reading and writing, creating it if missing.
    pub fn open_rw(path: &Path) -> io::Result<Self> {
        Ok(Self::new(Backing::File(LocalFile::open_rw(path)?)))
    }

    pub fn name(&self) -> String {
        self.backing.name()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Current position of the handle.
    pub fn position(&self) -> u64 {
        self.curr
    }

    /// Length including bytes written but not yet flushed.
    pub fn len(&mut self) -> io::Result<u64> {
        self.ensure_open()?;
        Ok(self.curr.max(self.backing_len()?))
    }

    pub fn is_empty(&mut self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    fn backing_len(&mut self) -> io::Result<u64> {
        match self.backing_len {
            Some(len) => Ok(len),
            None => {
                let len = self.backing.len()?;
                self.backing_len = Some(len);
                Ok(len)
            }
        }
    }

    /// Truncate or extend the backing store to `new_len`.
    pub fn set_len(&mut self, new_len: u64) -> io::Result<()> {
        self.ensure_writable()?;
        self.flush_buffer()?;
        self.backing.set_len(new_len)?;
        self.backing_len = Some(new_len);
        if self.curr > new_len {
            self.curr = new_len;
        }
        if self.disk_pos > new_len {
            self.backing.seek(new_len)?;
            self.disk_pos = new_len;
        }

        // force the next seek to refill the window
        self.lo = 0;
        self.hi = 0;
        self.seek_to(self.curr)
    }

    /// Position the handle at `pos`, refilling the window if `pos` falls outside it.
    pub fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.ensure_open()?;
        if pos >= self.hi || pos < self.lo {
            self.flush_buffer()?;
            self.lo = pos & BUFFER_MASK;
            self.max_hi = self.lo + BUFFER_SIZE as u64;
            if self.disk_pos != self.lo {
                self.backing.seek(self.lo)?;
                self.disk_pos = self.lo;
            }
            let n = self.fill_buffer()?;
            self.hi = self.lo + n as u64;
        } else if pos < self.curr {
            self.flush_buffer()?;
        }
        self.curr = pos;
        Ok(())
    }

    /// Advance by `n` bytes, clamped to the current length. Returns the distance moved.
    pub fn skip_bytes(&mut self, n: u64) -> io::Result<u64> {
        let pos = self.curr;
        let new_pos = pos.saturating_add(n).min(self.len()?);
        self.seek_to(new_pos)?;
        Ok(new_pos - pos)
    }

    /// Flush and sync the backing store to disk.
    pub fn sync(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        self.flush_buffer()?;
        self.backing.sync()
    }

    /// Flush dirty bytes and close the handle. Closing twice is an error.
    pub fn close(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        self.flush_buffer()?;
        self.closed = true;
        Ok(())
    }

    /// Open an independent handle over the same bytes, positioned at zero.
    pub fn reopen(&mut self) -> io::Result<BufferedFile> {
        self.ensure_open()?;
        self.flush_buffer()?;
        Ok(BufferedFile::new(self.backing.reopen()?))
    }

    /// Open a read-only handle over `[offset, offset + length)`.
    pub fn fragment(&mut self, offset: u64, length: u64) -> io::Result<BufferedFile> {
        self.ensure_open()?;
        self.flush_buffer()?;
        Ok(BufferedFile::new(self.backing.fragment(offset, length)?))
    }

    /// Open a handle on the file called `name` in the same directory.
    pub fn sibling(&self, name: &str) -> io::Result<BufferedFile> {
        self.ensure_open()?;
        Ok(BufferedFile::new(self.backing.sibling(name)?))
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(StorageError::Closed.into());
        }
        Ok(())
    }

    fn ensure_writable(&self) -> io::Result<()> {
        self.ensure_open()?;
        if !self.backing.is_writable() {
            return Err(StorageError::ReadOnly(self.name()).into());
        }
        Ok(())
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        if self.dirty {
            if self.disk_pos != self.lo {
                self.backing.seek(self.lo)?;
            }
            let len = (self.curr - self.lo) as usize;
            self.backing.write(&self.buffer[..len])?;
            self.disk_pos = self.curr;
            self.dirty = false;
            if self.backing_len.is_some_and(|len| self.disk_pos > len) {
                self.backing_len = None;
            }
        }
        Ok(())
    }

    /// Read up to a full window from the backing store. A short read marks EOF
    /// and zero-fills the rest of the window.
    fn fill_buffer(&mut self) -> io::Result<usize> {
        let mut count = 0;
        while count < self.buffer.len() {
            let n = self.backing.read(&mut self.buffer[count..])?;
            if n == 0 {
                break;
            }
            count += n;
        }
        self.hit_eof = count < self.buffer.len();
        if self.hit_eof {
            self.buffer[count..].fill(0);
        }
        self.disk_pos += count as u64;
        Ok(count)
    }

    fn write_at_most(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.curr >= self.hi && !(self.hit_eof && self.curr < self.max_hi) {
            self.seek_to(self.curr)?;
        }
        // past the end of the backing store the window grows with the writes
        let limit = if self.hit_eof { self.max_hi } else { self.hi };
        let len = data.len().min((limit - self.curr) as usize);
        let off = (self.curr - self.lo) as usize;
        self.buffer[off..off + len].copy_from_slice(&data[..len]);
        self.curr += len as u64;
        if self.curr > self.hi {
            self.hi = self.curr;
        }
        self.dirty = true;
        Ok(len)
    }
}

impl Read for BufferedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }
        if self.curr >= self.hi {
            if self.hit_eof {
                return Ok(0);
            }
            self.seek_to(self.curr)?;
            if self.curr >= self.hi {
                return Ok(0);
            }
        }
        let len = buf.len().min((self.hi - self.curr) as usize);
        let off = (self.curr - self.lo) as usize;
        buf[..len].copy_from_slice(&self.buffer[off..off + len]);
        self.curr += len as u64;
        Ok(len)
    }
}

impl Write for BufferedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_writable()?;
        if buf.is_empty() {
            return Ok(0);
        }
        self.write_at_most(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        self.flush_buffer()
    }
}

impl Seek for BufferedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.len()?.checked_add_signed(d),
            SeekFrom::Current(d) => self.curr.checked_add_signed(d),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        self.seek_to(target)?;
        Ok(target)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.curr)
    }
}

impl Drop for BufferedFile {
    fn drop(&mut self) {
        if self.dirty && !self.closed {
            log::warn!("{} dropped without close, flushing", self.name());
            if let Err(e) = self.flush_buffer() {
                log::warn!("flush of {} failed: {}", self.name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch(name: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        (dir, path)
    }

    #[test]
    fn test_write_then_read_back_across_windows() {
        let (_dir, path) = scratch("data.bin");
        let data: Vec<u8> = (0..BUFFER_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();

        let mut file = BufferedFile::open_rw(&path).unwrap();
        file.write_all(&data).unwrap();
        assert_eq!(file.len().unwrap(), data.len() as u64);
        file.seek_to(0).unwrap();
        let mut back = Vec::new();
        file.read_to_end(&mut back).unwrap();
        assert_eq!(back, data);
        file.close().unwrap();

        assert_eq!(fs::read(&path).unwrap(), data);
    }

    #[test]
    fn test_backward_patch_keeps_forward_bytes() {
        let (_dir, path) = scratch("patch.bin");
        let mut file = BufferedFile::open_rw(&path).unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        file.write_all(b"tail").unwrap();
        let resume = file.position();

        file.seek_to(8).unwrap();
        file.write_all(b"PATCH").unwrap();
        file.seek_to(resume).unwrap();
        file.write_all(b"!").unwrap();
        file.close().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 69);
        assert_eq!(&bytes[8..13], b"PATCH");
        assert_eq!(&bytes[64..69], b"tail!");
    }

    #[test]
    fn test_patch_in_earlier_window() {
        let (_dir, path) = scratch("far.bin");
        let mut file = BufferedFile::open_rw(&path).unwrap();
        file.write_all(&vec![1u8; BUFFER_SIZE * 2 + 5]).unwrap();
        let resume = file.position();
        file.seek_to(3).unwrap();
        file.write_all(&[9, 9]).unwrap();
        file.seek_to(resume).unwrap();
        file.write_all(&[7]).unwrap();
        file.close().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), BUFFER_SIZE * 2 + 6);
        assert_eq!(&bytes[2..6], &[1, 9, 9, 1]);
        assert_eq!(bytes[BUFFER_SIZE * 2 + 5], 7);
    }

    #[test]
    fn test_read_past_end_returns_zero() {
        let (_dir, path) = scratch("short.bin");
        fs::write(&path, b"abc").unwrap();
        let mut file = BufferedFile::open(&path).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf).unwrap(), 3);
        assert_eq!(file.read(&mut buf).unwrap(), 0);
        file.seek_to(100).unwrap();
        assert_eq!(file.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_set_len_truncates_and_clamps_position() {
        let (_dir, path) = scratch("trunc.bin");
        let mut file = BufferedFile::open_rw(&path).unwrap();
        file.write_all(&[5u8; 100]).unwrap();
        file.set_len(40).unwrap();
        assert_eq!(file.position(), 40);
        assert_eq!(file.len().unwrap(), 40);
        file.close().unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![5u8; 40]);
    }

    #[test]
    fn test_fragment_is_read_only_window() {
        let (_dir, path) = scratch("frag.bin");
        fs::write(&path, b"0123456789").unwrap();
        let mut file = BufferedFile::open(&path).unwrap();
        let mut fragment = file.fragment(3, 4).unwrap();

        assert_eq!(fragment.len().unwrap(), 4);
        let mut out = Vec::new();
        fragment.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"3456");

        let err = fragment.write_all(b"x").unwrap_err();
        assert!(matches!(
            StorageError::from_io(&err),
            Some(StorageError::ReadOnly(_))
        ));
        assert!(fragment.set_len(1).is_err());
        assert!(file.fragment(8, 4).is_err());
    }

    #[test]
    fn test_double_close_is_an_error() {
        let (_dir, path) = scratch("close.bin");
        let mut file = BufferedFile::open_rw(&path).unwrap();
        file.close().unwrap();
        let err = file.close().unwrap_err();
        assert!(matches!(
            StorageError::from_io(&err),
            Some(StorageError::Closed)
        ));
        assert!(file.seek_to(0).is_err());
    }

    #[test]
    fn test_reopen_sees_flushed_bytes() {
        let (_dir, path) = scratch("same.bin");
        let mut file = BufferedFile::open_rw(&path).unwrap();
        file.write_all(b"shared").unwrap();
        let mut other = file.reopen().unwrap();
        let mut out = String::new();
        other.read_to_string(&mut out).unwrap();
        assert_eq!(out, "shared");
        file.close().unwrap();
    }

    #[test]
    fn test_sibling_opens_next_to_file() {
        let (dir, path) = scratch("a.bin");
        fs::write(&path, b"a").unwrap();
        fs::write(dir.path().join("b.bin"), b"sib").unwrap();
        let file = BufferedFile::open(&path).unwrap();
        let mut sibling = file.sibling("b.bin").unwrap();
        assert_eq!(sibling.name(), "b.bin");
        assert_eq!(sibling.len().unwrap(), 3);
    }
}
