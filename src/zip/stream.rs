//! Streams over entry data.

use flate2::read::DeflateDecoder;
use std::cell::RefCell;
use std::io::{self, Read};

use crate::io::BufferedFile;

/// Reads `[start, start + length)` of a shared storage handle.
///
/// Every `read` re-seeks the shared handle while holding its borrow, so several
/// readers over one archive can be interleaved.
pub struct RawEntryReader<'a> {
    file: &'a RefCell<BufferedFile>,
    pos: u64,
    remaining: u64,
}

impl<'a> RawEntryReader<'a> {
    pub fn new(file: &'a RefCell<BufferedFile>, start: u64, length: u64) -> Self {
        Self {
            file,
            pos: start,
            remaining: length,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Read for RawEntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = {
            let mut file = self.file.borrow_mut();
            file.seek_to(self.pos)?;
            file.read(&mut buf[..len])?
        };
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("entry data truncated, {} bytes missing", self.remaining),
            ));
        }
        self.pos += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Decompressing reader over one entry.
pub enum EntryReader<'a> {
    Stored(RawEntryReader<'a>),
    Deflated(Box<DeflateDecoder<RawEntryReader<'a>>>),
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntryReader::Stored(r) => r.read(buf),
            EntryReader::Deflated(r) => r.read(buf),
        }
    }
}

/// Compare two readers to the end, stopping at the first differing byte.
pub fn streams_equal<A: Read, B: Read>(mut a: A, mut b: B) -> io::Result<bool> {
    let mut buf_a = vec![0u8; 64 * 1024];
    let mut buf_b = vec![0u8; 64 * 1024];
    loop {
        let n = fill(&mut a, &mut buf_a)?;
        let m = fill(&mut b, &mut buf_b)?;
        if n != m || buf_a[..n] != buf_b[..m] {
            return Ok(false);
        }
        if n == 0 {
            return Ok(true);
        }
    }
}

/// Read until `buf` is full or the reader is exhausted.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut count = 0;
    while count < buf.len() {
        match reader.read(&mut buf[count..]) {
            Ok(0) => break,
            Ok(n) => count += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(count)
}
