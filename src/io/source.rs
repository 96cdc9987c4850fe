//! Sequential byte-range views over finished archive bytes.
//!
//! A [`DataSource`] is read front to back with [`DataSource::copy_to`] and can
//! be rewound with [`DataSource::reset`]. Sources compose: [`link`] concatenates
//! them and [`align`] pads one with zeros to a multiple of some block size.

use super::BufferedFile;
use std::cell::RefCell;
use std::io::{self, Read, Write};

/// Sequentially readable byte range.
pub trait DataSource {
    fn size(&self) -> u64;

    fn pos(&self) -> u64;

    fn remaining(&self) -> u64 {
        self.size() - self.pos()
    }

    /// Rewind to the first byte.
    fn reset(&mut self) -> io::Result<()>;

    /// Copy the next `length` bytes into `sink`.
    fn copy_to(&mut self, sink: &mut dyn Write, length: u64) -> io::Result<()>;

    /// Copy the rest of this source into memory.
    fn to_memory(&mut self) -> io::Result<BytesDataSource> {
        let remaining = self.remaining();
        let capacity = usize::try_from(remaining)
            .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "Data too large"))?;
        let mut data = Vec::with_capacity(capacity);
        self.copy_to(&mut data, remaining)?;
        Ok(BytesDataSource::new(data))
    }
}

fn past_end(length: u64, remaining: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("requested {length} bytes, {remaining} remaining"),
    )
}

/// Range `[start, start + size)` of a shared storage handle.
pub struct FileDataSource<'a> {
    file: &'a RefCell<BufferedFile>,
    start: u64,
    size: u64,
    pos: u64,
}

impl<'a> FileDataSource<'a> {
    pub fn new(file: &'a RefCell<BufferedFile>, start: u64, size: u64) -> Self {
        Self {
            file,
            start,
            size,
            pos: 0,
        }
    }
}

impl DataSource for FileDataSource<'_> {
    fn size(&self) -> u64 {
        self.size
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn reset(&mut self) -> io::Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn copy_to(&mut self, sink: &mut dyn Write, mut length: u64) -> io::Result<()> {
        if length > self.remaining() {
            return Err(past_end(length, self.remaining()));
        }
        let mut buf = [0u8; 4096];
        let mut file = self.file.borrow_mut();
        file.seek_to(self.start + self.pos)?;
        while length > 0 {
            let want = length.min(buf.len() as u64) as usize;
            let n = file.read(&mut buf[..want])?;
            if n == 0 {
                return Err(past_end(length, 0));
            }
            sink.write_all(&buf[..n])?;
            length -= n as u64;
            self.pos += n as u64;
        }
        Ok(())
    }
}

/// In-memory byte range.
pub struct BytesDataSource {
    data: Vec<u8>,
    pos: usize,
}

impl BytesDataSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl DataSource for BytesDataSource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn pos(&self) -> u64 {
        self.pos as u64
    }

    fn reset(&mut self) -> io::Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn copy_to(&mut self, sink: &mut dyn Write, length: u64) -> io::Result<()> {
        if length > self.remaining() {
            return Err(past_end(length, self.remaining()));
        }
        let end = self.pos + length as usize;
        sink.write_all(&self.data[self.pos..end])?;
        self.pos = end;
        Ok(())
    }
}

/// Concatenation of several sources.
pub struct ChainedDataSource<'a> {
    sources: Vec<Box<dyn DataSource + 'a>>,
    index: usize,
    size: u64,
    pos: u64,
}

impl<'a> ChainedDataSource<'a> {
    pub fn new(sources: Vec<Box<dyn DataSource + 'a>>) -> Self {
        let size = sources.iter().map(|s| s.size()).sum();
        Self {
            sources,
            index: 0,
            size,
            pos: 0,
        }
    }
}

impl DataSource for ChainedDataSource<'_> {
    fn size(&self) -> u64 {
        self.size
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn reset(&mut self) -> io::Result<()> {
        self.index = 0;
        self.pos = 0;
        for source in &mut self.sources {
            source.reset()?;
        }
        Ok(())
    }

    fn copy_to(&mut self, sink: &mut dyn Write, mut length: u64) -> io::Result<()> {
        if length > self.remaining() {
            return Err(past_end(length, self.remaining()));
        }
        while length > 0 {
            let current = &mut self.sources[self.index];
            let len = length.min(current.remaining());
            current.copy_to(sink, len)?;
            length -= len;
            self.pos += len;
            if current.remaining() == 0 && self.index + 1 < self.sources.len() {
                self.index += 1;
            }
        }
        Ok(())
    }
}

pub fn from_file(file: &RefCell<BufferedFile>, start: u64, size: u64) -> FileDataSource<'_> {
    FileDataSource::new(file, start, size)
}

pub fn from_bytes(data: Vec<u8>) -> BytesDataSource {
    BytesDataSource::new(data)
}

/// Pad `source` with zeros up to a multiple of `alignment`.
pub fn align<'a>(source: Box<dyn DataSource + 'a>, alignment: u64) -> Box<dyn DataSource + 'a> {
    let over = source.size() % alignment;
    if over == 0 {
        return source;
    }
    let fill = (alignment - over) as usize;
    link(vec![source, Box::new(from_bytes(vec![0u8; fill]))])
}

/// Concatenate `sources` into one.
pub fn link<'a>(sources: Vec<Box<dyn DataSource + 'a>>) -> Box<dyn DataSource + 'a> {
    Box::new(ChainedDataSource::new(sources))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_pads_to_boundary() {
        let mut source = align(Box::new(from_bytes(vec![1, 2, 3, 4, 5])), 4);
        assert_eq!(source.size(), 8);
        let mut out = Vec::new();
        source.copy_to(&mut out, 8).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 0, 0, 0]);
    }

    #[test]
    fn test_align_keeps_aligned_source() {
        let source = align(Box::new(from_bytes(vec![7; 4096])), 4096);
        assert_eq!(source.size(), 4096);
    }

    #[test]
    fn test_link_copies_across_boundaries_and_resets() {
        let mut source = link(vec![
            Box::new(from_bytes(b"abc".to_vec())),
            Box::new(from_bytes(b"de".to_vec())),
            Box::new(from_bytes(b"fgh".to_vec())),
        ]);
        let mut out = Vec::new();
        source.copy_to(&mut out, 4).unwrap();
        source.copy_to(&mut out, 4).unwrap();
        assert_eq!(out, b"abcdefgh");
        assert_eq!(source.remaining(), 0);

        source.reset().unwrap();
        let memory = source.to_memory().unwrap();
        assert_eq!(memory.as_bytes(), b"abcdefgh");
    }

    #[test]
    fn test_copy_past_end_fails() {
        let mut source = from_bytes(vec![0; 3]);
        let mut out = Vec::new();
        let err = source.copy_to(&mut out, 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_file_source_reads_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("range.bin");
        std::fs::write(&path, b"0123456789").unwrap();
        let file = RefCell::new(BufferedFile::open(&path).unwrap());

        let mut source = from_file(&file, 2, 5);
        let mut out = Vec::new();
        source.copy_to(&mut out, 2).unwrap();
        source.copy_to(&mut out, 3).unwrap();
        assert_eq!(out, b"23456");
        assert!(source.copy_to(&mut out, 1).is_err());
    }
}
