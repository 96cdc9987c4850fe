use super::{Backing, RandomAccessData};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Plain file backing store
pub struct LocalFile {
    file: File,
    path: PathBuf,
    writable: bool,
    pos: u64,
}

impl LocalFile {
    /// Open an existing file for reading
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::with_mode(path, false)
    }

    /// Open a file for reading and writing, creating it if missing
    pub fn open_rw(path: &Path) -> io::Result<Self> {
        Self::with_mode(path, true)
    }

    fn with_mode(path: &Path, writable: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .create(writable)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            writable,
            pos: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RandomAccessData for LocalFile {
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.pos = self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    fn sibling(&self, name: &str) -> io::Result<Backing> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new(""));
        Ok(Backing::File(Self::with_mode(
            &parent.join(name),
            self.writable,
        )?))
    }

    fn reopen(&self) -> io::Result<Backing> {
        Ok(Backing::File(Self::with_mode(&self.path, self.writable)?))
    }
}
