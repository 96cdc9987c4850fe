//! Streaming archive writer.
//!
//! Each entry's local header goes out before its data, with placeholder CRC
//! and sizes. Closing the entry seeks back, patches those fields, and returns
//! to the end of the data. [`ZipWriter::finish`] writes the sorted central
//! directory and the end records.

use crc32fast::Hasher;
use flate2::{Compress, Compression, FlushCompress, Status};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use super::header::{CentralHeader, Declared, EntrySizes, patch_local_header};
use super::parser::ZipArchive;
use super::structures::*;
use crate::error::{Result, ZipError};
use crate::io::BufferedFile;

const SCRATCH_SIZE: usize = 64 * 1024;

/// The entry currently accepting bytes.
struct OpenEntry {
    /// Index of its staged header.
    index: usize,
    hasher: Hasher,
    size: u64,
    compressed_size: u64,
    compressor: Option<Compress>,
    scratch: Vec<u8>,
}

impl OpenEntry {
    fn new(index: usize, compressor: Option<Compress>) -> Self {
        let scratch = if compressor.is_some() {
            vec![0u8; SCRATCH_SIZE]
        } else {
            Vec::new()
        };
        Self {
            index,
            hasher: Hasher::new(),
            size: 0,
            compressed_size: 0,
            compressor,
            scratch,
        }
    }

    fn write(&mut self, out: &mut BufferedFile, data: &[u8]) -> io::Result<()> {
        self.hasher.update(data);
        self.size += data.len() as u64;

        let Some(compressor) = self.compressor.as_mut() else {
            out.write_all(data)?;
            self.compressed_size += data.len() as u64;
            return Ok(());
        };

        let mut input = data;
        while !input.is_empty() {
            let before_in = compressor.total_in();
            let before_out = compressor.total_out();
            compressor
                .compress(input, &mut self.scratch, FlushCompress::None)
                .map_err(io::Error::other)?;
            let consumed = (compressor.total_in() - before_in) as usize;
            let produced = (compressor.total_out() - before_out) as usize;
            out.write_all(&self.scratch[..produced])?;
            self.compressed_size += produced as u64;
            input = &input[consumed..];
        }
        Ok(())
    }

    fn finish(mut self, out: &mut BufferedFile) -> io::Result<EntrySizes> {
        if let Some(compressor) = self.compressor.as_mut() {
            loop {
                let before_out = compressor.total_out();
                let status = compressor
                    .compress(&[], &mut self.scratch, FlushCompress::Finish)
                    .map_err(io::Error::other)?;
                let produced = (compressor.total_out() - before_out) as usize;
                out.write_all(&self.scratch[..produced])?;
                self.compressed_size += produced as u64;
                if status == Status::StreamEnd {
                    break;
                }
            }
        }
        Ok(EntrySizes {
            crc32: self.hasher.finalize(),
            size: self.size,
            compressed_size: self.compressed_size,
        })
    }
}

/// Writes a ZIP archive front to back.
///
/// Bytes for the current entry go through the [`Write`] impl. Calling
/// [`finish`](Self::finish) is required; a writer dropped before that leaves
/// an archive without a central directory.
///
/// ```ignore
/// let mut writer = ZipWriter::create(Path::new("out.zip"))?;
/// writer.put_next_entry("hello.txt")?;
/// writer.write_all(b"hello")?;
/// writer.finish()?;
/// ```
pub struct ZipWriter {
    storage: BufferedFile,
    headers: Vec<CentralHeader>,
    current: Option<OpenEntry>,
    method: CompressionMethod,
    level: Compression,
    force_zip64: bool,
    comment: Vec<u8>,
    needs_zip64_eocd: bool,
}

impl ZipWriter {
    /// Create a new archive at `path`, replacing any existing file.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(Self::new(BufferedFile::open_rw(path)?))
    }

    /// Write an archive into `storage`, starting at its current position.
    pub fn new(storage: BufferedFile) -> Self {
        Self {
            storage,
            headers: Vec::new(),
            current: None,
            method: CompressionMethod::Deflate,
            level: Compression::default(),
            force_zip64: false,
            comment: Vec::new(),
            needs_zip64_eocd: false,
        }
    }

    /// Method for entries started with [`put_next_entry`](Self::put_next_entry).
    /// Directories are always stored.
    pub fn set_method(&mut self, method: CompressionMethod) {
        self.method = method;
    }

    pub fn method(&self) -> CompressionMethod {
        self.method
    }

    pub fn set_level(&mut self, level: Compression) {
        self.level = level;
    }

    /// Give every following entry zip64 fields, needed or not.
    pub fn set_force_zip64(&mut self, force: bool) {
        self.force_zip64 = force;
    }

    pub fn set_comment(&mut self, comment: impl Into<Vec<u8>>) -> Result<()> {
        let comment = comment.into();
        if comment.len() as u64 > MAX_COMMENT_SIZE {
            return Err(ZipError::CommentTooLong(comment.len()));
        }
        self.comment = comment;
        Ok(())
    }

    /// Current write offset.
    pub fn position(&self) -> u64 {
        self.storage.position()
    }

    /// Start a new entry called `name`. A name ending in `/` is a directory
    /// and takes no data.
    pub fn put_next_entry(&mut self, name: &str) -> Result<()> {
        self.start_entry(CentralHeader::new(name), self.method)
    }

    /// Start a new entry with `template`'s name, time, attributes, extra and
    /// comment. The data is compressed again with this writer's method.
    pub fn put_next_entry_from(&mut self, template: &ZipEntry) -> Result<()> {
        let mut header = CentralHeader::from_entry(template);
        header.declared.compressed_size = None;
        self.start_entry(header, self.method)
    }

    fn start_entry(&mut self, mut header: CentralHeader, method: CompressionMethod) -> Result<()> {
        self.close_entry()?;

        let directory = header.is_directory();
        header.method = if directory {
            CompressionMethod::Stored
        } else {
            method
        };
        let compressor = match header.method {
            CompressionMethod::Stored => None,
            CompressionMethod::Deflate => Some(Compress::new(self.level, false)),
            CompressionMethod::Unknown(method) => {
                return Err(ZipError::UnsupportedCompression {
                    name: header.name,
                    method,
                });
            }
        };

        self.write_header(&mut header)?;
        if !directory {
            self.current = Some(OpenEntry::new(self.headers.len(), compressor));
        }
        self.headers.push(header);
        Ok(())
    }

    /// Start an entry whose data is supplied already compressed through
    /// [`write_raw`](Self::write_raw). Method, CRC and sizes come from
    /// `template` and are written as is.
    pub fn put_next_raw_entry(&mut self, template: &ZipEntry) -> Result<()> {
        self.close_entry()?;
        let mut header = CentralHeader::from_entry(template);
        self.write_header(&mut header)?;
        self.headers.push(header);
        Ok(())
    }

    /// Append bytes verbatim, bypassing CRC and compression.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.storage.write_all(data)?;
        Ok(())
    }

    /// Copy `entry` from `archive` without recompressing it.
    pub fn copy_entry(&mut self, entry: &ZipEntry, archive: &ZipArchive) -> Result<()> {
        self.put_next_raw_entry(entry)?;
        if !entry.is_directory() {
            let copied = io::copy(&mut archive.raw_reader(entry), &mut self.storage)?;
            debug_assert_eq!(copied, entry.compressed_size);
        }
        Ok(())
    }

    fn write_header(&mut self, header: &mut CentralHeader) -> Result<()> {
        header.header_offset = self.storage.position();
        header.prepare(self.force_zip64);
        if header.zip64.any() {
            self.needs_zip64_eocd = true;
        }
        let extra = header.local_extra()?;
        header.write_local(&mut self.storage, &extra)?;
        header.data_offset = self.storage.position();
        Ok(())
    }

    /// Finish the open entry: flush the compressor and patch its local
    /// header with the final CRC and sizes. Does nothing if no entry is open.
    ///
    /// # Errors
    ///
    /// [`ZipError::SizeRequiresZip64`] if a size reached 4 GiB but the local
    /// header was written without zip64 room.
    pub fn close_entry(&mut self) -> Result<()> {
        let Some(entry) = self.current.take() else {
            return Ok(());
        };
        let index = entry.index;
        let sizes = entry.finish(&mut self.storage)?;

        let header = &mut self.headers[index];
        header.sizes = sizes;
        if !header.zip64.sizes
            && (sizes.size >= ZIP64_SENTINEL || sizes.compressed_size >= ZIP64_SENTINEL)
        {
            return Err(ZipError::SizeRequiresZip64 {
                name: header.name.clone(),
                compressed_size: sizes.compressed_size,
                size: sizes.size,
            });
        }

        let resume = self.storage.position();
        patch_local_header(
            &mut self.storage,
            header.header_offset,
            header.name.len() as u64,
            &sizes,
            header.zip64.sizes,
        )?;
        self.storage.seek_to(resume)?;
        Ok(())
    }

    /// Store the whole of `archive` as an entry named after `template` and
    /// return a handle for mapping its inner entries into this archive.
    ///
    /// Time, attributes, extra and comment come from `template`. The payload
    /// is page aligned and stored, so the inner archive stays readable in place.
    pub fn put_next_host_entry<'w, 'a>(
        &'w mut self,
        template: &ZipEntry,
        archive: &'a ZipArchive,
    ) -> Result<HostEntry<'w, 'a>> {
        let name = template.name.as_str();
        if name.ends_with('/') || name.ends_with('\\') {
            return Err(ZipError::InvalidHostEntryName(name.to_string()));
        }

        let payload_len = archive.storage().borrow_mut().len()?;
        let mut header = CentralHeader::from_entry(template);
        header.declared = Declared {
            crc32: 0,
            size: Some(payload_len),
            compressed_size: Some(payload_len),
        };
        header.is_host = true;
        self.start_entry(header, CompressionMethod::Stored)?;
        let index = self.headers.len() - 1;

        let mut source = archive.storage().borrow_mut().reopen()?;
        let mut buf = vec![0u8; SCRATCH_SIZE];
        loop {
            let n = source.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.write_all(&buf[..n])?;
        }
        source.close()?;
        self.close_entry()?;

        let host = &self.headers[index];
        let (header_offset, data_offset) = (host.header_offset, host.data_offset);
        log::debug!(
            "host entry {} at {}, payload at {} ({} bytes)",
            name,
            header_offset,
            data_offset,
            host.sizes.size
        );
        Ok(HostEntry {
            writer: self,
            archive,
            header_offset,
            data_offset,
        })
    }

    /// Close the open entry, write the central directory and end records,
    /// and close the storage.
    pub fn finish(mut self) -> Result<()> {
        self.close_entry()?;

        let cd_offset = self.storage.position();
        self.headers.sort_by(|a, b| a.name.cmp(&b.name));
        for header in &self.headers {
            header.write_central(&mut self.storage)?;
        }
        let cd_size = self.storage.position() - cd_offset;
        self.write_end_records(cd_offset, cd_size)?;

        log::debug!(
            "{}: wrote {} entries, central directory at {} ({} bytes){}",
            self.storage.name(),
            self.headers.len(),
            cd_offset,
            cd_size,
            if self.needs_zip64_eocd { ", zip64" } else { "" }
        );
        self.storage.close()?;
        Ok(())
    }

    fn write_end_records(&mut self, cd_offset: u64, cd_size: u64) -> Result<()> {
        let count = self.headers.len() as u64;
        if count >= ZIP64_COUNT_SENTINEL as u64 || cd_offset + cd_size >= ZIP64_SENTINEL {
            self.needs_zip64_eocd = true;
        }

        if self.needs_zip64_eocd {
            Zip64EOCD {
                eocd64_size: (Zip64EOCD::MIN_SIZE - 12) as u64,
                version_made_by: 45,
                version_needed: 45,
                disk_number: 0,
                disk_with_cd: 0,
                disk_entries: count,
                total_entries: count,
                cd_size,
                cd_offset,
            }
            .write_to(&mut self.storage)?;
            Zip64EOCDLocator {
                disk_with_eocd64: 0,
                eocd64_offset: cd_offset + cd_size,
                total_disks: 1,
            }
            .write_to(&mut self.storage)?;
        }

        let eocd = if self.needs_zip64_eocd {
            EndOfCentralDirectory {
                disk_number: 0,
                disk_with_cd: 0,
                disk_entries: ZIP64_COUNT_SENTINEL,
                total_entries: ZIP64_COUNT_SENTINEL,
                cd_size: ZIP64_SENTINEL as u32,
                cd_offset: ZIP64_SENTINEL as u32,
                comment_len: self.comment.len() as u16,
            }
        } else {
            EndOfCentralDirectory {
                disk_number: 0,
                disk_with_cd: 0,
                disk_entries: count as u16,
                total_entries: count as u16,
                cd_size: cd_size as u32,
                cd_offset: cd_offset as u32,
                comment_len: self.comment.len() as u16,
            }
        };
        eocd.write_to(&mut self.storage)?;
        self.storage.write_all(&self.comment)?;
        Ok(())
    }
}

impl Write for ZipWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(entry) = self.current.as_mut() else {
            return Err(ZipError::NoEntryOpen.into());
        };
        entry.write(&mut self.storage, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.storage.flush()
    }
}

/// A host entry just written by [`ZipWriter::put_next_host_entry`].
pub struct HostEntry<'w, 'a> {
    writer: &'w mut ZipWriter,
    archive: &'a ZipArchive,
    header_offset: u64,
    data_offset: u64,
}

impl HostEntry<'_, '_> {
    /// Local header offset of the host entry.
    pub fn header_offset(&self) -> u64 {
        self.header_offset
    }

    /// Offset of the first byte of the embedded archive.
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Add a central directory record for the inner entry `name`, pointing
    /// into the host payload. No bytes are written.
    ///
    /// Returns the virtual entry's header offset relative to the host entry's.
    pub fn put_next_virtual_entry(&mut self, name: &str) -> Result<u64> {
        let inner = self.archive.entry_required(name)?;
        let mut header = CentralHeader::from_entry(inner);
        header.header_offset = inner.header_offset + self.data_offset;
        header.data_offset = inner.data_offset + self.data_offset;
        header.prepare(self.writer.force_zip64);
        if header.zip64.any() {
            self.writer.needs_zip64_eocd = true;
        }

        let relative = header.header_offset - self.header_offset;
        log::debug!(
            "virtual entry {} at {}, data at {}",
            header.name,
            header.header_offset,
            header.data_offset
        );
        self.writer.headers.push(header);
        Ok(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.zip");
        (dir, path)
    }

    #[test]
    fn test_write_without_entry_fails() {
        let (_dir, path) = scratch();
        let mut writer = ZipWriter::create(&path).unwrap();
        let err = writer.write_all(b"orphan").unwrap_err();
        assert!(err.to_string().contains("No entry is open"));
    }

    #[test]
    fn test_local_header_is_patched() {
        let (_dir, path) = scratch();
        let mut writer = ZipWriter::create(&path).unwrap();
        writer.set_method(CompressionMethod::Stored);
        writer.put_next_entry("a.txt").unwrap();
        writer.write_all(b"hello").unwrap();
        writer.finish().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], LFH_SIGNATURE);
        assert_eq!(&bytes[14..18], &0x3610_a686u32.to_le_bytes());
        assert_eq!(&bytes[18..22], &5u32.to_le_bytes());
        assert_eq!(&bytes[22..26], &5u32.to_le_bytes());
    }

    #[test]
    fn test_forced_zip64_patches_extra_sizes() {
        let (_dir, path) = scratch();
        let mut writer = ZipWriter::create(&path).unwrap();
        writer.set_force_zip64(true);
        writer.put_next_entry("z.txt").unwrap();
        writer.write_all(&[b'z'; 1000]).unwrap();
        writer.finish().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[18..26], &[0xFF; 8]);
        // zip64 record follows the 5-byte name
        assert_eq!(&bytes[35..39], &[0x01, 0x00, 16, 0]);
        assert_eq!(&bytes[39..47], &1000u64.to_le_bytes());

        let archive = ZipArchive::open(&path).unwrap();
        let entry = archive.entry_required("z.txt").unwrap();
        assert_eq!(entry.size, 1000);
        assert_eq!(archive.read_entry(entry).unwrap(), vec![b'z'; 1000]);
    }

    #[test]
    fn test_invalid_host_name() {
        let (dir, path) = scratch();
        let inner_path = dir.path().join("inner.zip");
        let mut inner = ZipWriter::create(&inner_path).unwrap();
        inner.put_next_entry("x").unwrap();
        inner.finish().unwrap();
        let inner = ZipArchive::open(&inner_path).unwrap();

        let mut writer = ZipWriter::create(&path).unwrap();
        let err = writer
            .put_next_host_entry(&ZipEntry::new("host/"), &inner)
            .err()
            .unwrap();
        assert!(matches!(err, ZipError::InvalidHostEntryName(_)));
    }

    #[test]
    fn test_comment_too_long() {
        let (_dir, path) = scratch();
        let mut writer = ZipWriter::create(&path).unwrap();
        assert!(matches!(
            writer.set_comment(vec![b'c'; 70_000]),
            Err(ZipError::CommentTooLong(70_000))
        ));
    }
}
