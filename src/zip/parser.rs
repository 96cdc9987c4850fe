//! ZIP archive reader.
//!
//! This module parses archives from a [`BufferedFile`] storage handle.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Scan backwards for the End of Central Directory (EOCD)
//! 2. If a ZIP64 locator sits right before it, read the ZIP64 EOCD instead
//! 3. Read the Central Directory to get metadata for all entries
//! 4. Visit every Local File Header in file order to find where data starts
//!
//! Entries whose local header cannot be read are left out of the table and
//! reported through [`ZipArchive::skipped_entries`].

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::DeflateDecoder;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::path::Path;

use super::extra;
use super::stream::{EntryReader, RawEntryReader};
use super::structures::*;
use crate::error::{Result, ZipError};
use crate::io::BufferedFile;

/// Location of the central directory as declared by the end records.
#[derive(Debug, Clone)]
pub(crate) struct EndRecord {
    pub eocd_offset: u64,
    pub cd_offset: u64,
    pub cd_size: u64,
    pub total_entries: u64,
    pub comment: Vec<u8>,
    pub zip64: bool,
}

/// An entry left out of the table because its local header failed to verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub name: String,
    pub header_offset: u64,
    pub reason: String,
}

/// A parsed ZIP archive.
///
/// Owns its storage handle. All reads go through one `RefCell` borrow per
/// seek-and-read, so entry readers handed out by [`raw_reader`](Self::raw_reader)
/// and [`entry_reader`](Self::entry_reader) can be used side by side.
///
/// ## Example
///
/// ```ignore
/// let archive = ZipArchive::open(Path::new("app.apk"))?;
/// for entry in archive.entries() {
///     let bytes = archive.read_entry(entry)?;
///     println!("{} {}", entry.name, bytes.len());
/// }
/// archive.close()?;
/// ```
pub struct ZipArchive {
    storage: RefCell<BufferedFile>,
    /// Entries in central-directory order.
    entries: Vec<ZipEntry>,
    index: HashMap<String, usize>,
    comment: Vec<u8>,
    skipped: Vec<SkippedEntry>,
}

impl ZipArchive {
    /// Open the archive at `path` read-only.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_storage(BufferedFile::open(path)?)
    }

    /// Parse an archive from an already opened storage handle.
    ///
    /// # Errors
    ///
    /// Returns [`ZipError::NotAZipArchive`] if no EOCD is found,
    /// [`ZipError::SpannedArchive`] for multi-disk archives and
    /// [`ZipError::MissingZip64Extra`] when a central header uses a zip64
    /// sentinel without carrying the zip64 record.
    pub fn from_storage(mut storage: BufferedFile) -> Result<Self> {
        let end = find_end_record(&mut storage)?;
        log::debug!(
            "{}: central directory at {} ({} bytes, {} entries{})",
            storage.name(),
            end.cd_offset,
            end.cd_size,
            end.total_entries,
            if end.zip64 { ", zip64" } else { "" }
        );

        let listed = read_central_directory(&mut storage, end.cd_offset)?;
        if listed.len() as u64 != end.total_entries {
            log::debug!(
                "{}: EOCD declares {} entries, central directory holds {}",
                storage.name(),
                end.total_entries,
                listed.len()
            );
        }

        let (verified, skipped) = verify_local_headers(&mut storage, listed)?;
        for s in &skipped {
            log::warn!("{}: skipping {}: {}", storage.name(), s.name, s.reason);
        }

        let mut entries: Vec<ZipEntry> = Vec::with_capacity(verified.len());
        let mut index = HashMap::with_capacity(verified.len());
        for entry in verified {
            // a repeated name keeps its first position and takes the latest record
            match index.get(&entry.name) {
                Some(&i) => entries[i] = entry,
                None => {
                    index.insert(entry.name.clone(), entries.len());
                    entries.push(entry);
                }
            }
        }

        Ok(Self {
            storage: RefCell::new(storage),
            entries,
            index,
            comment: end.comment,
            skipped,
        })
    }

    /// All entries in central-directory order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&ZipEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Like [`entry`](Self::entry), but a missing name is an error.
    pub fn entry_required(&self, name: &str) -> Result<&ZipEntry> {
        self.entry(name)
            .ok_or_else(|| ZipError::EntryNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Archive comment from the EOCD record.
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Entries dropped because their local header failed to verify.
    pub fn skipped_entries(&self) -> &[SkippedEntry] {
        &self.skipped
    }

    /// Read the entry's data exactly as stored, without decompressing.
    pub fn raw_reader(&self, entry: &ZipEntry) -> RawEntryReader<'_> {
        RawEntryReader::new(&self.storage, entry.data_offset, entry.compressed_size)
    }

    /// Read the entry's decompressed data.
    ///
    /// # Errors
    ///
    /// Returns [`ZipError::UnsupportedCompression`] for any method other than
    /// stored or deflate.
    pub fn entry_reader(&self, entry: &ZipEntry) -> Result<EntryReader<'_>> {
        match entry.method {
            CompressionMethod::Stored => Ok(EntryReader::Stored(RawEntryReader::new(
                &self.storage,
                entry.data_offset,
                entry.size,
            ))),
            CompressionMethod::Deflate => Ok(EntryReader::Deflated(Box::new(
                DeflateDecoder::new(self.raw_reader(entry)),
            ))),
            CompressionMethod::Unknown(method) => Err(ZipError::UnsupportedCompression {
                name: entry.name.clone(),
                method,
            }),
        }
    }

    /// Decompress the whole entry into memory.
    pub fn read_entry(&self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(entry.size.min(1 << 26) as usize);
        self.entry_reader(entry)?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Parse a stored entry as an archive of its own, without copying it.
    ///
    /// The nested archive reads through a read-only fragment of this archive's
    /// storage covering `[data_offset, data_offset + compressed_size)`.
    pub fn open_entry_as_archive(&self, entry: &ZipEntry) -> Result<ZipArchive> {
        if entry.method != CompressionMethod::Stored {
            return Err(ZipError::EntryNotStored(entry.name.clone()));
        }
        let fragment = self
            .storage
            .borrow_mut()
            .fragment(entry.data_offset, entry.compressed_size)?;
        ZipArchive::from_storage(fragment)
    }

    /// The underlying storage handle.
    pub fn storage(&self) -> &RefCell<BufferedFile> {
        &self.storage
    }

    pub fn close(self) -> Result<()> {
        self.storage.into_inner().close()?;
        Ok(())
    }
}

/// Find and parse the End of Central Directory record.
///
/// Scans backwards from `len - 22` over at most 64 KiB of comment. The first
/// signature whose comment length reaches exactly to the end of the file wins,
/// so signature bytes inside a comment are passed over. If no candidate fits,
/// the last one in the file is used and its comment reads as truncated.
///
/// # Returns
///
/// A tuple of (EOCD record, offset of EOCD in file).
fn find_eocd(file: &mut BufferedFile) -> Result<(EndOfCentralDirectory, u64)> {
    let size = file.len()?;
    if size < EndOfCentralDirectory::SIZE as u64 {
        return Err(ZipError::NotAZipArchive);
    }

    let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(size);
    let search_start = size - search_size;

    let mut buf = vec![0u8; search_size as usize];
    file.seek_to(search_start)?;
    file.read_exact(&mut buf)?;

    let mut fallback = None;
    for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
        if &buf[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
            continue;
        }
        let eocd = EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
        let offset = search_start + i as u64;
        if offset + EndOfCentralDirectory::SIZE as u64 + eocd.comment_len as u64 == size {
            return Ok((eocd, offset));
        }
        if fallback.is_none() {
            fallback = Some((eocd, offset));
        }
    }

    fallback.ok_or(ZipError::NotAZipArchive)
}

/// Read the ZIP64 End of Central Directory record, if the archive has one.
///
/// The ZIP64 EOCD Locator sits immediately before the regular EOCD. Its
/// absence means a plain archive.
///
/// # Errors
///
/// Returns [`ZipError::SpannedArchive`] if the locator or record declares more
/// than one disk, and [`ZipError::Malformed`] if the locator points at
/// something that is not a ZIP64 EOCD.
fn read_zip64_eocd(file: &mut BufferedFile, eocd_offset: u64) -> Result<Option<Zip64EOCD>> {
    if eocd_offset <= Zip64EOCDLocator::SIZE as u64 {
        return Ok(None);
    }

    let mut locator_buf = [0u8; Zip64EOCDLocator::SIZE];
    file.seek_to(eocd_offset - Zip64EOCDLocator::SIZE as u64)?;
    file.read_exact(&mut locator_buf)?;
    if &locator_buf[0..4] != Zip64EOCDLocator::SIGNATURE {
        return Ok(None);
    }

    let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;
    if locator.total_disks != 1 || locator.disk_with_eocd64 != 0 {
        return Err(ZipError::SpannedArchive(format!(
            "total_disks={}, disk_with_eocd64={}",
            locator.total_disks, locator.disk_with_eocd64
        )));
    }

    let mut eocd64_buf = [0u8; Zip64EOCD::MIN_SIZE];
    file.seek_to(locator.eocd64_offset)?;
    file.read_exact(&mut eocd64_buf)?;
    if &eocd64_buf[0..4] != Zip64EOCD::SIGNATURE {
        return Err(ZipError::Malformed(format!(
            "Invalid zip64 eocd record offset {}",
            locator.eocd64_offset
        )));
    }

    let eocd64 = Zip64EOCD::from_bytes(&eocd64_buf)?;
    if eocd64.disk_entries != eocd64.total_entries
        || eocd64.disk_number != 0
        || eocd64.disk_with_cd != 0
    {
        return Err(ZipError::SpannedArchive(format!(
            "num_entries={}, total_num_entries={}, disk_number={}, disk_with_cd={}",
            eocd64.disk_entries, eocd64.total_entries, eocd64.disk_number, eocd64.disk_with_cd
        )));
    }
    Ok(Some(eocd64))
}

/// Locate the central directory through the EOCD and, when present, the
/// ZIP64 EOCD.
pub(crate) fn find_end_record(file: &mut BufferedFile) -> Result<EndRecord> {
    let (eocd, eocd_offset) = find_eocd(file)?;
    log::debug!("{}: EOCD at {}", file.name(), eocd_offset);

    let comment = read_comment(file, eocd_offset, eocd.comment_len)?;

    if let Some(eocd64) = read_zip64_eocd(file, eocd_offset)? {
        return Ok(EndRecord {
            eocd_offset,
            cd_offset: eocd64.cd_offset,
            cd_size: eocd64.cd_size,
            total_entries: eocd64.total_entries,
            comment,
            zip64: true,
        });
    }

    if eocd.disk_entries != eocd.total_entries || eocd.disk_number != 0 || eocd.disk_with_cd != 0
    {
        return Err(ZipError::SpannedArchive(format!(
            "num_entries={}, total_num_entries={}, disk_number={}, disk_with_cd={}",
            eocd.disk_entries, eocd.total_entries, eocd.disk_number, eocd.disk_with_cd
        )));
    }

    Ok(EndRecord {
        eocd_offset,
        cd_offset: eocd.cd_offset as u64,
        cd_size: eocd.cd_size as u64,
        total_entries: eocd.total_entries as u64,
        comment,
        zip64: false,
    })
}

/// A truncated comment reads as empty.
fn read_comment(file: &mut BufferedFile, eocd_offset: u64, len: u16) -> Result<Vec<u8>> {
    let mut comment = vec![0u8; len as usize];
    file.seek_to(eocd_offset + EndOfCentralDirectory::SIZE as u64)?;
    match file.read_exact(&mut comment) {
        Ok(()) => Ok(comment),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            log::debug!("{}: archive comment truncated", file.name());
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse Central Directory File Headers until the signature stops matching.
fn read_central_directory(file: &mut BufferedFile, cd_offset: u64) -> Result<Vec<ZipEntry>> {
    let mut entries = Vec::new();
    let mut header = [0u8; CDFH_MIN_SIZE];

    file.seek_to(cd_offset)?;
    loop {
        match file.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        if &header[0..4] != CDFH_SIGNATURE {
            break;
        }
        entries.push(parse_cdfh(file, &header)?);
    }
    Ok(entries)
}

/// Parse one Central Directory File Header.
///
/// `header` holds the fixed 46-byte part; the file is positioned right after
/// it, at the file name.
fn parse_cdfh(file: &mut BufferedFile, header: &[u8; CDFH_MIN_SIZE]) -> Result<ZipEntry> {
    let mut cursor = Cursor::new(&header[4..]);

    let version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let method = cursor.read_u16::<LittleEndian>()?;
    let dos_time = cursor.read_u32::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let size = cursor.read_u32::<LittleEndian>()? as u64;
    let name_len = cursor.read_u16::<LittleEndian>()? as usize;
    let extra_len = cursor.read_u16::<LittleEndian>()? as usize;
    let comment_len = cursor.read_u16::<LittleEndian>()? as usize;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let internal_attributes = cursor.read_u16::<LittleEndian>()?;
    let external_attributes = cursor.read_u32::<LittleEndian>()?;
    let header_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut name = vec![0u8; name_len];
    file.read_exact(&mut name)?;
    let mut central_extra = vec![0u8; extra_len];
    file.read_exact(&mut central_extra)?;

    // an unreadable comment is not worth losing the entry over
    let mut comment = vec![0u8; comment_len];
    if file.read_exact(&mut comment).is_err() {
        comment.clear();
    }

    let mut entry = ZipEntry {
        name: String::from_utf8_lossy(&name).into_owned(),
        platform: (version_made_by >> 8) as u8,
        flags,
        method: CompressionMethod::from_u16(method),
        dos_time,
        crc32,
        compressed_size,
        size,
        internal_attributes,
        external_attributes,
        header_offset,
        data_offset: 0,
        extra: Vec::new(),
        comment,
    };
    resolve_zip64(&mut entry, &central_extra)?;
    Ok(entry)
}

/// Replace sentinel fields with the 64-bit values from the zip64 record, in
/// the order size, compressed size, header offset.
fn resolve_zip64(entry: &mut ZipEntry, central_extra: &[u8]) -> Result<()> {
    let fields = [entry.size, entry.compressed_size, entry.header_offset];
    if !fields.contains(&ZIP64_SENTINEL) {
        return Ok(());
    }

    let Some(record) = extra::find(central_extra, ZIP64_EXTRA_ID) else {
        return Err(ZipError::MissingZip64Extra {
            name: entry.name.clone(),
            compressed_size: entry.compressed_size,
            size: entry.size,
            header_offset: entry.header_offset,
        });
    };

    let mut cursor = Cursor::new(record);
    let mut resolved = fields;
    for value in resolved.iter_mut() {
        if *value == ZIP64_SENTINEL {
            *value = cursor.read_u64::<LittleEndian>().map_err(|_| {
                ZipError::Malformed(format!("zip64 extra field of {} too short", entry.name))
            })?;
        }
    }
    [entry.size, entry.compressed_size, entry.header_offset] = resolved;
    Ok(())
}

/// Read each entry's local header in file order, filling in `data_offset` and
/// the local extra field. Returns the entries that passed, still in scan
/// order, and the ones that did not.
fn verify_local_headers(
    file: &mut BufferedFile,
    mut entries: Vec<ZipEntry>,
) -> Result<(Vec<ZipEntry>, Vec<SkippedEntry>)> {
    let file_len = file.len()?;
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by_key(|&i| entries[i].header_offset);

    let mut passed = vec![false; entries.len()];
    let mut skipped = Vec::new();
    for i in order {
        let entry = &mut entries[i];
        match read_local_header(file, file_len, entry) {
            Ok((data_offset, local_extra)) => {
                entry.data_offset = data_offset;
                entry.extra = extra::remove(&local_extra, ZIP64_EXTRA_ID);
                passed[i] = true;
            }
            Err(e) => skipped.push(SkippedEntry {
                name: entry.name.clone(),
                header_offset: entry.header_offset,
                reason: e.to_string(),
            }),
        }
    }

    let mut passed = passed.into_iter();
    entries.retain(|_| passed.next().unwrap_or(false));
    Ok((entries, skipped))
}

fn read_local_header(
    file: &mut BufferedFile,
    file_len: u64,
    entry: &ZipEntry,
) -> Result<(u64, Vec<u8>)> {
    let mut lfh = [0u8; LFH_SIZE];
    file.seek_to(entry.header_offset)?;
    file.read_exact(&mut lfh)?;
    if &lfh[0..4] != LFH_SIGNATURE {
        return Err(ZipError::Malformed("Invalid Local File Header".into()));
    }

    let mut cursor = Cursor::new(&lfh[LFH_NAME_LENGTH_OFFSET as usize..]);
    let name_len = cursor.read_u16::<LittleEndian>()? as u64;
    let extra_len = cursor.read_u16::<LittleEndian>()? as usize;

    file.skip_bytes(name_len)?;
    let mut local_extra = vec![0u8; extra_len];
    file.read_exact(&mut local_extra)?;

    // Data starts after: LFH (30 bytes) + filename + extra field
    let data_offset = entry.header_offset + LFH_SIZE as u64 + name_len + extra_len as u64;
    if data_offset + entry.compressed_size > file_len {
        return Err(ZipError::Malformed(format!(
            "entry data [{}, +{}) runs past end of archive ({})",
            data_offset, entry.compressed_size, file_len
        )));
    }
    Ok((data_offset, local_extra))
}
