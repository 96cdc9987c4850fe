//! Write-side header records.
//!
//! A [`CentralHeader`] is staged when an entry is started. Its [`Declared`]
//! sizes are what the caller knew up front; its [`EntrySizes`] are the values
//! that end up in the central directory once the entry is closed.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};

use super::extra;
use super::structures::*;
use crate::error::{Result, ZipError};
use crate::io::BufferedFile;

/// Size estimate at or above which an entry whose compressed size is not yet
/// known reserves zip64 room.
pub const ZIP64_RESERVE_THRESHOLD: u64 = 0xF000_0000;

/// Sizes the caller knew before the entry was written. `None` means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Declared {
    pub crc32: u32,
    pub size: Option<u64>,
    pub compressed_size: Option<u64>,
}

/// CRC and sizes as written to the headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntrySizes {
    pub crc32: u32,
    pub size: u64,
    pub compressed_size: u64,
}

/// Which fields of an entry need the zip64 record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64Need {
    pub sizes: bool,
    pub offset: bool,
}

impl Zip64Need {
    /// Decide, before the local header is written, which fields need zip64.
    pub fn decide(force: bool, declared: &Declared, header_offset: u64) -> Self {
        if force {
            return Self {
                sizes: true,
                offset: true,
            };
        }
        let sizes = match (declared.size, declared.compressed_size) {
            (Some(size), None) if size >= ZIP64_RESERVE_THRESHOLD => true,
            (size, compressed) => {
                size.is_some_and(|s| s >= ZIP64_SENTINEL)
                    || compressed.is_some_and(|c| c >= ZIP64_SENTINEL)
            }
        };
        Self {
            sizes,
            offset: header_offset >= ZIP64_SENTINEL,
        }
    }

    pub fn any(&self) -> bool {
        self.sizes || self.offset
    }
}

/// A staged central directory record.
#[derive(Debug, Clone)]
pub struct CentralHeader {
    pub name: String,
    pub flags: u16,
    pub method: CompressionMethod,
    pub dos_time: u32,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
    pub declared: Declared,
    pub sizes: EntrySizes,
    pub zip64: Zip64Need,
    pub header_offset: u64,
    pub data_offset: u64,
    /// Payload is a whole nested archive; aligned to a page.
    pub is_host: bool,
}

impl CentralHeader {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            flags: UTF8_NAMES_FLAG,
            method: CompressionMethod::Deflate,
            dos_time: DosDateTime::now().to_dos(),
            internal_attributes: 0,
            external_attributes: 0,
            extra: Vec::new(),
            comment: Vec::new(),
            declared: Declared::default(),
            sizes: EntrySizes::default(),
            zip64: Zip64Need::default(),
            header_offset: 0,
            data_offset: 0,
            is_host: false,
        }
    }

    /// Header that reuses `entry`'s metadata. Sizes are taken as declared.
    pub fn from_entry(entry: &ZipEntry) -> Self {
        Self {
            name: entry.name.clone(),
            flags: UTF8_NAMES_FLAG,
            method: entry.method,
            dos_time: entry.dos_time,
            internal_attributes: entry.internal_attributes,
            external_attributes: entry.external_attributes,
            extra: entry.extra.clone(),
            comment: entry.comment.clone(),
            declared: Declared {
                crc32: entry.crc32,
                size: Some(entry.size),
                compressed_size: Some(entry.compressed_size),
            },
            sizes: EntrySizes::default(),
            zip64: Zip64Need::default(),
            header_offset: 0,
            data_offset: 0,
            is_host: false,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/') || self.name.ends_with('\\')
    }

    fn is_encrypted(&self) -> bool {
        self.flags & 1 != 0
    }

    /// Settle zip64 needs and the initial sizes from the declared values.
    pub fn prepare(&mut self, force_zip64: bool) {
        self.zip64 = Zip64Need::decide(force_zip64, &self.declared, self.header_offset);
        self.sizes = EntrySizes {
            crc32: self.declared.crc32,
            size: self.declared.size.unwrap_or(0),
            compressed_size: self.declared.compressed_size.unwrap_or(0),
        };
    }

    pub fn version_needed(&self) -> u16 {
        if self.zip64.any() {
            45
        } else if self.method == CompressionMethod::Stored && !self.is_encrypted() {
            10
        } else {
            20
        }
    }

    /// Page alignment for host payloads and shared objects, else 4.
    pub fn alignment(&self) -> u64 {
        if self.is_host || self.name.ends_with(".so") {
            4096
        } else {
            4
        }
    }

    /// Extra field for the local header at `header_offset`: the zip64 size
    /// pair when reserved, padded so stored data starts aligned.
    pub fn local_extra(&self) -> Result<Vec<u8>> {
        let extra = if self.zip64.sizes {
            let mut data = Vec::with_capacity(16);
            data.write_u64::<LittleEndian>(self.sizes.size)?;
            data.write_u64::<LittleEndian>(self.sizes.compressed_size)?;
            extra::set(&self.extra, ZIP64_EXTRA_ID, &data)?
        } else {
            extra::remove(&self.extra, ZIP64_EXTRA_ID)
        };

        if self.method != CompressionMethod::Stored {
            return Ok(extra);
        }
        let extra_start = self.header_offset + LFH_SIZE as u64 + self.name.len() as u64;
        align_extra(extra, extra_start, self.alignment())
    }

    /// Compressed and uncompressed size as 32-bit fields. Either one at or
    /// above the zip64 sentinel needs the zip64 record instead.
    fn size_fields(&self) -> Result<(u32, u32)> {
        let EntrySizes {
            size,
            compressed_size,
            ..
        } = self.sizes;
        if size >= ZIP64_SENTINEL || compressed_size >= ZIP64_SENTINEL {
            return Err(ZipError::SizeRequiresZip64 {
                name: self.name.clone(),
                compressed_size,
                size,
            });
        }
        Ok((compressed_size as u32, size as u32))
    }

    pub fn write_local<W: Write>(&self, w: &mut W, extra: &[u8]) -> Result<()> {
        let name = self.name.as_bytes();
        w.write_all(LFH_SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.version_needed())?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.method.as_u16())?;
        w.write_u32::<LittleEndian>(self.dos_time)?;
        w.write_u32::<LittleEndian>(self.sizes.crc32)?;
        if self.zip64.sizes {
            w.write_u32::<LittleEndian>(ZIP64_SENTINEL as u32)?;
            w.write_u32::<LittleEndian>(ZIP64_SENTINEL as u32)?;
        } else {
            let (compressed_size, size) = self.size_fields()?;
            w.write_u32::<LittleEndian>(compressed_size)?;
            w.write_u32::<LittleEndian>(size)?;
        }
        w.write_u16::<LittleEndian>(u16_len(name.len())?)?;
        w.write_u16::<LittleEndian>(u16_len(extra.len())?)?;
        w.write_all(name)?;
        w.write_all(extra)?;
        Ok(())
    }

    pub fn write_central<W: Write>(&self, w: &mut W) -> Result<()> {
        let zip64 = self.zip64.any();
        let extra = if zip64 {
            let mut data = Vec::with_capacity(24);
            data.write_u64::<LittleEndian>(self.sizes.size)?;
            data.write_u64::<LittleEndian>(self.sizes.compressed_size)?;
            data.write_u64::<LittleEndian>(self.header_offset)?;
            extra::set(&self.extra, ZIP64_EXTRA_ID, &data)?
        } else {
            extra::remove(&self.extra, ZIP64_EXTRA_ID)
        };

        let name = self.name.as_bytes();
        let version = self.version_needed();
        w.write_all(CDFH_SIGNATURE)?;
        w.write_u16::<LittleEndian>(version.max(20))?;
        w.write_u16::<LittleEndian>(version)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.method.as_u16())?;
        w.write_u32::<LittleEndian>(self.dos_time)?;
        w.write_u32::<LittleEndian>(self.sizes.crc32)?;
        if zip64 {
            w.write_u32::<LittleEndian>(ZIP64_SENTINEL as u32)?;
            w.write_u32::<LittleEndian>(ZIP64_SENTINEL as u32)?;
        } else {
            let (compressed_size, size) = self.size_fields()?;
            w.write_u32::<LittleEndian>(compressed_size)?;
            w.write_u32::<LittleEndian>(size)?;
        }
        w.write_u16::<LittleEndian>(u16_len(name.len())?)?;
        w.write_u16::<LittleEndian>(u16_len(extra.len())?)?;
        w.write_u16::<LittleEndian>(u16_len(self.comment.len())?)?;
        w.write_u16::<LittleEndian>(0)?; // disk number start
        w.write_u16::<LittleEndian>(self.internal_attributes)?;
        w.write_u32::<LittleEndian>(self.external_attributes)?;
        if zip64 {
            w.write_u32::<LittleEndian>(ZIP64_SENTINEL as u32)?;
        } else {
            w.write_u32::<LittleEndian>(self.header_offset as u32)?;
        }
        w.write_all(name)?;
        w.write_all(&extra)?;
        w.write_all(&self.comment)?;
        Ok(())
    }
}

/// Rewrite the CRC and size fields of the local header at `header_offset`.
///
/// With `zip64_sizes` the 32-bit fields keep their sentinels and the sizes go
/// into the zip64 record, which is always the first extra record. Leaves the
/// handle positioned after the last patched byte.
pub fn patch_local_header(
    file: &mut BufferedFile,
    header_offset: u64,
    name_len: u64,
    sizes: &EntrySizes,
    zip64_sizes: bool,
) -> io::Result<()> {
    file.seek_to(header_offset + LFH_CRC_OFFSET)?;
    file.write_u32::<LittleEndian>(sizes.crc32)?;
    if zip64_sizes {
        file.write_u32::<LittleEndian>(ZIP64_SENTINEL as u32)?;
        file.write_u32::<LittleEndian>(ZIP64_SENTINEL as u32)?;
        // past name_len, extra_len, name and the zip64 record's id and size
        file.seek_to(header_offset + LFH_SIZE as u64 + name_len + 4)?;
        file.write_u64::<LittleEndian>(sizes.size)?;
        file.write_u64::<LittleEndian>(sizes.compressed_size)?;
    } else {
        file.write_u32::<LittleEndian>(sizes.compressed_size as u32)?;
        file.write_u32::<LittleEndian>(sizes.size as u32)?;
    }
    Ok(())
}

/// Trim and zero-pad `extra` so that `extra_start + extra.len()` is a multiple
/// of `alignment`.
pub fn align_extra(extra: Vec<u8>, extra_start: u64, alignment: u64) -> Result<Vec<u8>> {
    if (extra_start + extra.len() as u64) % alignment == 0 {
        return Ok(extra);
    }
    let mut extra = extra::trim(&extra);
    let end = extra_start + extra.len() as u64;
    let padding = (alignment - end % alignment) % alignment;
    let len = extra.len() + padding as usize;
    if len > u16::MAX as usize {
        return Err(ZipError::ExtraFieldTooLarge(len));
    }
    extra.resize(len, 0);
    Ok(extra)
}


fn u16_len(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| ZipError::ExtraFieldTooLarge(len))
}
