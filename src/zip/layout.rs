//! Section layout of a finished archive.
//!
//! APK signing digests an archive as three sections: the entries, the central
//! directory and the end of central directory. An existing APK Signing Block
//! between the entries and the central directory belongs to none of them.

use byteorder::{LittleEndian, ReadBytesExt};
use std::cell::RefCell;
use std::io;

use super::parser::find_end_record;
use super::structures::ZIP64_SENTINEL;
use crate::error::Result;
use crate::io::{BufferedFile, BytesDataSource, DataSource, FileDataSource, align, from_file, link};

/// "APK Sig Block 42", as two little-endian words.
pub const APK_SIG_BLOCK_MAGIC_LO: u64 = 0x2067_6953_204b_5041;
pub const APK_SIG_BLOCK_MAGIC_HI: u64 = 0x3234_206b_636f_6c42;

/// Size field + magic + size field.
const APK_SIG_BLOCK_MIN_SIZE: u64 = 32;

/// Digested entries are padded to a whole page.
pub const DIGEST_PAGE_ALIGNMENT: u64 = 4096;

/// Offset of the central directory offset field inside the EOCD.
const EOCD_CD_OFFSET_FIELD: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZipSections {
    /// Bytes before the signing block, or before the central directory if there is none.
    pub entries_size: u64,
    pub central_directory_offset: u64,
    pub central_directory_size: u64,
    pub eocd_offset: u64,
    pub file_len: u64,
    pub has_apk_sig_block: bool,
    pub zip64: bool,
}

impl ZipSections {
    pub fn locate(file: &mut BufferedFile) -> Result<Self> {
        let file_len = file.len()?;
        let end = find_end_record(file)?;

        let sig_block_start = match find_apk_sig_block(file, end.cd_offset) {
            Ok(start) => start,
            Err(e) => {
                log::debug!("{}: no signing block: {}", file.name(), e);
                None
            }
        };

        Ok(Self {
            entries_size: sig_block_start.unwrap_or(end.cd_offset),
            central_directory_offset: end.cd_offset,
            central_directory_size: end.cd_size,
            eocd_offset: end.eocd_offset,
            file_len,
            has_apk_sig_block: sig_block_start.is_some(),
            zip64: end.zip64,
        })
    }

    /// Size of the APK Signing Block, 0 if there is none.
    pub fn apk_sig_block_size(&self) -> u64 {
        self.central_directory_offset - self.entries_size
    }

    pub fn entries<'a>(&self, file: &'a RefCell<BufferedFile>) -> FileDataSource<'a> {
        from_file(file, 0, self.entries_size)
    }

    pub fn central_directory<'a>(&self, file: &'a RefCell<BufferedFile>) -> FileDataSource<'a> {
        from_file(file, self.central_directory_offset, self.central_directory_size)
    }

    /// The EOCD record and the archive comment.
    pub fn eocd<'a>(&self, file: &'a RefCell<BufferedFile>) -> FileDataSource<'a> {
        from_file(file, self.eocd_offset, self.file_len - self.eocd_offset)
    }

    /// The three sections as an APK signer digests them: entries padded to a
    /// page, the central directory, and the EOCD with its central directory
    /// offset moved to the end of the padded entries.
    pub fn digest_input<'a>(&self, file: &'a RefCell<BufferedFile>) -> Result<Box<dyn DataSource + 'a>> {
        let entries = align(Box::new(self.entries(file)), DIGEST_PAGE_ALIGNMENT);
        let central_directory = self.central_directory(file).to_memory()?;

        let mut eocd = self.eocd(file).to_memory()?.into_bytes();
        let field = &mut eocd[EOCD_CD_OFFSET_FIELD..EOCD_CD_OFFSET_FIELD + 4];
        if u32::from_le_bytes([field[0], field[1], field[2], field[3]]) != ZIP64_SENTINEL as u32 {
            field.copy_from_slice(&(entries.size() as u32).to_le_bytes());
        }

        Ok(link(vec![
            entries,
            Box::new(central_directory),
            Box::new(BytesDataSource::new(eocd)),
        ]))
    }
}

/// Start of the APK Signing Block ending at `cd_offset`, if there is one.
///
/// Layout: `size: u64, pairs.., size: u64, magic: [u8; 16]`, where `size`
/// counts everything after the leading size field.
fn find_apk_sig_block(file: &mut BufferedFile, cd_offset: u64) -> io::Result<Option<u64>> {
    if cd_offset < APK_SIG_BLOCK_MIN_SIZE {
        return Ok(None);
    }
    file.seek_to(cd_offset - 16)?;
    let lo = file.read_u64::<LittleEndian>()?;
    let hi = file.read_u64::<LittleEndian>()?;
    if lo != APK_SIG_BLOCK_MAGIC_LO || hi != APK_SIG_BLOCK_MAGIC_HI {
        return Ok(None);
    }

    file.seek_to(cd_offset - 24)?;
    let size = file.read_u64::<LittleEndian>()?;
    let Some(start) = cd_offset.checked_sub(size).and_then(|s| s.checked_sub(8)) else {
        return Ok(None);
    };
    file.seek_to(start)?;
    if file.read_u64::<LittleEndian>()? == size {
        Ok(Some(start))
    } else {
        Ok(None)
    }
}
