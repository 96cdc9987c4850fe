//! Data multiplexing.
//!
//! An APK that carries a copy of another APK (say `assets/base.apk`, stored)
//! often also carries many of that inner APK's files at the top level. This
//! module rewrites such an archive so the duplicated top-level entries point
//! into the host entry's payload instead of storing their bytes twice.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::parser::ZipArchive;
use super::stream::streams_equal;
use super::structures::{CompressionMethod, ZipEntry};
use super::writer::ZipWriter;
use crate::error::{Result, ZipError};

/// How two entries were found to hold the same content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentMatch {
    /// Compressed sizes match and the stored bytes are identical.
    RawBytes,
    /// The stored bytes differ (or differ in length) but decompress to the same data.
    Decompressed,
    Different,
}

impl ContentMatch {
    pub fn is_match(&self) -> bool {
        !matches!(self, ContentMatch::Different)
    }
}

/// An outer entry replaced by a reference into the host payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualEntry {
    pub name: String,
    /// Header offset relative to the host entry's local header.
    pub relative_offset: u64,
    pub matched: ContentMatch,
}

/// Outcome of [`multiplex`].
#[derive(Debug, Clone)]
pub struct MultiplexReport {
    pub host_name: String,
    pub host_header_offset: u64,
    pub host_size: u64,
    pub virtual_entries: Vec<VirtualEntry>,
    /// Entries copied verbatim from the input.
    pub copied_entries: usize,
    pub input_len: u64,
    pub output_len: u64,
}

impl MultiplexReport {
    /// Size change from input to output, in percent of the input.
    pub fn change_percent(&self) -> f64 {
        if self.input_len == 0 {
            return 0.0;
        }
        (self.output_len as f64 - self.input_len as f64) * 100.0 / self.input_len as f64
    }
}

/// Fast path: compare the stored bytes. Only meaningful when the compressed
/// sizes are equal; returns `false` otherwise.
pub fn raw_bytes_equal(
    a_archive: &ZipArchive,
    a: &ZipEntry,
    b_archive: &ZipArchive,
    b: &ZipEntry,
) -> Result<bool> {
    if a.compressed_size != b.compressed_size {
        return Ok(false);
    }
    Ok(streams_equal(
        a_archive.raw_reader(a),
        b_archive.raw_reader(b),
    )?)
}

/// Fallback: compare the decompressed bytes.
pub fn decompressed_bytes_equal(
    a_archive: &ZipArchive,
    a: &ZipEntry,
    b_archive: &ZipArchive,
    b: &ZipEntry,
) -> Result<bool> {
    Ok(streams_equal(
        a_archive.entry_reader(a)?,
        b_archive.entry_reader(b)?,
    )?)
}

/// Compare entry content, trying the raw bytes before decompressing.
pub fn compare_content(
    a_archive: &ZipArchive,
    a: &ZipEntry,
    b_archive: &ZipArchive,
    b: &ZipEntry,
) -> Result<ContentMatch> {
    if raw_bytes_equal(a_archive, a, b_archive, b)? {
        Ok(ContentMatch::RawBytes)
    } else if decompressed_bytes_equal(a_archive, a, b_archive, b)? {
        Ok(ContentMatch::Decompressed)
    } else {
        Ok(ContentMatch::Different)
    }
}

fn same_metadata(a: &ZipEntry, b: &ZipEntry) -> bool {
    a.method == b.method && a.crc32 == b.crc32 && a.size == b.size && a.comment == b.comment
}

/// Entries that must keep 4-byte aligned data to stay usable.
fn needs_word_alignment(name: &str) -> bool {
    name == "resources.arsc" || name.ends_with(".so")
}

/// Names of the outer entries whose content is also present in `inner`,
/// sorted, with how each one matched.
pub fn collect_duplicates(
    outer: &ZipArchive,
    host: &ZipEntry,
    inner: &ZipArchive,
) -> Result<BTreeMap<String, ContentMatch>> {
    let mut duplicates = BTreeMap::new();
    for outer_entry in outer.entries() {
        if outer_entry.name == host.name || outer_entry.is_directory() {
            continue;
        }
        let Some(inner_entry) = inner.entry(&outer_entry.name) else {
            continue;
        };
        if !same_metadata(outer_entry, inner_entry) {
            continue;
        }
        if inner_entry.method == CompressionMethod::Stored
            && inner_entry.data_offset % 4 != 0
            && needs_word_alignment(&inner_entry.name)
        {
            log::info!("{}: misaligned in host, kept as a copy", inner_entry.name);
            continue;
        }

        let matched = compare_content(inner, inner_entry, outer, outer_entry)?;
        if matched.is_match() {
            duplicates.insert(inner_entry.name.clone(), matched);
        }
    }
    Ok(duplicates)
}

/// Rewrite `input` into `output` so entries duplicated inside the stored
/// host entry `host_name` become references into it.
///
/// The output lists the host entry first, then the virtual entries, then a
/// raw copy of every other input entry. Its entries have the same names,
/// methods, CRCs, sizes, comments and content as the input's.
///
/// # Errors
///
/// [`ZipError::EntryNotFound`] if there is no `host_name`,
/// [`ZipError::EntryNotStored`] if it is compressed and
/// [`ZipError::NoMultiplexableData`] if nothing is duplicated. In the last
/// case `output` is not created.
pub fn multiplex(input: &Path, output: &Path, host_name: &str) -> Result<MultiplexReport> {
    let outer = ZipArchive::open(input)?;
    let host = outer.entry_required(host_name)?.clone();
    let inner = outer.open_entry_as_archive(&host)?;

    let duplicates = collect_duplicates(&outer, &host, &inner)?;
    if duplicates.is_empty() {
        return Err(ZipError::NoMultiplexableData);
    }
    log::info!(
        "{}: {} of {} inner entries duplicated outside the host",
        host.name,
        duplicates.len(),
        inner.len()
    );

    let mut writer = ZipWriter::create(output)?;
    let mut virtual_entries = Vec::with_capacity(duplicates.len());
    let host_header_offset = {
        let mut holder = writer.put_next_host_entry(&host, &inner)?;
        for (name, &matched) in &duplicates {
            let relative_offset = holder.put_next_virtual_entry(name)?;
            virtual_entries.push(VirtualEntry {
                name: name.clone(),
                relative_offset,
                matched,
            });
        }
        holder.header_offset()
    };

    let mut copied_entries = 0;
    for entry in outer.entries() {
        if entry.name == host.name || duplicates.contains_key(&entry.name) {
            continue;
        }
        writer.copy_entry(entry, &outer)?;
        copied_entries += 1;
    }
    writer.finish()?;
    inner.close()?;
    outer.close()?;

    Ok(MultiplexReport {
        host_name: host.name,
        host_header_offset,
        host_size: host.size,
        virtual_entries,
        copied_entries,
        input_len: fs::metadata(input)?.len(),
        output_len: fs::metadata(output)?.len(),
    })
}

/// Whether `a` and `b` hold the same entries with the same content.
///
/// Directories only need to exist on both sides. Every other entry must agree
/// on method, CRC, size, comment and decompressed bytes.
pub fn archives_equivalent(a: &ZipArchive, b: &ZipArchive) -> Result<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for entry_a in a.entries() {
        let Some(entry_b) = b.entry(&entry_a.name) else {
            log::debug!("{}: missing", entry_a.name);
            return Ok(false);
        };
        if entry_a.is_directory() && entry_b.is_directory() {
            continue;
        }
        if !same_metadata(entry_a, entry_b) || !decompressed_bytes_equal(a, entry_a, b, entry_b)? {
            log::debug!("{}: content differs", entry_a.name);
            return Ok(false);
        }
    }
    Ok(true)
}
