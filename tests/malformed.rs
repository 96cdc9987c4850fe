mod common;

use std::fs;
use std::io::Write;
use std::path::Path;

use apkmux::ZipError;
use apkmux::io::BufferedFile;
use apkmux::zip::{ZipArchive, ZipSections, ZipWriter};
use common::{RawEntry, SENTINEL, raw_archive, zip64_record};

fn write_sample(path: &Path, force_zip64: bool) -> ZipSections {
    let mut writer = ZipWriter::create(path).unwrap();
    writer.set_force_zip64(force_zip64);
    writer.put_next_entry("a.txt").unwrap();
    writer.write_all(b"alpha").unwrap();
    writer.finish().unwrap();

    let mut file = BufferedFile::open(path).unwrap();
    let sections = ZipSections::locate(&mut file).unwrap();
    file.close().unwrap();
    sections
}

fn patch(path: &Path, at: u64, bytes: &[u8]) {
    let mut data = fs::read(path).unwrap();
    let at = at as usize;
    data[at..at + bytes.len()].copy_from_slice(bytes);
    fs::write(path, data).unwrap();
}

#[test]
fn test_sentinel_without_zip64_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.zip");
    let mut entry = RawEntry::new("big.bin", b"payload");
    entry.sentinel_compressed_size = true;
    fs::write(&path, raw_archive(&[entry])).unwrap();

    match ZipArchive::open(&path) {
        Err(ZipError::MissingZip64Extra {
            name,
            compressed_size,
            size,
            header_offset,
        }) => {
            assert_eq!(name, "big.bin");
            assert_eq!(compressed_size, SENTINEL as u64);
            assert_eq!(size, 7);
            assert_eq!(header_offset, 0);
        }
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("archive opened"),
    }
}

#[test]
fn test_partial_sentinels_resolve_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.zip");
    let first_data = b"first entry";
    let second_data = b"second";

    // only the compressed size is a sentinel: the record's first value fills
    // it and the trailing value is ignored
    let mut first = RawEntry::new("first.bin", first_data);
    first.sentinel_compressed_size = true;
    first.central_extra = zip64_record(&[first_data.len() as u64, 0xDEAD]);

    // size and header offset: consumed in that order
    let second_offset = (30 + "first.bin".len() + first_data.len()) as u64;
    let mut second = RawEntry::new("second.bin", second_data);
    second.sentinel_size = true;
    second.sentinel_offset = true;
    second.central_extra = zip64_record(&[second_data.len() as u64, second_offset]);

    fs::write(&path, raw_archive(&[first, second])).unwrap();

    let archive = ZipArchive::open(&path).unwrap();
    assert!(archive.skipped_entries().is_empty());

    let first = archive.entry_required("first.bin").unwrap();
    assert_eq!(first.compressed_size, first_data.len() as u64);
    assert_eq!(first.size, first_data.len() as u64);
    assert_eq!(first.header_offset, 0);
    assert_eq!(archive.read_entry(first).unwrap(), first_data);

    let second = archive.entry_required("second.bin").unwrap();
    assert_eq!(second.size, second_data.len() as u64);
    assert_eq!(second.compressed_size, second_data.len() as u64);
    assert_eq!(second.header_offset, second_offset);
    assert_eq!(archive.read_entry(second).unwrap(), second_data);
    archive.close().unwrap();
}

#[test]
fn test_spanned_eocd() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spanned.zip");
    let sections = write_sample(&path, false);
    // disk number
    patch(&path, sections.eocd_offset + 4, &1u16.to_le_bytes());

    assert!(matches!(
        ZipArchive::open(&path),
        Err(ZipError::SpannedArchive(_))
    ));
}

#[test]
fn test_spanned_zip64_locator() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locator.zip");
    let sections = write_sample(&path, true);
    assert!(sections.zip64);
    // total disks
    patch(&path, sections.eocd_offset - 20 + 16, &2u32.to_le_bytes());

    assert!(matches!(
        ZipArchive::open(&path),
        Err(ZipError::SpannedArchive(_))
    ));
}

#[test]
fn test_spanned_zip64_eocd() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eocd64.zip");
    let sections = write_sample(&path, true);
    let eocd64 = sections.eocd_offset - 20 - 56;
    // disk number
    patch(&path, eocd64 + 16, &1u32.to_le_bytes());

    assert!(matches!(
        ZipArchive::open(&path),
        Err(ZipError::SpannedArchive(_))
    ));
}

#[test]
fn test_bad_zip64_eocd_signature() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("badsig.zip");
    let sections = write_sample(&path, true);
    patch(&path, sections.eocd_offset - 20 - 56, b"XXXX");

    assert!(matches!(
        ZipArchive::open(&path),
        Err(ZipError::Malformed(_))
    ));
}
