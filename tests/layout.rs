use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::path::Path;

use apkmux::io::{BufferedFile, DataSource};
use apkmux::zip::{
    APK_SIG_BLOCK_MAGIC_HI, APK_SIG_BLOCK_MAGIC_LO, EndOfCentralDirectory, ZipArchive, ZipSections,
    ZipWriter,
};

fn write_sample(path: &Path) {
    let mut writer = ZipWriter::create(path).unwrap();
    writer.set_comment("sample").unwrap();
    writer.put_next_entry("AndroidManifest.xml").unwrap();
    writer.write_all(&[b'm'; 3000]).unwrap();
    writer.put_next_entry("classes.dex").unwrap();
    writer.write_all(b"dex\n035\0").unwrap();
    writer.finish().unwrap();
}

fn locate(path: &Path) -> ZipSections {
    let mut file = BufferedFile::open(path).unwrap();
    let sections = ZipSections::locate(&mut file).unwrap();
    file.close().unwrap();
    sections
}

/// A signing block with a single id-value pair.
fn fake_sig_block() -> Vec<u8> {
    let mut pairs = Vec::new();
    let value = [0xAB; 24];
    pairs.extend_from_slice(&(4 + value.len() as u64).to_le_bytes());
    pairs.extend_from_slice(&0x7109_871au32.to_le_bytes());
    pairs.extend_from_slice(&value);

    let size = pairs.len() as u64 + 8 + 16;
    let mut block = Vec::new();
    block.extend_from_slice(&size.to_le_bytes());
    block.extend_from_slice(&pairs);
    block.extend_from_slice(&size.to_le_bytes());
    block.extend_from_slice(&APK_SIG_BLOCK_MAGIC_LO.to_le_bytes());
    block.extend_from_slice(&APK_SIG_BLOCK_MAGIC_HI.to_le_bytes());
    block
}

/// Insert `block` in front of the central directory and move the EOCD's
/// central directory offset past it.
fn splice_sig_block(path: &Path, sections: &ZipSections, block: &[u8]) {
    let bytes = fs::read(path).unwrap();
    let cd = sections.central_directory_offset as usize;
    let mut spliced = Vec::with_capacity(bytes.len() + block.len());
    spliced.extend_from_slice(&bytes[..cd]);
    spliced.extend_from_slice(block);
    spliced.extend_from_slice(&bytes[cd..]);

    let field = sections.eocd_offset as usize + block.len() + 16;
    let moved = (cd + block.len()) as u32;
    spliced[field..field + 4].copy_from_slice(&moved.to_le_bytes());
    fs::write(path, spliced).unwrap();
}

#[test]
fn test_sections_of_plain_archive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain.apk");
    write_sample(&path);
    let file_len = fs::metadata(&path).unwrap().len();

    let sections = locate(&path);
    assert!(!sections.has_apk_sig_block);
    assert!(!sections.zip64);
    assert_eq!(sections.apk_sig_block_size(), 0);
    assert_eq!(sections.entries_size, sections.central_directory_offset);
    assert_eq!(
        sections.central_directory_offset + sections.central_directory_size,
        sections.eocd_offset
    );
    assert_eq!(sections.file_len, file_len);
    assert_eq!(
        sections.file_len - sections.eocd_offset,
        EndOfCentralDirectory::SIZE as u64 + 6
    );
}

#[test]
fn test_sections_with_signing_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("signed.apk");
    write_sample(&path);
    let plain = locate(&path);
    let block = fake_sig_block();
    splice_sig_block(&path, &plain, &block);

    let sections = locate(&path);
    assert!(sections.has_apk_sig_block);
    assert_eq!(sections.entries_size, plain.central_directory_offset);
    assert_eq!(
        sections.central_directory_offset,
        plain.central_directory_offset + block.len() as u64
    );
    assert_eq!(sections.apk_sig_block_size(), block.len() as u64);
    assert_eq!(sections.central_directory_size, plain.central_directory_size);

    // the archive itself still reads through the moved central directory
    let archive = ZipArchive::open(&path).unwrap();
    assert_eq!(archive.len(), 2);
    let manifest = archive.entry_required("AndroidManifest.xml").unwrap();
    assert_eq!(archive.read_entry(manifest).unwrap(), vec![b'm'; 3000]);
    archive.close().unwrap();
}

#[test]
fn test_digest_input_layout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("signed.apk");
    write_sample(&path);
    let plain = locate(&path);
    splice_sig_block(&path, &plain, &fake_sig_block());
    let bytes = fs::read(&path).unwrap();

    let file = RefCell::new(BufferedFile::open(&path).unwrap());
    let sections = ZipSections::locate(&mut file.borrow_mut()).unwrap();
    let aligned = sections.entries_size.div_ceil(4096) * 4096;
    let eocd_len = sections.file_len - sections.eocd_offset;

    let mut input = sections.digest_input(&file).unwrap();
    assert_eq!(
        input.size(),
        aligned + sections.central_directory_size + eocd_len
    );

    let mut out = Vec::new();
    let size = input.size();
    input.copy_to(&mut out, size).unwrap();
    assert_eq!(input.remaining(), 0);
    drop(input);

    let entries_size = sections.entries_size as usize;
    assert_eq!(&out[..entries_size], &bytes[..entries_size]);
    assert!(out[entries_size..aligned as usize].iter().all(|&b| b == 0));

    let cd_start = sections.central_directory_offset as usize;
    let cd_len = sections.central_directory_size as usize;
    let cd_out = aligned as usize;
    assert_eq!(
        &out[cd_out..cd_out + cd_len],
        &bytes[cd_start..cd_start + cd_len]
    );

    let eocd_out = cd_out + cd_len;
    assert_eq!(&out[eocd_out..eocd_out + 4], EndOfCentralDirectory::SIGNATURE);
    assert_eq!(
        &out[eocd_out + 16..eocd_out + 20],
        &(aligned as u32).to_le_bytes()
    );
    assert_eq!(&out[out.len() - 6..], b"sample");

    file.into_inner().close().unwrap();
}
