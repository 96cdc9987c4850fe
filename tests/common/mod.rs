//! Hand-assembled archives with layouts `ZipWriter` never produces.

#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};

pub const SENTINEL: u32 = 0xFFFF_FFFF;

/// A stored entry for [`raw_archive`].
pub struct RawEntry<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
    pub local_extra: Vec<u8>,
    pub central_extra: Vec<u8>,
    pub sentinel_size: bool,
    pub sentinel_compressed_size: bool,
    pub sentinel_offset: bool,
}

impl<'a> RawEntry<'a> {
    pub fn new(name: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            data,
            local_extra: Vec::new(),
            central_extra: Vec::new(),
            sentinel_size: false,
            sentinel_compressed_size: false,
            sentinel_offset: false,
        }
    }
}

/// A zip64 extended information record holding `values` in order.
pub fn zip64_record(values: &[u64]) -> Vec<u8> {
    let mut record = Vec::new();
    record.write_u16::<LittleEndian>(1).unwrap();
    record.write_u16::<LittleEndian>(values.len() as u16 * 8).unwrap();
    for &value in values {
        record.write_u64::<LittleEndian>(value).unwrap();
    }
    record
}

/// Lay out stored entries back to back, then their central records and a
/// classic EOCD. Fields flagged as sentinels get `0xFFFFFFFF` in the central
/// record only.
pub fn raw_archive(entries: &[RawEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut offsets = Vec::with_capacity(entries.len());
    for entry in entries {
        offsets.push(out.len() as u32);
        let crc = crc32fast::hash(entry.data);
        out.extend_from_slice(b"PK\x03\x04");
        out.write_u16::<LittleEndian>(10).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0x5021_0000).unwrap();
        out.write_u32::<LittleEndian>(crc).unwrap();
        out.write_u32::<LittleEndian>(entry.data.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(entry.data.len() as u32).unwrap();
        out.write_u16::<LittleEndian>(entry.name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(entry.local_extra.len() as u16).unwrap();
        out.extend_from_slice(entry.name.as_bytes());
        out.extend_from_slice(&entry.local_extra);
        out.extend_from_slice(entry.data);
    }

    let cd_offset = out.len() as u32;
    for (entry, &offset) in entries.iter().zip(&offsets) {
        let len = entry.data.len() as u32;
        let pick = |sentinel: bool, value: u32| if sentinel { SENTINEL } else { value };
        out.extend_from_slice(b"PK\x01\x02");
        out.write_u16::<LittleEndian>(20).unwrap();
        out.write_u16::<LittleEndian>(10).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0x5021_0000).unwrap();
        out.write_u32::<LittleEndian>(crc32fast::hash(entry.data)).unwrap();
        out.write_u32::<LittleEndian>(pick(entry.sentinel_compressed_size, len))
            .unwrap();
        out.write_u32::<LittleEndian>(pick(entry.sentinel_size, len)).unwrap();
        out.write_u16::<LittleEndian>(entry.name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(entry.central_extra.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(pick(entry.sentinel_offset, offset))
            .unwrap();
        out.extend_from_slice(entry.name.as_bytes());
        out.extend_from_slice(&entry.central_extra);
    }
    let cd_size = out.len() as u32 - cd_offset;

    out.extend_from_slice(b"PK\x05\x06");
    out.write_u16::<LittleEndian>(0).unwrap();
    out.write_u16::<LittleEndian>(0).unwrap();
    out.write_u16::<LittleEndian>(entries.len() as u16).unwrap();
    out.write_u16::<LittleEndian>(entries.len() as u16).unwrap();
    out.write_u32::<LittleEndian>(cd_size).unwrap();
    out.write_u32::<LittleEndian>(cd_offset).unwrap();
    out.write_u16::<LittleEndian>(0).unwrap();
    out
}
