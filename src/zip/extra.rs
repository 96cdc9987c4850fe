//! Extra-field codec.
//!
//! An extra field is a run of `(header id: u16, size: u16, data)` records packed
//! back to back. None of these functions look inside record data.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, ZipError};

/// Header ids registered by PKWARE (APPNOTE 4.5.2) and the common vendor
/// extensions. [`trim`] stops at the first record whose id is not listed here.
pub const KNOWN_HEADER_IDS: &[u16] = &[
    0x0001, 0x0007, 0x0008, 0x0009, 0x000a, 0x000c, 0x000d, 0x000e, 0x000f, 0x0014, 0x0015,
    0x0016, 0x0017, 0x0018, 0x0019, 0x0020, 0x0021, 0x0022, 0x0023, 0x0065, 0x0066, 0x4690,
    0x07c8, 0x2605, 0x2705, 0x2805, 0x334d, 0x4341, 0x4453, 0x4704, 0x470f, 0x4b46, 0x4c41,
    0x4d49, 0x4f4c, 0x5356, 0x5455, 0x554e, 0x5855, 0x6375, 0x6542, 0x7075, 0x756e, 0x7855,
    0xa11e, 0xa220, 0xfd4a, 0x9901, 0x9902,
];

const RECORD_HEADER_SIZE: usize = 4;

/// Walks the records of an extra field. Yields `(id, record start, data range end)`
/// and stops silently at a record whose declared size overruns the buffer.
struct Records<'a> {
    extra: &'a [u8],
    offset: usize,
    overrun: bool,
}

impl<'a> Records<'a> {
    fn new(extra: &'a [u8]) -> Self {
        Self {
            extra,
            offset: 0,
            overrun: false,
        }
    }
}

impl Iterator for Records<'_> {
    type Item = (u16, usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.overrun || self.extra.len() - self.offset < RECORD_HEADER_SIZE {
            return None;
        }
        let start = self.offset;
        let id = LittleEndian::read_u16(&self.extra[start..]);
        let size = LittleEndian::read_u16(&self.extra[start + 2..]) as usize;
        let end = start + RECORD_HEADER_SIZE + size;
        if end > self.extra.len() {
            self.overrun = true;
            return None;
        }
        self.offset = end;
        Some((id, start, end))
    }
}

/// Data of the first record with `id`, if any.
pub fn find(extra: &[u8], id: u16) -> Option<&[u8]> {
    Records::new(extra)
        .find(|&(h, _, _)| h == id)
        .map(|(_, start, end)| &extra[start + RECORD_HEADER_SIZE..end])
}

/// Copy of `extra` without the first record with `id`.
///
/// A corrupt record (declared size past the end of the buffer) ahead of the
/// match leaves the buffer unchanged.
pub fn remove(extra: &[u8], id: u16) -> Vec<u8> {
    match Records::new(extra).find(|&(h, _, _)| h == id) {
        Some((_, start, end)) => {
            let mut out = Vec::with_capacity(extra.len() - (end - start));
            out.extend_from_slice(&extra[..start]);
            out.extend_from_slice(&extra[end..]);
            out
        }
        None => extra.to_vec(),
    }
}

/// Replace any record with `id` by a new one carrying `data`, placed first.
pub fn set(extra: &[u8], id: u16, data: &[u8]) -> Result<Vec<u8>> {
    let size = u16::try_from(data.len()).map_err(|_| ZipError::ExtraFieldTooLarge(data.len()))?;
    let rest = remove(extra, id);
    let total = RECORD_HEADER_SIZE + data.len() + rest.len();
    if total > u16::MAX as usize {
        return Err(ZipError::ExtraFieldTooLarge(total));
    }

    let mut out = vec![0u8; RECORD_HEADER_SIZE];
    LittleEndian::write_u16(&mut out[0..2], id);
    LittleEndian::write_u16(&mut out[2..4], size);
    out.reserve(data.len() + rest.len());
    out.extend_from_slice(data);
    out.extend_from_slice(&rest);
    Ok(out)
}

/// Well-formed prefix of `extra`: everything before the first record with an
/// unknown id or an overrunning size.
pub fn trim(extra: &[u8]) -> Vec<u8> {
    let mut end = 0;
    for (id, _, record_end) in Records::new(extra) {
        if !KNOWN_HEADER_IDS.contains(&id) {
            break;
        }
        end = record_end;
    }
    extra[..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIX: u16 = 0x7855;
    const TIMESTAMP: u16 = 0x5455;

    fn record(id: u16, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn test_find_returns_record_data() {
        let mut extra = record(TIMESTAMP, &[1, 2, 3, 4, 5]);
        extra.extend(record(UNIX, &[]));
        assert_eq!(find(&extra, TIMESTAMP), Some(&[1u8, 2, 3, 4, 5][..]));
        assert_eq!(find(&extra, UNIX), Some(&[][..]));
        assert_eq!(find(&extra, 0x0001), None);
    }

    #[test]
    fn test_remove_middle_record() {
        let a = record(TIMESTAMP, &[1]);
        let b = record(0x0001, &[2; 8]);
        let c = record(UNIX, &[3, 3]);
        let extra = [a.clone(), b, c.clone()].concat();
        assert_eq!(remove(&extra, 0x0001), [a, c].concat());
    }

    #[test]
    fn test_remove_stops_at_overrun() {
        let mut extra = record(TIMESTAMP, &[1]);
        // declares 200 bytes, carries 2
        extra.extend_from_slice(&[0x01, 0x00, 200, 0, 9, 9]);
        assert_eq!(remove(&extra, 0x0001), extra);
        assert_eq!(find(&extra, 0x0001), None);
    }

    #[test]
    fn test_set_replaces_and_prepends() {
        let extra = [record(TIMESTAMP, &[1]), record(0x0001, &[0; 8])].concat();
        let updated = set(&extra, 0x0001, &[7; 16]).unwrap();
        assert_eq!(updated, [record(0x0001, &[7; 16]), record(TIMESTAMP, &[1])].concat());
    }

    #[test]
    fn test_set_then_remove_and_find() {
        let extra = [record(TIMESTAMP, &[1, 2, 3]), record(UNIX, &[])].concat();
        let data = [0xAB; 16];
        let updated = set(&extra, 0x0001, &data).unwrap();
        assert_eq!(find(&updated, 0x0001), Some(&data[..]));
        assert_eq!(remove(&updated, 0x0001), trim(&extra));
    }

    #[test]
    fn test_set_rejects_oversized_field() {
        let err = set(&[], 0x0001, &vec![0; 70_000]).unwrap_err();
        assert!(matches!(err, ZipError::ExtraFieldTooLarge(70_000)));
    }

    #[test]
    fn test_trim_drops_padding_and_unknown_records() {
        let known = record(UNIX, &[5, 5]);
        let mut padded = known.clone();
        padded.extend_from_slice(&[0, 0, 0]);
        assert_eq!(trim(&padded), known);

        let mut unknown = known.clone();
        unknown.extend(record(0xCAFE, &[1]));
        unknown.extend(record(TIMESTAMP, &[1]));
        assert_eq!(trim(&unknown), known);

        let mut overrun = known.clone();
        overrun.extend_from_slice(&[0x55, 0x54, 9, 0, 1]);
        assert_eq!(trim(&overrun), known);
    }
}
