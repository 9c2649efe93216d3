//! Flat record types shared by the log file, master catalog and zapmap
//! (spec §3), plus the conversions between them (Design Note §9:
//! "Embedded-struct record assembly... Replace with flat records...
//! conversion functions").

use crate::types::LBUINT_SIZE;

/// Where a key's *current* value lives: which log file, how many bytes,
/// and at what offset the value payload begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueLocation {
    pub file_number: u32,
    pub value_size: u32,
    pub value_offset: u32,
}

/// Where a *superseded* record lives: the full log record (header, key,
/// value and CRC), not just the value payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    pub file_number: u32,
    pub record_size: u32,
    pub record_offset: u32,
}

/// An index-file record: key plus the location of its value within the
/// sibling log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub key: Vec<u8>,
    pub value_size: u32,
    pub value_offset: u32,
}

/// Derive the full stale-record location (header + key + value + CRC)
/// from a value location that is about to be superseded (spec §4.4,
/// `master.update`): `record_offset = value_offset - (2*LBUINT + key_size)`,
/// `record_size = (value_offset - record_offset) + value_size + 4`.
pub fn record_location_of(
    file_number: u32,
    key_size: u32,
    value_size: u32,
    value_offset: u32,
) -> RecordLocation {
    let header_and_key = 2 * LBUINT_SIZE as u32 + key_size;
    let record_offset = value_offset - header_and_key;
    let record_size = header_and_key + value_size + 4;
    RecordLocation {
        file_number,
        record_size,
        record_offset,
    }
}
