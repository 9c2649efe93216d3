//! C5: the in-memory zapmap and its on-disk mirror, plus the preserve-range
//! computation that drives compaction (spec §4.5).

use std::collections::HashMap;

use crate::error::{LogbaseError, Result};
use crate::file_handle::{FileHandle, RecordKind};
use crate::key::Value;
use crate::master::{decode_key, encode_key};
use crate::record::RecordLocation;
use crate::types::to_lbuint;

/// The zapmap: key to an ordered (oldest-first) list of superseded record
/// locations, pending reclamation by compaction.
#[derive(Default)]
pub struct ZapMap {
    entries: HashMap<Value, Vec<RecordLocation>>,
}

impl ZapMap {
    pub fn new() -> Self {
        ZapMap {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, key: &Value) -> Option<&Vec<RecordLocation>> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Vec<RecordLocation>)> {
        self.entries.iter()
    }

    /// Append a newly-superseded record location for `key` (append-ordered:
    /// oldest first, spec invariant Z2).
    pub fn put(&mut self, key: Value, location: RecordLocation) {
        self.entries.entry(key).or_default().push(location);
    }

    /// File numbers with at least one entry, in ascending order — the
    /// driving set for `Logbase::zap`.
    pub fn file_numbers(&self) -> Vec<u32> {
        let mut nums: Vec<u32> = self
            .entries
            .values()
            .flat_map(|locs| locs.iter().map(|l| l.file_number))
            .collect();
        nums.sort_unstable();
        nums.dedup();
        nums
    }

    /// Remove every entry referring to `file_number`; drop keys whose
    /// lists become empty as a result.
    pub fn purge(&mut self, file_number: u32) {
        self.entries.retain(|_, locs| {
            locs.retain(|l| l.file_number != file_number);
            !locs.is_empty()
        });
    }

    /// Compute the ranges of `file_number` that compaction must preserve:
    /// the complement, within `[0, file_size)`, of every stale record
    /// range the zapmap holds for that file (spec §4.5).
    ///
    /// Equivalent to the spec's boundary-sequence-with-sentinels
    /// description (verified against its literal range-inversion table in
    /// `tests/range_inversion.rs`): collect the stale ranges, sort them,
    /// reject duplicate start offsets as `KeyExists` (a hard error — two
    /// zaps cannot legitimately claim the same record), merge any that
    /// touch or overlap, then emit the gaps between them (and before the
    /// first / after the last) as the surviving ranges.
    pub fn preserve_ranges(&self, file_number: u32, file_size: u64) -> Result<Vec<(u64, u64)>> {
        let mut stale: Vec<(u64, u64)> = self
            .entries
            .values()
            .flat_map(|locs| locs.iter())
            .filter(|l| l.file_number == file_number)
            .map(|l| (l.record_offset as u64, l.record_offset as u64 + l.record_size as u64))
            .collect();
        stale.sort_unstable_by_key(|&(start, _)| start);

        for pair in stale.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(LogbaseError::KeyExists);
            }
        }

        let mut merged: Vec<(u64, u64)> = Vec::new();
        for (start, end) in stale {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }

        let mut preserve = Vec::new();
        let mut cursor = 0u64;
        for (start, end) in merged {
            if start > cursor {
                preserve.push((cursor, start - cursor));
            }
            cursor = end.max(cursor);
        }
        if file_size > cursor {
            preserve.push((cursor, file_size - cursor));
        }
        Ok(preserve)
    }

    /// Serialize to the `.zapmap` file layout: `key-size ·
    /// total-list-size · key-bytes · repeated{file-number · record-size ·
    /// record-offset}`.
    pub fn save(&self, handle: &FileHandle) -> Result<()> {
        let mut buf = Vec::new();
        for (key, locs) in &self.entries {
            let key_bytes = encode_key(key)?;
            let key_size = to_lbuint(key_bytes.len() as u64)?;
            let list_size = to_lbuint(locs.len() as u64 * 12)?;
            buf.extend_from_slice(&key_size.to_be_bytes());
            buf.extend_from_slice(&list_size.to_be_bytes());
            buf.extend_from_slice(&key_bytes);
            for loc in locs {
                buf.extend_from_slice(&loc.file_number.to_be_bytes());
                buf.extend_from_slice(&loc.record_size.to_be_bytes());
                buf.extend_from_slice(&loc.record_offset.to_be_bytes());
            }
        }
        std::fs::write(handle.path(), buf)
            .map_err(|e| LogbaseError::wrap(format!("writing {}", handle.path().display()), e))
    }

    /// Load from a `.zapmap` file. Returns an empty zapmap if the file
    /// does not exist or is empty.
    pub fn load(handle: &FileHandle) -> Result<Self> {
        let mut zapmap = ZapMap::new();
        handle.process(RecordKind::Zap, true, |rec| {
            let key = decode_key(&rec.key)?;
            let blob = rec.value.expect("requested with_value");
            if blob.len() % 12 != 0 {
                return Err(LogbaseError::UnexpectedSize {
                    offset: rec.value_offset,
                    context: format!("zap entry list length {} is not a multiple of 12", blob.len()),
                });
            }
            let mut locs = Vec::with_capacity(blob.len() / 12);
            for chunk in blob.chunks_exact(12) {
                locs.push(RecordLocation {
                    file_number: u32::from_be_bytes(chunk[0..4].try_into().unwrap()),
                    record_size: u32::from_be_bytes(chunk[4..8].try_into().unwrap()),
                    record_offset: u32::from_be_bytes(chunk[8..12].try_into().unwrap()),
                });
            }
            zapmap.entries.insert(key, locs);
            Ok(())
        })?;
        Ok(zapmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(offset: u32, size: u32) -> RecordLocation {
        RecordLocation {
            file_number: 1,
            record_size: size,
            record_offset: offset,
        }
    }

    fn put_stale(zapmap: &mut ZapMap, key: &str, offset: u32, size: u32) {
        zapmap.put(Value::String(key.into()), loc(offset, size));
    }

    #[test]
    fn preserve_ranges_row_1() {
        let mut z = ZapMap::new();
        put_stale(&mut z, "a", 0, 4);
        put_stale(&mut z, "b", 14, 8);
        assert_eq!(z.preserve_ranges(1, 40).unwrap(), vec![(4, 10), (22, 18)]);
    }

    #[test]
    fn preserve_ranges_row_2() {
        let mut z = ZapMap::new();
        put_stale(&mut z, "a", 7, 3);
        put_stale(&mut z, "b", 36, 4);
        assert_eq!(z.preserve_ranges(1, 40).unwrap(), vec![(0, 7), (10, 26)]);
    }

    #[test]
    fn preserve_ranges_row_3() {
        let mut z = ZapMap::new();
        put_stale(&mut z, "a", 10, 5);
        put_stale(&mut z, "b", 30, 5);
        assert_eq!(z.preserve_ranges(1, 40).unwrap(), vec![(0, 10), (15, 15), (35, 5)]);
    }

    #[test]
    fn preserve_ranges_row_4_merges_adjacent() {
        let mut z = ZapMap::new();
        put_stale(&mut z, "a", 0, 4);
        put_stale(&mut z, "b", 10, 6);
        put_stale(&mut z, "c", 23, 4);
        put_stale(&mut z, "d", 27, 3);
        put_stale(&mut z, "e", 35, 5);
        assert_eq!(
            z.preserve_ranges(1, 40).unwrap(),
            vec![(4, 6), (16, 7), (30, 5)]
        );
    }

    #[test]
    fn duplicate_offsets_are_a_hard_error() {
        let mut z = ZapMap::new();
        put_stale(&mut z, "a", 5, 3);
        put_stale(&mut z, "b", 5, 7);
        assert!(matches!(z.preserve_ranges(1, 40), Err(LogbaseError::KeyExists)));
    }

    #[test]
    fn purge_drops_entries_and_empty_keys() {
        let mut z = ZapMap::new();
        put_stale(&mut z, "a", 0, 4);
        z.put(Value::String("a".into()), loc_for_file(2, 10, 4));
        z.purge(1);
        assert_eq!(z.get(&Value::String("a".into())).unwrap().len(), 1);
        z.purge(2);
        assert!(z.get(&Value::String("a".into())).is_none());
    }

    fn loc_for_file(file_number: u32, offset: u32, size: u32) -> RecordLocation {
        RecordLocation {
            file_number,
            record_size: size,
            record_offset: offset,
        }
    }

    #[test]
    fn no_zaps_preserves_whole_file() {
        let z = ZapMap::new();
        assert_eq!(z.preserve_ranges(1, 40).unwrap(), vec![(0, 40)]);
    }
}
