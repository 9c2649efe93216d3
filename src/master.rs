//! C4: the in-memory master catalog and its on-disk mirror (spec §4.4).

use std::collections::HashMap;

use crate::codec::{decode_scalar, encode_scalar};
use crate::error::{LogbaseError, Result};
use crate::file_handle::{FileHandle, RecordKind};
use crate::key::Value;
use crate::record::{record_location_of, ValueLocation};
use crate::types::{to_lbuint, LbType, CATID_MIN};
use crate::zapmap::ZapMap;

/// Encode a catalog key to its on-disk bytes. The spec's record layouts
/// (§3) give no separate tag field for keys, so — to let a single
/// logbase mix numeric and string keys and still reconstruct them after a
/// restart — the first byte of the encoded key is the key's own `LBTYPE`
/// tag, with the scalar encoding following it (see DESIGN.md).
pub fn encode_key(key: &Value) -> Result<Vec<u8>> {
    if !key.is_valid_key() {
        return Err(LogbaseError::BadType(format!(
            "{:?} is not a valid key type",
            key.lbtype()
        )));
    }
    let t = key.lbtype();
    let mut out = vec![t.as_u8()];
    out.extend(encode_scalar(key, t)?);
    Ok(out)
}

/// Inverse of `encode_key`.
pub fn decode_key(bytes: &[u8]) -> Result<Value> {
    if bytes.is_empty() {
        return Err(LogbaseError::UnexpectedSize {
            offset: 0,
            context: "empty key bytes".into(),
        });
    }
    let t = LbType::from_u8(bytes[0])?;
    decode_scalar(&bytes[1..], t)
}

/// The master catalog: a mapping from key to the location of its current
/// value, plus the node overlay's monotonic ID counter (Design Note §9:
/// "move it inside the master-catalog structure as a field").
#[derive(Default)]
pub struct MasterCatalog {
    entries: HashMap<Value, ValueLocation>,
    next_catid: u64,
}

impl MasterCatalog {
    pub fn new() -> Self {
        MasterCatalog {
            entries: HashMap::new(),
            next_catid: CATID_MIN,
        }
    }

    pub fn get(&self, key: &Value) -> Option<ValueLocation> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &ValueLocation)> {
        self.entries.iter()
    }

    /// Allocate the next catalog ID for a fresh node (spec §4.8,
    /// `PopNextId`).
    pub fn pop_next_id(&mut self) -> u64 {
        let id = self.next_catid;
        self.next_catid += 1;
        id
    }

    /// Recompute the ID counter from the keys currently in the catalog —
    /// called after `load`/`rebuild_from` so a restart never reissues an
    /// ID already in use.
    fn recompute_next_catid(&mut self) {
        let max = self
            .entries
            .keys()
            .filter_map(|k| match k {
                Value::CatId(id) => Some(*id),
                _ => None,
            })
            .max();
        self.next_catid = match max {
            Some(m) => (m + 1).max(CATID_MIN),
            None => CATID_MIN,
        };
    }

    /// Insert `key -> (file_number, value_size, value_offset)`; if a prior
    /// location existed, push it onto the zapmap as a now-stale record
    /// (spec §4.4 `update`).
    pub fn update(
        &mut self,
        key: Value,
        file_number: u32,
        value_size: u32,
        value_offset: u32,
        zapmap: &mut ZapMap,
    ) -> Result<()> {
        let encoded_key_size = to_lbuint(encode_key(&key)?.len() as u64)?;
        let new_location = ValueLocation {
            file_number,
            value_size,
            value_offset,
        };
        if let Value::CatId(id) = &key {
            if id + 1 > self.next_catid {
                self.next_catid = id + 1;
            }
        }
        if let Some(prior) = self.entries.insert(key.clone(), new_location) {
            let stale = record_location_of(
                prior.file_number,
                encoded_key_size,
                prior.value_size,
                prior.value_offset,
            );
            zapmap.put(key, stale);
        }
        Ok(())
    }

    /// After compacting `file_number`, fix up every surviving entry's
    /// `value_offset` to match where its record was copied to. `ranges` is
    /// the `(src_offset, dest_offset, size)` list `log_file::zap` returns:
    /// compaction shifts every preserved record to a lower offset, and
    /// without this the catalog keeps pointing at pre-compaction offsets
    /// (the teacher does the equivalent `CmdPos` rewrite in
    /// `Bitcask::compact`, spec §4.6).
    pub fn remap_after_compaction(&mut self, file_number: u32, ranges: &[(u64, u64, u64)]) -> Result<()> {
        for loc in self.entries.values_mut() {
            if loc.file_number != file_number {
                continue;
            }
            let offset = loc.value_offset as u64;
            let new_offset = ranges
                .iter()
                .find(|&&(src_offset, _, size)| offset >= src_offset && offset < src_offset + size)
                .map(|&(src_offset, dest_offset, _)| dest_offset + (offset - src_offset));
            match new_offset {
                Some(new_offset) => loc.value_offset = to_lbuint(new_offset)?,
                None => {
                    return Err(LogbaseError::BadArgument(format!(
                        "value offset {offset} in file {file_number} is not within any range preserved by compaction"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Insert without consulting the zapmap — used only by tests and by
    /// `load`, where every key is known fresh.
    fn insert_raw(&mut self, key: Value, location: ValueLocation) {
        self.entries.insert(key, location);
    }

    /// Serialize to the `.master` file layout: `key-size · key-bytes ·
    /// file-number · value-size · value-offset` per entry.
    pub fn save(&self, handle: &FileHandle) -> Result<()> {
        let mut buf = Vec::new();
        for (key, loc) in &self.entries {
            let key_bytes = encode_key(key)?;
            let key_size = to_lbuint(key_bytes.len() as u64)?;
            buf.extend_from_slice(&key_size.to_be_bytes());
            buf.extend_from_slice(&key_bytes);
            buf.extend_from_slice(&loc.file_number.to_be_bytes());
            buf.extend_from_slice(&loc.value_size.to_be_bytes());
            buf.extend_from_slice(&loc.value_offset.to_be_bytes());
        }
        std::fs::write(handle.path(), buf)
            .map_err(|e| LogbaseError::wrap(format!("writing {}", handle.path().display()), e))
    }

    /// Load from a `.master` file. Returns an empty catalog if the file
    /// does not exist or is empty (the caller decides whether that means
    /// "fresh logbase" or "fall back to rebuild mode").
    pub fn load(handle: &FileHandle) -> Result<Self> {
        let mut catalog = MasterCatalog::new();
        handle.process(RecordKind::Master, false, |rec| {
            let key = decode_key(&rec.key)?;
            let location = ValueLocation {
                file_number: rec.file_number.expect("master records carry a file number"),
                value_size: rec.value_size,
                value_offset: to_lbuint(rec.value_offset)?,
            };
            catalog.insert_raw(key, location);
            Ok(())
        })?;
        catalog.recompute_next_catid();
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips_through_encode_decode() {
        for key in [
            Value::String("hello".into()),
            Value::U64(42),
            Value::CatId(7),
            Value::I32(-5),
        ] {
            let bytes = encode_key(&key).unwrap();
            let back = decode_key(&bytes).unwrap();
            assert_eq!(key, back);
        }
    }

    #[test]
    fn non_key_type_is_rejected() {
        let err = encode_key(&Value::Bytes(vec![1, 2, 3])).unwrap_err();
        assert!(matches!(err, LogbaseError::BadType(_)));
    }

    #[test]
    fn update_pushes_prior_location_into_zapmap() {
        let mut master = MasterCatalog::new();
        let mut zapmap = ZapMap::new();
        let key = Value::String("a".into());

        master.update(key.clone(), 1, 5, 8, &mut zapmap).unwrap();
        assert!(zapmap.get(&key).is_none());

        master.update(key.clone(), 1, 6, 21, &mut zapmap).unwrap();
        let stale = zapmap.get(&key).unwrap();
        assert_eq!(stale.len(), 1);
    }

    #[test]
    fn pop_next_id_starts_at_catid_min_and_survives_rescan() {
        let mut master = MasterCatalog::new();
        assert_eq!(master.pop_next_id(), CATID_MIN);
        assert_eq!(master.pop_next_id(), CATID_MIN + 1);

        let mut zapmap = ZapMap::new();
        master
            .update(Value::CatId(100), 1, 4, 8, &mut zapmap)
            .unwrap();
        master.recompute_next_catid();
        assert_eq!(master.pop_next_id(), 101);
    }
}
