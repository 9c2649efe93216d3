//! C6: the top-level orchestrator. Holds the live log, the master
//! catalog, the zapmap and the file-handle cache; implements
//! put/get/save/zap/init (spec §4.7).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::codec::decode_scalar;
use crate::config::Config;
use crate::error::{LogbaseError, Result};
use crate::file_handle::FileHandle;
use crate::key::Value;
use crate::log_file::{self, AppendOutcome, ZapOutcome};
use crate::logger::{LogLevel, LogSink, StderrLogSink};
use crate::master::{self, MasterCatalog};
use crate::rand_source::{RandSource, UrandomSource};
use crate::types::LbType;
use crate::zapmap::ZapMap;

fn log_file_name(file_number: u32, ext: &str) -> String {
    format!("{file_number:09}.{ext}")
}

/// Scan `dir` for `<NNNNNNNNN>.<ext>` files and return their numbers,
/// ascending.
fn list_file_numbers(dir: &Path, ext: &str) -> Result<Vec<u32>> {
    let mut nums = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(nums),
        Err(e) => return Err(LogbaseError::wrap(format!("reading dir {}", dir.display()), e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| LogbaseError::wrap("reading dir entry", e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ext) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if let Ok(n) = stem.parse::<u32>() {
                nums.push(n);
            }
        }
    }
    nums.sort_unstable();
    Ok(nums)
}

/// Owns every open `FileHandle` for log and index files. Components
/// receive `Arc<FileHandle>` clones and never close or remove a handle
/// themselves — only the cache does, via `invalidate`/`remove`, so that
/// renaming/deleting a file (compaction) can never race an outstanding
/// read through a stale handle (Design Note §9: "Mixed ownership of file
/// handles").
struct FileHandleCache {
    logs: Mutex<HashMap<u32, Arc<FileHandle>>>,
    indexes: Mutex<HashMap<u32, Arc<FileHandle>>>,
    locking_enabled: bool,
}

impl FileHandleCache {
    fn new(locking_enabled: bool) -> Self {
        FileHandleCache {
            logs: Mutex::new(HashMap::new()),
            indexes: Mutex::new(HashMap::new()),
            locking_enabled,
        }
    }

    fn log(&self, dir: &Path, ext: &str, file_number: u32) -> Result<Arc<FileHandle>> {
        let mut logs = self.logs.lock().unwrap();
        if let Some(h) = logs.get(&file_number) {
            return Ok(Arc::clone(h));
        }
        let path = dir.join(log_file_name(file_number, ext));
        let handle = Arc::new(FileHandle::open_with_locking(path, true, self.locking_enabled)?);
        logs.insert(file_number, Arc::clone(&handle));
        Ok(handle)
    }

    fn index(&self, dir: &Path, ext: &str, file_number: u32) -> Result<Arc<FileHandle>> {
        let mut indexes = self.indexes.lock().unwrap();
        if let Some(h) = indexes.get(&file_number) {
            return Ok(Arc::clone(h));
        }
        let path = dir.join(log_file_name(file_number, ext));
        let handle = Arc::new(FileHandle::open_with_locking(path, true, self.locking_enabled)?);
        indexes.insert(file_number, Arc::clone(&handle));
        Ok(handle)
    }

    /// Drop the cached handle so the next `log`/`index` call reopens it —
    /// required after compaction renames a fresh file over the old inode.
    fn invalidate_log(&self, file_number: u32) {
        self.logs.lock().unwrap().remove(&file_number);
    }

    fn remove(&self, file_number: u32) {
        self.logs.lock().unwrap().remove(&file_number);
        self.indexes.lock().unwrap().remove(&file_number);
    }
}

/// The master catalog, zapmap and live-log pointer — the state a single
/// mutex protects so that put/save/zap never interleave (spec §5).
struct LogbaseState {
    master: MasterCatalog,
    zapmap: ZapMap,
    live_file_number: u32,
}

/// A single logbase directory: one or more log files plus their sibling
/// index files, a master-catalog file and a zapmap file.
pub struct Logbase {
    dir: PathBuf,
    config: Config,
    logger: Arc<dyn LogSink>,
    rand: Arc<dyn RandSource>,
    cache: FileHandleCache,
    state: Mutex<LogbaseState>,
    master_handle: FileHandle,
    zapmap_handle: FileHandle,
}

impl Logbase {
    /// Open (creating if absent) the logbase at `dir`, with default
    /// logging and random-source implementations.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(dir, Arc::new(StderrLogSink), Arc::new(UrandomSource::new()))
    }

    /// Open with explicit `LogSink`/`RandSource` implementations (Design
    /// Note §9: both are injected dependencies, not module-level globals).
    pub fn open_with(
        dir: impl Into<PathBuf>,
        logger: Arc<dyn LogSink>,
        rand: Arc<dyn RandSource>,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| LogbaseError::wrap(format!("creating {}", dir.display()), e))?;
        let config = Config::load(&dir)?;

        let master_handle = FileHandle::open_with_locking(dir.join(".master"), true, config.file_locking_on)?;
        let zapmap_handle = FileHandle::open_with_locking(dir.join(".zapmap"), true, config.file_locking_on)?;

        let (master, zapmap) = Self::init_catalog(&dir, &config, &master_handle, &zapmap_handle, &logger)?;

        let file_numbers = list_file_numbers(&dir, &config.log_extension)?;
        let live_file_number = file_numbers.last().copied().unwrap_or(1);

        let cache = FileHandleCache::new(config.file_locking_on);
        // Ensure file #1 exists even for a brand new logbase.
        cache.log(&dir, &config.log_extension, live_file_number)?;
        cache.index(&dir, &config.index_extension, live_file_number)?;

        Ok(Logbase {
            dir,
            config,
            logger,
            rand,
            cache,
            state: Mutex::new(LogbaseState {
                master,
                zapmap,
                live_file_number,
            }),
            master_handle,
            zapmap_handle,
        })
    }

    /// Load `.master`/`.zapmap` if both are present and non-empty;
    /// otherwise rebuild from the log/index files (spec §4.7).
    fn init_catalog(
        dir: &Path,
        config: &Config,
        master_handle: &FileHandle,
        zapmap_handle: &FileHandle,
        logger: &Arc<dyn LogSink>,
    ) -> Result<(MasterCatalog, ZapMap)> {
        let master_size = master_handle.size()?;
        let zapmap_size = zapmap_handle.size()?;

        if master_size > 0 && zapmap_size > 0 {
            if let (Ok(master), Ok(zapmap)) = (MasterCatalog::load(master_handle), ZapMap::load(zapmap_handle)) {
                return Ok((master, zapmap));
            }
            logger.append(LogLevel::Warn, "failed to load .master/.zapmap, falling back to rebuild mode");
        }

        logger.append(LogLevel::Info, "entering rebuild mode");
        let mut catalog = MasterCatalog::new();
        let mut zapmap = ZapMap::new();

        for file_number in list_file_numbers(dir, &config.log_extension)? {
            let log_path = dir.join(log_file_name(file_number, &config.log_extension));
            let index_path = dir.join(log_file_name(file_number, &config.index_extension));

            let stale = log_file::index_is_stale(&log_path, &index_path)
                .map_err(|e| LogbaseError::wrap(format!("checking staleness of {}", index_path.display()), e))?;

            let log_handle = FileHandle::open_with_locking(&log_path, false, config.file_locking_on)?;
            let records = if stale {
                logger.append(LogLevel::Debug, &format!("regenerating index for {}", log_path.display()));
                let records = log_file::build_index(&log_handle)?;
                log_file::rewrite_index(&index_path, &records)?;
                records
            } else {
                let index_handle = FileHandle::open_with_locking(&index_path, false, config.file_locking_on)?;
                log_file::load_index(&index_handle)?
            };

            for record in records {
                let key = master::decode_key(&record.key)?;
                catalog.update(key, file_number, record.value_size, record.value_offset, &mut zapmap)?;
            }
        }

        Ok((catalog, zapmap))
    }

    /// The logbase directory this instance was opened against.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The effective configuration (defaults merged with `logbase.cfg`).
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The random source this instance was opened with.
    pub fn rand(&self) -> &Arc<dyn RandSource> {
        &self.rand
    }

    /// Append `value` under `key`, rolling to a new live log file first if
    /// the record would push the current one over `LOGFILE_MAXBYTES`.
    pub fn put(&self, key: Value, value: Value) -> Result<()> {
        if !key.is_valid_key() {
            return Err(LogbaseError::BadType(format!("{:?} cannot be used as a key", key.lbtype())));
        }

        let key_bytes = master::encode_key(&key)?;
        let scalar_bytes = crate::codec::encode_scalar(&value, value.lbtype())?;
        let mut value_bytes = Vec::with_capacity(1 + scalar_bytes.len());
        value_bytes.push(value.lbtype().as_u8());
        value_bytes.extend(scalar_bytes);

        let mut state = self.state.lock().unwrap();

        let prospective_size = 2 * 4 + key_bytes.len() as u64 + value_bytes.len() as u64 + 4;
        let log_handle = self.cache.log(&self.dir, &self.config.log_extension, state.live_file_number)?;
        if log_handle.size()? + prospective_size > self.config.log_max_bytes {
            state.live_file_number += 1;
            self.logger.append(
                LogLevel::Info,
                &format!("rolling to live log file {}", state.live_file_number),
            );
        }
        let log_handle = self.cache.log(&self.dir, &self.config.log_extension, state.live_file_number)?;
        let index_handle = self.cache.index(&self.dir, &self.config.index_extension, state.live_file_number)?;

        let AppendOutcome {
            index_record,
            index_write_failed,
        } = log_file::append(&log_handle, &index_handle, &key_bytes, &value_bytes)?;

        if index_write_failed {
            self.logger.append(
                LogLevel::Warn,
                &format!(
                    "index append failed for live log {}; index file needs refresh on next init",
                    state.live_file_number
                ),
            );
        }

        let file_number = state.live_file_number;
        let LogbaseState { master, zapmap, .. } = &mut *state;
        master.update(key, file_number, index_record.value_size, index_record.value_offset, zapmap)?;

        Ok(())
    }

    /// Look up `key` and return its raw value bytes (without the leading
    /// type-tag byte) and the decoded `LBTYPE` tag (spec §4.7, `get`).
    pub fn get(&self, key: &Value) -> Result<(Vec<u8>, LbType)> {
        if !key.is_valid_key() {
            return Err(LogbaseError::BadType(format!("{:?} cannot be used as a key", key.lbtype())));
        }
        let location = {
            let state = self.state.lock().unwrap();
            state.master.get(key).ok_or(LogbaseError::KeyNotFound)?
        };
        let log_handle = self.cache.log(&self.dir, &self.config.log_extension, location.file_number)?;
        let raw = log_file::read_value(&log_handle, location.value_offset, location.value_size)?;
        if raw.is_empty() {
            return Err(LogbaseError::ValueNotFound);
        }
        let tag = LbType::from_u8(raw[0])?;
        Ok((raw[1..].to_vec(), tag))
    }

    /// Convenience wrapper over `get` that fully decodes the scalar.
    pub fn get_value(&self, key: &Value) -> Result<Value> {
        let (bytes, tag) = self.get(key)?;
        decode_scalar(&bytes, tag)
    }

    /// Serialize the master catalog and zapmap. Idempotent.
    pub fn save(&self) -> Result<()> {
        let state = self.state.lock().unwrap();
        state.master.save(&self.master_handle)?;
        state.zapmap.save(&self.zapmap_handle)?;
        Ok(())
    }

    /// Compact every log file the zapmap has entries for, then save.
    pub fn zap(&self, buffer_size: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let file_numbers = state.zapmap.file_numbers();

        for file_number in file_numbers {
            let log_path = self.dir.join(log_file_name(file_number, &self.config.log_extension));
            let index_path = self.dir.join(log_file_name(file_number, &self.config.index_extension));

            let log_handle = self.cache.log(&self.dir, &self.config.log_extension, file_number)?;
            let file_size = log_handle.size()?;
            let preserve = state.zapmap.preserve_ranges(file_number, file_size)?;

            self.logger.append(
                LogLevel::Info,
                &format!("compacting log file {file_number} ({} preserved ranges)", preserve.len()),
            );

            let outcome = log_file::zap(&log_handle, &log_path, &index_path, &preserve, buffer_size)?;
            match outcome {
                ZapOutcome::Deleted => self.cache.remove(file_number),
                ZapOutcome::Rewritten { ranges } => {
                    self.cache.invalidate_log(file_number);
                    state.master.remap_after_compaction(file_number, &ranges)?;
                }
            }
            state.zapmap.purge(file_number);

            self.logger.append(LogLevel::Info, &format!("finished compacting log file {file_number}"));
        }

        drop(state);
        self.save()
    }

    /// Number of distinct keys currently live in the master catalog.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().master.len()
    }

    /// True when the catalog holds no keys.
    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().master.is_empty()
    }

    /// Allocate the next catalog ID (used by the node overlay).
    pub fn pop_next_id(&self) -> u64 {
        self.state.lock().unwrap().master.pop_next_id()
    }

    /// Human-readable listing of every log record in file `file_number`,
    /// in append order — backs the `-l` flag of the dump CLI.
    pub fn dump_log(&self, file_number: u32) -> Result<Vec<String>> {
        let log_handle = self.cache.log(&self.dir, &self.config.log_extension, file_number)?;
        let records = log_file::load(&log_handle)?;
        Ok(records
            .into_iter()
            .map(|(key, value)| format!("key={key:02x?} value={value:02x?}"))
            .collect())
    }

    /// Human-readable listing of every index record in file `file_number`
    /// — backs the `-i` flag of the dump CLI.
    pub fn dump_index(&self, file_number: u32) -> Result<Vec<String>> {
        let index_handle = self.cache.index(&self.dir, &self.config.index_extension, file_number)?;
        let records = log_file::load_index(&index_handle)?;
        Ok(records
            .into_iter()
            .map(|rec| format!("key={:02x?} value_size={} value_offset={}", rec.key, rec.value_size, rec.value_offset))
            .collect())
    }

    /// Human-readable listing of every entry in the master catalog —
    /// backs the `-m` flag of the dump CLI.
    pub fn dump_master(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .master
            .iter()
            .map(|(key, loc)| {
                format!(
                    "key={key:?} file={} value_size={} value_offset={}",
                    loc.file_number, loc.value_size, loc.value_offset
                )
            })
            .collect()
    }

    /// Human-readable listing of every entry in the zapmap — backs the
    /// `-z` flag of the dump CLI.
    pub fn dump_zapmap(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .zapmap
            .iter()
            .map(|(key, locs)| {
                let locs: Vec<String> = locs
                    .iter()
                    .map(|l| format!("(file={} size={} offset={})", l.file_number, l.record_size, l.record_offset))
                    .collect();
                format!("key={key:?} locations=[{}]", locs.join(", "))
            })
            .collect()
    }

    /// Every `STRING`-typed key currently in the master catalog — the node
    /// overlay's `find_of_kind` scans these for its namespace prefix.
    pub fn string_keys(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .master
            .iter()
            .filter_map(|(k, _)| match k {
                Value::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn put_str(lb: &Logbase, key: &str, value: &str) {
        lb.put(Value::String(key.into()), Value::String(value.into())).unwrap();
    }

    #[test]
    fn e1_put_then_get() {
        let dir = tempdir().unwrap();
        let lb = Logbase::open(dir.path()).unwrap();
        put_str(&lb, "a", "alpha");
        let (bytes, tag) = lb.get(&Value::String("a".into())).unwrap();
        assert_eq!(tag, LbType::String);
        assert_eq!(String::from_utf8(bytes).unwrap(), "alpha");
    }

    #[test]
    fn e2_overwrite_then_save_then_reinit() {
        let dir = tempdir().unwrap();
        {
            let lb = Logbase::open(dir.path()).unwrap();
            put_str(&lb, "a", "alpha");
            put_str(&lb, "b", "bravo");
            put_str(&lb, "a", "alpha2");
            lb.save().unwrap();
        }
        let lb = Logbase::open(dir.path()).unwrap();
        let (bytes, _) = lb.get(&Value::String("a".into())).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "alpha2");
    }

    #[test]
    fn e3_rebuild_mode_matches_direct_save() {
        let dir_a = tempdir().unwrap();
        {
            let lb = Logbase::open(dir_a.path()).unwrap();
            put_str(&lb, "a", "alpha");
            put_str(&lb, "a", "alpha2");
            put_str(&lb, "b", "bravo");
            put_str(&lb, "a", "alpha3");
            lb.save().unwrap();
        }

        std::fs::remove_file(dir_a.path().join(".master")).unwrap();
        std::fs::remove_file(dir_a.path().join(".zapmap")).unwrap();

        let rebuilt = Logbase::open(dir_a.path()).unwrap();
        let (bytes, _) = rebuilt.get(&Value::String("a".into())).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "alpha3");
        assert_eq!(rebuilt.len(), 2);
    }

    #[test]
    fn e4_rolling_logs_and_zap() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("logbase.cfg"), "LOGFILE_MAXBYTES = 100\n").unwrap();
        let lb = Logbase::open(dir.path()).unwrap();

        for i in 0..20u32 {
            let key = format!("k{i}");
            let value = format!("v{i:08}");
            lb.put(Value::String(key), Value::String(value)).unwrap();
        }

        let numbers = list_file_numbers(dir.path(), "logbase").unwrap();
        assert!(numbers.len() > 1, "expected the live log to have rolled at least once");

        lb.zap(5).unwrap();
        lb.save().unwrap();

        for i in 0..20u32 {
            let key = format!("k{i}");
            let (bytes, _) = lb.get(&Value::String(key)).unwrap();
            assert_eq!(String::from_utf8(bytes).unwrap(), format!("v{i:08}"));
        }
    }

    #[test]
    fn zap_remaps_surviving_offsets_without_reinit() {
        // "a" is overwritten (its earlier record goes stale and is zapped
        // away); "b" is written once and survives. Compaction shifts "b"'s
        // record to a lower offset in the log file, so the in-memory
        // master catalog must be remapped to it for `get` to still work
        // without a restart (a restart would mask the bug: `zap` empties
        // the zapmap, so `save` writes a 0-byte `.zapmap` and re-init falls
        // back to rebuild mode, recomputing offsets from scratch).
        let dir = tempdir().unwrap();
        let lb = Logbase::open(dir.path()).unwrap();
        put_str(&lb, "a", "alpha");
        put_str(&lb, "b", "bravo");
        put_str(&lb, "a", "alpha2");

        lb.zap(4096).unwrap();

        let (bytes, _) = lb.get(&Value::String("b".into())).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "bravo");
        let (bytes, _) = lb.get(&Value::String("a".into())).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "alpha2");
    }

    #[test]
    fn bad_key_type_is_rejected() {
        let dir = tempdir().unwrap();
        let lb = Logbase::open(dir.path()).unwrap();
        let err = lb.put(Value::Bytes(vec![1, 2, 3]), Value::String("x".into())).unwrap_err();
        assert!(matches!(err, LogbaseError::BadType(_)));
    }

    #[test]
    fn get_missing_key_fails() {
        let dir = tempdir().unwrap();
        let lb = Logbase::open(dir.path()).unwrap();
        let err = lb.get(&Value::String("nope".into())).unwrap_err();
        assert!(matches!(err, LogbaseError::KeyNotFound));
    }
}
