//! C2: a positioned, lockable wrapper around an OS file, plus the generic
//! record reader used to parse any of the four on-disk record layouts
//! (spec §4.2).

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};

use crate::error::{LogbaseError, Result};
use crate::types::LBUINT_SIZE;

/// Which of the four record layouts a `process` pass should parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// `key-size · value-size(+crc) · key · value · crc32`
    Log,
    /// `key-size · key · value-size · value-offset`
    Index,
    /// `key-size · key · file-number · value-size · value-offset`
    Master,
    /// `key-size · total-list-size · key · repeated{file-number · record-size · record-offset}`
    Zap,
}

impl RecordKind {
    /// True for Log and Zap: a generic `LBUINT` value-size field follows
    /// the key-size field, before the key bytes.
    fn has_leading_value_size(self) -> bool {
        matches!(self, RecordKind::Log | RecordKind::Zap)
    }

    /// The fixed payload width following the key bytes, for kinds with no
    /// leading value-size field.
    fn fixed_payload_width(self) -> Option<usize> {
        match self {
            RecordKind::Index => Some(2 * LBUINT_SIZE),
            RecordKind::Master => Some(3 * LBUINT_SIZE),
            RecordKind::Log | RecordKind::Zap => None,
        }
    }
}

/// The common container a `process` visitor receives for every record,
/// regardless of kind. Fields not meaningful for a given kind are left at
/// their default (`file_number` is only set for `Master`; `value` is only
/// set when the caller asked for it).
#[derive(Debug, Clone)]
pub struct GenericRecord {
    pub key_size: u32,
    /// The raw value length, normalised to exclude the trailing CRC for
    /// `Log` records so it is directly comparable across record kinds.
    pub value_size: u32,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    /// For `Log`: absolute offset of the first value byte in this file.
    /// For `Index`/`Master`: the stored value-offset field (absolute
    /// offset in the *log* file, not this file).
    /// For `Zap`: the offset at which the repeated-location blob begins.
    pub value_offset: u64,
    /// Only set for `Master` records.
    pub file_number: Option<u32>,
}

#[derive(Default)]
struct LockState {
    readers: u32,
    writer: bool,
}

/// A positioned file handle with its own advisory read/write locks.
///
/// Every read waits until neither lock is held, takes the read lock,
/// performs the I/O, releases it and signals; writes do the same with the
/// write lock. This lets two threads share a handle for concurrent
/// positioned I/O without corrupting each other's reads (spec §4.2, §5).
pub struct FileHandle {
    path: PathBuf,
    file: File,
    lock: Mutex<LockState>,
    changed: Condvar,
    locking_enabled: bool,
}

impl FileHandle {
    /// Open (creating if `create`) the file at `path`, with the advisory
    /// read/write locks enabled.
    pub fn open(path: impl AsRef<Path>, create: bool) -> Result<Self> {
        Self::open_with_locking(path, create, true)
    }

    /// Open (creating if `create`) the file at `path`. `locking_enabled`
    /// mirrors `logbase.cfg`'s `FILE_LOCKING_ON` (spec §6): when `false`,
    /// `read_at`/`write_at` perform positioned I/O without taking the
    /// advisory read/write locks.
    pub fn open_with_locking(path: impl AsRef<Path>, create: bool, locking_enabled: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(&path)
            .map_err(|e| LogbaseError::wrap(format!("opening {}", path.display()), e))?;
        Ok(FileHandle {
            path,
            file,
            lock: Mutex::new(LockState::default()),
            changed: Condvar::new(),
            locking_enabled,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self
            .file
            .metadata()
            .map_err(|e| LogbaseError::wrap(format!("statting {}", self.path.display()), e))?
            .len())
    }

    pub fn seek_end(&self) -> Result<u64> {
        self.size()
    }

    /// Close and delete the underlying file.
    pub fn remove(self) -> Result<()> {
        let path = self.path.clone();
        drop(self.file);
        fs::remove_file(&path).map_err(|e| LogbaseError::wrap(format!("removing {}", path.display()), e))
    }

    fn acquire_read(&self) {
        let mut state = self.lock.lock().unwrap();
        while state.writer {
            state = self.changed.wait(state).unwrap();
        }
        state.readers += 1;
    }

    fn release_read(&self) {
        let mut state = self.lock.lock().unwrap();
        state.readers -= 1;
        self.changed.notify_all();
    }

    fn acquire_write(&self) {
        let mut state = self.lock.lock().unwrap();
        while state.writer || state.readers > 0 {
            state = self.changed.wait(state).unwrap();
        }
        state.writer = true;
    }

    fn release_write(&self) {
        let mut state = self.lock.lock().unwrap();
        state.writer = false;
        self.changed.notify_all();
    }

    /// Positioned read of exactly `n` bytes at `offset`.
    pub fn read_at(&self, offset: u64, n: usize) -> Result<Vec<u8>> {
        let size = self.size()?;
        if offset > size {
            return Err(LogbaseError::PositionExceedsFileSize { pos: offset, size });
        }
        if self.locking_enabled {
            self.acquire_read();
        }
        let mut buf = vec![0u8; n];
        let res = self.file.read_exact_at(&mut buf, offset);
        if self.locking_enabled {
            self.release_read();
        }
        match res {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(LogbaseError::UnexpectedSize {
                    offset,
                    context: format!("short read: wanted {n} bytes"),
                })
            }
            Err(e) => Err(LogbaseError::wrap(format!("reading {}", self.path.display()), e)),
        }
    }

    /// Positioned write of `bytes` at `offset`.
    pub fn write_at(&self, bytes: &[u8], offset: u64) -> Result<()> {
        if self.locking_enabled {
            self.acquire_write();
        }
        let res = self.file.write_all_at(bytes, offset);
        if self.locking_enabled {
            self.release_write();
        }
        res.map_err(|e| LogbaseError::wrap(format!("writing {}", self.path.display()), e))
    }

    fn read_u32_at(&self, offset: u64) -> Result<u32> {
        let buf = self.read_at(offset, LBUINT_SIZE)?;
        Ok(u32::from_be_bytes(buf.try_into().unwrap()))
    }

    /// Iterate every record of `kind` in append order, invoking `visitor`
    /// with each `GenericRecord`. Traversal stops at end-of-file or as
    /// soon as the visitor returns an error.
    ///
    /// For `Log` records the CRC is always verified (even when
    /// `need_value` is false, since the value bytes must be read to
    /// compute it); a mismatch is reported as `UnexpectedSize` naming the
    /// record's starting offset, per spec §7.
    pub fn process<F>(&self, kind: RecordKind, need_value: bool, mut visitor: F) -> Result<()>
    where
        F: FnMut(GenericRecord) -> Result<()>,
    {
        let total = self.size()?;
        let mut pos: u64 = 0;

        while pos < total {
            let record_start = pos;
            let key_size = self.read_u32_at(pos)?;
            pos += LBUINT_SIZE as u64;

            let leading_value_size = if kind.has_leading_value_size() {
                let v = self.read_u32_at(pos)?;
                pos += LBUINT_SIZE as u64;
                Some(v)
            } else {
                None
            };

            let key = self.read_at(pos, key_size as usize)?;
            pos += key_size as u64;

            let record = match kind {
                RecordKind::Log => {
                    let value_size_with_crc = leading_value_size.unwrap();
                    if value_size_with_crc < 4 {
                        return Err(LogbaseError::UnexpectedSize {
                            offset: record_start,
                            context: "log record value-size smaller than CRC width".into(),
                        });
                    }
                    let raw_len = value_size_with_crc - 4;
                    let value_offset = pos;
                    let value_bytes = self.read_at(pos, raw_len as usize)?;
                    pos += raw_len as u64;
                    let crc_bytes = self.read_at(pos, 4)?;
                    pos += 4;
                    let stored_crc = u32::from_be_bytes(crc_bytes.try_into().unwrap());

                    let mut covered = Vec::with_capacity(8 + key.len() + value_bytes.len());
                    covered.extend_from_slice(&key_size.to_be_bytes());
                    covered.extend_from_slice(&value_size_with_crc.to_be_bytes());
                    covered.extend_from_slice(&key);
                    covered.extend_from_slice(&value_bytes);
                    let computed_crc = crate::codec::crc32(&covered);
                    if computed_crc != stored_crc {
                        return Err(LogbaseError::UnexpectedSize {
                            offset: record_start,
                            context: "CRC mismatch".into(),
                        });
                    }

                    GenericRecord {
                        key_size,
                        value_size: raw_len,
                        key,
                        value: if need_value { Some(value_bytes) } else { None },
                        value_offset,
                        file_number: None,
                    }
                }
                RecordKind::Zap => {
                    let value_size = leading_value_size.unwrap();
                    let value_offset = pos;
                    let blob = self.read_at(pos, value_size as usize)?;
                    pos += value_size as u64;
                    GenericRecord {
                        key_size,
                        value_size,
                        key,
                        value: if need_value { Some(blob) } else { None },
                        value_offset,
                        file_number: None,
                    }
                }
                RecordKind::Index => {
                    let width = kind.fixed_payload_width().unwrap();
                    let payload = self.read_at(pos, width)?;
                    pos += width as u64;
                    let value_size = u32::from_be_bytes(payload[0..4].try_into().unwrap());
                    let value_offset = u32::from_be_bytes(payload[4..8].try_into().unwrap()) as u64;
                    GenericRecord {
                        key_size,
                        value_size,
                        key,
                        value: None,
                        value_offset,
                        file_number: None,
                    }
                }
                RecordKind::Master => {
                    let width = kind.fixed_payload_width().unwrap();
                    let payload = self.read_at(pos, width)?;
                    pos += width as u64;
                    let file_number = u32::from_be_bytes(payload[0..4].try_into().unwrap());
                    let value_size = u32::from_be_bytes(payload[4..8].try_into().unwrap());
                    let value_offset = u32::from_be_bytes(payload[8..12].try_into().unwrap()) as u64;
                    GenericRecord {
                        key_size,
                        value_size,
                        key,
                        value: None,
                        value_offset,
                        file_number: Some(file_number),
                    }
                }
            };

            visitor(record)?;
        }

        Ok(())
    }
}
