//! `logbase.cfg`: optional per-logbase TOML configuration (spec §6).

use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

fn default_log_ext() -> String {
    "logbase".to_owned()
}

fn default_index_ext() -> String {
    "index".to_owned()
}

fn default_max_bytes() -> u64 {
    1_048_576
}

fn default_locking_on() -> bool {
    true
}

/// Parsed `logbase.cfg`. Every field has a default, so a missing file is
/// equivalent to an empty one.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// File extension for log files, default `"logbase"`.
    #[serde(rename = "LOGFILE_NAME_EXTENSION")]
    pub log_extension: String,
    /// File extension for sibling index files, default `"index"`.
    #[serde(rename = "INDEXFILE_NAME_EXTENSION")]
    pub index_extension: String,
    /// Size threshold past which a `put` rolls to a new live log file.
    #[serde(rename = "LOGFILE_MAXBYTES")]
    pub log_max_bytes: u64,
    /// Whether `FileHandle` should take its advisory read/write locks.
    #[serde(rename = "FILE_LOCKING_ON")]
    pub file_locking_on: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_extension: default_log_ext(),
            index_extension: default_index_ext(),
            log_max_bytes: default_max_bytes(),
            file_locking_on: default_locking_on(),
        }
    }
}

impl Config {
    /// Load `<dir>/logbase.cfg`, falling back to defaults if it is absent.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join("logbase.cfg");
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(crate::error::LogbaseError::wrap(
                format!("reading {}", path.display()),
                e,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.log_extension, "logbase");
        assert_eq!(cfg.log_max_bytes, 1_048_576);
        assert!(cfg.file_locking_on);
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("logbase.cfg"), "LOGFILE_MAXBYTES = 100\n").unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.log_max_bytes, 100);
        assert_eq!(cfg.log_extension, "logbase");
    }
}
