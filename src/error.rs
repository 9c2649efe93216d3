use thiserror::Error;

/// Error type for the logbase storage engine.
#[derive(Error, Debug)]
pub enum LogbaseError {
    /// The requested key has no entry in the master catalog.
    #[error("key not found")]
    KeyNotFound,
    /// Two stale records collided at the same offset while building the
    /// zapmap's preserve-ranges during compaction.
    #[error("duplicate record location in zapmap")]
    KeyExists,
    /// A key resolved to a location but the value bytes could not be read.
    #[error("value not found at recorded location")]
    ValueNotFound,
    /// A log, index, master-catalog or zapmap file expected on disk is absent.
    #[error("file not found: {0}")]
    FileNotFound(String),
    /// A value, key or `LBTYPE` tag was used somewhere it is not allowed
    /// (e.g. a non-numeric, non-string key, or an unrecognised type tag).
    #[error("bad type: {0}")]
    BadType(String),
    /// An argument failed a precondition check.
    #[error("bad argument: {0}")]
    BadArgument(String),
    /// A size or offset does not fit in `LBUINT` (32 bits unsigned).
    #[error("integer overflow: {0} does not fit in LBUINT")]
    IntOverflow(u64),
    /// A read returned fewer bytes than expected, or a container's byte
    /// length is not a multiple of its element width. Carries the file
    /// offset at which the problem was detected, when known.
    #[error("unexpected size at offset {offset}: {context}")]
    UnexpectedSize {
        /// Byte offset within the file at which the mismatch was found.
        offset: u64,
        /// Human-readable detail (e.g. "CRC mismatch", "short read").
        context: String,
    },
    /// A positioned read or write targeted an offset beyond the file's end.
    #[error("position {pos} exceeds file size {size}")]
    PositionExceedsFileSize {
        /// Requested position.
        pos: u64,
        /// Actual file size.
        size: u64,
    },
    /// An I/O error, wrapped with additional context.
    #[error("{context}: {source}")]
    Wrapped {
        /// What we were trying to do when the I/O error occurred.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A bare I/O error with no extra context attached.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The per-logbase `logbase.cfg` file exists but could not be parsed.
    #[error("bad logbase config: {0}")]
    Config(#[from] toml::de::Error),
}

impl LogbaseError {
    /// Wrap an I/O error with a short description of the operation that failed.
    pub fn wrap(context: impl Into<String>, source: std::io::Error) -> Self {
        LogbaseError::Wrapped {
            context: context.into(),
            source,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LogbaseError>;
