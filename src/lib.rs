#![deny(missing_docs)]
//! An embedded, log-structured key-value store.
//!
//! Writes are appended to a sequence of immutable on-disk log files; an
//! in-memory master catalog maps each live key to the location of its
//! current value; a zapmap records the on-disk ranges of superseded
//! records so they may later be reclaimed by compaction ("zap").

mod codec;
mod config;
mod error;
mod file_handle;
mod key;
mod log_file;
mod logbase;
mod logger;
mod master;
mod node;
mod rand_source;
mod record;
mod types;
mod zapmap;

pub use codec::{decode_scalar, encode_scalar};
pub use config::Config;
pub use error::{LogbaseError, Result};
pub use key::Value;
pub use logbase::Logbase;
pub use logger::{LogLevel, LogSink, NullLogSink, StderrLogSink};
pub use node::{Node, NodeKind, NodeState};
pub use rand_source::{RandSource, UrandomSource};
pub use types::LbType;
