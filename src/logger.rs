//! Injectable logging sink (Design Note §9: replace the source's
//! module-level debug logger with an explicit dependency).

/// Severity of a `LogSink::append` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Fine-grained internal detail (index rebuilds, per-record tracing).
    Debug,
    /// Routine operational events (log roll, compaction start/finish).
    Info,
    /// A recoverable problem the caller should know about.
    Warn,
}

/// Something a `Logbase` can append a line to. The default implementation
/// forwards to the `log` facade, the same crate the rest of the ambient
/// stack logs through.
pub trait LogSink: Send + Sync {
    /// Record one line at the given severity.
    fn append(&self, level: LogLevel, line: &str);
}

/// Forwards every line through the `log` crate's macros at the matching
/// level, just as the teacher's server and engine log compaction and
/// connection events directly.
pub struct StderrLogSink;

impl LogSink for StderrLogSink {
    fn append(&self, level: LogLevel, line: &str) {
        match level {
            LogLevel::Debug => log::debug!("{line}"),
            LogLevel::Info => log::info!("{line}"),
            LogLevel::Warn => log::warn!("{line}"),
        }
    }
}

/// Discards every line — useful in tests that don't want `env_logger`
/// initialised.
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn append(&self, _level: LogLevel, _line: &str) {}
}
