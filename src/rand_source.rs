//! Injectable random source (Design Note §9; spec §6: "a hex-string
//! generator consumes `/dev/urandom` when present; the core does not
//! otherwise consult the environment").

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fills a caller-supplied buffer with random bytes. Used only by the
/// node overlay's demo helpers and test fixtures for generating scratch
/// names — never by the put/get/zap path.
pub trait RandSource: Send + Sync {
    /// Fill `buf` entirely with random bytes.
    fn fill(&self, buf: &mut [u8]);

    /// Convenience: a lowercase hex string of `n` random bytes.
    fn hex_string(&self, n: usize) -> String {
        let mut buf = vec![0u8; n];
        self.fill(&mut buf);
        buf.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Reads `/dev/urandom` when present; otherwise falls back to a
/// counter-seeded xorshift so the generator still works in environments
/// without a urandom device (spec §6).
pub struct UrandomSource {
    fallback_state: AtomicU64,
}

impl Default for UrandomSource {
    fn default() -> Self {
        UrandomSource {
            fallback_state: AtomicU64::new(0x9E37_79B9_7F4A_7C15),
        }
    }
}

impl UrandomSource {
    /// Construct a source that reads `/dev/urandom`, falling back to a
    /// seeded xorshift generator if the device is unavailable.
    pub fn new() -> Self {
        Self::default()
    }

    fn fill_fallback(&self, buf: &mut [u8]) {
        let mut state = self.fallback_state.load(Ordering::Relaxed);
        for chunk in buf.chunks_mut(8) {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let bytes = state.to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
        self.fallback_state.store(state, Ordering::Relaxed);
    }
}

impl RandSource for UrandomSource {
    fn fill(&self, buf: &mut [u8]) {
        match std::fs::File::open("/dev/urandom") {
            Ok(mut f) if f.read_exact(buf).is_ok() => {}
            _ => self.fill_fallback(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_string_has_expected_length() {
        let src = UrandomSource::new();
        assert_eq!(src.hex_string(8).len(), 16);
    }
}
