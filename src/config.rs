//! Runtime configuration: the 8-byte little-endian `K`/`W` shared-memory
//! file this engine is handed by its host.
//!
//! Unlike the teacher's JSON config, a missing or short config file here is
//! not a case for silent defaults — `K` and `W` bound resident memory, so
//! an engine that guessed them could blow a memory budget it was never
//! told to respect. Any failure to read them is a hard `ConfigError`.

use std::path::Path;

use crate::error::ConfigError;

/// The two configuration integers the host writes to a shared file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchConfig {
    /// First dynamic layer index.
    pub k_dynamic_entrance: i32,

    /// Prefetch window size.
    pub w_window: i32,

    /// Whether the layer carrying `layer_index == -1` is prefetched at
    /// startup. Not part of the 8-byte wire format; set by the caller.
    pub prefetch_input: bool,

    /// Worker fan-out for a single `prefetch_range` call.
    pub prefetch_workers: usize,
}

impl PrefetchConfig {
    /// Parse `K` (bytes `0..4`) and `W` (bytes `4..8`) from an 8-byte
    /// little-endian buffer, as read from the shared config file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        if bytes.len() < 8 {
            return Err(ConfigError::Truncated(bytes.len()));
        }
        let k = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let w = i32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if w <= 0 {
            return Err(ConfigError::ZeroWindow(w));
        }
        Ok(Self {
            k_dynamic_entrance: k,
            w_window: w,
            prefetch_input: true,
            prefetch_workers: 1,
        })
    }

    /// Load configuration from the shared config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn with_prefetch_input(mut self, prefetch_input: bool) -> Self {
        self.prefetch_input = prefetch_input;
        self
    }

    pub fn with_prefetch_workers(mut self, workers: usize) -> Self {
        self.prefetch_workers = workers.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_read_s6() {
        let bytes = [0x05, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00];
        let cfg = PrefetchConfig::from_bytes(&bytes).unwrap();
        assert_eq!(cfg.k_dynamic_entrance, 5);
        assert_eq!(cfg.w_window, 3);
    }

    #[test]
    fn rejects_truncated_buffer() {
        let err = PrefetchConfig::from_bytes(&[0x05, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, ConfigError::Truncated(3)));
    }

    #[test]
    fn rejects_zero_window() {
        let bytes = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let err = PrefetchConfig::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroWindow(0)));
    }

    #[test]
    fn rejects_negative_window() {
        let mut bytes = [0u8; 8];
        bytes[4..8].copy_from_slice(&(-1i32).to_le_bytes());
        let err = PrefetchConfig::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroWindow(-1)));
    }

    #[test]
    fn loads_from_file() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[0x02, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00])
            .unwrap();
        f.flush().unwrap();
        let cfg = PrefetchConfig::load(f.path()).unwrap();
        assert_eq!(cfg.k_dynamic_entrance, 2);
        assert_eq!(cfg.w_window, 4);
    }
}
