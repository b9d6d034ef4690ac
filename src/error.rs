//! Error taxonomy for the prefetch engine.
//!
//! Configuration and catalogue-construction errors are rejected up front
//! (the engine refuses to start). Mapping and telemetry failures are
//! deliberately *not* represented here — per the degraded-mode contract
//! they are logged via `tracing::warn!` and the caller proceeds.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file too short: expected 8 bytes, got {0}")]
    Truncated(usize),

    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid window size W={0}, must be > 0")]
    ZeroWindow(i32),
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("layer `{0}` has no fragments")]
    EmptyFragments(String),

    #[error("I/O error opening weights file: {0}")]
    Io(#[from] std::io::Error),
}
