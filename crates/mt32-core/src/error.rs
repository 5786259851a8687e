//! Error types for the emulator core

use thiserror::Error;

/// Errors reported by the emulator
#[derive(Debug, Error)]
pub enum Mt32Error {
    /// ROM contents failed validation
    #[error("Invalid ROM: {0}")]
    InvalidRom(String),

    /// Synth configuration is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A caller supplied an out-of-range parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for emulator operations
pub type Result<T> = std::result::Result<T, Mt32Error>;
