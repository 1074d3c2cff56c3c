//! Error types for gxnet-station.

use thiserror::Error;

/// gxnet-station error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Paired inputs have different lengths.
    #[error("length mismatch in {context}: {left} vs {right}")]
    LengthMismatch {
        context: &'static str,
        left: usize,
        right: usize,
    },

    /// A parameter is outside its valid range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
