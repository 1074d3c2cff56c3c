//! Error types for gxnet-nn.

use thiserror::Error;

/// gxnet-nn error type.
///
/// Degenerate graphs (isolated stations, all-zero columns) are not errors:
/// the transforms map them to zero influence instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Tensor dimensions disagree across inputs.
    #[error("shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// NaN or Inf showed up in an intermediate result.
    #[error("non-finite values after {stage}")]
    NumericInstability { stage: &'static str },

    /// Parameter registration failed.
    #[error("parameter store: {0}")]
    ParamStore(String),
}

impl Error {
    pub(crate) fn shape(context: &'static str, expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
