//! Activation selector shared by the convolution blocks.

use crate::error::{Error, Result};
use candle_core::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SELU_ALPHA: f64 = 1.673_263_242_354_377_3;
const SELU_SCALE: f64 = 1.050_700_987_355_480_5;

/// Pointwise non-linearity applied after a block's linear map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// No-op. `linear` and `none` are accepted as aliases.
    #[default]
    #[serde(alias = "linear", alias = "none")]
    Identity,
    Relu,
    /// Scaled ELU (Klambauer et al., 2017).
    Selu,
    /// ELU with alpha = 1.
    Elu,
    /// x * sigmoid(x).
    Silu,
}

impl Activation {
    pub fn apply(&self, x: &Tensor) -> Result<Tensor> {
        let y = match self {
            Activation::Identity => x.clone(),
            Activation::Relu => x.relu()?,
            Activation::Selu => (x.elu(SELU_ALPHA)? * SELU_SCALE)?,
            Activation::Elu => x.elu(1.0)?,
            Activation::Silu => x.silu()?,
        };
        Ok(y)
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Activation::Identity)
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "identity" | "linear" | "none" => Ok(Activation::Identity),
            "relu" => Ok(Activation::Relu),
            "selu" => Ok(Activation::Selu),
            "elu" => Ok(Activation::Elu),
            "silu" | "swish" => Ok(Activation::Silu),
            other => Err(Error::InvalidConfig(format!("unknown activation: {other}"))),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Activation::Identity => "identity",
            Activation::Relu => "relu",
            Activation::Selu => "selu",
            Activation::Elu => "elu",
            Activation::Silu => "silu",
        };
        f.write_str(name)
    }
}
