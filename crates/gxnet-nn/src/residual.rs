//! Squeeze-and-excitation residual block.
//!
//! A diffusion convolution whose output channels are recalibrated by a
//! learned gate (Hu et al., "Squeeze-and-Excitation Networks", CVPR 2018):
//!
//! ```text
//! H = DiffusionConv(X)                 (batch, nodes, hidden)
//! s = mean over nodes of H             (batch, 1, hidden)
//! g = sigmoid(W2 SiLU(W1 s + b1) + b2)
//! Y = SiLU(H * g)
//! ```
//!
//! The gate is per channel and shared by every station, so it re-weights
//! hidden features rather than nodes. There is no additive skip connection.

use crate::activation::Activation;
use crate::conv::DiffusionConv;
use crate::error::Result;
use crate::init::ParamInit;
use candle_core::Tensor;
use candle_nn::{Linear, Module};

#[derive(Debug, Clone)]
pub struct SeResBlock {
    gnn: DiffusionConv,
    fc1: Linear,
    fc2: Linear,
    hidden: usize,
}

impl SeResBlock {
    /// Create a block mapping `hidden` channels to `hidden` channels.
    ///
    /// Bottleneck weights are Kaiming-normal, biases uniform in
    /// `±1/sqrt(hidden)`.
    pub fn new(hidden: usize, order: usize, init: &mut ParamInit<'_>, name: &str) -> Result<Self> {
        let gnn = DiffusionConv::new(hidden, hidden, order, init, &format!("{name}.gnn"))?;
        let fc1 = se_linear(hidden, init, &format!("{name}.fc1"))?;
        let fc2 = se_linear(hidden, init, &format!("{name}.fc2"))?;
        Ok(Self {
            gnn,
            fc1,
            fc2,
            hidden,
        })
    }

    /// Activation of the inner diffusion block (identity by default).
    pub fn with_diffusion_activation(mut self, activation: Activation) -> Self {
        self.gnn = self.gnn.with_activation(activation);
        self
    }

    pub fn with_finite_check(mut self, check: bool) -> Self {
        self.gnn = self.gnn.with_finite_check(check);
        self
    }

    pub fn hidden(&self) -> usize {
        self.hidden
    }

    /// Channel gate in (0, 1) for diffusion output `h`, shape `(batch, 1, hidden)`.
    pub fn gate(&self, h: &Tensor) -> Result<Tensor> {
        let squeezed = h.mean_keepdim(1)?;
        let excited = self.fc1.forward(&squeezed)?.silu()?;
        Ok(candle_nn::ops::sigmoid(&self.fc2.forward(&excited)?)?)
    }

    /// `x`: `(batch, nodes, hidden)` -> `(batch, nodes, hidden)`.
    pub fn forward(&self, x: &Tensor, a_q: &Tensor, a_h: &Tensor) -> Result<Tensor> {
        let h = self.gnn.forward(x, a_q, a_h)?;
        let gate = self.gate(&h)?;
        Ok(h.broadcast_mul(&gate)?.silu()?)
    }
}

fn se_linear(dim: usize, init: &mut ParamInit<'_>, name: &str) -> Result<Linear> {
    let weight = init.kaiming_normal(&format!("{name}.weight"), (dim, dim))?;
    let bias = init.uniform(&format!("{name}.bias"), &[dim], 1.0 / (dim as f64).sqrt())?;
    Ok(Linear::new(weight, Some(bias)))
}
