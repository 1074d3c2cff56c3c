//! Composite reconstruction network.
//!
//! Stacks an entry diffusion block, `depth` squeeze-and-excitation blocks
//! and an exit diffusion block over a station graph whose two transition
//! matrices are themselves trainable:
//!
//! ```text
//! A_q, A_h = colnorm(ReLU(adjust_a_q)), colnorm(ReLU(adjust_a_h))
//!
//! (batch, steps, nodes) -> permute -> (batch, nodes, steps)
//!   -> DiffusionConv(input -> hidden) -> SiLU
//!   -> SeResBlock x depth
//!   -> DiffusionConv(hidden -> output)
//!   -> permute -> (batch, output, nodes) -> squeeze -> clamp(min_lim)
//! ```
//!
//! # Axis Order
//!
//! [`GxNet::forward`] takes **time-major** input `(batch, timesteps, nodes)`,
//! while every block inside works **node-major** `(batch, nodes, channels)`.
//! The network permutes on the way in and out.
//!
//! # Learnable Transitions
//!
//! The stored matrices are unconstrained logits, updated by an external
//! optimizer between calls. Every forward pass rebuilds fresh normalized
//! copies; the parameters themselves are never written here.

use crate::activation::Activation;
use crate::conv::DiffusionConv;
use crate::error::{Error, Result};
use crate::init::ParamInit;
use crate::residual::SeResBlock;
use crate::transform::{rectified_transition, square_dim};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GxNetConfig {
    /// Number of stations N (default: 0, must be set).
    pub num_nodes: usize,
    /// Input time steps per station (default: 1).
    pub input_dim: usize,
    /// Hidden channels (default: 64).
    pub hidden_dim: usize,
    /// Output channels per station (default: 1).
    pub output_dim: usize,
    /// Number of squeeze-and-excitation blocks (default: 2).
    pub depth: usize,
    /// Diffusion steps per direction (default: 2).
    pub order: usize,
    /// Lower bound applied to every output, e.g. 0.0 for wind speed.
    pub min_lim: Option<f64>,
    /// Weight initialization seed (default: 42).
    pub seed: u64,
    /// Activation inside the entry and residual diffusion blocks
    /// (default: identity). The exit block is always linear.
    pub diffusion_activation: Activation,
    /// Fail on NaN/Inf in the diffusion basis (default: true).
    pub check_finite: bool,
}

impl Default for GxNetConfig {
    fn default() -> Self {
        Self {
            num_nodes: 0,
            input_dim: 1,
            hidden_dim: 64,
            output_dim: 1,
            depth: 2,
            order: 2,
            min_lim: None,
            seed: 42,
            diffusion_activation: Activation::Identity,
            check_finite: true,
        }
    }
}

impl GxNetConfig {
    pub fn new(num_nodes: usize, input_dim: usize, hidden_dim: usize, output_dim: usize) -> Self {
        Self {
            num_nodes,
            input_dim,
            hidden_dim,
            output_dim,
            ..Default::default()
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    pub fn with_min_lim(mut self, min_lim: f64) -> Self {
        self.min_lim = Some(min_lim);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_diffusion_activation(mut self, activation: Activation) -> Self {
        self.diffusion_activation = activation;
        self
    }

    pub fn with_finite_check(mut self, check: bool) -> Self {
        self.check_finite = check;
        self
    }

    /// Reject zero sizes and a non-finite floor.
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("num_nodes", self.num_nodes),
            ("input_dim", self.input_dim),
            ("hidden_dim", self.hidden_dim),
            ("output_dim", self.output_dim),
            ("depth", self.depth),
            ("order", self.order),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{field} must be positive")));
            }
        }
        if let Some(floor) = self.min_lim {
            if !floor.is_finite() {
                return Err(Error::InvalidConfig(format!(
                    "min_lim must be finite, got {floor}"
                )));
            }
        }
        Ok(())
    }
}

/// Station reconstruction network.
#[derive(Debug, Clone)]
pub struct GxNet {
    config: GxNetConfig,
    begin: DiffusionConv,
    blocks: Vec<SeResBlock>,
    end: DiffusionConv,
    adjust_a_q: Tensor,
    adjust_a_h: Tensor,
}

impl GxNet {
    /// Build the network and register its parameters in `varmap`.
    ///
    /// # Arguments
    /// - `config`: Validated before anything is allocated
    /// - `given_a_q`, `given_a_h`: Initial forward/backward transition
    ///   matrices `(num_nodes, num_nodes)`, copied into the trainable
    ///   parameters `adjust_a_q` / `adjust_a_h`
    /// - `varmap`: Receives every trainable variable (F32)
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] for a bad configuration,
    /// [`Error::ShapeMismatch`] when a matrix is not `num_nodes` square.
    pub fn new(
        config: GxNetConfig,
        given_a_q: &Tensor,
        given_a_h: &Tensor,
        varmap: &VarMap,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        let n = config.num_nodes;
        for given in [given_a_q, given_a_h] {
            if square_dim(given, "initial transition matrix")? != n {
                return Err(Error::shape("initial transition matrix", &[n, n], given.dims()));
            }
        }

        let mut init = ParamInit::new(varmap, config.seed, DType::F32, device);

        let begin = DiffusionConv::new(config.input_dim, config.hidden_dim, config.order, &mut init, "begin")?
            .with_activation(config.diffusion_activation)
            .with_finite_check(config.check_finite);

        let blocks = (0..config.depth)
            .map(|i| {
                SeResBlock::new(config.hidden_dim, config.order, &mut init, &format!("blocks.{i}"))
                    .map(|b| {
                        b.with_diffusion_activation(config.diffusion_activation)
                            .with_finite_check(config.check_finite)
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let end = DiffusionConv::new(config.hidden_dim, config.output_dim, config.order, &mut init, "end")?
            .with_finite_check(config.check_finite);

        let adjust_a_q = init.from_tensor("adjust_a_q", given_a_q)?;
        let adjust_a_h = init.from_tensor("adjust_a_h", given_a_h)?;

        debug!(
            nodes = n,
            input = config.input_dim,
            hidden = config.hidden_dim,
            output = config.output_dim,
            depth = config.depth,
            order = config.order,
            "built gxnet"
        );

        Ok(Self {
            config,
            begin,
            blocks,
            end,
            adjust_a_q,
            adjust_a_h,
        })
    }

    pub fn config(&self) -> &GxNetConfig {
        &self.config
    }

    /// The raw (pre-normalization) transition parameters.
    pub fn transition_params(&self) -> (&Tensor, &Tensor) {
        (&self.adjust_a_q, &self.adjust_a_h)
    }

    /// Column-stochastic transition matrices derived from the current
    /// parameters. Pure: recomputed on every call, parameters untouched.
    pub fn normalized_transitions(&self) -> Result<(Tensor, Tensor)> {
        Ok((
            rectified_transition(&self.adjust_a_q)?,
            rectified_transition(&self.adjust_a_h)?,
        ))
    }

    /// Forward pass without the final squeeze.
    ///
    /// # Arguments
    /// - `x`: Observations `(batch, timesteps, nodes)` with
    ///   `timesteps == input_dim`
    ///
    /// # Returns
    /// - `(batch, output_dim, nodes)`, clamped to `min_lim` when set
    pub fn forward_unsqueezed(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, steps, nodes) = match *x.dims() {
            [b, t, n] => (b, t, n),
            ref dims => {
                return Err(Error::shape(
                    "gxnet input",
                    &[0, self.config.input_dim, self.config.num_nodes],
                    dims,
                ))
            }
        };
        if steps != self.config.input_dim || nodes != self.config.num_nodes {
            return Err(Error::shape(
                "gxnet input",
                &[batch, self.config.input_dim, self.config.num_nodes],
                x.dims(),
            ));
        }

        let (a_q, a_h) = self.normalized_transitions()?;

        let mut h = x.permute((0, 2, 1))?.contiguous()?;
        h = self.begin.forward(&h, &a_q, &a_h)?.silu()?;
        for block in &self.blocks {
            h = block.forward(&h, &a_q, &a_h)?;
        }
        h = self.end.forward(&h, &a_q, &a_h)?;
        trace!(batch, nodes, "gxnet forward");

        let mut out = h.permute((0, 2, 1))?.contiguous()?;
        if let Some(floor) = self.config.min_lim {
            out = out.maximum(floor)?;
        }
        Ok(out)
    }

    /// Forward pass.
    ///
    /// Input `(batch, timesteps, nodes)`; output `(batch, output_dim, nodes)`
    /// with every size-1 dimension removed, so `output_dim = 1` yields
    /// `(batch, nodes)` and a single sample with `output_dim = 1` yields
    /// `(nodes,)`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        squeeze_singletons(&self.forward_unsqueezed(x)?)
    }
}

/// Drop every dimension of size one.
pub fn squeeze_singletons(t: &Tensor) -> Result<Tensor> {
    let dims: Vec<usize> = t.dims().iter().copied().filter(|&d| d != 1).collect();
    Ok(t.reshape(dims)?)
}
