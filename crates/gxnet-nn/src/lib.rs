//! Graph neural network blocks for reconstructing station observations.
//!
//! `gxnet-nn` interpolates meteorological fields (wind speed, temperature)
//! over a fixed set of stations. Stations are graph nodes; their coupling
//! is a pair of column-stochastic transition matrices that the network can
//! also refine during training.
//!
//! # Modules
//!
//! - [`transform`]: Random-walk matrices and safe column normalization
//! - [`conv`]: Diffusion, Chebyshev, kernel and attention convolutions
//! - [`residual`]: Squeeze-and-excitation block around a diffusion conv
//! - [`network`]: The composite reconstruction network [`GxNet`]
//! - [`init`]: Seeded parameter initialization into a `VarMap`
//! - [`activation`]: Activation selector
//!
//! # Axis Conventions
//!
//! | Entry point | Input | Output |
//! |-------------|-------|--------|
//! | [`GxNet::forward`] | `(batch, timesteps, nodes)` | `(batch, output, nodes)`, size-1 dims squeezed |
//! | Every block in [`conv`] / [`residual`] | `(batch, nodes, channels)` | `(batch, nodes, channels')` |
//!
//! # Example
//!
//! ```rust,ignore
//! use gxnet_nn::{transform::transition_pair, GxNet, GxNetConfig};
//! use candle_core::{Device, Tensor};
//! use candle_nn::VarMap;
//!
//! let device = Device::Cpu;
//! let (a_q, a_h) = transition_pair(&adjacency)?;   // (50, 50)
//!
//! let config = GxNetConfig::new(50, 10, 64, 1)
//!     .with_depth(3)
//!     .with_order(2)
//!     .with_min_lim(0.0);                           // wind speed >= 0
//!
//! let varmap = VarMap::new();
//! let net = GxNet::new(config, &a_q, &a_h, &varmap, &device)?;
//! let out = net.forward(&obs)?;                     // (batch, 50)
//! ```

pub mod activation;
pub mod conv;
pub mod error;
pub mod init;
pub mod network;
pub mod residual;
pub mod transform;

pub use activation::Activation;
pub use conv::{ChebConv, DiffusionConv, GraphAttention, GraphConv, KernelConv, Supports};
pub use error::{Error, Result};
pub use init::ParamInit;
pub use network::{GxNet, GxNetConfig};
pub use residual::SeResBlock;
