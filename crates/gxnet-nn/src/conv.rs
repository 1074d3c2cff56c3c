//! Graph convolution blocks over a fixed station graph.
//!
//! Implements the spectral/spatial operators used for station
//! reconstruction:
//! - [`DiffusionConv`]: bidirectional diffusion convolution (Li et al., 2018)
//! - [`ChebConv`]: Chebyshev-basis convolution with diagonal gating
//! - [`KernelConv`]: single-hop diagonal gating
//! - [`GraphAttention`]: dense, threshold-masked attention (Velickovic et al., 2018)
//!
//! # Tensor Layout
//!
//! Every block takes node features as `(batch, nodes, channels)`. On the
//! first block of a network the channels are the observation time steps;
//! afterwards they are hidden features. The node axis is never reordered or
//! resized by a block.
//!
//! The blocks share no state, only the calling contract "features plus
//! structural matrices in, features out", which [`GraphConv`] expresses as a
//! closed set of variants.

use crate::activation::Activation;
use crate::error::{Error, Result};
use crate::init::ParamInit;
use crate::transform::{ensure_finite, square_dim};
use candle_core::{Tensor, D};
use tracing::trace;

/// Masked attention logits are replaced with this before the softmax.
pub const MASK_SENTINEL: f32 = -9e15;

fn dims3(x: &Tensor, context: &'static str) -> Result<(usize, usize, usize)> {
    match *x.dims() {
        [b, n, c] => Ok((b, n, c)),
        ref dims => Err(Error::ShapeMismatch {
            context,
            expected: vec![0, 0, 0],
            got: dims.to_vec(),
        }),
    }
}

fn check_features(x: &Tensor, in_features: usize, context: &'static str) -> Result<(usize, usize)> {
    let (batch, nodes, features) = dims3(x, context)?;
    if features != in_features {
        return Err(Error::shape(context, &[batch, nodes, in_features], x.dims()));
    }
    Ok((batch, nodes))
}

fn check_support(m: &Tensor, nodes: usize, context: &'static str) -> Result<()> {
    let n = square_dim(m, context)?;
    if n != nodes {
        return Err(Error::shape(context, &[nodes, nodes], m.dims()));
    }
    Ok(())
}

fn check_widths(in_features: usize, out_features: usize, layer: &str) -> Result<()> {
    if in_features == 0 || out_features == 0 {
        return Err(Error::InvalidConfig(format!(
            "{layer}: feature widths must be positive, got {in_features} -> {out_features}"
        )));
    }
    Ok(())
}

/// `(batch, nodes, in) x (in, out) + bias -> (batch, nodes, out)`
fn project(h: &Tensor, theta: &Tensor, bias: &Tensor) -> Result<Tensor> {
    let (batch, nodes, features) = dims3(h, "projection")?;
    let out = theta.dim(1)?;
    let y = h
        .reshape((batch * nodes, features))?
        .matmul(theta)?
        .reshape((batch, nodes, out))?
        .broadcast_add(bias)?;
    Ok(y)
}

/// Scale each node's features by the matching diagonal entry of `m`.
///
/// Off-diagonal entries of `m` are ignored: this is the `"kk,bkj->bkj"`
/// contraction, a per-node scalar gate rather than a neighbor mix.
fn diagonal_gate(x: &Tensor, m: &Tensor) -> Result<Tensor> {
    let n = m.dim(0)?;
    let eye = Tensor::eye(n, m.dtype(), m.device())?;
    let diag = (m * &eye)?.sum(1)?.reshape((1, n, 1))?;
    Ok(x.broadcast_mul(&diag)?)
}

/// Bidirectional diffusion graph convolution.
///
/// Builds a polynomial basis of the input over a forward and a backward
/// transition matrix and mixes all terms with one learnable linear map:
///
/// ```text
/// x_0 = X
/// x_1 = S x_0
/// x_k = 2 S x_{k-1} - x_{k-2}      (2 <= k <= K)
///
/// H = [x_0, x_1(A_q) .. x_K(A_q), x_1(A_h) .. x_K(A_h)] Theta + b
/// ```
///
/// The basis has `2K + 1` terms. With `K = 0` it collapses to the identity
/// term and the block is a plain per-node linear map.
///
/// The backward recursion restarts from `x_0`. Weights trained with a basis
/// that seeds the backward support from the last forward term give
/// different outputs here for `K >= 2`.
///
/// # Activation
///
/// The activation is [`Activation::Identity`] unless set with
/// [`with_activation`](Self::with_activation). Enabling it changes the
/// numerics of any trained weights.
///
/// # Reference
///
/// Li et al., "Diffusion Convolutional Recurrent Neural Network:
/// Data-Driven Traffic Forecasting", ICLR 2018.
#[derive(Debug, Clone)]
pub struct DiffusionConv {
    /// (in_features * (2K + 1), out_features)
    theta: Tensor,
    bias: Tensor,
    in_features: usize,
    out_features: usize,
    order: usize,
    activation: Activation,
    check_finite: bool,
}

impl DiffusionConv {
    /// Create a diffusion block.
    ///
    /// # Arguments
    /// - `in_features`: Input channels (time steps for an entry block)
    /// - `out_features`: Output channels per node
    /// - `order`: Diffusion steps K per direction
    /// - `init`: Seeded initializer; parameters land under `{name}.theta`
    ///   and `{name}.bias`
    pub fn new(
        in_features: usize,
        out_features: usize,
        order: usize,
        init: &mut ParamInit<'_>,
        name: &str,
    ) -> Result<Self> {
        check_widths(in_features, out_features, "diffusion conv")?;
        let num_matrices = 2 * order + 1;
        let stdv = 1.0 / (out_features as f64).sqrt();
        let theta = init.uniform(
            &format!("{name}.theta"),
            &[in_features * num_matrices, out_features],
            stdv,
        )?;
        let bias = init.uniform(&format!("{name}.bias"), &[out_features], stdv)?;

        Ok(Self {
            theta,
            bias,
            in_features,
            out_features,
            order,
            activation: Activation::Identity,
            check_finite: true,
        })
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Toggle the NaN/Inf check on the diffusion basis (on by default).
    pub fn with_finite_check(mut self, check: bool) -> Self {
        self.check_finite = check;
        self
    }

    pub fn num_matrices(&self) -> usize {
        2 * self.order + 1
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn weight(&self) -> &Tensor {
        &self.theta
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `x`: Node features `(batch, nodes, in_features)`
    /// - `a_q`: Forward transition matrix `(nodes, nodes)`
    /// - `a_h`: Backward transition matrix `(nodes, nodes)`
    ///
    /// # Returns
    /// - Node features `(batch, nodes, out_features)`
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] when the channel count differs from
    /// `in_features` or the matrices do not match the node count;
    /// [`Error::NumericInstability`] when the basis is not finite.
    pub fn forward(&self, x: &Tensor, a_q: &Tensor, a_h: &Tensor) -> Result<Tensor> {
        let (batch, nodes) = check_features(x, self.in_features, "diffusion conv input")?;
        check_support(a_q, nodes, "diffusion conv forward transition")?;
        check_support(a_h, nodes, "diffusion conv backward transition")?;

        // (nodes, in * batch): every column is one (feature, sample) signal
        let x0 = x
            .permute((1, 2, 0))?
            .reshape((nodes, self.in_features * batch))?;

        let mut terms = Vec::with_capacity(self.num_matrices());
        terms.push(x0.clone());
        if self.order > 0 {
            for support in [a_q, a_h] {
                let mut prev = x0.clone();
                let mut curr = support.matmul(&x0)?;
                terms.push(curr.clone());
                for _ in 2..=self.order {
                    let next = ((support.matmul(&curr)? * 2.0)? - &prev)?;
                    terms.push(next.clone());
                    prev = curr;
                    curr = next;
                }
            }
        }

        let basis = Tensor::stack(&terms, 0)?;
        if self.check_finite {
            ensure_finite(&basis, "diffusion basis")?;
        }
        trace!(terms = terms.len(), batch, nodes, "diffusion basis");

        // (M, nodes, in, batch) -> (batch, nodes, in * M)
        let h = basis
            .reshape((self.num_matrices(), nodes, self.in_features, batch))?
            .permute((3, 1, 2, 0))?
            .reshape((batch, nodes, self.in_features * self.num_matrices()))?;

        let out = project(&h, &self.theta, &self.bias)?;
        self.activation.apply(&out)
    }
}

/// Chebyshev-basis graph convolution with diagonal gating.
///
/// The basis is built on the matrices themselves:
///
/// ```text
/// T_0 = I
/// T_1 = L
/// T_k = 2 L T_{k-1} - T_{k-2}
/// ```
///
/// Each term contributes only its diagonal, as a per-node gate on the
/// input. The K gated copies are concatenated along the channel axis and
/// mapped to the output width, followed by the activation (always applied,
/// unlike [`DiffusionConv`]).
///
/// | K | Basis |
/// |---|-------|
/// | 1 | Identity only (plain linear map) |
/// | 2 | Identity + diag(L) gate |
/// | 3+ | Higher-order return probabilities |
///
/// # Reference
///
/// Defferrard et al., "Convolutional Neural Networks on Graphs with Fast
/// Localized Spectral Filtering", NeurIPS 2016.
#[derive(Debug, Clone)]
pub struct ChebConv {
    /// (in_features * K, out_features)
    theta: Tensor,
    bias: Tensor,
    in_features: usize,
    out_features: usize,
    order: usize,
    activation: Activation,
    check_finite: bool,
}

impl ChebConv {
    /// Create a Chebyshev block with ReLU activation.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] when `order` is zero.
    pub fn new(
        in_features: usize,
        out_features: usize,
        order: usize,
        init: &mut ParamInit<'_>,
        name: &str,
    ) -> Result<Self> {
        check_widths(in_features, out_features, "chebyshev conv")?;
        if order == 0 {
            return Err(Error::InvalidConfig(
                "chebyshev conv: order must be >= 1".into(),
            ));
        }
        let stdv = 1.0 / (out_features as f64).sqrt();
        let theta = init.uniform(
            &format!("{name}.theta"),
            &[in_features * order, out_features],
            stdv,
        )?;
        let bias = init.uniform(&format!("{name}.bias"), &[out_features], stdv)?;

        Ok(Self {
            theta,
            bias,
            in_features,
            out_features,
            order,
            activation: Activation::Relu,
            check_finite: true,
        })
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_finite_check(mut self, check: bool) -> Self {
        self.check_finite = check;
        self
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// The K basis matrices for `laplacian`.
    pub fn basis(&self, laplacian: &Tensor) -> Result<Vec<Tensor>> {
        let n = square_dim(laplacian, "chebyshev basis")?;
        let mut terms: Vec<Tensor> = Vec::with_capacity(self.order);
        terms.push(Tensor::eye(n, laplacian.dtype(), laplacian.device())?);
        if self.order > 1 {
            terms.push(laplacian.clone());
        }
        for k in 2..self.order {
            let next = ((laplacian.matmul(&terms[k - 1])? * 2.0)? - &terms[k - 2])?;
            terms.push(next);
        }
        Ok(terms)
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `x`: Node features `(batch, nodes, in_features)`
    /// - `laplacian`: Normalized matrix `(nodes, nodes)`
    ///
    /// # Returns
    /// - Node features `(batch, nodes, out_features)`
    pub fn forward(&self, x: &Tensor, laplacian: &Tensor) -> Result<Tensor> {
        let (_, nodes) = check_features(x, self.in_features, "chebyshev conv input")?;
        check_support(laplacian, nodes, "chebyshev conv matrix")?;

        let terms = self.basis(laplacian)?;
        if self.check_finite {
            ensure_finite(&Tensor::stack(&terms, 0)?, "chebyshev basis")?;
        }
        let gated = terms
            .iter()
            .map(|t| diagonal_gate(x, t))
            .collect::<Result<Vec<_>>>()?;
        let features = Tensor::cat(&gated, 2)?;

        let out = project(&features, &self.theta, &self.bias)?;
        self.activation.apply(&out)
    }
}

/// Single-hop kernel convolution.
///
/// Gates each node by the diagonal of the given normalized adjacency, then
/// applies one linear map. The default activation is SELU: ReLU tends to
/// kill the signal of this block when reconstructing unobserved stations.
#[derive(Debug, Clone)]
pub struct KernelConv {
    theta: Tensor,
    bias: Tensor,
    in_features: usize,
    out_features: usize,
    activation: Activation,
}

impl KernelConv {
    pub fn new(
        in_features: usize,
        out_features: usize,
        init: &mut ParamInit<'_>,
        name: &str,
    ) -> Result<Self> {
        check_widths(in_features, out_features, "kernel conv")?;
        let stdv = 1.0 / (out_features as f64).sqrt();
        let theta = init.uniform(&format!("{name}.theta"), &[in_features, out_features], stdv)?;
        let bias = init.uniform(&format!("{name}.bias"), &[out_features], stdv)?;

        Ok(Self {
            theta,
            bias,
            in_features,
            out_features,
            activation: Activation::Selu,
        })
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// `x`: `(batch, nodes, in_features)`, `adj`: `(nodes, nodes)`.
    pub fn forward(&self, x: &Tensor, adj: &Tensor) -> Result<Tensor> {
        let (_, nodes) = check_features(x, self.in_features, "kernel conv input")?;
        check_support(adj, nodes, "kernel conv matrix")?;

        let features = diagonal_gate(x, adj)?;
        let out = project(&features, &self.theta, &self.bias)?;
        self.activation.apply(&out)
    }
}

/// Dense graph attention over all station pairs.
///
/// ```text
/// e_ij    = LeakyReLU(a^T [h_i || h_j])
/// e_ij    = -9e15                  if adj_ij <= threshold
/// alpha_i = softmax_j(e_ij)
/// h_i'    = sum_j alpha_ij h_j     (ELU applied in concat mode)
/// ```
///
/// There is no feature projection: the block only re-weights neighbors, so
/// the channel count is unchanged. The first layer of a stack should run
/// with `concat = false` (linear output).
///
/// A station with no edge above the threshold has every logit masked to the
/// same sentinel, so its softmax row is uniform and it falls back to mean
/// pooling over all stations.
#[derive(Debug, Clone)]
pub struct GraphAttention {
    /// (2 * channels, 1); rows [0, C) score the target, [C, 2C) the neighbor
    a: Tensor,
    channels: usize,
    negative_slope: f64,
    threshold: f64,
    concat: bool,
}

impl GraphAttention {
    /// Create an attention block.
    ///
    /// # Arguments
    /// - `channels`: Feature channels per node
    /// - `negative_slope`: LeakyReLU slope (alpha)
    /// - `threshold`: Pairs with adjacency <= threshold are masked
    /// - `concat`: Apply ELU to the output
    pub fn new(
        channels: usize,
        negative_slope: f64,
        threshold: f64,
        concat: bool,
        init: &mut ParamInit<'_>,
        name: &str,
    ) -> Result<Self> {
        check_widths(channels, channels, "graph attention")?;
        let a = init.xavier_uniform(&format!("{name}.a"), (2 * channels, 1), 1.414)?;
        Ok(Self {
            a,
            channels,
            negative_slope,
            threshold,
            concat,
        })
    }

    pub fn out_features(&self) -> usize {
        self.channels
    }

    /// Row-stochastic attention weights `(batch, nodes, nodes)`.
    pub fn attention(&self, h: &Tensor, adj: &Tensor) -> Result<Tensor> {
        let (batch, nodes) = check_features(h, self.channels, "graph attention input")?;
        check_support(adj, nodes, "graph attention adjacency")?;
        let c = self.channels;

        // [h_i || h_j] . a splits into a per-target and a per-neighbor score
        let flat = h.reshape((batch * nodes, c))?;
        let target = flat.matmul(&self.a.narrow(0, 0, c)?)?.reshape((batch, nodes, 1))?;
        let neighbor = flat.matmul(&self.a.narrow(0, c, c)?)?.reshape((batch, 1, nodes))?;
        let e = target.broadcast_add(&neighbor)?;
        let e = (e.maximum(0.0)? + (e.minimum(0.0)? * self.negative_slope)?)?;

        let mask = adj
            .gt(self.threshold)?
            .unsqueeze(0)?
            .broadcast_as((batch, nodes, nodes))?;
        let sentinel = Tensor::full(MASK_SENTINEL, (batch, nodes, nodes), h.device())?
            .to_dtype(h.dtype())?;
        let logits = mask.where_cond(&e, &sentinel)?;

        Ok(candle_nn::ops::softmax(&logits, D::Minus1)?)
    }

    /// `h`: `(batch, nodes, channels)`, `adj`: `(nodes, nodes)`.
    pub fn forward(&self, h: &Tensor, adj: &Tensor) -> Result<Tensor> {
        let attention = self.attention(h, adj)?;
        let out = attention.matmul(&h.contiguous()?)?;
        if self.concat {
            Ok(out.elu(1.0)?)
        } else {
            Ok(out)
        }
    }
}

/// Structural matrices handed to a [`GraphConv`].
#[derive(Debug, Clone, Copy)]
pub enum Supports<'a> {
    /// Forward and backward transition matrices (diffusion).
    Pair {
        forward: &'a Tensor,
        backward: &'a Tensor,
    },
    /// One normalized matrix (Chebyshev, kernel, attention).
    Single(&'a Tensor),
}

impl Supports<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Supports::Pair { .. } => "paired",
            Supports::Single(_) => "single",
        }
    }
}

/// The closed set of graph convolution operators.
#[derive(Debug, Clone)]
pub enum GraphConv {
    Diffusion(DiffusionConv),
    Chebyshev(ChebConv),
    Kernel(KernelConv),
    Attention(GraphAttention),
}

impl GraphConv {
    pub fn name(&self) -> &'static str {
        match self {
            GraphConv::Diffusion(_) => "diffusion",
            GraphConv::Chebyshev(_) => "chebyshev",
            GraphConv::Kernel(_) => "kernel",
            GraphConv::Attention(_) => "attention",
        }
    }

    pub fn out_features(&self) -> usize {
        match self {
            GraphConv::Diffusion(c) => c.out_features(),
            GraphConv::Chebyshev(c) => c.out_features(),
            GraphConv::Kernel(c) => c.out_features(),
            GraphConv::Attention(c) => c.out_features(),
        }
    }

    /// Forward pass on `(batch, nodes, channels)` features.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] when the support kind does not fit the
    /// operator (diffusion needs [`Supports::Pair`], the rest
    /// [`Supports::Single`]).
    pub fn forward(&self, x: &Tensor, supports: Supports<'_>) -> Result<Tensor> {
        match (self, supports) {
            (GraphConv::Diffusion(c), Supports::Pair { forward, backward }) => {
                c.forward(x, forward, backward)
            }
            (GraphConv::Chebyshev(c), Supports::Single(m)) => c.forward(x, m),
            (GraphConv::Kernel(c), Supports::Single(m)) => c.forward(x, m),
            (GraphConv::Attention(c), Supports::Single(m)) => c.forward(x, m),
            (conv, supports) => Err(Error::InvalidConfig(format!(
                "{} conv does not take {} supports",
                conv.name(),
                supports.kind()
            ))),
        }
    }
}

impl From<DiffusionConv> for GraphConv {
    fn from(c: DiffusionConv) -> Self {
        GraphConv::Diffusion(c)
    }
}

impl From<ChebConv> for GraphConv {
    fn from(c: ChebConv) -> Self {
        GraphConv::Chebyshev(c)
    }
}

impl From<KernelConv> for GraphConv {
    fn from(c: KernelConv) -> Self {
        GraphConv::Kernel(c)
    }
}

impl From<GraphAttention> for GraphConv {
    fn from(c: GraphAttention) -> Self {
        GraphConv::Attention(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    fn ring(n: usize, device: &Device) -> Tensor {
        let mut data = vec![0f32; n * n];
        for i in 0..n {
            data[i * n + (i + 1) % n] = 0.5;
            data[((i + 1) % n) * n + i] = 0.5;
        }
        Tensor::from_vec(data, (n, n), device).unwrap()
    }

    #[test]
    fn test_diffusion_forward_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 0, DType::F32, &device);

        let conv = DiffusionConv::new(12, 16, 2, &mut init, "gnn").unwrap();
        assert_eq!(conv.num_matrices(), 5);

        let x = Tensor::randn(0f32, 1f32, (4, 6, 12), &device).unwrap();
        let a = ring(6, &device);

        let out = conv.forward(&x, &a, &a).unwrap();
        assert_eq!(out.dims(), &[4, 6, 16]);
        assert_eq!(conv.weight().dims(), &[60, 16]);
    }

    #[test]
    fn test_diffusion_order_zero_is_linear_map() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 3, DType::F32, &device);

        let conv = DiffusionConv::new(3, 2, 0, &mut init, "gnn").unwrap();
        assert_eq!(conv.num_matrices(), 1);

        let x = Tensor::randn(0f32, 1f32, (2, 4, 3), &device).unwrap();
        let a = ring(4, &device);
        let out = conv.forward(&x, &a, &a).unwrap();

        let expected = x
            .reshape((8, 3))
            .unwrap()
            .matmul(conv.weight())
            .unwrap()
            .reshape((2, 4, 2))
            .unwrap()
            .broadcast_add(conv.bias())
            .unwrap();
        assert!(max_abs_diff(&out, &expected) < 1e-5);
    }

    #[test]
    fn test_diffusion_identity_transitions_repeat_input() {
        // With S = I every basis term is x_0 or 2x - x = x, so the output
        // equals x projected through the summed weight slices.
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 5, DType::F32, &device);

        let conv = DiffusionConv::new(1, 1, 2, &mut init, "gnn").unwrap();
        let eye = Tensor::eye(3, DType::F32, &device).unwrap();
        let x = Tensor::new(&[[[1f32], [2.0], [3.0]]], &device).unwrap();

        let out = conv.forward(&x, &eye, &eye).unwrap();
        let w_sum = conv.weight().sum_all().unwrap().to_scalar::<f32>().unwrap();
        let b = conv.bias().to_vec1::<f32>().unwrap()[0];

        let vals = out.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        for (i, v) in vals.iter().enumerate() {
            let expected = (i as f32 + 1.0) * w_sum + b;
            assert!((v - expected).abs() < 1e-4, "node {i}: {v} vs {expected}");
        }
    }

    #[test]
    fn test_diffusion_rejects_node_mismatch() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 0, DType::F32, &device);
        let conv = DiffusionConv::new(3, 4, 1, &mut init, "gnn").unwrap();

        let x = Tensor::randn(0f32, 1f32, (2, 7, 3), &device).unwrap();
        let a = ring(5, &device);

        let err = conv.forward(&x, &a, &a).unwrap_err();
        match err {
            Error::ShapeMismatch { expected, got, .. } => {
                assert_eq!(expected, vec![7, 7]);
                assert_eq!(got, vec![5, 5]);
            }
            other => panic!("expected shape mismatch, got {other}"),
        }
    }

    #[test]
    fn test_diffusion_rejects_channel_mismatch() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 0, DType::F32, &device);
        let conv = DiffusionConv::new(3, 4, 1, &mut init, "gnn").unwrap();

        let x = Tensor::randn(0f32, 1f32, (2, 5, 6), &device).unwrap();
        let a = ring(5, &device);
        assert!(matches!(
            conv.forward(&x, &a, &a),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_diffusion_detects_nan_transitions() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 0, DType::F32, &device);
        let conv = DiffusionConv::new(2, 2, 1, &mut init, "gnn").unwrap();

        let x = Tensor::ones((1, 2, 2), DType::F32, &device).unwrap();
        let bad = Tensor::new(&[[f32::NAN, 0.0], [0.0, 1.0]], &device).unwrap();

        let err = conv.forward(&x, &bad, &bad).unwrap_err();
        assert!(matches!(err, Error::NumericInstability { .. }));

        // Disabling the check lets the NaN through
        let unchecked = conv.with_finite_check(false);
        assert!(unchecked.forward(&x, &bad, &bad).is_ok());
    }

    fn matvec(a: &[Vec<f32>], v: &[f32]) -> Vec<f32> {
        a.iter()
            .map(|row| row.iter().zip(v).map(|(w, x)| w * x).sum())
            .collect()
    }

    fn sample_input(device: &Device) -> Tensor {
        // (batch 2, nodes 3, channels 2)
        let data = vec![
            0.5f32, -1.0, 1.5, 2.0, -0.5, 0.25, //
            1.0, 0.0, -2.0, 0.75, 0.3, -1.2,
        ];
        Tensor::from_vec(data, (2, 3, 2), device).unwrap()
    }

    #[test]
    fn test_diffusion_matches_per_support_basis() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 3, DType::F32, &device);
        let order = 2;
        let conv = DiffusionConv::new(2, 3, order, &mut init, "dgcn").unwrap();

        let x = sample_input(&device);
        let a_q = Tensor::new(
            &[[0.0f32, 0.7, 0.2], [1.0, 0.0, 0.3], [0.0, 0.3, 0.5]],
            &device,
        )
        .unwrap();
        let a_h = Tensor::new(
            &[[0.4f32, 0.0, 1.0], [0.6, 0.2, 0.0], [0.0, 0.8, 0.0]],
            &device,
        )
        .unwrap();

        let out_t = conv.forward(&x, &a_q, &a_h).unwrap();
        let out = out_t.to_vec3::<f32>().unwrap();

        let xv = x.to_vec3::<f32>().unwrap();
        let aq = a_q.to_vec2::<f32>().unwrap();
        let ah = a_h.to_vec2::<f32>().unwrap();
        let theta = conv.weight().to_vec2::<f32>().unwrap();
        let bias = conv.bias().to_vec1::<f32>().unwrap();
        let m_total = conv.num_matrices();

        let mut expected = vec![vec![bias.clone(); 3]; 2];
        for b in 0..2 {
            for c in 0..2 {
                let x0: Vec<f32> = (0..3).map(|i| xv[b][i][c]).collect();
                // [x0, A_q terms 1..K, A_h terms 1..K], each support from x0
                let mut terms = vec![x0.clone()];
                for a in [&aq, &ah] {
                    let mut prev = x0.clone();
                    let mut curr = matvec(a, &x0);
                    terms.push(curr.clone());
                    for _ in 2..=order {
                        let next: Vec<f32> = matvec(a, &curr)
                            .iter()
                            .zip(&prev)
                            .map(|(ax, p)| 2.0 * ax - p)
                            .collect();
                        terms.push(next.clone());
                        prev = curr;
                        curr = next;
                    }
                }
                assert_eq!(terms.len(), m_total);

                for (m, term) in terms.iter().enumerate() {
                    for i in 0..3 {
                        for o in 0..3 {
                            expected[b][i][o] += term[i] * theta[c * m_total + m][o];
                        }
                    }
                }
            }
        }

        for b in 0..2 {
            for i in 0..3 {
                for o in 0..3 {
                    let (got, want) = (out[b][i][o], expected[b][i][o]);
                    assert!((got - want).abs() < 1e-4, "[{b}][{i}][{o}]: {got} vs {want}");
                }
            }
        }

        // Forward and backward supports are not interchangeable
        let swapped = conv.forward(&x, &a_h, &a_q).unwrap();
        assert!(max_abs_diff(&out_t, &swapped) > 1e-3);
    }

    #[test]
    fn test_chebyshev_order_one_matches_kernel_on_identity() {
        let device = Device::Cpu;
        let cheb_vars = VarMap::new();
        let kernel_vars = VarMap::new();
        let mut cheb_init = ParamInit::new(&cheb_vars, 7, DType::F32, &device);
        let mut kernel_init = ParamInit::new(&kernel_vars, 7, DType::F32, &device);

        let cheb = ChebConv::new(3, 2, 1, &mut cheb_init, "cheb")
            .unwrap()
            .with_activation(Activation::Selu);
        let kernel = KernelConv::new(3, 2, &mut kernel_init, "kgcn").unwrap();

        let x = Tensor::randn(0f32, 1f32, (2, 4, 3), &device).unwrap();
        let eye = Tensor::eye(4, DType::F32, &device).unwrap();

        let a = cheb.forward(&x, &eye).unwrap();
        let b = kernel.forward(&x, &eye).unwrap();
        assert!(max_abs_diff(&a, &b) < 1e-6);
    }

    #[test]
    fn test_chebyshev_order_two_gates_by_diagonal() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 5, DType::F32, &device);
        let cheb = ChebConv::new(2, 3, 2, &mut init, "cheb")
            .unwrap()
            .with_activation(Activation::Identity);

        let x = sample_input(&device);
        // off-diagonal entries must not matter
        let l = Tensor::new(
            &[[0.5f32, 0.9, 0.0], [0.1, -1.0, 0.4], [0.3, 0.0, 2.0]],
            &device,
        )
        .unwrap();
        let out = cheb.forward(&x, &l).unwrap().to_vec3::<f32>().unwrap();

        let xv = x.to_vec3::<f32>().unwrap();
        let diag = [0.5f32, -1.0, 2.0];
        let theta = varmap.data().lock().unwrap()["cheb.theta"]
            .as_tensor()
            .to_vec2::<f32>()
            .unwrap();
        let bias = varmap.data().lock().unwrap()["cheb.bias"]
            .as_tensor()
            .to_vec1::<f32>()
            .unwrap();

        for b in 0..2 {
            for i in 0..3 {
                // [x * 1, x * diag(L)], term-major along channels
                let gates = [1.0, diag[i]];
                for o in 0..3 {
                    let mut want = bias[o];
                    for (m, g) in gates.iter().enumerate() {
                        for c in 0..2 {
                            want += xv[b][i][c] * g * theta[m * 2 + c][o];
                        }
                    }
                    let got = out[b][i][o];
                    assert!((got - want).abs() < 1e-5, "[{b}][{i}][{o}]: {got} vs {want}");
                }
            }
        }
    }

    #[test]
    fn test_chebyshev_forward_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 0, DType::F32, &device);

        let cheb = ChebConv::new(8, 4, 3, &mut init, "cheb").unwrap();
        let x = Tensor::randn(0f32, 1f32, (2, 5, 8), &device).unwrap();
        let out = cheb.forward(&x, &ring(5, &device)).unwrap();

        assert_eq!(out.dims(), &[2, 5, 4]);
        // ReLU output
        let vals = out.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(vals.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_chebyshev_basis_recurrence() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 0, DType::F32, &device);
        let cheb = ChebConv::new(1, 1, 3, &mut init, "cheb").unwrap();

        let l = Tensor::new(&[[0.5f32, 0.5], [0.5, 0.5]], &device).unwrap();
        let basis = cheb.basis(&l).unwrap();
        assert_eq!(basis.len(), 3);

        // T_2 = 2 L^2 - I = 2L - I for this idempotent L
        let t2 = basis[2].to_vec2::<f32>().unwrap();
        assert!((t2[0][0] - 0.0).abs() < 1e-6);
        assert!((t2[0][1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_chebyshev_rejects_order_zero() {
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 0, DType::F32, &Device::Cpu);
        let err = ChebConv::new(4, 4, 0, &mut init, "cheb").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_kernel_ignores_off_diagonal() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 0, DType::F32, &device);
        let conv = KernelConv::new(3, 2, &mut init, "kgcn").unwrap();

        let x = Tensor::randn(0f32, 1f32, (2, 4, 3), &device).unwrap();
        let eye = Tensor::eye(4, DType::F32, &device).unwrap();
        let dense = (Tensor::ones((4, 4), DType::F32, &device).unwrap() * 0.3)
            .unwrap()
            .broadcast_add(&eye)
            .unwrap();
        let diag_only = (&eye * 1.3).unwrap();

        let a = conv.forward(&x, &dense).unwrap();
        let b = conv.forward(&x, &diag_only).unwrap();
        assert_eq!(a.dims(), &[2, 4, 2]);
        assert!(max_abs_diff(&a, &b) < 1e-5);
    }

    #[test]
    fn test_attention_rows_sum_to_one() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 0, DType::F32, &device);
        let gat = GraphAttention::new(6, 0.2, 0.1, true, &mut init, "gat").unwrap();

        let h = Tensor::randn(0f32, 1f32, (3, 5, 6), &device).unwrap();
        let att = gat.attention(&h, &ring(5, &device)).unwrap();
        assert_eq!(att.dims(), &[3, 5, 5]);

        let sums = att.sum(D::Minus1).unwrap().flatten_all().unwrap();
        for s in sums.to_vec1::<f32>().unwrap() {
            assert!((s - 1.0).abs() < 1e-5);
        }

        let out = gat.forward(&h, &ring(5, &device)).unwrap();
        assert_eq!(out.dims(), &[3, 5, 6]);
    }

    #[test]
    fn test_attention_disconnected_graph_is_mean_pooling() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 0, DType::F32, &device);
        let gat = GraphAttention::new(2, 0.2, 0.5, false, &mut init, "gat").unwrap();

        let h = Tensor::randn(0f32, 1f32, (1, 4, 2), &device).unwrap();
        let adj = Tensor::zeros((4, 4), DType::F32, &device).unwrap();

        let att = gat.attention(&h, &adj).unwrap();
        for v in att.flatten_all().unwrap().to_vec1::<f32>().unwrap() {
            assert!((v - 0.25).abs() < 1e-6);
        }

        let out = gat.forward(&h, &adj).unwrap();
        let mean = h.mean_keepdim(1).unwrap().broadcast_as((1, 4, 2)).unwrap();
        assert!(max_abs_diff(&out, &mean.contiguous().unwrap()) < 1e-5);
    }

    #[test]
    fn test_attention_self_loops_only_returns_input() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 0, DType::F32, &device);
        let gat = GraphAttention::new(3, 0.2, 0.5, false, &mut init, "gat").unwrap();

        let h = Tensor::randn(0f32, 1f32, (2, 4, 3), &device).unwrap();
        let eye = Tensor::eye(4, DType::F32, &device).unwrap();

        let out = gat.forward(&h, &eye).unwrap();
        assert!(max_abs_diff(&out, &h) < 1e-5);
    }

    #[test]
    fn test_graph_conv_dispatch() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mut init = ParamInit::new(&varmap, 0, DType::F32, &device);

        let x = Tensor::randn(0f32, 1f32, (2, 5, 4), &device).unwrap();
        let a = ring(5, &device);

        let convs: Vec<GraphConv> = vec![
            DiffusionConv::new(4, 3, 1, &mut init, "d").unwrap().into(),
            ChebConv::new(4, 3, 2, &mut init, "c").unwrap().into(),
            KernelConv::new(4, 3, &mut init, "k").unwrap().into(),
            GraphAttention::new(4, 0.2, 0.0, true, &mut init, "g").unwrap().into(),
        ];

        for conv in &convs {
            let supports = match conv {
                GraphConv::Diffusion(_) => Supports::Pair {
                    forward: &a,
                    backward: &a,
                },
                _ => Supports::Single(&a),
            };
            let out = conv.forward(&x, supports).unwrap();
            assert_eq!(out.dims(), &[2, 5, conv.out_features()], "{}", conv.name());
        }

        let err = convs[0].forward(&x, Supports::Single(&a)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
