//! Transition-matrix transforms.
//!
//! The network diffuses station features with column-stochastic matrices:
//! column `j` of a transition matrix holds the share of station `j`'s signal
//! that flows to every other station in one step.
//!
//! ```text
//! P[i, j] = A[i, j] / sum_k A[k, j]
//! ```
//!
//! A column that sums to zero (an isolated station) has no valid inverse.
//! Instead of dividing by zero it is mapped to an all-zero column, so the
//! station contributes nothing rather than poisoning the whole basis with
//! NaN. This holds in the forward values and in the gradients.

use crate::error::{Error, Result};
use candle_core::{DType, Tensor};
use tracing::debug;

/// Node count of a square matrix, or a shape error naming `context`.
pub(crate) fn square_dim(m: &Tensor, context: &'static str) -> Result<usize> {
    match *m.dims() {
        [r, c] if r == c => Ok(r),
        ref dims => {
            let n = dims.first().copied().unwrap_or(0);
            Err(Error::shape(context, &[n, n], dims))
        }
    }
}

/// Scale every column of a square matrix so it sums to one.
///
/// All-zero columns stay all-zero. The zero fallback is applied before the
/// reciprocal, so backpropagating through this never produces NaN.
pub fn column_normalize(m: &Tensor) -> Result<Tensor> {
    square_dim(m, "column normalization")?;
    let sums = m.sum_keepdim(0)?; // (1, N)
    let (inv, _) = safe_inverse(&sums)?;
    Ok(m.broadcast_mul(&inv)?)
}

/// `1 / x` with zero entries mapped to zero. Also returns the zero mask.
fn safe_inverse(x: &Tensor) -> Result<(Tensor, Tensor)> {
    let zero = x.eq(0.0)?;
    let safe = zero.where_cond(&x.ones_like()?, x)?;
    let inv = zero.where_cond(&x.zeros_like()?, &safe.recip()?)?;
    Ok((inv, zero))
}

/// Random-walk transition matrix of a non-negative adjacency matrix.
///
/// Column sums are inverted with the zero fallback and applied per column,
/// giving a column-stochastic matrix. Isolated stations are reported at
/// debug level, never as an error.
///
/// This is `A D^-1`, not `D^-1 A`: scaling rows by the inverse column sums
/// would break the unit column sums for any non-symmetric `A`.
///
/// # Errors
///
/// [`Error::ShapeMismatch`] when `adj` is not square.
pub fn random_walk_matrix(adj: &Tensor) -> Result<Tensor> {
    let n = square_dim(adj, "random walk matrix")?;
    let sums = adj.sum_keepdim(0)?;
    let (inv, zero) = safe_inverse(&sums)?;
    let isolated = zero.to_dtype(DType::F32)?.sum_all()?.to_scalar::<f32>()?;
    if isolated > 0.0 {
        debug!(nodes = n, isolated = isolated as usize, "adjacency has all-zero columns");
    }
    Ok(adj.broadcast_mul(&inv)?)
}

/// Forward and backward random-walk matrices of one adjacency matrix.
///
/// The backward matrix walks the reversed edges (`A^T`). For a symmetric
/// adjacency both matrices are equal.
pub fn transition_pair(adj: &Tensor) -> Result<(Tensor, Tensor)> {
    let forward = random_walk_matrix(adj)?;
    let backward = random_walk_matrix(&adj.t()?.contiguous()?)?;
    Ok((forward, backward))
}

/// Re-derive a valid transition matrix from learnable logits.
///
/// ReLU enforces non-negativity, then the columns are normalized. The input
/// is only read; the result is a fresh tensor.
pub fn rectified_transition(param: &Tensor) -> Result<Tensor> {
    column_normalize(&param.relu()?)
}

/// Fail with [`Error::NumericInstability`] when `t` holds NaN or Inf.
pub fn ensure_finite(t: &Tensor, stage: &'static str) -> Result<()> {
    let total = t.to_dtype(DType::F64)?.sum_all()?.to_scalar::<f64>()?;
    if total.is_finite() {
        Ok(())
    } else {
        Err(Error::NumericInstability { stage })
    }
}
