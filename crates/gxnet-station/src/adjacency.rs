//! Station adjacency from coordinates.
//!
//! ```text
//! stations -> distance_matrix (metres) -> gaussian_adjacency -> weights in [0, 1]
//! ```
//!
//! The weights feed `gxnet_nn::transform::transition_pair` to obtain the
//! forward/backward transition matrices.

use crate::error::{Error, Result};
use crate::geo::haversine;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A station position in decimal degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub lon: f64,
    pub lat: f64,
}

impl Station {
    pub fn new(id: impl Into<String>, lon: f64, lat: f64) -> Self {
        Self {
            id: id.into(),
            lon,
            lat,
        }
    }

    /// Great-circle distance to `other` in metres.
    pub fn distance_to(&self, other: &Station) -> f64 {
        haversine(self.lon, self.lat, other.lon, other.lat)
    }
}

/// Pairwise haversine distances, symmetric with a zero diagonal.
pub fn distance_matrix(stations: &[Station]) -> Array2<f64> {
    let n = stations.len();
    let mut dist = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let d = stations[i].distance_to(&stations[j]);
            dist[[i, j]] = d;
            dist[[j, i]] = d;
        }
    }
    dist
}

/// Gaussian-kernel weights `exp(-d^2 / sigma^2)`.
///
/// Off-diagonal weights below `threshold` are dropped to zero; the diagonal
/// is always one.
///
/// # Errors
/// [`Error::InvalidParameter`] when `sigma` is not positive and finite,
/// `threshold` is negative or `dist` is not square.
pub fn gaussian_adjacency(dist: ArrayView2<'_, f64>, sigma: f64, threshold: f64) -> Result<Array2<f64>> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(Error::InvalidParameter {
            name: "sigma",
            reason: format!("must be positive, got {sigma}"),
        });
    }
    if threshold.is_nan() || threshold < 0.0 {
        return Err(Error::InvalidParameter {
            name: "threshold",
            reason: format!("must be non-negative, got {threshold}"),
        });
    }
    let (rows, cols) = dist.dim();
    if rows != cols {
        return Err(Error::InvalidParameter {
            name: "dist",
            reason: format!("must be square, got {rows}x{cols}"),
        });
    }

    let sigma2 = sigma * sigma;
    let mut adj = dist.mapv(|d| {
        let w = (-(d * d) / sigma2).exp();
        if w < threshold {
            0.0
        } else {
            w
        }
    });
    adj.diag_mut().fill(1.0);

    let edges = adj.iter().filter(|&&w| w > 0.0).count() - rows;
    debug!(stations = rows, edges, sigma, threshold, "gaussian adjacency");
    Ok(adj)
}
