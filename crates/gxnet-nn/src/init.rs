//! Seeded parameter initialization.
//!
//! Candle's CPU device cannot be reseeded, so layers draw their initial
//! weights from an explicit [`XorShiftRng`] instead of ambient global state.
//! Every parameter is registered as a [`Var`] in the caller's [`VarMap`]
//! under a dotted path (`blocks.0.gnn.theta`), which is what an optimizer
//! such as `candle_nn::AdamW` consumes via `varmap.all_vars()`.
//!
//! Two models built from the same seed and configuration start from
//! identical weights.

use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarMap;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, Uniform};
use rand_xorshift::XorShiftRng;

/// Draws initial weights and registers them in a [`VarMap`].
pub struct ParamInit<'a> {
    varmap: &'a VarMap,
    rng: XorShiftRng,
    dtype: DType,
    device: Device,
}

impl<'a> ParamInit<'a> {
    pub fn new(varmap: &'a VarMap, seed: u64, dtype: DType, device: &Device) -> Self {
        Self {
            varmap,
            rng: XorShiftRng::seed_from_u64(seed),
            dtype,
            device: device.clone(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Uniform in `[-bound, bound)`.
    pub fn uniform(&mut self, name: &str, dims: &[usize], bound: f64) -> Result<Tensor> {
        if !(bound.is_finite() && bound > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "uniform bound for {name} must be positive, got {bound}"
            )));
        }
        let dist = Uniform::new(-bound as f32, bound as f32);
        let data = (0..dims.iter().product::<usize>())
            .map(|_| dist.sample(&mut self.rng))
            .collect();
        self.register(name, data, dims)
    }

    /// Kaiming-normal for a `(out, in)` weight: std = sqrt(2 / fan_in).
    pub fn kaiming_normal(&mut self, name: &str, (out_dim, in_dim): (usize, usize)) -> Result<Tensor> {
        let std = (2.0 / in_dim as f32).sqrt();
        let dist = Normal::new(0.0f32, std)
            .map_err(|e| Error::InvalidConfig(format!("kaiming init for {name}: {e}")))?;
        let data = (0..out_dim * in_dim)
            .map(|_| dist.sample(&mut self.rng))
            .collect();
        self.register(name, data, &[out_dim, in_dim])
    }

    /// Xavier-uniform for a `(rows, cols)` matrix, with `cols` as fan-in.
    pub fn xavier_uniform(&mut self, name: &str, (rows, cols): (usize, usize), gain: f64) -> Result<Tensor> {
        let bound = gain * (6.0 / (rows + cols) as f64).sqrt();
        self.uniform(name, &[rows, cols], bound)
    }

    /// Register a copy of an externally supplied tensor as a trainable
    /// parameter. The caller's tensor is left untouched.
    pub fn from_tensor(&mut self, name: &str, t: &Tensor) -> Result<Tensor> {
        let t = t.to_device(&self.device)?.to_dtype(self.dtype)?.copy()?;
        self.insert(name, Var::from_tensor(&t)?)
    }

    fn register(&mut self, name: &str, data: Vec<f32>, dims: &[usize]) -> Result<Tensor> {
        let t = Tensor::from_vec(data, dims, &self.device)?.to_dtype(self.dtype)?;
        self.insert(name, Var::from_tensor(&t)?)
    }

    fn insert(&mut self, name: &str, var: Var) -> Result<Tensor> {
        let mut vars = self
            .varmap
            .data()
            .lock()
            .map_err(|_| Error::ParamStore("variable map lock poisoned".into()))?;
        if vars.contains_key(name) {
            return Err(Error::ParamStore(format!("duplicate parameter {name}")));
        }
        let tensor = var.as_tensor().clone();
        vars.insert(name.to_string(), var);
        Ok(tensor)
    }
}

/// Total number of scalar parameters registered in `varmap`.
pub fn num_parameters(varmap: &VarMap) -> usize {
    varmap.all_vars().iter().map(|v| v.elem_count()).sum()
}
