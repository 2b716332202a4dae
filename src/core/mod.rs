//! Spike-and-slab RBM energy policy.
//!
//! This module provides the model's mathematics:
//! - Parameter layout over a single flat buffer (see [`layout`])
//! - Closed-form free energy with spike and slab latents integrated out
//! - Conditional means for Gibbs sampling
//! - Spike, slab and radius-bounded visible sampling
//! - Positive/negative phase gradients for contrastive divergence
//!
//! ## Energy
//!
//! For visible `v`, weight slices `W_i` (shape `V×P`), spike bias `b`, visible
//! penalty `Λ` and slab penalty `α` (shape `P×H`), the free energy is:
//!
//! ```text
//! F(v) = ½ vᵀ diag(Λ) v
//!        - Σ_i Σ_k ½ log(2π / α_{k,i})
//!        - Σ_i softplus(b_i + s_i(v))
//!
//! where s_i(v) = Σ_k (W_iᵀ v)_k² / (2 α_{k,i})
//! ```
//!
//! The spike mean is the derivative of the softplus term with respect to the
//! bias: `P(h_i = 1 | v) = σ(b_i + s_i(v))`.

pub mod layout;
pub mod workspace;

pub use layout::{ParameterLayout, ParameterViews, ParameterViewsMut};
pub use workspace::Workspace;

use crate::utils::{l2_norm, logistic, softplus};
use crate::RbmConfig;
use ndarray::{
    s, Array1, Array2, ArrayBase, ArrayView1, ArrayView2, ArrayView3, ArrayViewMut1, Axis, Data,
    Ix1, Ix2, ShapeBuilder, Zip,
};
use ndarray_rand::rand_distr::{Normal, StandardNormal};
use ndarray_rand::RandomExt;
use rand::Rng;
use std::f64::consts::PI;
use tracing::{debug, trace};

/// Number of full visible draws tried before the radius bound is given up.
pub const MAX_VISIBLE_TRIALS: usize = 10;

/// Error type for spike-and-slab RBM operations.
#[derive(Debug, thiserror::Error)]
pub enum RbmError {
    /// A vector, matrix or buffer does not match the model dimensions.
    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A precision entry is zero, negative or NaN.
    #[error("{what}[{index}] = {value} must be strictly positive")]
    InvalidPenalty {
        what: &'static str,
        index: usize,
        value: f64,
    },
    /// Invalid model configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint format: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type RbmResult<T> = Result<T, RbmError>;

/// Check that every entry is strictly positive (NaN fails too).
fn check_positive<'a, I>(what: &'static str, values: I) -> RbmResult<()>
where
    I: IntoIterator<Item = &'a f64>,
{
    for (index, &value) in values.into_iter().enumerate() {
        if !(value > 0.0) {
            return Err(RbmError::InvalidPenalty { what, index, value });
        }
    }
    Ok(())
}

/// One Gaussian draw with the given mean and precision (variance = 1 / precision).
#[inline]
fn gaussian<R: Rng + ?Sized>(rng: &mut R, mean: f64, precision: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mean + z / precision.sqrt()
}

/// Bernoulli draw per entry: 1.0 with probability `mean[i]`, else 0.0.
fn draw_spikes<R: Rng + ?Sized>(mean: &ArrayView1<f64>, out: &mut Array1<f64>, rng: &mut R) {
    Zip::from(out).and(mean).for_each(|spike, &p| {
        *spike = if rng.gen::<f64>() < p { 1.0 } else { 0.0 };
    });
}

/// Projection of `visible` onto the pooled weight columns of hidden unit `i`: `W_iᵀ v`.
fn pooled_projection<S>(params: &ParameterViews<'_>, i: usize, visible: &ArrayBase<S, Ix1>) -> Array1<f64>
where
    S: Data<Elem = f64>,
{
    params.weight.index_axis(Axis(2), i).t().dot(visible)
}

/// A hidden-layer configuration: one spike per hidden unit and a pool of slab
/// components per hidden unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Latent {
    /// Shape `(hidden)`.
    pub spike: Array1<f64>,
    /// Shape `(pool, hidden)`; column `i` is the slab pool of hidden unit `i`.
    pub slab: Array2<f64>,
}

impl Latent {
    pub fn zeros(layout: &ParameterLayout) -> Self {
        Self {
            spike: Array1::zeros(layout.hidden_size),
            slab: Array2::zeros((layout.pool_size, layout.hidden_size)),
        }
    }

    /// Flatten to `[spike (H) | slab (P·H, column-major)]`.
    pub fn to_flat(&self) -> Array1<f64> {
        self.spike
            .iter()
            .chain(self.slab.t().iter())
            .copied()
            .collect()
    }

    /// Inverse of [`to_flat`](Self::to_flat).
    ///
    /// # Errors
    /// - `DimensionMismatch` if `flat.len() != layout.latent_len()`
    pub fn from_flat<S>(layout: &ParameterLayout, flat: &ArrayBase<S, Ix1>) -> RbmResult<Self>
    where
        S: Data<Elem = f64>,
    {
        if flat.len() != layout.latent_len() {
            return Err(RbmError::DimensionMismatch {
                what: "latent vector",
                expected: layout.latent_len(),
                actual: flat.len(),
            });
        }
        let (spike, slab) = flat.view().split_at(Axis(0), layout.hidden_size);
        let slab = Array2::from_shape_vec(
            (layout.pool_size, layout.hidden_size).f(),
            slab.to_vec(),
        )?;
        Ok(Self {
            spike: spike.to_owned(),
            slab,
        })
    }
}

/// Result of radius-bounded visible sampling.
#[derive(Debug, Clone)]
pub struct BoundedSample {
    pub visible: Array1<f64>,
    /// Number of full draws made, in `1..=MAX_VISIBLE_TRIALS`.
    pub trials: usize,
    /// False when every trial exceeded the radius and the last draw was kept.
    pub within_radius: bool,
}

/// Interface an external contrastive-divergence driver and optimizer use.
///
/// Latents cross this boundary as flat vectors (see [`Latent::to_flat`]) and
/// gradients are written into flat buffers with the parameter layout.
pub trait RbmPolicy {
    type Workspace;

    fn num_parameters(&self) -> usize;

    fn parameters(&self) -> &Array1<f64>;

    /// Mutable access for the optimizer. Replacing the array requires a
    /// [`reset`](Self::reset) before further use.
    fn parameters_mut(&mut self) -> &mut Array1<f64>;

    fn reset(&mut self) -> RbmResult<()>;

    fn workspace(&self) -> Self::Workspace;

    fn free_energy(&self, visible: ArrayView1<'_, f64>) -> RbmResult<f64>;

    fn sample_hidden<R: Rng + ?Sized>(
        &self,
        visible: ArrayView1<'_, f64>,
        rng: &mut R,
    ) -> RbmResult<Array1<f64>>;

    fn sample_visible<R: Rng + ?Sized>(
        &self,
        latent: ArrayView1<'_, f64>,
        rng: &mut R,
    ) -> RbmResult<Array1<f64>>;

    fn positive_phase<R: Rng + ?Sized>(
        &self,
        input: ArrayView1<'_, f64>,
        gradient: ArrayViewMut1<'_, f64>,
        workspace: &mut Self::Workspace,
        rng: &mut R,
    ) -> RbmResult<()>;

    fn negative_phase<R: Rng + ?Sized>(
        &self,
        negative_sample: ArrayView1<'_, f64>,
        gradient: ArrayViewMut1<'_, f64>,
        workspace: &mut Self::Workspace,
        rng: &mut R,
    ) -> RbmResult<()>;

    /// Scalar objective hook for generic optimizers. Always 0: this model is
    /// trained by contrastive divergence, not by direct evaluation.
    fn evaluate(&self, _predictors: ArrayView2<'_, f64>, _index: usize) -> f64 {
        0.0
    }
}

/// A spike-and-slab RBM: dimensions, the flat parameter vector and the fixed
/// hyperparameters.
///
/// # Parameters
///
/// - **Weight** `(V, P, H)`: slice `i` couples the visible vector to the slab pool of hidden unit `i`
/// - **Spike bias** `(H)`
/// - **Visible penalty** `(V)`: diagonal precision of the visible Gaussian, must stay positive
///
/// All three live in [`parameters`](Self::parameters) in that order.
///
/// # Hyperparameters
///
/// - **Slab penalty** `(P, H)`: precision of each slab component, fixed and strictly positive
/// - **Radius**: soft norm bound on sampled visible vectors
#[derive(Debug, Clone)]
pub struct SpikeSlabRbm {
    layout: ParameterLayout,
    parameter: Array1<f64>,
    slab_penalty: Array2<f64>,
    radius: f64,
}

impl SpikeSlabRbm {
    /// Create a model with zero weights and spike bias and a unit visible penalty.
    ///
    /// # Errors
    /// - `InvalidConfig` if a size is zero or `radius` is not positive
    /// - `DimensionMismatch` if `slab_penalty` is not `(pool_size, hidden_size)`
    /// - `InvalidPenalty` if a slab penalty entry is not strictly positive
    pub fn new(
        visible_size: usize,
        hidden_size: usize,
        pool_size: usize,
        slab_penalty: Array2<f64>,
        radius: f64,
    ) -> RbmResult<Self> {
        if visible_size == 0 || hidden_size == 0 || pool_size == 0 {
            return Err(RbmError::InvalidConfig(format!(
                "visible, hidden and pool sizes must be non-zero (got {visible_size}, {hidden_size}, {pool_size})"
            )));
        }
        let layout = ParameterLayout::new(visible_size, hidden_size, pool_size);
        let num_parameters = layout.checked_len()?;
        if slab_penalty.nrows() != pool_size {
            return Err(RbmError::DimensionMismatch {
                what: "slab_penalty rows",
                expected: pool_size,
                actual: slab_penalty.nrows(),
            });
        }
        if slab_penalty.ncols() != hidden_size {
            return Err(RbmError::DimensionMismatch {
                what: "slab_penalty columns",
                expected: hidden_size,
                actual: slab_penalty.ncols(),
            });
        }
        check_positive("slab_penalty", slab_penalty.t().iter())?;
        if !(radius > 0.0) {
            return Err(RbmError::InvalidConfig(format!(
                "radius must be positive, got {radius}"
            )));
        }

        let mut parameter = Array1::<f64>::zeros(num_parameters);
        parameter
            .slice_mut(s![layout.visible_penalty_range()])
            .fill(1.0);

        debug!(
            visible_size,
            hidden_size,
            pool_size,
            num_parameters,
            radius,
            "spike-and-slab RBM created"
        );

        let mut rbm = Self {
            layout,
            parameter,
            slab_penalty,
            radius,
        };
        rbm.reset()?;
        Ok(rbm)
    }

    /// Build a model from a config with a uniform slab penalty and randomly
    /// initialized weights.
    pub fn from_config<R: Rng + ?Sized>(config: &RbmConfig, rng: &mut R) -> RbmResult<Self> {
        let slab_penalty =
            Array2::from_elem((config.pool_size, config.hidden_size), config.slab_penalty);
        let mut rbm = Self::new(
            config.visible_size,
            config.hidden_size,
            config.pool_size,
            slab_penalty,
            config.radius,
        )?;
        rbm.initialize(config.init_std, config.visible_penalty_init, rng)?;
        Ok(rbm)
    }

    /// Re-initialize the parameters.
    ///
    /// Weights are drawn from `N(0, init_std²)`, spike biases are zeroed and
    /// every visible penalty is set to `visible_penalty`.
    pub fn initialize<R: Rng + ?Sized>(
        &mut self,
        init_std: f64,
        visible_penalty: f64,
        rng: &mut R,
    ) -> RbmResult<()> {
        let normal = Normal::new(0.0, init_std)
            .map_err(|e| RbmError::InvalidConfig(format!("init_std {init_std}: {e}")))?;
        check_positive("visible_penalty", [visible_penalty].iter())?;

        let layout = self.layout;
        layout.check_len("parameter", self.parameter.len())?;
        let weight = Array1::random_using(layout.weight_len(), normal, rng);
        self.parameter
            .slice_mut(s![layout.weight_range()])
            .assign(&weight);
        self.parameter
            .slice_mut(s![layout.spike_bias_range()])
            .fill(0.0);
        self.parameter
            .slice_mut(s![layout.visible_penalty_range()])
            .fill(visible_penalty);

        debug!(init_std, visible_penalty, "parameters initialized");
        Ok(())
    }

    /// Re-establish the structured views over the parameter vector.
    ///
    /// Must be called after the parameter storage is replaced or reloaded.
    /// Fails if the stored vector no longer matches the dimensions.
    pub fn reset(&mut self) -> RbmResult<()> {
        self.layout
            .check_len("parameter", self.parameter.len())?;
        self.check_slab(("slab_penalty rows", "slab_penalty columns"), self.slab_penalty.dim())?;
        if !self.parameter.is_standard_layout() {
            self.parameter = self.parameter.as_standard_layout().into_owned();
        }
        self.layout.views(self.parameter.view())?;

        trace!(num_parameters = self.layout.len(), "parameter views re-bound");
        Ok(())
    }

    pub fn layout(&self) -> ParameterLayout {
        self.layout
    }

    pub fn visible_size(&self) -> usize {
        self.layout.visible_size
    }

    pub fn hidden_size(&self) -> usize {
        self.layout.hidden_size
    }

    pub fn pool_size(&self) -> usize {
        self.layout.pool_size
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn slab_penalty(&self) -> &Array2<f64> {
        &self.slab_penalty
    }

    pub fn num_parameters(&self) -> usize {
        self.layout.len()
    }

    pub fn parameters(&self) -> &Array1<f64> {
        &self.parameter
    }

    /// Mutable access to the flat parameter vector.
    ///
    /// Writes in place are seen by every view. Replacing the array (for
    /// instance with one of a different length) requires [`reset`](Self::reset).
    pub fn parameters_mut(&mut self) -> &mut Array1<f64> {
        &mut self.parameter
    }

    /// Replace the parameter vector and re-bind the views.
    pub fn set_parameters(&mut self, parameter: Array1<f64>) -> RbmResult<()> {
        self.layout.check_len("parameter", parameter.len())?;
        self.parameter = parameter;
        self.reset()
    }

    /// Structured views over the parameter vector.
    pub fn views(&self) -> RbmResult<ParameterViews<'_>> {
        self.layout.views(self.parameter.view())
    }

    pub fn views_mut(&mut self) -> RbmResult<ParameterViewsMut<'_>> {
        self.layout.views_mut(self.parameter.view_mut())
    }

    /// Weight tensor, shape `(visible, pool, hidden)`.
    pub fn weight(&self) -> RbmResult<ArrayView3<'_, f64>> {
        Ok(self.views()?.weight)
    }

    pub fn spike_bias(&self) -> RbmResult<ArrayView1<'_, f64>> {
        Ok(self.views()?.spike_bias)
    }

    pub fn visible_penalty(&self) -> RbmResult<ArrayView1<'_, f64>> {
        Ok(self.views()?.visible_penalty)
    }

    /// Fresh scratch buffers sized for this model.
    pub fn workspace(&self) -> Workspace {
        Workspace::for_layout(&self.layout)
    }

    fn check_visible(&self, len: usize) -> RbmResult<()> {
        if len != self.layout.visible_size {
            return Err(RbmError::DimensionMismatch {
                what: "visible vector",
                expected: self.layout.visible_size,
                actual: len,
            });
        }
        Ok(())
    }

    fn check_hidden(&self, what: &'static str, len: usize) -> RbmResult<()> {
        if len != self.layout.hidden_size {
            return Err(RbmError::DimensionMismatch {
                what,
                expected: self.layout.hidden_size,
                actual: len,
            });
        }
        Ok(())
    }

    /// Rows and columns are checked separately so a transposed matrix
    /// reports the axis that differs.
    fn check_slab(
        &self,
        (rows_what, cols_what): (&'static str, &'static str),
        (rows, cols): (usize, usize),
    ) -> RbmResult<()> {
        if rows != self.layout.pool_size {
            return Err(RbmError::DimensionMismatch {
                what: rows_what,
                expected: self.layout.pool_size,
                actual: rows,
            });
        }
        if cols != self.layout.hidden_size {
            return Err(RbmError::DimensionMismatch {
                what: cols_what,
                expected: self.layout.hidden_size,
                actual: cols,
            });
        }
        Ok(())
    }

    /// `s_i(v) = Σ_k (W_iᵀ v)_k² / (2 α_{k,i})` given the projection `W_iᵀ v`.
    fn pooled_energy(&self, i: usize, projection: &Array1<f64>) -> f64 {
        Zip::from(projection)
            .and(self.slab_penalty.column(i))
            .fold(0.0, |acc, &x, &alpha| acc + x * x / (2.0 * alpha))
    }

    fn fill_spike_mean<S>(
        &self,
        params: &ParameterViews<'_>,
        visible: &ArrayBase<S, Ix1>,
        out: &mut Array1<f64>,
    ) where
        S: Data<Elem = f64>,
    {
        debug_assert_eq!(out.len(), self.layout.hidden_size);
        for i in 0..self.layout.hidden_size {
            let projection = pooled_projection(params, i, visible);
            out[i] = logistic(params.spike_bias[i] + self.pooled_energy(i, &projection));
        }
    }

    fn fill_slab_mean<S>(
        &self,
        params: &ParameterViews<'_>,
        visible: &ArrayBase<S, Ix1>,
        spike: &ArrayView1<f64>,
        out: &mut Array2<f64>,
    ) where
        S: Data<Elem = f64>,
    {
        debug_assert_eq!(out.dim(), (self.layout.pool_size, self.layout.hidden_size));
        for i in 0..self.layout.hidden_size {
            let projection = pooled_projection(params, i, visible);
            let gate = spike[i];
            Zip::from(out.column_mut(i))
                .and(&projection)
                .and(self.slab_penalty.column(i))
                .for_each(|mean, &x, &alpha| *mean = gate * x / alpha);
        }
    }

    fn draw_slab<R: Rng + ?Sized>(&self, slab_mean: &ArrayView2<f64>, rng: &mut R) -> Array2<f64> {
        let mut slab = Array2::<f64>::zeros(slab_mean.dim());
        Zip::from(&mut slab)
            .and(slab_mean)
            .and(&self.slab_penalty)
            .for_each(|s, &mean, &alpha| {
                debug_assert!(alpha > 0.0);
                *s = gaussian(rng, mean, alpha);
            });
        slab
    }

    /// Probability that each hidden unit's spike is active given `visible`:
    /// `σ(½ vᵀ W_i diag(α_i)⁻¹ W_iᵀ v + b_i)`.
    ///
    /// Entries lie in `(0, 1)` for moderate input. In `f64` the logistic rounds
    /// to exactly `1.0` once `b_i + s_i(v)` exceeds about 37, so the upper
    /// bound is closed for large visible vectors.
    pub fn spike_mean<S>(&self, visible: &ArrayBase<S, Ix1>) -> RbmResult<Array1<f64>>
    where
        S: Data<Elem = f64>,
    {
        self.check_visible(visible.len())?;
        let params = self.views()?;
        let mut mean = Array1::zeros(self.layout.hidden_size);
        self.fill_spike_mean(&params, visible, &mut mean);
        Ok(mean)
    }

    /// Slab mean given `visible` and a spike value per hidden unit:
    /// `slab[:, i] = spike[i] · diag(α_i)⁻¹ W_iᵀ v`.
    ///
    /// Column `i` is exactly zero when `spike[i] == 0`.
    pub fn slab_mean<S, T>(
        &self,
        visible: &ArrayBase<S, Ix1>,
        spike: &ArrayBase<T, Ix1>,
    ) -> RbmResult<Array2<f64>>
    where
        S: Data<Elem = f64>,
        T: Data<Elem = f64>,
    {
        self.check_visible(visible.len())?;
        self.check_hidden("spike vector", spike.len())?;
        let params = self.views()?;
        let mut mean = Array2::zeros((self.layout.pool_size, self.layout.hidden_size));
        self.fill_slab_mean(&params, visible, &spike.view(), &mut mean);
        Ok(mean)
    }

    /// Latent mean given `visible`.
    ///
    /// The returned `spike` holds the spike means. The `slab` is the slab mean
    /// conditioned on a spike vector sampled from those means, so this call
    /// consumes randomness.
    pub fn hidden_mean<S, R>(&self, visible: &ArrayBase<S, Ix1>, rng: &mut R) -> RbmResult<Latent>
    where
        S: Data<Elem = f64>,
        R: Rng + ?Sized,
    {
        self.check_visible(visible.len())?;
        let params = self.views()?;
        let mut latent = Latent::zeros(&self.layout);
        let mut spikes = Array1::zeros(self.layout.hidden_size);

        self.fill_spike_mean(&params, visible, &mut latent.spike);
        draw_spikes(&latent.spike.view(), &mut spikes, rng);
        self.fill_slab_mean(&params, visible, &spikes.view(), &mut latent.slab);
        Ok(latent)
    }

    /// Visible mean given a full latent configuration:
    /// `diag(Λ)⁻¹ Σ_i W_i slab[:, i] spike[i]`.
    pub fn visible_mean(&self, latent: &Latent) -> RbmResult<Array1<f64>> {
        self.check_hidden("latent spike", latent.spike.len())?;
        self.check_slab(("latent slab rows", "latent slab columns"), latent.slab.dim())?;
        let params = self.views()?;
        check_positive("visible_penalty", params.visible_penalty.iter())?;

        let mut mean = Array1::<f64>::zeros(self.layout.visible_size);
        for i in 0..self.layout.hidden_size {
            let contribution = params
                .weight
                .index_axis(Axis(2), i)
                .dot(&latent.slab.column(i));
            mean.scaled_add(latent.spike[i], &contribution);
        }
        Zip::from(&mut mean)
            .and(&params.visible_penalty)
            .for_each(|m, &lambda| *m /= lambda);
        Ok(mean)
    }

    /// Independent Bernoulli draw per hidden unit.
    pub fn sample_spike<S, R>(&self, spike_mean: &ArrayBase<S, Ix1>, rng: &mut R) -> RbmResult<Array1<f64>>
    where
        S: Data<Elem = f64>,
        R: Rng + ?Sized,
    {
        self.check_hidden("spike mean", spike_mean.len())?;
        let mut spikes = Array1::zeros(self.layout.hidden_size);
        draw_spikes(&spike_mean.view(), &mut spikes, rng);
        Ok(spikes)
    }

    /// Independent Gaussian draw per `(pool, hidden)` cell with variance `1 / α_{k,i}`.
    pub fn sample_slab<S, R>(&self, slab_mean: &ArrayBase<S, Ix2>, rng: &mut R) -> RbmResult<Array2<f64>>
    where
        S: Data<Elem = f64>,
        R: Rng + ?Sized,
    {
        self.check_slab(("slab mean rows", "slab mean columns"), slab_mean.dim())?;
        Ok(self.draw_slab(&slab_mean.view(), rng))
    }

    /// One hidden-layer Gibbs sample.
    ///
    /// # Algorithm
    /// ```text
    /// p      = spike_mean(v)
    /// spike ~ Bernoulli(p)
    /// m      = slab_mean(v, spike)
    /// slab  ~ N(m, diag(α)⁻¹)
    /// ```
    pub fn sample_hidden<S, R>(&self, visible: &ArrayBase<S, Ix1>, rng: &mut R) -> RbmResult<Latent>
    where
        S: Data<Elem = f64>,
        R: Rng + ?Sized,
    {
        self.check_visible(visible.len())?;
        let params = self.views()?;
        let mut spike_mean = Array1::zeros(self.layout.hidden_size);
        let mut spike = Array1::zeros(self.layout.hidden_size);
        let mut slab_mean = Array2::zeros((self.layout.pool_size, self.layout.hidden_size));

        self.fill_spike_mean(&params, visible, &mut spike_mean);
        draw_spikes(&spike_mean.view(), &mut spike, rng);
        self.fill_slab_mean(&params, visible, &spike.view(), &mut slab_mean);
        let slab = self.draw_slab(&slab_mean.view(), rng);

        trace!(active = spike.sum(), "hidden sample drawn");
        Ok(Latent { spike, slab })
    }

    /// Visible sample with the radius bound, reporting how many trials ran.
    ///
    /// Each trial draws every coordinate from `N(mean_j, 1 / Λ_j)`. The first
    /// draw with norm below the radius is accepted. After
    /// [`MAX_VISIBLE_TRIALS`] rejections the last draw is returned anyway.
    pub fn sample_visible_bounded<R>(&self, latent: &Latent, rng: &mut R) -> RbmResult<BoundedSample>
    where
        R: Rng + ?Sized,
    {
        let mean = self.visible_mean(latent)?;
        let params = self.views()?;
        let mut visible = Array1::<f64>::zeros(self.layout.visible_size);

        for trial in 1..=MAX_VISIBLE_TRIALS {
            Zip::from(&mut visible)
                .and(&mean)
                .and(&params.visible_penalty)
                .for_each(|x, &m, &lambda| *x = gaussian(rng, m, lambda));

            if l2_norm(&visible.view()) < self.radius {
                trace!(trial, "visible sample accepted");
                return Ok(BoundedSample {
                    visible,
                    trials: trial,
                    within_radius: true,
                });
            }
        }

        debug!(
            trials = MAX_VISIBLE_TRIALS,
            radius = self.radius,
            norm = l2_norm(&visible.view()),
            "visible sample outside radius, keeping last draw"
        );
        Ok(BoundedSample {
            visible,
            trials: MAX_VISIBLE_TRIALS,
            within_radius: false,
        })
    }

    /// Visible sample given a latent configuration. The radius is a soft bound.
    pub fn sample_visible<R>(&self, latent: &Latent, rng: &mut R) -> RbmResult<Array1<f64>>
    where
        R: Rng + ?Sized,
    {
        Ok(self.sample_visible_bounded(latent, rng)?.visible)
    }

    /// Free energy of a visible configuration with both latents integrated out.
    ///
    /// Pure: reads only the parameters and `visible`.
    pub fn free_energy<S>(&self, visible: &ArrayBase<S, Ix1>) -> RbmResult<f64>
    where
        S: Data<Elem = f64>,
    {
        self.check_visible(visible.len())?;
        let params = self.views()?;
        check_positive("visible_penalty", params.visible_penalty.iter())?;

        let quadratic = 0.5
            * Zip::from(visible)
                .and(&params.visible_penalty)
                .fold(0.0, |acc, &x, &lambda| acc + lambda * x * x);

        let normalization: f64 = self
            .slab_penalty
            .iter()
            .map(|&alpha| 0.5 * (2.0 * PI / alpha).ln())
            .sum();

        let mut energy = quadratic - normalization;
        for i in 0..self.layout.hidden_size {
            let projection = pooled_projection(&params, i, visible);
            energy -= softplus(params.spike_bias[i] + self.pooled_energy(i, &projection));
        }
        Ok(energy)
    }

    /// Positive-phase gradient of the free energy evaluated at observed data.
    ///
    /// Writes `V·P·H + H + V` values into `gradient`, laid out like the
    /// parameter vector. `workspace` is left holding this call's spike means,
    /// spike samples and slab means.
    pub fn positive_phase<S, R>(
        &self,
        input: &ArrayBase<S, Ix1>,
        gradient: ArrayViewMut1<'_, f64>,
        workspace: &mut Workspace,
        rng: &mut R,
    ) -> RbmResult<()>
    where
        S: Data<Elem = f64>,
        R: Rng + ?Sized,
    {
        self.phase_gradient("positive", input, gradient, workspace, rng)
    }

    /// Negative-phase gradient evaluated at a model sample.
    ///
    /// Same formulas as [`positive_phase`](Self::positive_phase) with no sign
    /// change; the optimizer forms the positive-minus-negative difference.
    pub fn negative_phase<S, R>(
        &self,
        negative_sample: &ArrayBase<S, Ix1>,
        gradient: ArrayViewMut1<'_, f64>,
        workspace: &mut Workspace,
        rng: &mut R,
    ) -> RbmResult<()>
    where
        S: Data<Elem = f64>,
        R: Rng + ?Sized,
    {
        self.phase_gradient("negative", negative_sample, gradient, workspace, rng)
    }

    /// # Algorithm
    /// ```text
    /// p            = spike_mean(x)
    /// spike       ~ Bernoulli(p)
    /// m            = slab_mean(x, spike)
    /// ∂W[:, :, i]  = x · m[:, i]ᵀ · p_i
    /// ∂b_i         = p_i
    /// ∂Λ_j         = -½ x_j²
    /// ```
    fn phase_gradient<S, R>(
        &self,
        phase: &'static str,
        input: &ArrayBase<S, Ix1>,
        gradient: ArrayViewMut1<'_, f64>,
        workspace: &mut Workspace,
        rng: &mut R,
    ) -> RbmResult<()>
    where
        S: Data<Elem = f64>,
        R: Rng + ?Sized,
    {
        self.check_visible(input.len())?;
        let params = self.views()?;
        let mut grad = self.layout.views_mut(gradient)?;
        workspace.resize(&self.layout);

        self.fill_spike_mean(&params, input, &mut workspace.spike_mean);
        draw_spikes(
            &workspace.spike_mean.view(),
            &mut workspace.spike_samples,
            rng,
        );
        self.fill_slab_mean(
            &params,
            input,
            &workspace.spike_samples.view(),
            &mut workspace.slab_mean,
        );

        for i in 0..self.layout.hidden_size {
            let p = workspace.spike_mean[i];
            let slab = workspace.slab_mean.column(i);
            Zip::indexed(grad.weight.index_axis_mut(Axis(2), i))
                .for_each(|(j, k), g| *g = input[j] * slab[k] * p);
        }
        grad.spike_bias.assign(&workspace.spike_mean);
        Zip::from(&mut grad.visible_penalty)
            .and(input)
            .for_each(|g, &x| *g = -0.5 * x * x);

        trace!(
            phase,
            active = workspace.spike_samples.sum(),
            "phase gradient computed"
        );
        Ok(())
    }
}

impl RbmPolicy for SpikeSlabRbm {
    type Workspace = Workspace;

    fn num_parameters(&self) -> usize {
        SpikeSlabRbm::num_parameters(self)
    }

    fn parameters(&self) -> &Array1<f64> {
        SpikeSlabRbm::parameters(self)
    }

    fn parameters_mut(&mut self) -> &mut Array1<f64> {
        SpikeSlabRbm::parameters_mut(self)
    }

    fn reset(&mut self) -> RbmResult<()> {
        SpikeSlabRbm::reset(self)
    }

    fn workspace(&self) -> Workspace {
        SpikeSlabRbm::workspace(self)
    }

    fn free_energy(&self, visible: ArrayView1<'_, f64>) -> RbmResult<f64> {
        SpikeSlabRbm::free_energy(self, &visible)
    }

    fn sample_hidden<R: Rng + ?Sized>(
        &self,
        visible: ArrayView1<'_, f64>,
        rng: &mut R,
    ) -> RbmResult<Array1<f64>> {
        Ok(SpikeSlabRbm::sample_hidden(self, &visible, rng)?.to_flat())
    }

    fn sample_visible<R: Rng + ?Sized>(
        &self,
        latent: ArrayView1<'_, f64>,
        rng: &mut R,
    ) -> RbmResult<Array1<f64>> {
        let latent = Latent::from_flat(&self.layout, &latent)?;
        SpikeSlabRbm::sample_visible(self, &latent, rng)
    }

    fn positive_phase<R: Rng + ?Sized>(
        &self,
        input: ArrayView1<'_, f64>,
        gradient: ArrayViewMut1<'_, f64>,
        workspace: &mut Workspace,
        rng: &mut R,
    ) -> RbmResult<()> {
        SpikeSlabRbm::positive_phase(self, &input, gradient, workspace, rng)
    }

    fn negative_phase<R: Rng + ?Sized>(
        &self,
        negative_sample: ArrayView1<'_, f64>,
        gradient: ArrayViewMut1<'_, f64>,
        workspace: &mut Workspace,
        rng: &mut R,
    ) -> RbmResult<()> {
        SpikeSlabRbm::negative_phase(self, &negative_sample, gradient, workspace, rng)
    }
}
