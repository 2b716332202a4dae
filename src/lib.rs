//! # ssrbm (Spike-and-Slab Restricted Boltzmann Machines)
//!
//! The energy-model policy of a spike-and-slab RBM: parameter layout, closed-form
//! free energy, conditional distributions, Gibbs sampling steps, and the
//! positive/negative phase gradients a contrastive-divergence trainer consumes.
//!
//! ## Overview
//!
//! Each hidden unit carries a binary **spike** that gates a pool of continuous
//! **slab** components. Integrating both out gives a free energy in closed form.
//! Training loops, CD drivers and optimizers live outside this crate and talk to
//! it through [`RbmPolicy`].
//!
//! ## Structure
//!
//! - [`core`]: Model, parameter layout, sampling and gradients
//! - [`checkpoint`]: Persisted state and JSON save/load
//! - [`utils`]: Scalar math (logistic, softplus)

pub mod checkpoint;
pub mod core;
pub mod utils;

pub use checkpoint::{load_checkpoint, save_checkpoint, PolicyState};
pub use core::{
    BoundedSample, Latent, ParameterLayout, ParameterViews, ParameterViewsMut, RbmError,
    RbmPolicy, RbmResult, SpikeSlabRbm, Workspace, MAX_VISIBLE_TRIALS,
};

use serde::{Deserialize, Serialize};

/// Model dimensions and hyperparameters.
///
/// Used by [`SpikeSlabRbm::from_config`]. Missing fields fall back to [`Default`]
/// when deserialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RbmConfig {
    pub visible_size: usize,
    pub hidden_size: usize,
    pub pool_size: usize,
    /// Precision shared by every slab component.
    pub slab_penalty: f64,
    /// Soft norm bound on sampled visible vectors.
    pub radius: f64,
    /// Standard deviation of the initial weights.
    pub init_std: f64,
    /// Initial visible precision.
    pub visible_penalty_init: f64,
}

impl Default for RbmConfig {
    fn default() -> Self {
        Self {
            visible_size: 16,
            hidden_size: 8,
            pool_size: 1,
            slab_penalty: 1.0,
            radius: 100.0,
            init_std: 0.1,
            visible_penalty_init: 1.0,
        }
    }
}
