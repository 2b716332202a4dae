//! Checkpoint save/load for spike-and-slab RBMs.
//!
//! The persisted record mirrors the model field by field. `weight`,
//! `spike_bias` and `visible_penalty` are copies of sub-ranges of `parameter`;
//! they are written for compatibility and checked against it on load.

use crate::core::{ParameterLayout, RbmError, RbmResult, SpikeSlabRbm};
use ndarray::{Array1, Array2, ShapeBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Serializable model state, fields in persisted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyState {
    pub visible_size: usize,
    pub hidden_size: usize,
    pub pool_size: usize,
    /// Flat parameter vector.
    pub parameter: Vec<f64>,
    /// Weight tensor, column-major `(visible, pool, hidden)`.
    pub weight: Vec<f64>,
    pub spike_bias: Vec<f64>,
    /// Slab penalty, column-major `(pool, hidden)`.
    pub slab_penalty: Vec<f64>,
    pub radius: f64,
    pub visible_penalty: Vec<f64>,
}

fn check_field(what: &'static str, expected: usize, actual: usize) -> RbmResult<()> {
    if expected != actual {
        return Err(RbmError::DimensionMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

impl SpikeSlabRbm {
    /// Capture the model as a [`PolicyState`]. Read-only.
    pub fn to_state(&self) -> PolicyState {
        let layout = self.layout();
        let parameter = self.parameters().to_vec();
        PolicyState {
            visible_size: layout.visible_size,
            hidden_size: layout.hidden_size,
            pool_size: layout.pool_size,
            weight: parameter[layout.weight_range()].to_vec(),
            spike_bias: parameter[layout.spike_bias_range()].to_vec(),
            visible_penalty: parameter[layout.visible_penalty_range()].to_vec(),
            slab_penalty: self.slab_penalty().t().iter().copied().collect(),
            radius: self.radius(),
            parameter,
        }
    }

    /// Rebuild a model from a [`PolicyState`].
    ///
    /// Every length is re-derived from the stored dimensions, the derived
    /// fields must agree with `parameter`, and the views are re-bound.
    ///
    /// # Errors
    /// - `InvalidConfig` if the dimensions overflow the parameter count
    /// - `DimensionMismatch` if a field length disagrees with the dimensions
    /// - `InvalidConfig` if a derived field disagrees with `parameter`
    /// - anything [`SpikeSlabRbm::new`] rejects
    pub fn from_state(state: PolicyState) -> RbmResult<Self> {
        let layout = ParameterLayout::new(state.visible_size, state.hidden_size, state.pool_size);
        check_field("parameter", layout.checked_len()?, state.parameter.len())?;
        check_field("weight", layout.weight_len(), state.weight.len())?;
        check_field("spikeBias", layout.hidden_size, state.spike_bias.len())?;
        check_field("visiblePenalty", layout.visible_size, state.visible_penalty.len())?;
        check_field(
            "slabPenalty",
            layout.pool_size * layout.hidden_size,
            state.slab_penalty.len(),
        )?;

        let derived = [
            ("weight", layout.weight_range(), &state.weight),
            ("spikeBias", layout.spike_bias_range(), &state.spike_bias),
            ("visiblePenalty", layout.visible_penalty_range(), &state.visible_penalty),
        ];
        for (what, range, values) in derived {
            if state.parameter[range] != values[..] {
                return Err(RbmError::InvalidConfig(format!(
                    "{what} does not match the parameter vector"
                )));
            }
        }

        let slab_penalty = Array2::from_shape_vec(
            (layout.pool_size, layout.hidden_size).f(),
            state.slab_penalty,
        )?;
        let mut rbm = Self::new(
            layout.visible_size,
            layout.hidden_size,
            layout.pool_size,
            slab_penalty,
            state.radius,
        )?;
        rbm.set_parameters(Array1::from(state.parameter))?;
        Ok(rbm)
    }
}

/// Save a model checkpoint as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written or the data cannot be serialized.
pub fn save_checkpoint(rbm: &SpikeSlabRbm, path: &Path) -> RbmResult<()> {
    let json = serde_json::to_string_pretty(&rbm.to_state())?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json)?;

    debug!(path = %path.display(), num_parameters = rbm.num_parameters(), "checkpoint saved");
    Ok(())
}

/// Load a model checkpoint written by [`save_checkpoint`].
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or the stored state is inconsistent.
pub fn load_checkpoint(path: &Path) -> RbmResult<SpikeSlabRbm> {
    let json = std::fs::read_to_string(path)?;
    let state: PolicyState = serde_json::from_str(&json)?;
    let rbm = SpikeSlabRbm::from_state(state)?;

    debug!(path = %path.display(), num_parameters = rbm.num_parameters(), "checkpoint loaded");
    Ok(rbm)
}
