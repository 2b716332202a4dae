//! Reusable scratch buffers for the gradient phases.
//!
//! The policy itself holds no mutable state; callers own a [`Workspace`] and
//! pass it into each phase. One workspace per thread lets independent threads
//! share a single read-only model.

use super::ParameterLayout;
use ndarray::{Array1, Array2};

/// Scratch buffers overwritten by every gradient phase.
///
/// After a phase returns, the buffers hold that phase's spike means, sampled
/// spikes and conditioned slab means. The next call overwrites them.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Shape `(hidden)`.
    pub spike_mean: Array1<f64>,
    /// Shape `(hidden)`, entries in {0, 1}.
    pub spike_samples: Array1<f64>,
    /// Shape `(pool, hidden)`.
    pub slab_mean: Array2<f64>,
}

impl Workspace {
    /// Allocate zeroed buffers sized for `layout`.
    pub fn for_layout(layout: &ParameterLayout) -> Self {
        Self {
            spike_mean: Array1::zeros(layout.hidden_size),
            spike_samples: Array1::zeros(layout.hidden_size),
            slab_mean: Array2::zeros((layout.pool_size, layout.hidden_size)),
        }
    }

    pub fn fits(&self, layout: &ParameterLayout) -> bool {
        self.spike_mean.len() == layout.hidden_size
            && self.spike_samples.len() == layout.hidden_size
            && self.slab_mean.dim() == (layout.pool_size, layout.hidden_size)
    }

    /// Re-size the buffers for `layout`. Allocates only when the shape changed.
    pub fn resize(&mut self, layout: &ParameterLayout) {
        if !self.fits(layout) {
            *self = Self::for_layout(layout);
        }
    }
}
