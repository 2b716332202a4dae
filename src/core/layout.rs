//! Layout of the flat parameter vector.
//!
//! All trainable scalars live in one contiguous buffer, in this order:
//!
//! ```text
//! [ weight (V·P·H) | spike_bias (H) | visible_penalty (V) ]
//! ```
//!
//! The weight tensor is stored column-major: element `(j, k, i)` (visible `j`,
//! pool component `k`, hidden unit `i`) sits at offset `j + k·V + i·V·P`.
//! Structured views are borrowed from the buffer, so they alias it without
//! copying and cannot outlive a reallocation.

use super::{RbmError, RbmResult};
use ndarray::{ArrayView1, ArrayView3, ArrayViewMut1, ArrayViewMut3, Axis};
use std::ops::Range;

/// Dimensions of a spike-and-slab RBM and the offsets they imply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterLayout {
    pub visible_size: usize,
    pub hidden_size: usize,
    pub pool_size: usize,
}

/// Read-only structured views over a parameter (or gradient) buffer.
#[derive(Debug, Clone)]
pub struct ParameterViews<'a> {
    /// Shape `(visible, pool, hidden)`.
    pub weight: ArrayView3<'a, f64>,
    /// Shape `(hidden)`.
    pub spike_bias: ArrayView1<'a, f64>,
    /// Shape `(visible)`.
    pub visible_penalty: ArrayView1<'a, f64>,
}

/// Mutable structured views over a parameter (or gradient) buffer.
#[derive(Debug)]
pub struct ParameterViewsMut<'a> {
    pub weight: ArrayViewMut3<'a, f64>,
    pub spike_bias: ArrayViewMut1<'a, f64>,
    pub visible_penalty: ArrayViewMut1<'a, f64>,
}

impl ParameterLayout {
    pub fn new(visible_size: usize, hidden_size: usize, pool_size: usize) -> Self {
        Self {
            visible_size,
            hidden_size,
            pool_size,
        }
    }

    /// Number of weight-tensor entries: V·P·H.
    pub fn weight_len(&self) -> usize {
        self.visible_size * self.pool_size * self.hidden_size
    }

    /// Total parameter count: V·P·H + H + V.
    pub fn len(&self) -> usize {
        self.weight_len() + self.hidden_size + self.visible_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of a flat latent vector: spikes (H) followed by slabs (P·H).
    pub fn latent_len(&self) -> usize {
        self.hidden_size + self.pool_size * self.hidden_size
    }

    pub fn weight_range(&self) -> Range<usize> {
        0..self.weight_len()
    }

    pub fn spike_bias_range(&self) -> Range<usize> {
        let start = self.weight_len();
        start..start + self.hidden_size
    }

    pub fn visible_penalty_range(&self) -> Range<usize> {
        let start = self.weight_len() + self.hidden_size;
        start..start + self.visible_size
    }

    /// Parameter count, or `InvalidConfig` if it (or the latent length) does
    /// not fit in `usize`.
    ///
    /// Call this before any other size method on dimensions that come from
    /// outside the crate; the unchecked methods assume it has succeeded.
    pub fn checked_len(&self) -> RbmResult<usize> {
        let overflow = || {
            RbmError::InvalidConfig(format!(
                "dimensions {}x{}x{} overflow the parameter count",
                self.visible_size, self.pool_size, self.hidden_size
            ))
        };
        let pooled = self
            .pool_size
            .checked_mul(self.hidden_size)
            .ok_or_else(overflow)?;
        pooled.checked_add(self.hidden_size).ok_or_else(overflow)?;
        pooled
            .checked_mul(self.visible_size)
            .and_then(|w| w.checked_add(self.hidden_size))
            .and_then(|n| n.checked_add(self.visible_size))
            .ok_or_else(overflow)
    }

    /// Fail with `DimensionMismatch` unless `actual` equals the parameter count.
    pub fn check_len(&self, what: &'static str, actual: usize) -> RbmResult<()> {
        if actual != self.len() {
            return Err(RbmError::DimensionMismatch {
                what,
                expected: self.len(),
                actual,
            });
        }
        Ok(())
    }

    /// Split a flat buffer into weight, spike-bias and visible-penalty views.
    ///
    /// # Errors
    /// - `DimensionMismatch` if the buffer length is not [`len`](Self::len)
    /// - `Shape` if the buffer is not contiguous
    pub fn views<'a>(&self, buffer: ArrayView1<'a, f64>) -> RbmResult<ParameterViews<'a>> {
        self.check_len("parameter buffer", buffer.len())?;

        let (weight, rest) = buffer.split_at(Axis(0), self.weight_len());
        let (spike_bias, visible_penalty) = rest.split_at(Axis(0), self.hidden_size);

        // A C-order (H, P, V) block is the same memory as a column-major (V, P, H) tensor.
        let weight = weight
            .into_shape((self.hidden_size, self.pool_size, self.visible_size))?
            .reversed_axes();

        Ok(ParameterViews {
            weight,
            spike_bias,
            visible_penalty,
        })
    }

    /// Mutable counterpart of [`views`](Self::views).
    pub fn views_mut<'a>(&self, buffer: ArrayViewMut1<'a, f64>) -> RbmResult<ParameterViewsMut<'a>> {
        self.check_len("parameter buffer", buffer.len())?;

        let (weight, rest) = buffer.split_at(Axis(0), self.weight_len());
        let (spike_bias, visible_penalty) = rest.split_at(Axis(0), self.hidden_size);

        let weight = weight
            .into_shape((self.hidden_size, self.pool_size, self.visible_size))?
            .reversed_axes();

        Ok(ParameterViewsMut {
            weight,
            spike_bias,
            visible_penalty,
        })
    }
}
