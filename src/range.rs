//! Closed, stridable ranges of sample positions.
//!
//! A [`DiscreteRange`] describes the sampling grid of one measurement model
//! axis: the offsets along a vertex normal, the density bins and the normal
//! angle bins.
//!
//! ```
//! use cortid::range::DiscreteRange;
//!
//! let range = DiscreteRange::new(-1.0, 1.0, 0.5);
//! assert_eq!(range.num_elements(), 5);
//! assert_eq!(range.nth_element(2), -0.5);
//! ```

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// A closed range `[min, max]` sampled every `stride`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscreteRange {
    /// First element of the range.
    pub min: f64,
    /// Upper bound (inclusive when it lies on the grid).
    pub max: f64,
    /// Distance between two consecutive elements.
    pub stride: f64,
}

impl DiscreteRange {
    /// Create a new range.
    pub const fn new(min: f64, max: f64, stride: f64) -> Self {
        Self { min, max, stride }
    }

    /// Number of elements in the range, 0 for an invalid range.
    ///
    /// A small epsilon absorbs round-off so that `max` is counted when it is
    /// an exact multiple of `stride` away from `min`.
    pub fn num_elements(&self) -> usize {
        self.checked_num_elements().unwrap_or(0)
    }

    /// Number of elements, or `None` if the range is malformed or the count
    /// does not fit a `usize`.
    pub fn checked_num_elements(&self) -> Option<usize> {
        let well_formed = self.stride > 0.0
            && self.stride.is_finite()
            && self.min.is_finite()
            && self.max.is_finite()
            && self.max >= self.min;
        if !well_formed {
            return None;
        }
        let steps = ((self.max - self.min) / self.stride + 1e-5).floor();
        if !steps.is_finite() || steps >= usize::MAX as f64 {
            return None;
        }
        (steps as usize).checked_add(1)
    }

    /// The `n`-th element, counting from 1.
    #[inline]
    pub fn nth_element(&self, n: usize) -> f64 {
        self.min + (n as f64 - 1.0) * self.stride
    }

    /// All elements of the range as a column vector.
    pub fn elements(&self) -> DVector<f64> {
        DVector::from_fn(self.num_elements(), |i, _| self.min + i as f64 * self.stride)
    }

    /// Range with both bounds multiplied by `factor`; the stride is kept.
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.min * factor, self.max * factor, self.stride)
    }

    /// Whether the range has finite bounds, a positive stride, `max >= min`
    /// and a representable element count.
    pub fn is_valid(&self) -> bool {
        self.checked_num_elements().is_some()
    }

    /// Continuous grid coordinate of `value` (0 at `min`, 1 at `min + stride`).
    #[inline]
    pub fn grid_coordinate(&self, value: f64) -> f64 {
        (value - self.min) / self.stride
    }
}
