//! Log-likelihood lookup in a measurement model.

use rayon::prelude::*;

use super::MeasurementModel;
use crate::labels::Label;

/// A point in measurement model space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSamplingPosition {
    /// Offset along the vertex normal.
    pub t: f64,
    /// Measured density.
    pub density: f64,
    /// Angle between the vertex normal and the z axis, in degrees.
    pub angle: f64,
    /// Vertex label.
    pub label: Label,
}

/// Evaluates the log PDF of a [`MeasurementModel`].
///
/// The offset axis uses the nearest grid sample; density and angle are
/// interpolated bilinearly. Grid coordinates outside the model are clamped
/// to its border.
#[derive(Debug, Clone, Copy)]
pub struct ModelSampler<'a> {
    model: &'a MeasurementModel,
    n_samples: usize,
    n_densities: usize,
    n_angles: usize,
}

impl<'a> ModelSampler<'a> {
    /// Create a sampler for `model`.
    pub fn new(model: &'a MeasurementModel) -> Self {
        Self {
            model,
            n_samples: model.sampling_range.num_elements(),
            n_densities: model.density_range.num_elements(),
            n_angles: model.angle_range.num_elements(),
        }
    }

    /// Log likelihood at `position` shifted by `offset` along the normal.
    ///
    /// Positions whose label the model has no data for yield 0.
    pub fn sample(&self, position: &ModelSamplingPosition, offset: f64) -> f64 {
        let Some(grid) = self.model.data_opt(position.label) else {
            return 0.0;
        };

        let s = self.model.sampling_range.grid_coordinate(position.t + offset);
        let d = self.model.density_range.grid_coordinate(position.density);
        let a = self.model.angle_range.grid_coordinate(position.angle);

        let s0 = s.round();
        let (d0, d1) = (d.floor(), d.ceil());
        let (a0, a1) = (a.floor(), a.ceil());
        let (dd, da) = (d - d0, a - a0);

        let c00 = self.at(grid, s0, d0, a0);
        let c01 = self.at(grid, s0, d0, a1);
        let c10 = self.at(grid, s0, d1, a0);
        let c11 = self.at(grid, s0, d1, a1);

        let c0 = c00 * (1.0 - dd) + c10 * dd;
        let c1 = c01 * (1.0 - dd) + c11 * dd;

        (c0 * (1.0 - da) + c1 * da).ln()
    }

    /// Log likelihoods of all positions shifted by `offset`, in parallel.
    pub fn sample_all(&self, positions: &[ModelSamplingPosition], offset: f64) -> Vec<f64> {
        positions.par_iter().map(|p| self.sample(p, offset)).collect()
    }

    fn at(&self, grid: &[f64], s: f64, d: f64, a: f64) -> f64 {
        let clamp = |v: f64, n: usize| v.clamp(0.0, n.saturating_sub(1) as f64) as usize;
        let s = clamp(s, self.n_samples);
        let d = clamp(d, self.n_densities);
        let a = clamp(a, self.n_angles);
        grid[a * self.n_samples * self.n_densities + d * self.n_samples + s]
    }
}
