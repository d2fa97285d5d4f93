//! Maximum a-posteriori displacement estimation.
//!
//! For every vertex the optimizer looks at the densities sampled along its
//! normal and asks: by how much must the vertex move along the normal so that
//! the measurement model explains the samples best? The observation
//! log-likelihood of each candidate displacement is combined with a Gaussian
//! prior on the displacement, normalized to a posterior, and the maximizer is
//! returned together with its posterior probability as a confidence weight.
//!
//! Candidate displacements cover twice the model sampling range, with the same
//! stride. The prior variance starts at `sigma_s²` and decays geometrically
//! once the fit stops improving, which makes later iterations more
//! conservative.

use nalgebra::Vector3;
use rayon::prelude::*;
use tracing::warn;

use crate::error::{Error, Result};
use crate::labels::Label;
use crate::model::{MeasurementModel, ModelSampler, ModelSamplingPosition};

/// Displacements and weights for every vertex.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplacementEstimate {
    /// Signed displacement along the vertex normal.
    pub displacements: Vec<f64>,
    /// Posterior probability of the chosen displacement, 0 where the
    /// posterior is not finite.
    pub weights: Vec<f64>,
}

/// Finds optimal per-vertex displacements along the normals.
#[derive(Debug, Clone)]
pub struct DisplacementOptimizer {
    current_sigma_sq: f64,
    decay: f64,
    min_non_decreasing: usize,
}

impl DisplacementOptimizer {
    /// Create an optimizer with prior standard deviation `sigma_s`.
    ///
    /// Once the fit has not improved for `min_non_decreasing` iterations, the
    /// prior variance is multiplied by `decay` on every call.
    pub fn new(sigma_s: f64, decay: f64, min_non_decreasing: usize) -> Self {
        Self {
            current_sigma_sq: sigma_s * sigma_s,
            decay,
            min_non_decreasing,
        }
    }

    /// Current prior standard deviation.
    pub fn effective_sigma_s(&self) -> f64 {
        self.current_sigma_sq.sqrt()
    }

    /// Estimate displacements from the densities sampled along the normals.
    ///
    /// `measurements` holds one density per (sample, vertex) pair with the
    /// vertex index varying fastest, as produced by the volume sampling step.
    pub fn optimize(
        &mut self,
        model: &MeasurementModel,
        normals: &[Vector3<f64>],
        labels: &[Label],
        measurements: &[f64],
        non_decreasing: usize,
    ) -> Result<DisplacementEstimate> {
        let n_vertices = normals.len();
        let positions = model_sampling_positions(model, normals, labels, measurements)?;

        let range = model.sampling_range.scaled(2.0);
        let candidates = range.elements();
        let sampler = ModelSampler::new(model);

        // One column of per-vertex observation log-likelihoods per candidate
        let columns: Vec<Vec<f64>> = candidates
            .as_slice()
            .par_iter()
            .map(|&d| observation_log_likelihoods(&sampler, &positions, n_vertices, d))
            .collect();

        if non_decreasing >= self.min_non_decreasing {
            self.current_sigma_sq *= self.decay;
        }
        let sigma_sq = self.current_sigma_sq;
        let prior: Vec<f64> = candidates.iter().map(|d| -0.5 * d * d / sigma_sq).collect();
        let log_count = 2.0 * (candidates.len() as f64).ln();

        let mut estimate = DisplacementEstimate {
            displacements: vec![0.0; n_vertices],
            weights: vec![0.0; n_vertices],
        };
        let mut unresolved = 0usize;

        for v in 0..n_vertices {
            let numerator: Vec<f64> = columns.iter().zip(&prior).map(|(col, p)| col[v] + p).collect();
            let max = numerator.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if !max.is_finite() {
                unresolved += 1;
                continue;
            }

            let sum: f64 = numerator.iter().map(|x| (x - max).exp()).filter(|x| x.is_finite()).sum();
            let denominator = (sum * range.stride).ln() + log_count;

            let mut best = 0;
            let mut best_ll = f64::NEG_INFINITY;
            for (i, x) in numerator.iter().enumerate() {
                let ll = x - max - denominator;
                if ll > best_ll {
                    best_ll = ll;
                    best = i;
                }
            }

            let weight = best_ll.exp();
            estimate.displacements[v] = -range.nth_element(best + 1);
            estimate.weights[v] = if weight.is_finite() { weight } else { 0.0 };
        }

        if unresolved > 0 {
            warn!(unresolved, "vertices without finite posterior keep their position");
        }

        Ok(estimate)
    }
}

/// Build one model sampling position per (sample, vertex) pair.
///
/// Row `k * n_vertices + v` holds the `k`-th sampling offset, the density
/// measured there, the angle between the normal of vertex `v` and the z axis
/// in degrees, and the label of `v`.
pub fn model_sampling_positions(
    model: &MeasurementModel,
    normals: &[Vector3<f64>],
    labels: &[Label],
    measurements: &[f64],
) -> Result<Vec<ModelSamplingPosition>> {
    let n_vertices = normals.len();
    if labels.len() != n_vertices {
        return Err(Error::LabelCountMismatch {
            expected: n_vertices,
            actual: labels.len(),
        });
    }
    let offsets = model.sampling_range.elements();
    if measurements.len() != offsets.len() * n_vertices {
        return Err(Error::DimensionMismatch {
            what: "volume samples",
            expected: offsets.len() * n_vertices,
            actual: measurements.len(),
        });
    }

    let angles: Vec<f64> = normals
        .iter()
        .map(|n| n.z.abs().min(1.0).acos().to_degrees())
        .collect();

    let mut positions = Vec::with_capacity(measurements.len());
    for (k, &t) in offsets.iter().enumerate() {
        for v in 0..n_vertices {
            positions.push(ModelSamplingPosition {
                t,
                density: measurements[k * n_vertices + v],
                angle: angles[v],
                label: labels[v],
            });
        }
    }
    Ok(positions)
}

/// Per-vertex observation log-likelihood for displacement `offset`.
///
/// Sums the model log-likelihoods of all samples of each vertex.
pub fn observation_log_likelihoods(
    sampler: &ModelSampler<'_>,
    positions: &[ModelSamplingPosition],
    n_vertices: usize,
    offset: f64,
) -> Vec<f64> {
    let mut sums = vec![0.0; n_vertices];
    if n_vertices == 0 {
        return sums;
    }
    for (i, p) in positions.iter().enumerate() {
        sums[i % n_vertices] += sampler.sample(p, offset);
    }
    sums
}

/// Per-vertex observation log-likelihood at zero displacement.
pub fn log_likelihood_vector(
    model: &MeasurementModel,
    normals: &[Vector3<f64>],
    labels: &[Label],
    measurements: &[f64],
) -> Result<Vec<f64>> {
    let positions = model_sampling_positions(model, normals, labels, measurements)?;
    let sampler = ModelSampler::new(model);
    Ok(observation_log_likelihoods(&sampler, &positions, normals.len(), 0.0))
}

/// Total log-likelihood of the observations at zero displacement.
///
/// Vertices with a non-finite log-likelihood are left out of the sum.
pub fn log_likelihood(
    model: &MeasurementModel,
    normals: &[Vector3<f64>],
    labels: &[Label],
    measurements: &[f64],
) -> Result<f64> {
    Ok(log_likelihood_vector(model, normals, labels, measurements)?
        .into_iter()
        .filter(|x| x.is_finite())
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::DiscreteRange;
    use std::collections::BTreeMap;

    /// Model whose density is high where the sample offset is `edge` and low
    /// elsewhere: observing a step edge at `t = edge` is most likely.
    fn edge_model(edge: f64) -> MeasurementModel {
        let sampling = DiscreteRange::new(-2.0, 2.0, 0.5);
        let density = DiscreteRange::new(0.0, 1.0, 1.0);
        let angle = DiscreteRange::new(0.0, 90.0, 90.0);
        let ts = sampling.elements();
        let mut grid = Vec::new();
        for _a in 0..2 {
            for d in 0..2 {
                for t in ts.iter() {
                    // density 1 inside (t < edge), 0 outside
                    let inside = *t < edge;
                    let p = if (d == 1) == inside { 0.9 } else { 0.1 };
                    grid.push(p);
                }
            }
        }
        MeasurementModel::new(sampling, density, angle, BTreeMap::from([(0, grid)])).unwrap()
    }

    /// Densities of a step at `edge` along the normal of each vertex.
    fn step_measurements(model: &MeasurementModel, edge: f64, n_vertices: usize) -> Vec<f64> {
        let mut m = Vec::new();
        for t in model.sampling_range.elements().iter() {
            for _ in 0..n_vertices {
                m.push(if *t < edge { 1.0 } else { 0.0 });
            }
        }
        m
    }

    #[test]
    fn test_sampling_positions_layout() {
        let model = edge_model(0.0);
        let normals = vec![Vector3::z(), Vector3::x()];
        let labels = vec![0, 3];
        let measurements: Vec<f64> = (0..18).map(|i| i as f64).collect();
        let pos = model_sampling_positions(&model, &normals, &labels, &measurements).unwrap();
        assert_eq!(pos.len(), 18);
        assert_eq!(pos[0].t, -2.0);
        assert_eq!(pos[1].t, -2.0);
        assert_eq!(pos[2].t, -1.5);
        assert_eq!(pos[3].density, 3.0);
        assert!(pos[0].angle.abs() < 1e-12);
        assert!((pos[1].angle - 90.0).abs() < 1e-12);
        assert_eq!(pos[1].label, 3);
    }

    #[test]
    fn test_sampling_positions_checks_sizes() {
        let model = edge_model(0.0);
        let normals = vec![Vector3::z()];
        assert!(model_sampling_positions(&model, &normals, &[0], &[0.0; 8]).is_err());
        assert!(model_sampling_positions(&model, &normals, &[0, 1], &[0.0; 9]).is_err());
    }

    #[test]
    fn test_zero_displacement_when_edge_matches() {
        let model = edge_model(0.0);
        let normals = vec![Vector3::z(); 3];
        let labels = vec![0; 3];
        let m = step_measurements(&model, 0.0, 3);
        let mut opt = DisplacementOptimizer::new(2.0, 0.9, 10);
        let est = opt.optimize(&model, &normals, &labels, &m, 0).unwrap();
        for (d, w) in est.displacements.iter().zip(&est.weights) {
            assert!(d.abs() < 1e-12);
            assert!(*w > 0.0 && w.is_finite());
        }
    }

    #[test]
    fn test_displacement_moves_toward_edge() {
        // Surface is at the vertex but the observed edge is 1 unit further out.
        let model = edge_model(0.0);
        let normals = vec![Vector3::z(); 2];
        let labels = vec![0; 2];
        let m = step_measurements(&model, 1.0, 2);
        let mut opt = DisplacementOptimizer::new(10.0, 0.9, 10);
        let est = opt.optimize(&model, &normals, &labels, &m, 0).unwrap();
        for d in &est.displacements {
            assert!((d - 1.0).abs() < 1e-12, "displacement {}", d);
        }
    }

    #[test]
    fn test_unknown_label_falls_back_to_prior() {
        // Without model data every sample contributes log-likelihood 0, so
        // the posterior is the normalized prior and peaks at no displacement.
        let model = edge_model(0.0);
        let normals = vec![Vector3::z()];
        let m = step_measurements(&model, 1.0, 1);

        let positions = model_sampling_positions(&model, &normals, &[42], &m).unwrap();
        let sampler = ModelSampler::new(&model);
        assert!(positions.iter().all(|p| sampler.sample(p, 0.7) == 0.0));
        assert_eq!(observation_log_likelihoods(&sampler, &positions, 1, -1.5), vec![0.0]);

        let mut opt = DisplacementOptimizer::new(1.0, 0.9, 10);
        let est = opt.optimize(&model, &normals, &[42], &m, 0).unwrap();
        assert_eq!(est.displacements[0], 0.0);

        let range = model.sampling_range.scaled(2.0);
        let candidates = range.elements();
        let prior_mass: f64 = candidates.iter().map(|d| (-0.5 * d * d).exp()).sum();
        let count = candidates.len() as f64;
        let expected = 1.0 / (prior_mass * range.stride * count * count);
        assert!(est.weights[0] > 0.0);
        assert!((est.weights[0] - expected).abs() < 1e-12, "{} vs {}", est.weights[0], expected);
    }

    #[test]
    fn test_sigma_decay() {
        let model = edge_model(0.0);
        let normals = vec![Vector3::z()];
        let m = step_measurements(&model, 0.0, 1);
        let mut opt = DisplacementOptimizer::new(2.0, 0.5, 3);
        opt.optimize(&model, &normals, &[0], &m, 2).unwrap();
        assert!((opt.effective_sigma_s() - 2.0).abs() < 1e-12);
        opt.optimize(&model, &normals, &[0], &m, 3).unwrap();
        assert!((opt.effective_sigma_s() - (2.0f64 * 2.0 * 0.5).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_log_likelihood_prefers_matching_edge() {
        let model = edge_model(0.0);
        let normals = vec![Vector3::z(); 4];
        let labels = vec![0; 4];
        let matching = log_likelihood(&model, &normals, &labels, &step_measurements(&model, 0.0, 4)).unwrap();
        let shifted = log_likelihood(&model, &normals, &labels, &step_measurements(&model, 1.0, 4)).unwrap();
        assert!(matching > shifted);
        assert!((matching - 4.0 * 9.0 * 0.9f64.ln()).abs() < 1e-9);
    }
}
