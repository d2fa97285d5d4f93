//! Model based mesh fitting.
//!
//! [`MeshFitter`] deforms a labelled reference mesh until its surface agrees
//! with the densities of a CT volume. Every iteration runs five steps:
//!
//! 1. sample the volume along the vertex normals of the deformed mesh,
//! 2. find the most probable displacement of each vertex along its normal,
//! 3. fit the reference mesh to the displaced vertices with weighted ARAP,
//! 4. evaluate the log-likelihood of the new surface,
//! 5. test for convergence.
//!
//! The steps are public so that callers can drive and inspect the fit one
//! step at a time through a [`FitState`].
//!
//! # Example
//!
//! ```no_run
//! use cortid::config::Configuration;
//! use cortid::fitter::MeshFitter;
//! use cortid::volume::{VolumeSize, VoxelSize, VoxelVolume};
//!
//! let config = Configuration::from_file("fit.yml").unwrap();
//! let volume = VoxelVolume::load_raw(
//!     "scan.raw",
//!     VolumeSize::new(512, 512, 200),
//!     VoxelSize::new(0.4, 0.4, 1.0),
//! )
//! .unwrap();
//!
//! let result = MeshFitter::new(config).fit(&volume).unwrap();
//! println!("{} iterations, converged: {}", result.iteration, result.converged);
//! ```

use std::path::Path;

use nalgebra::{Point3, Vector3};
use tracing::{debug, info};

use crate::algo::displacement::{log_likelihood, DisplacementOptimizer};
use crate::algo::{Progress, WeightedArapFitter};
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use crate::volume::{VolumeSampler, VoxelVolume};

/// Outcome of a fit, also the observable part of a [`FitState`].
#[derive(Debug, Clone, Default)]
pub struct FitResult {
    /// Reference mesh after placement in the volume.
    pub reference_mesh: Mesh,
    /// Current fitted mesh.
    pub deformed_mesh: Mesh,
    /// Optimal displacement of each vertex along its normal.
    pub displacement_vector: Vec<f64>,
    /// Confidence of each displacement.
    pub weights: Vec<f64>,
    /// Normals of the deformed mesh used for the last volume sampling.
    pub vertex_normals: Vec<Vector3<f64>>,
    /// World positions of the last volume sampling, sample major.
    pub volume_sampling_positions: Vec<Point3<f64>>,
    /// Densities at `volume_sampling_positions`.
    pub volume_samples: Vec<f64>,
    /// Translation applied to place the reference mesh.
    pub mesh_translation: Vector3<f64>,
    /// Smallest RMS displacement seen so far.
    pub min_dis_norm: f64,
    /// Log-likelihood of the deformed mesh.
    pub log_likelihood: f64,
    /// Current standard deviation of the displacement prior.
    pub effective_sigma_s: f64,
    /// Number of completed iterations.
    pub iteration: usize,
    /// Iterations since `min_dis_norm` last improved.
    pub non_decreasing: usize,
    /// Whether the convergence criterion is met.
    pub converged: bool,
    /// Whether the fit converged before reaching the iteration limit.
    pub success: bool,
}

/// Intermediate state of a fit.
#[derive(Debug, Clone)]
pub struct FitState<'a> {
    /// Current results.
    pub result: FitResult,
    volume: &'a VoxelVolume,
    optimizer: DisplacementOptimizer,
    arap: WeightedArapFitter,
}

impl<'a> FitState<'a> {
    /// Volume being fitted.
    pub fn volume(&self) -> &'a VoxelVolume {
        self.volume
    }

    /// Finish the fit and keep the results.
    pub fn into_result(self) -> FitResult {
        self.result
    }
}

/// Fits a reference mesh to a voxel volume.
#[derive(Debug, Clone)]
pub struct MeshFitter {
    configuration: Configuration,
}

impl MeshFitter {
    /// Create a fitter.
    pub fn new(configuration: Configuration) -> Self {
        Self { configuration }
    }

    /// Create a fitter from a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Configuration::from_file(path)?))
    }

    /// Fitting configuration.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Place the reference mesh and set up the fit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the model, reference mesh or volume
    /// is empty, and [`Error::InvalidParameter`] for unusable tuning values.
    pub fn init<'a>(&self, volume: &'a VoxelVolume) -> Result<FitState<'a>> {
        let config = &self.configuration;
        config.validate()?;
        if config.model.is_empty() {
            return Err(Error::InvalidState("measurement model is empty".into()));
        }
        if config.reference_mesh.is_empty() {
            return Err(Error::InvalidState("reference mesh is empty".into()));
        }
        if volume.is_empty() {
            return Err(Error::InvalidState("volume is empty".into()));
        }

        let mut reference = config.reference_mesh.clone();
        let mesh_translation = match config.reference_mesh_origin.target(volume) {
            Some(target) => target - reference.centroid(),
            None => Vector3::zeros(),
        };
        reference.translate(&mesh_translation);

        let arap = WeightedArapFitter::new(reference.vertices(), reference.faces(), config.sigma_e)?
            .with_options(config.arap.clone());
        let optimizer =
            DisplacementOptimizer::new(config.sigma_s, config.decay, config.min_non_decreasing);

        let n = reference.vertex_count();
        let result = FitResult {
            deformed_mesh: reference.clone(),
            vertex_normals: reference.normals().to_vec(),
            reference_mesh: reference,
            displacement_vector: vec![0.0; n],
            weights: vec![0.0; n],
            mesh_translation,
            min_dis_norm: f64::INFINITY,
            log_likelihood: f64::NEG_INFINITY,
            effective_sigma_s: config.sigma_s,
            ..FitResult::default()
        };

        Ok(FitState {
            result,
            volume,
            optimizer,
            arap,
        })
    }

    /// Sample the volume along the normals of the deformed mesh.
    pub fn volume_sampling_step(&self, state: &mut FitState<'_>) -> Result<()> {
        let mesh = &state.result.deformed_mesh;
        let offsets = self.configuration.model.sampling_range.elements();

        let positions: Vec<Point3<f64>> = offsets
            .iter()
            .flat_map(move |&t| {
                mesh.vertices()
                    .iter()
                    .zip(mesh.normals())
                    .map(move |(v, n)| v + n * t)
            })
            .collect();

        state.result.volume_samples = VolumeSampler::new(state.volume).sample_all(&positions);
        state.result.volume_sampling_positions = positions;
        state.result.vertex_normals = mesh.normals().to_vec();
        Ok(())
    }

    /// Find the most probable displacement of every vertex.
    pub fn optimal_displacement_step(&self, state: &mut FitState<'_>) -> Result<()> {
        let result = &mut state.result;
        let estimate = state.optimizer.optimize(
            &self.configuration.model,
            &result.vertex_normals,
            result.deformed_mesh.labels(),
            &result.volume_samples,
            result.non_decreasing,
        )?;
        result.displacement_vector = estimate.displacements;
        result.weights = estimate.weights;
        result.effective_sigma_s = state.optimizer.effective_sigma_s();
        Ok(())
    }

    /// Deform the reference mesh towards the displaced vertices.
    pub fn optimal_deformation_step(&self, state: &mut FitState<'_>) -> Result<()> {
        let result = &mut state.result;
        let targets: Vec<Point3<f64>> = result
            .deformed_mesh
            .vertices()
            .iter()
            .zip(&result.vertex_normals)
            .zip(&result.displacement_vector)
            .map(|((v, n), s)| v + n * *s)
            .collect();

        let fitted = state
            .arap
            .fit(&targets, &result.vertex_normals, &result.weights)?;
        result.deformed_mesh.set_vertices(fitted)
    }

    /// Evaluate the log-likelihood of the deformed mesh.
    pub fn log_likelihood_step(&self, state: &mut FitState<'_>) -> Result<()> {
        self.volume_sampling_step(state)?;
        let result = &mut state.result;
        result.log_likelihood = log_likelihood(
            &self.configuration.model,
            &result.vertex_normals,
            result.deformed_mesh.labels(),
            &result.volume_samples,
        )?;
        Ok(())
    }

    /// Update the convergence bookkeeping from the last displacements.
    pub fn convergence_test_step(&self, state: &mut FitState<'_>) -> Result<()> {
        let result = &mut state.result;
        let n = result.displacement_vector.len().max(1) as f64;
        let dis_norm = (result
            .displacement_vector
            .iter()
            .map(|s| s * s)
            .sum::<f64>()
            / n)
            .sqrt();

        if dis_norm < result.min_dis_norm {
            result.min_dis_norm = dis_norm;
            result.non_decreasing = 0;
        } else {
            result.non_decreasing += 1;
        }
        result.converged = result.non_decreasing > self.configuration.max_non_decreasing;
        Ok(())
    }

    /// Run all steps once.
    pub fn fit_one_iteration(&self, state: &mut FitState<'_>) -> Result<()> {
        self.volume_sampling_step(state)?;
        self.optimal_displacement_step(state)?;
        self.optimal_deformation_step(state)?;
        self.log_likelihood_step(state)?;
        self.convergence_test_step(state)?;
        state.result.iteration += 1;

        let r = &state.result;
        debug!(
            iteration = r.iteration,
            log_likelihood = r.log_likelihood,
            min_dis_norm = r.min_dis_norm,
            non_decreasing = r.non_decreasing,
            sigma_s = r.effective_sigma_s,
            "fit iteration"
        );
        Ok(())
    }

    /// Fit the reference mesh to `volume`.
    pub fn fit(&self, volume: &VoxelVolume) -> Result<FitResult> {
        self.fit_with_progress(volume, &Progress::none())
    }

    /// Fit the reference mesh to `volume`, reporting every iteration.
    pub fn fit_with_progress(&self, volume: &VoxelVolume, progress: &Progress) -> Result<FitResult> {
        let max_iterations = self.configuration.max_iterations;
        let mut state = self.init(volume)?;
        info!(
            vertices = state.result.reference_mesh.vertex_count(),
            max_iterations, "starting mesh fit"
        );

        while !state.result.converged && state.result.iteration < max_iterations {
            self.fit_one_iteration(&mut state)?;
            let r = &state.result;
            progress.report_iteration(r.iteration, max_iterations, r.log_likelihood, r.converged);
        }

        state.result.success = state.result.converged;
        info!(
            iterations = state.result.iteration,
            converged = state.result.converged,
            log_likelihood = state.result.log_likelihood,
            "mesh fit finished"
        );
        Ok(state.into_result())
    }
}
