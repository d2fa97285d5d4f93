//! Weighted As-Rigid-As-Possible (ARAP) surface fitting.
//!
//! Given target positions `Y`, target normals `N` and per-vertex weights
//! `gamma`, the fitter deforms the reference vertices `V0` to minimize
//!
//! ```text
//! σ⁻² Σ_ij w_ij ‖(v_i − v_j) − R_i (v0_i − v0_j)‖²  +  Σ_i γ_i (n_iᵀ (v_i − y_i))²
//! ```
//!
//! where `w_ij` are cotangent weights of the reference mesh. The first term
//! keeps the deformation locally rigid, the second pulls every vertex onto the
//! tangent plane through its target. The algorithm alternates between:
//! 1. **Global step**: Solve a sparse linear system for the vertex positions
//! 2. **Local step**: Find the best-fit rotation for each vertex neighbourhood
//!
//! # References
//!
//! - Sorkine, O., & Alexa, M. (2007).
//!   "As-Rigid-As-Possible Surface Modeling." SGP 2007.

use nalgebra::{DVector, Matrix3, Point3, Vector3};
use tracing::{trace, warn};

use super::laplacian::cotangent_laplacian;
use super::sparse::{conjugate_gradient_iterate, CsrMatrix};
use crate::error::{Error, Result};

/// Options for the weighted ARAP fitter.
#[derive(Debug, Clone)]
pub struct ArapOptions {
    /// Maximum number of local-global iterations.
    pub max_iterations: usize,

    /// Stop after this many iterations without a lower rigidity energy.
    pub max_non_decreasing: usize,

    /// Maximum iterations for the conjugate gradient solver (per global step).
    pub max_cg_iterations: usize,

    /// Convergence tolerance for the CG solver.
    pub cg_tolerance: f64,
}

impl Default for ArapOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            max_non_decreasing: 5,
            max_cg_iterations: 2000,
            cg_tolerance: 1e-6,
        }
    }
}

impl ArapOptions {
    /// Set the maximum number of local-global iterations.
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Set the maximum CG iterations.
    pub fn with_max_cg_iterations(mut self, max_iter: usize) -> Self {
        self.max_cg_iterations = max_iter;
        self
    }

    /// Set the CG tolerance.
    pub fn with_cg_tolerance(mut self, tol: f64) -> Self {
        self.cg_tolerance = tol;
        self
    }
}

/// Fits a reference mesh to weighted targets under an ARAP regularizer.
#[derive(Debug, Clone)]
pub struct WeightedArapFitter {
    reference: Vec<Point3<f64>>,
    laplacian: CsrMatrix,
    sigma_sq_inv: f64,
    options: ArapOptions,
}

impl WeightedArapFitter {
    /// Create a fitter for the reference mesh `(vertices, faces)`.
    ///
    /// `sigma` balances rigidity against the data term; larger values allow
    /// more deformation.
    pub fn new(vertices: &[Point3<f64>], faces: &[[usize; 3]], sigma: f64) -> Result<Self> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(Error::invalid_param("sigma", sigma, "must be positive"));
        }
        Ok(Self {
            reference: vertices.to_vec(),
            laplacian: cotangent_laplacian(vertices, faces),
            sigma_sq_inv: 1.0 / (sigma * sigma),
            options: ArapOptions::default(),
        })
    }

    /// Replace the solver options.
    pub fn with_options(mut self, options: ArapOptions) -> Self {
        self.options = options;
        self
    }

    /// Reference vertex positions.
    pub fn reference(&self) -> &[Point3<f64>] {
        &self.reference
    }

    /// Fit the reference mesh to `targets` along `normals` with `weights`.
    ///
    /// Returns the vertex positions with the lowest rigidity energy seen. A
    /// global step whose linear solve stops short of the tolerance keeps the
    /// last solver iterate.
    ///
    /// # Errors
    ///
    /// Returns an error if an input does not have one entry per vertex.
    pub fn fit(
        &self,
        targets: &[Point3<f64>],
        normals: &[Vector3<f64>],
        weights: &[f64],
    ) -> Result<Vec<Point3<f64>>> {
        let n = self.reference.len();
        for (what, len) in [
            ("ARAP targets", targets.len()),
            ("ARAP normals", normals.len()),
            ("ARAP weights", weights.len()),
        ] {
            if len != n {
                return Err(Error::DimensionMismatch {
                    what,
                    expected: n,
                    actual: len,
                });
            }
        }

        let blocks: Vec<Matrix3<f64>> = normals
            .iter()
            .zip(weights)
            .map(|(nrm, &g)| nrm * nrm.transpose() * g)
            .collect();
        let mut d = DVector::zeros(3 * n);
        for (i, (b, y)) in blocks.iter().zip(targets).enumerate() {
            d.fixed_rows_mut::<3>(3 * i).copy_from(&(b * y.coords));
        }

        let a = self
            .laplacian
            .kron_identity3()
            .scale(-2.0 * self.sigma_sq_inv)
            .add(&CsrMatrix::block_diagonal3(&blocks))?;

        let mut rotations = vec![Matrix3::identity(); n];
        let mut current = self.reference.clone();
        let mut best = current.clone();
        let mut min_energy = f64::MAX;
        let mut non_decreasing = 0;

        for iteration in 0..self.options.max_iterations {
            current = self.optimize_positions(&a, &d, &rotations, &current)?;
            self.optimize_rotations(&current, &mut rotations);

            let energy = self.rigidity_energy(&current, &rotations);
            trace!(iteration, energy, "arap iteration");

            if energy < min_energy {
                non_decreasing = 0;
                min_energy = energy;
                best.clone_from(&current);
            } else {
                non_decreasing += 1;
            }
            if non_decreasing > self.options.max_non_decreasing {
                break;
            }
        }

        Ok(best)
    }

    /// Global step: solve for positions with fixed rotations.
    fn optimize_positions(
        &self,
        a: &CsrMatrix,
        d: &DVector<f64>,
        rotations: &[Matrix3<f64>],
        guess: &[Point3<f64>],
    ) -> Result<Vec<Point3<f64>>> {
        let n = self.reference.len();
        let mut c = DVector::zeros(3 * n);
        for i in 0..n {
            let mut ci = Vector3::zeros();
            for (j, w) in self.laplacian.row(i) {
                if i == j {
                    continue;
                }
                let e0 = self.reference[i] - self.reference[j];
                ci += w * (rotations[i] + rotations[j]) * e0 * 0.5;
            }
            c.fixed_rows_mut::<3>(3 * i).copy_from(&ci);
        }

        let rhs = 2.0 * self.sigma_sq_inv * c + d;
        let x0 = DVector::from_iterator(3 * n, guess.iter().flat_map(|p| [p.x, p.y, p.z]));
        let solution = conjugate_gradient_iterate(
            a,
            &rhs,
            Some(&x0),
            self.options.max_cg_iterations,
            self.options.cg_tolerance,
        )?;
        if !solution.converged {
            warn!(
                iterations = solution.iterations,
                residual = solution.residual,
                "arap linear solve did not reach tolerance, using last iterate"
            );
        }
        let x = solution.x;

        Ok((0..n)
            .map(|i| Point3::new(x[3 * i], x[3 * i + 1], x[3 * i + 2]))
            .collect())
    }

    /// Local step: best-fit rotation per vertex.
    fn optimize_rotations(&self, current: &[Point3<f64>], rotations: &mut [Matrix3<f64>]) {
        for (i, rotation) in rotations.iter_mut().enumerate() {
            let mut s = Matrix3::zeros();
            for (j, w) in self.laplacian.row(i) {
                if i == j {
                    continue;
                }
                let e0 = self.reference[i] - self.reference[j];
                let e = current[i] - current[j];
                s += w * e * e0.transpose();
            }
            *rotation = closest_rotation(&s);
        }
    }

    /// Rigidity energy of `current` under `rotations`.
    fn rigidity_energy(&self, current: &[Point3<f64>], rotations: &[Matrix3<f64>]) -> f64 {
        let mut energy = 0.0;
        for i in 0..current.len() {
            for (j, w) in self.laplacian.row(i) {
                if i == j {
                    continue;
                }
                let e0 = self.reference[i] - self.reference[j];
                let e = current[i] - current[j];
                energy += w * (e - rotations[i] * e0).norm_squared();
            }
        }
        energy
    }
}

/// Find the rotation closest to `m` using SVD.
///
/// With `m = U Σ Vᵀ` the result is `U Vᵀ`; the last column of `U` is negated
/// when needed so that the determinant is +1.
pub fn closest_rotation(m: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = m.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Matrix3::identity();
    };

    let r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fixed = u;
        u_fixed.column_mut(2).neg_mut();
        return u_fixed * v_t;
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::cube;
    use crate::mesh::Mesh;
    use nalgebra::Rotation3;

    fn fitter_for(mesh: &Mesh, sigma: f64) -> WeightedArapFitter {
        WeightedArapFitter::new(mesh.vertices(), mesh.faces(), sigma)
            .unwrap()
            .with_options(ArapOptions::default().with_cg_tolerance(1e-10))
    }

    #[test]
    fn test_closest_rotation() {
        let r = Rotation3::from_euler_angles(0.3, -0.2, 1.1).into_inner();
        let result = closest_rotation(&(r * 2.5));
        assert!((result - r).norm() < 1e-10);
        assert!((result.determinant() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_closest_rotation_of_reflection() {
        let m = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -1.0));
        let r = closest_rotation(&m);
        assert!((r.determinant() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_fit_identity() {
        let mesh = cube(Point3::origin(), 1.0);
        let fitter = fitter_for(&mesh, 2.0);
        let weights = vec![1.0; mesh.vertex_count()];
        let result = fitter.fit(mesh.vertices(), mesh.normals(), &weights).unwrap();
        for (a, b) in result.iter().zip(mesh.vertices()) {
            assert!((a - b).norm() < 1e-6);
        }
    }

    #[test]
    fn test_fit_translation() {
        let mesh = cube(Point3::origin(), 1.0);
        let fitter = fitter_for(&mesh, 2.0);
        let t = Vector3::new(0.3, -0.2, 0.1);
        let targets: Vec<_> = mesh.vertices().iter().map(|v| v + t).collect();
        let weights = vec![1.0; mesh.vertex_count()];
        let result = fitter.fit(&targets, mesh.normals(), &weights).unwrap();
        for (a, b) in result.iter().zip(&targets) {
            assert!((a - b).norm() < 1e-4, "{:?} vs {:?}", a, b);
        }
    }

    #[test]
    fn test_fit_moves_toward_inflated_targets() {
        let mut mesh = cube(Point3::origin(), 1.0);
        mesh.upsample(1);
        let fitter = fitter_for(&mesh, 1.0);
        let targets: Vec<_> = mesh
            .vertices()
            .iter()
            .zip(mesh.normals())
            .map(|(v, n)| v + 0.2 * n)
            .collect();
        let weights = vec![1.0; mesh.vertex_count()];
        let result = fitter.fit(&targets, mesh.normals(), &weights).unwrap();
        let before: f64 = mesh.vertices().iter().map(|v| v.coords.norm()).sum();
        let after: f64 = result.iter().map(|v| v.coords.norm()).sum();
        assert!(after > before);
        assert!(result.iter().all(|p| p.coords.iter().all(|c| c.is_finite())));
    }

    #[test]
    fn test_fit_survives_truncated_linear_solve() {
        let mut mesh = cube(Point3::origin(), 1.0);
        mesh.upsample(1);
        let options = ArapOptions::default()
            .with_max_cg_iterations(1)
            .with_cg_tolerance(1e-14)
            .with_max_iterations(3);
        let fitter = WeightedArapFitter::new(mesh.vertices(), mesh.faces(), 1.0)
            .unwrap()
            .with_options(options);
        let targets: Vec<_> = mesh
            .vertices()
            .iter()
            .zip(mesh.normals())
            .map(|(v, n)| v + 0.3 * n)
            .collect();
        let weights = vec![1.0; mesh.vertex_count()];
        let result = fitter.fit(&targets, mesh.normals(), &weights).unwrap();
        assert_eq!(result.len(), mesh.vertex_count());
        assert!(result.iter().all(|p| p.coords.iter().all(|c| c.is_finite())));
    }

    #[test]
    fn test_fit_dimension_mismatch() {
        let mesh = cube(Point3::origin(), 1.0);
        let fitter = fitter_for(&mesh, 1.0);
        let result = fitter.fit(&mesh.vertices()[..3], mesh.normals(), &[1.0; 8]);
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_invalid_sigma() {
        let mesh = cube(Point3::origin(), 1.0);
        assert!(WeightedArapFitter::new(mesh.vertices(), mesh.faces(), 0.0).is_err());
    }
}
