//! Numerical building blocks of the mesh fitter.
//!
//! - **Sparse algebra**: CSR matrices and a preconditioned conjugate gradient solver
//! - **Laplacian**: cotangent weights of a triangle mesh
//! - **ARAP**: as-rigid-as-possible fitting to weighted targets
//! - **Displacements**: maximum a-posteriori vertex displacements along normals
//! - **Progress**: per-iteration progress callbacks

pub mod arap;
pub mod displacement;
pub mod laplacian;
pub mod progress;
pub mod sparse;

pub use arap::{ArapOptions, WeightedArapFitter};
pub use displacement::{DisplacementEstimate, DisplacementOptimizer};
pub use progress::Progress;
