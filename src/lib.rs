//! # cortid
//!
//! Model based segmentation of cortical bone surfaces in quantitative CT.
//!
//! A labelled reference mesh is deformed until its surface agrees with the
//! densities of a voxel volume. A [`MeasurementModel`](model::MeasurementModel)
//! describes, for every vertex label, how likely a density is observed at a
//! given offset along the surface normal. Each fitting iteration moves every
//! vertex to its most probable position along the normal and then deforms the
//! reference mesh towards those positions as rigidly as possible.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cortid::prelude::*;
//!
//! let fitter = MeshFitter::from_file("femur.yml").unwrap();
//! let volume = VoxelVolume::load_raw(
//!     "scan.raw",
//!     VolumeSize::new(256, 256, 120),
//!     VoxelSize::new(0.5, 0.5, 1.0),
//! )
//! .unwrap();
//!
//! let result = fitter.fit(&volume).unwrap();
//! cortid::io::save_mesh_with_labels(&result.deformed_mesh, "fitted.off", "fitted.labels").unwrap();
//! ```
//!
//! ## Building Inputs Programmatically
//!
//! ```
//! use cortid::prelude::*;
//! use nalgebra::Point3;
//!
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//!     Point3::new(0.0, 0.0, 1.0),
//! ];
//! let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]];
//!
//! let mesh = Mesh::new(vertices, faces, vec![0, 0, 1, 1]).unwrap();
//! assert_eq!(mesh.vertex_count(), 4);
//! assert_eq!(mesh.label_histogram(), vec![(0, 2), (1, 2)]);
//!
//! let volume = VoxelVolume::from_fn(VolumeSize::new(8, 8, 8), VoxelSize::default(), |x, _, _| {
//!     x as f32
//! })
//! .unwrap();
//! assert_eq!(volume.value_range(), Some((0.0, 7.0)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algo;
pub mod config;
pub mod error;
pub mod fitter;
pub mod io;
pub mod labels;
pub mod mesh;
pub mod model;
pub mod range;
pub mod volume;

/// Prelude module for convenient imports.
///
/// This module re-exports the most commonly used types:
///
/// ```
/// use cortid::prelude::*;
/// ```
pub mod prelude {
    pub use crate::algo::Progress;
    pub use crate::config::{Configuration, Origin};
    pub use crate::error::{Error, Result};
    pub use crate::fitter::{FitResult, FitState, MeshFitter};
    pub use crate::labels::{ColorToLabel, CustomColorMap, DefaultColorMap, Label, LabelToColor};
    pub use crate::mesh::Mesh;
    pub use crate::model::MeasurementModel;
    pub use crate::range::DiscreteRange;
    pub use crate::volume::{VolumeSize, VoxelSize, VoxelVolume};
}

// Re-export nalgebra types for convenience
pub use nalgebra;
