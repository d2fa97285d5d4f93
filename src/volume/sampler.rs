//! Trilinear sampling of voxel volumes at world positions.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

use super::VoxelVolume;

/// Samples a [`VoxelVolume`] with trilinear interpolation.
///
/// Lattice points outside the volume take the value `outside`.
#[derive(Debug, Clone, Copy)]
pub struct VolumeSampler<'a> {
    volume: &'a VoxelVolume,
    /// Value used for lattice points outside the volume.
    pub outside: f32,
}

impl<'a> VolumeSampler<'a> {
    /// Create a sampler that reads zero outside the volume.
    pub fn new(volume: &'a VoxelVolume) -> Self {
        Self {
            volume,
            outside: 0.0,
        }
    }

    /// Set the value read outside the volume.
    pub fn with_outside(mut self, outside: f32) -> Self {
        self.outside = outside;
        self
    }

    /// Sample at a single world position.
    pub fn sample(&self, position: &Point3<f64>) -> f64 {
        let scale = self.volume.voxel_size().to_vector();
        let voxel = position.coords.component_div(&scale);
        self.interpolate(&voxel)
    }

    /// Sample at many world positions in parallel.
    pub fn sample_all(&self, positions: &[Point3<f64>]) -> Vec<f64> {
        positions.par_iter().map(|p| self.sample(p)).collect()
    }

    fn at(&self, x: i64, y: i64, z: i64) -> f64 {
        let size = self.volume.size();
        let inside = x >= 0
            && y >= 0
            && z >= 0
            && (x as usize) < size.width
            && (y as usize) < size.height
            && (z as usize) < size.depth;
        if inside {
            self.volume.data()[size.index(x as usize, y as usize, z as usize)] as f64
        } else {
            self.outside as f64
        }
    }

    fn interpolate(&self, pos: &Vector3<f64>) -> f64 {
        let x0 = pos.map(|c| c.floor());
        let x1 = pos.map(|c| c.ceil());
        let xd = pos - x0;
        let xn = Vector3::repeat(1.0) - xd;

        let (ax, ay, az) = (x0.x as i64, x0.y as i64, x0.z as i64);
        let (bx, by, bz) = (x1.x as i64, x1.y as i64, x1.z as i64);

        let c000 = self.at(ax, ay, az);
        let c001 = self.at(ax, ay, bz);
        let c010 = self.at(ax, by, az);
        let c011 = self.at(ax, by, bz);
        let c100 = self.at(bx, ay, az);
        let c101 = self.at(bx, ay, bz);
        let c110 = self.at(bx, by, az);
        let c111 = self.at(bx, by, bz);

        let c00 = c000 * xn.x + c100 * xd.x;
        let c01 = c001 * xn.x + c101 * xd.x;
        let c10 = c010 * xn.x + c110 * xd.x;
        let c11 = c011 * xn.x + c111 * xd.x;

        let c0 = c00 * xn.y + c10 * xd.y;
        let c1 = c01 * xn.y + c11 * xd.y;

        c0 * xn.z + c1 * xd.z
    }
}
