//! Voxel volumes.
//!
//! A [`VoxelVolume`] stores a dense 3D grid of `f32` intensities (typically
//! Hounsfield units) together with the physical size of one voxel. Voxels are
//! laid out with x varying fastest:
//!
//! ```text
//! index = z * width * height + y * width + x
//! ```
//!
//! World positions are expressed in the same unit as the voxel size, with
//! the origin at the corner of voxel `(0, 0, 0)`.

pub mod sampler;

pub use sampler::VolumeSampler;

use std::path::Path;

use nalgebra::Vector3;

use crate::error::{Error, Result};

/// Number of voxels along each axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct VolumeSize {
    /// Number of voxels along x.
    pub width: usize,
    /// Number of voxels along y.
    pub height: usize,
    /// Number of voxels along z.
    pub depth: usize,
}

impl VolumeSize {
    /// Create a new volume size.
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Total number of voxels.
    #[inline]
    pub const fn linear(&self) -> usize {
        self.width * self.height * self.depth
    }

    /// Total number of voxels, or `None` if it does not fit a `usize`.
    pub fn checked_linear(&self) -> Option<usize> {
        self.width.checked_mul(self.height)?.checked_mul(self.depth)
    }

    /// Linear index of voxel `(x, y, z)`.
    #[inline]
    pub const fn index(&self, x: usize, y: usize, z: usize) -> usize {
        z * self.width * self.height + y * self.width + x
    }

    /// Sizes as a vector of floats.
    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.width as f64, self.height as f64, self.depth as f64)
    }
}

/// Physical extent of a single voxel (usually millimetres).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelSize {
    /// Extent along x.
    pub width: f64,
    /// Extent along y.
    pub height: f64,
    /// Extent along z.
    pub depth: f64,
}

impl VoxelSize {
    /// Create a new voxel size.
    pub const fn new(width: f64, height: f64, depth: f64) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Sizes as a vector.
    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.width, self.height, self.depth)
    }

    fn is_valid(&self) -> bool {
        [self.width, self.height, self.depth]
            .iter()
            .all(|s| s.is_finite() && *s > 0.0)
    }
}

impl Default for VoxelSize {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

/// A dense volume of `f32` voxels.
#[derive(Debug, Clone, Default)]
pub struct VoxelVolume {
    size: VolumeSize,
    voxel_size: VoxelSize,
    data: Vec<f32>,
}

impl VoxelVolume {
    /// Create a volume from voxel data.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` does not hold exactly `size.linear()`
    /// values or a voxel dimension is not positive.
    pub fn new(size: VolumeSize, voxel_size: VoxelSize, data: Vec<f32>) -> Result<Self> {
        if data.len() != size.linear() {
            return Err(Error::DimensionMismatch {
                what: "voxel data",
                expected: size.linear(),
                actual: data.len(),
            });
        }
        if !voxel_size.is_valid() {
            return Err(Error::invalid_param(
                "voxel_size",
                format!("{}x{}x{}", voxel_size.width, voxel_size.height, voxel_size.depth),
                "must be positive",
            ));
        }
        Ok(Self {
            size,
            voxel_size,
            data,
        })
    }

    /// Create a volume by evaluating `f(x, y, z)` at every voxel.
    pub fn from_fn<F>(size: VolumeSize, voxel_size: VoxelSize, f: F) -> Result<Self>
    where
        F: Fn(usize, usize, usize) -> f32,
    {
        let mut data = Vec::with_capacity(size.linear());
        for z in 0..size.depth {
            for y in 0..size.height {
                for x in 0..size.width {
                    data.push(f(x, y, z));
                }
            }
        }
        Self::new(size, voxel_size, data)
    }

    /// Load a headerless little-endian `f32` volume.
    pub fn load_raw<P: AsRef<Path>>(
        path: P,
        size: VolumeSize,
        voxel_size: VoxelSize,
    ) -> Result<Self> {
        crate::io::volume::load_raw(path, size, voxel_size)
    }

    /// Whether the volume holds no voxels.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of voxels along each axis.
    #[inline]
    pub fn size(&self) -> VolumeSize {
        self.size
    }

    /// Physical size of one voxel.
    #[inline]
    pub fn voxel_size(&self) -> VoxelSize {
        self.voxel_size
    }

    /// Voxel values, x fastest.
    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Value of voxel `(x, y, z)`, or `None` outside the volume.
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<f32> {
        if x < self.size.width && y < self.size.height && z < self.size.depth {
            Some(self.data[self.size.index(x, y, z)])
        } else {
            None
        }
    }

    /// Physical extent of the whole volume.
    pub fn physical_extent(&self) -> Vector3<f64> {
        self.size
            .to_vector()
            .component_mul(&self.voxel_size.to_vector())
    }

    /// Minimum and maximum voxel value.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.data.iter().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_size() {
        let size = VolumeSize::new(4, 3, 2);
        assert_eq!(size.linear(), 24);
        assert_eq!(size.index(0, 0, 0), 0);
        assert_eq!(size.index(1, 0, 0), 1);
        assert_eq!(size.index(0, 1, 0), 4);
        assert_eq!(size.index(0, 0, 1), 12);
        assert_eq!(size.index(3, 2, 1), 23);
    }

    #[test]
    fn test_new_checks_length() {
        let size = VolumeSize::new(2, 2, 2);
        assert!(VoxelVolume::new(size, VoxelSize::default(), vec![0.0; 7]).is_err());
        assert!(VoxelVolume::new(size, VoxelSize::default(), vec![0.0; 8]).is_ok());
    }

    #[test]
    fn test_new_checks_voxel_size() {
        let size = VolumeSize::new(1, 1, 1);
        let bad = VoxelSize::new(1.0, 0.0, 1.0);
        assert!(VoxelVolume::new(size, bad, vec![0.0]).is_err());
    }

    #[test]
    fn test_from_fn_layout() {
        let size = VolumeSize::new(3, 2, 2);
        let vol = VoxelVolume::from_fn(size, VoxelSize::default(), |x, y, z| {
            (x + 10 * y + 100 * z) as f32
        })
        .unwrap();
        assert_eq!(vol.get(2, 1, 1), Some(112.0));
        assert_eq!(vol.data()[size.index(1, 1, 0)], 11.0);
        assert_eq!(vol.get(3, 0, 0), None);
    }

    #[test]
    fn test_physical_extent() {
        let vol = VoxelVolume::new(
            VolumeSize::new(10, 20, 5),
            VoxelSize::new(0.5, 0.25, 2.0),
            vec![0.0; 1000],
        )
        .unwrap();
        let e = vol.physical_extent();
        assert!((e.x - 5.0).abs() < 1e-12);
        assert!((e.y - 5.0).abs() < 1e-12);
        assert!((e.z - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_volume() {
        let vol = VoxelVolume::default();
        assert!(vol.is_empty());
        assert_eq!(vol.value_range(), None);
    }
}
