//! Raw volume files.
//!
//! A raw volume is a headerless sequence of little-endian `f32` values with x
//! varying fastest. The dimensions and voxel size are supplied by the caller.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::volume::{VolumeSize, VoxelSize, VoxelVolume};

/// Load a raw volume of the given size.
pub fn load_raw<P: AsRef<Path>>(
    path: P,
    size: VolumeSize,
    voxel_size: VoxelSize,
) -> Result<VoxelVolume> {
    let path = path.as_ref();
    let expected = size
        .checked_linear()
        .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()))
        .ok_or_else(|| {
            Error::load(
                path,
                format!("volume size {}x{}x{} is too large", size.width, size.height, size.depth),
            )
        })?;
    let bytes = std::fs::read(path)?;
    if bytes.len() != expected {
        return Err(Error::load(
            path,
            format!(
                "expected {} bytes for a {}x{}x{} volume, found {}",
                expected,
                size.width,
                size.height,
                size.depth,
                bytes.len()
            ),
        ));
    }

    let data: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    debug!(path = %path.display(), voxels = data.len(), "loaded raw volume");
    VoxelVolume::new(size, voxel_size, data)
}

/// Write a volume as raw little-endian `f32` values.
pub fn save_raw<P: AsRef<Path>>(volume: &VoxelVolume, path: P) -> Result<()> {
    let path = path.as_ref();
    File::create(path)
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            for v in volume.data() {
                writer.write_all(&v.to_le_bytes())?;
            }
            writer.flush()
        })
        .map_err(|e| Error::save(path, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.raw");
        let size = VolumeSize::new(3, 2, 2);
        let voxel = VoxelSize::new(0.5, 0.5, 2.0);
        let vol = VoxelVolume::from_fn(size, voxel, |x, y, z| (x + 10 * y + 100 * z) as f32).unwrap();
        save_raw(&vol, &path).unwrap();
        let loaded = load_raw(&path, size, voxel).unwrap();
        assert_eq!(loaded.data(), vol.data());
        assert_eq!(loaded.get(2, 1, 1), Some(112.0));
        assert_eq!(loaded.voxel_size(), voxel);
    }

    #[test]
    fn test_raw_rejects_overflowing_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.raw");
        std::fs::write(&path, [0u8; 8]).unwrap();
        let size = VolumeSize::new(usize::MAX, 2, 1);
        assert!(matches!(
            load_raw(&path, size, VoxelSize::default()),
            Err(Error::LoadError { .. })
        ));
    }

    #[test]
    fn test_save_into_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let vol = VoxelVolume::from_fn(VolumeSize::new(1, 1, 1), VoxelSize::default(), |_, _, _| 1.0).unwrap();
        let result = save_raw(&vol, dir.path().join("no").join("vol.raw"));
        assert!(matches!(result, Err(Error::SaveError { .. })));
    }

    #[test]
    fn test_raw_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.raw");
        std::fs::write(&path, [0u8; 10]).unwrap();
        assert!(load_raw(&path, VolumeSize::new(2, 2, 1), VoxelSize::default()).is_err());
    }
}
