//! Mesh, label and volume file I/O.
//!
//! # Supported Formats
//!
//! | Format | Extension | Load | Save | Vertex colors |
//! |--------|-----------|------|------|---------------|
//! | Object File Format | `.off`, `.coff` | ✓ | ✓ | ✓ |
//! | PLY (Stanford polygon) | `.ply` | ✓ | ✓ | ✓ |
//!
//! Labels are stored either in a separate text file with one label per
//! vertex, or encoded as vertex colors through a [`ColorToLabel`] map.
//! Volumes are headerless little-endian `f32` files, see [`volume`].
//!
//! # Usage
//!
//! ```no_run
//! use cortid::io::{load_mesh_with_labels, save_mesh_with_color_map};
//! use cortid::labels::DefaultLabelToColorMap;
//!
//! let mesh = load_mesh_with_labels("femur.off", "femur.labels").unwrap();
//! save_mesh_with_color_map(&mesh, "femur_colored.off", &DefaultLabelToColorMap).unwrap();
//! ```
//!
//! Loaded meshes are oriented so that their normals point outward.

pub mod labels;
pub mod off;
pub mod ply;
pub mod volume;

use std::path::Path;

use nalgebra::Point3;
use tracing::warn;

use crate::error::{Error, Result};
use crate::labels::{ColorToLabel, Label, LabelToColor};
use crate::mesh::Mesh;

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Object File Format.
    Off,
    /// PLY (Stanford polygon) format.
    Ply,
}

impl Format {
    /// Detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Format> {
        match ext.to_lowercase().as_str() {
            "off" | "coff" => Some(Format::Off),
            "ply" => Some(Format::Ply),
            _ => None,
        }
    }

    /// Detect format from file path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Format> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Format::from_extension)
    }

    fn detect(path: &Path) -> Result<Format> {
        Format::from_path(path).ok_or_else(|| Error::UnsupportedFormat {
            extension: path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("(none)")
                .to_string(),
        })
    }
}

/// Raw contents of a mesh file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    /// Vertex positions.
    pub vertices: Vec<Point3<f64>>,
    /// Triangles; polygons are fan triangulated on load.
    pub faces: Vec<[usize; 3]>,
    /// Per-vertex RGB colors in `[0, 1]`, if the file has them.
    pub colors: Option<Vec<[f64; 3]>>,
}

impl MeshData {
    /// Check that colors, when present, match the vertices one to one.
    pub fn check_colors(&self) -> Result<()> {
        match &self.colors {
            Some(colors) if colors.len() != self.vertices.len() => Err(Error::DimensionMismatch {
                what: "vertex colors",
                expected: self.vertices.len(),
                actual: colors.len(),
            }),
            _ => Ok(()),
        }
    }
}

/// Read the raw contents of a mesh file.
pub fn load_mesh_data<P: AsRef<Path>>(path: P) -> Result<MeshData> {
    let path = path.as_ref();
    match Format::detect(path)? {
        Format::Off => off::read(path),
        Format::Ply => ply::read(path),
    }
}

/// Write raw mesh contents.
pub fn save_mesh_data<P: AsRef<Path>>(data: &MeshData, path: P) -> Result<()> {
    let path = path.as_ref();
    match Format::detect(path)? {
        Format::Off => off::write(data, path),
        Format::Ply => ply::write(data, path),
    }
}

fn oriented_mesh(data: MeshData, labels: Vec<Label>, path: &Path) -> Result<Mesh> {
    let mut mesh = Mesh::new(data.vertices, data.faces, labels)
        .map_err(|e| Error::load(path, e.to_string()))?;
    mesh.orient_outward();
    Ok(mesh)
}

/// Load a mesh and give every vertex label 0.
pub fn load_mesh<P: AsRef<Path>>(path: P) -> Result<Mesh> {
    let path = path.as_ref();
    let data = load_mesh_data(path)?;
    let n = data.vertices.len();
    oriented_mesh(data, vec![0; n], path)
}

/// Load a mesh together with a label file.
pub fn load_mesh_with_labels<P, Q>(mesh_path: P, label_path: Q) -> Result<Mesh>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let mesh_path = mesh_path.as_ref();
    let data = load_mesh_data(mesh_path)?;
    let labels = labels::read(label_path, data.vertices.len())?;
    oriented_mesh(data, labels, mesh_path)
}

/// Load a mesh and derive labels from its vertex colors.
///
/// A file without vertex colors yields label 0 for every vertex.
pub fn load_mesh_with_color_map<P, C>(path: P, color_map: &C) -> Result<Mesh>
where
    P: AsRef<Path>,
    C: ColorToLabel + ?Sized,
{
    let path = path.as_ref();
    let mut data = load_mesh_data(path)?;
    let labels = match data.colors.take() {
        Some(colors) => colors
            .iter()
            .map(|&[r, g, b]| color_map.label(r, g, b))
            .collect(),
        None => {
            warn!(path = %path.display(), "mesh has no vertex colors, labelling all vertices 0");
            vec![0; data.vertices.len()]
        }
    };
    oriented_mesh(data, labels, path)
}

fn geometry(mesh: &Mesh) -> MeshData {
    MeshData {
        vertices: mesh.vertices().to_vec(),
        faces: mesh.faces().to_vec(),
        colors: None,
    }
}

/// Save the geometry of a mesh. Empty meshes are not written.
pub fn save_mesh<P: AsRef<Path>>(mesh: &Mesh, path: P) -> Result<()> {
    if mesh.is_empty() {
        return Ok(());
    }
    save_mesh_data(&geometry(mesh), path)
}

/// Save the geometry of a mesh and its labels. Empty meshes are not written.
pub fn save_mesh_with_labels<P, Q>(mesh: &Mesh, mesh_path: P, label_path: Q) -> Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    if mesh.is_empty() {
        return Ok(());
    }
    save_mesh_data(&geometry(mesh), mesh_path)?;
    labels::write(mesh.labels(), label_path)
}

/// Save a mesh with its labels encoded as vertex colors.
pub fn save_mesh_with_color_map<P, C>(mesh: &Mesh, path: P, label_map: &C) -> Result<()>
where
    P: AsRef<Path>,
    C: LabelToColor + ?Sized,
{
    if mesh.is_empty() {
        return Ok(());
    }
    let colors = mesh
        .labels()
        .iter()
        .map(|&l| label_map.color(l))
        .collect::<Result<Vec<_>>>()?;
    let mut data = geometry(mesh);
    data.colors = Some(colors);
    save_mesh_data(&data, path)
}

/// Scale colors given as bytes into `[0, 1]`.
///
/// Colors are treated as bytes as soon as one component exceeds 1.
pub(crate) fn normalize_colors(colors: &mut [[f64; 3]]) {
    if colors.iter().flatten().any(|&c| c > 1.0) {
        for c in colors.iter_mut().flatten() {
            *c /= 255.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{CustomColorMap, DefaultColorMap, DefaultLabelToColorMap};
    use crate::mesh::tests::{cube, tetrahedron};

    #[test]
    fn test_format_detection() {
        assert_eq!(Format::from_path("a/b.OFF"), Some(Format::Off));
        assert_eq!(Format::from_path("a.coff"), Some(Format::Off));
        assert_eq!(Format::from_path("a.ply"), Some(Format::Ply));
        assert_eq!(Format::from_path("a.stl"), None);
        assert!(matches!(
            load_mesh("mesh.obj"),
            Err(Error::UnsupportedFormat { extension }) if extension == "obj"
        ));
    }

    #[test]
    fn test_labels_roundtrip_all_formats() {
        let dir = tempfile::tempdir().unwrap();
        let mut mesh = cube(Point3::new(1.0, 2.0, 3.0), 0.5);
        mesh.set_labels((0..8).collect()).unwrap();
        for ext in ["off", "ply"] {
            let mesh_path = dir.path().join(format!("cube.{}", ext));
            let label_path = dir.path().join("cube.labels");
            save_mesh_with_labels(&mesh, &mesh_path, &label_path).unwrap();
            let loaded = load_mesh_with_labels(&mesh_path, &label_path).unwrap();
            assert_eq!(loaded.labels(), mesh.labels());
            assert_eq!(loaded.faces(), mesh.faces());
            for (a, b) in loaded.vertices().iter().zip(mesh.vertices()) {
                assert!((a - b).norm() < 1e-5);
            }
        }
    }

    #[test]
    fn test_color_map_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut mesh = tetrahedron();
        mesh.set_labels(vec![0, 255, 65535, 0x00ab_cdef]).unwrap();
        for ext in ["off", "ply"] {
            let path = dir.path().join(format!("tet.{}", ext));
            save_mesh_with_color_map(&mesh, &path, &DefaultLabelToColorMap).unwrap();
            let loaded = load_mesh_with_color_map(&path, &DefaultColorMap).unwrap();
            assert_eq!(loaded.labels(), mesh.labels());
        }
    }

    #[test]
    fn test_uncolored_mesh_gets_label_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tet.off");
        save_mesh(&tetrahedron(), &path).unwrap();
        let loaded = load_mesh_with_color_map(&path, &CustomColorMap::default()).unwrap();
        assert_eq!(loaded.labels(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_load_orients_outward() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inside_out.off");
        let mesh = cube(Point3::origin(), 1.0);
        let mut data = geometry(&mesh);
        for f in &mut data.faces {
            f.swap(1, 2);
        }
        save_mesh_data(&data, &path).unwrap();
        let loaded = load_mesh(&path).unwrap();
        assert!(loaded.is_outward_oriented());
        assert_eq!(loaded.faces(), mesh.faces());
    }

    #[test]
    fn test_save_empty_mesh_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.off");
        save_mesh(&Mesh::default(), &path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_save_failures_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = tetrahedron();
        for name in ["tet.off", "tet.ply"] {
            let path = dir.path().join("missing").join(name);
            match save_mesh(&mesh, &path) {
                Err(Error::SaveError { path: p, .. }) => assert_eq!(p, path),
                other => panic!("unexpected result {:?}", other),
            }
        }
        let mesh_path = dir.path().join("tet.off");
        let label_path = dir.path().join("missing").join("tet.labels");
        assert!(matches!(
            save_mesh_with_labels(&mesh, &mesh_path, &label_path),
            Err(Error::SaveError { .. })
        ));
    }

    #[test]
    fn test_mismatched_colors_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = geometry(&tetrahedron());
        data.colors = Some(vec![[0.0; 3]; 3]);
        for name in ["tet.off", "tet.ply"] {
            let path = dir.path().join(name);
            assert!(matches!(save_mesh_data(&data, &path), Err(Error::DimensionMismatch { .. })));
            assert!(!path.exists());
        }
    }

    #[test]
    fn test_label_count_must_match() {
        let dir = tempfile::tempdir().unwrap();
        let mesh_path = dir.path().join("tet.off");
        let label_path = dir.path().join("tet.labels");
        save_mesh(&tetrahedron(), &mesh_path).unwrap();
        std::fs::write(&label_path, "1 2 3").unwrap();
        assert!(load_mesh_with_labels(&mesh_path, &label_path).is_err());
    }

    #[test]
    fn test_normalize_colors() {
        let mut unit = vec![[0.5, 1.0, 0.0]];
        normalize_colors(&mut unit);
        assert_eq!(unit[0], [0.5, 1.0, 0.0]);
        let mut bytes = vec![[255.0, 0.0, 51.0]];
        normalize_colors(&mut bytes);
        assert_eq!(bytes[0], [1.0, 0.0, 0.2]);
    }
}
