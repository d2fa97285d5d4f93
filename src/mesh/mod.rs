//! Labelled triangle meshes.
//!
//! This module provides the face-vertex mesh used by the fitting pipeline.
//! Every vertex carries a [`Label`] selecting the measurement model PDF that
//! applies to it, and an angle-weighted normal that is kept in sync with the
//! vertex positions.
//!
//! # Construction
//!
//! ```
//! use cortid::mesh::Mesh;
//! use nalgebra::Point3;
//!
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.5, 1.0, 0.0),
//! ];
//! let mesh = Mesh::new(vertices, vec![[0, 1, 2]], vec![0, 0, 1]).unwrap();
//! assert_eq!(mesh.vertex_count(), 3);
//! assert_eq!(mesh.triangle_count(), 1);
//! ```
//!
//! # Queries
//!
//! - [`Mesh::cartesian_representation`] and [`Mesh::barycentric_interpolation`]
//!   evaluate points given in barycentric coordinates
//! - [`Mesh::ray_intersection`] casts a ray in both directions
//! - [`Mesh::upsample`] splits every triangle into four

mod query;
mod upsample;

pub use query::{BarycentricPoint, Ray, RayMeshIntersection};

use std::collections::{HashMap, VecDeque};

use nalgebra::{Point3, Vector3};

use crate::algo::laplacian::cotangent_laplacian;
use crate::algo::sparse::CsrMatrix;
use crate::error::{Error, Result};
use crate::labels::Label;

/// A triangle mesh with per-vertex labels and normals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    vertices: Vec<Point3<f64>>,
    faces: Vec<[usize; 3]>,
    labels: Vec<Label>,
    normals: Vec<Vector3<f64>>,
}

impl Mesh {
    /// Build a mesh from vertex positions, triangles and per-vertex labels.
    ///
    /// Face orientation is taken as given; see [`Mesh::orient_outward`].
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyMesh`] if there are vertices but no faces
    /// - [`Error::InvalidVertexIndex`] if a face references a missing vertex
    /// - [`Error::DegenerateFace`] if a face repeats a vertex
    /// - [`Error::LabelCountMismatch`] if there is not one label per vertex
    pub fn new(
        vertices: Vec<Point3<f64>>,
        faces: Vec<[usize; 3]>,
        labels: Vec<Label>,
    ) -> Result<Self> {
        if faces.is_empty() && !vertices.is_empty() {
            return Err(Error::EmptyMesh);
        }
        for (fi, face) in faces.iter().enumerate() {
            for &vi in face {
                if vi >= vertices.len() {
                    return Err(Error::InvalidVertexIndex { face: fi, vertex: vi });
                }
            }
            if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
                return Err(Error::DegenerateFace { face: fi });
            }
        }
        if labels.len() != vertices.len() {
            return Err(Error::LabelCountMismatch {
                expected: vertices.len(),
                actual: labels.len(),
            });
        }

        let normals = vertex_normals(&vertices, &faces);
        Ok(Self {
            vertices,
            faces,
            labels,
            normals,
        })
    }

    /// Build a mesh where every vertex has label 0.
    pub fn unlabelled(vertices: Vec<Point3<f64>>, faces: Vec<[usize; 3]>) -> Result<Self> {
        let labels = vec![0; vertices.len()];
        Self::new(vertices, faces, labels)
    }

    /// Number of vertices.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of triangles.
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.faces.len()
    }

    /// Whether the mesh has no vertices.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Vertex positions.
    #[inline]
    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    /// Triangles as vertex index triples.
    #[inline]
    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    /// Per-vertex labels.
    #[inline]
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Per-vertex unit normals.
    #[inline]
    pub fn normals(&self) -> &[Vector3<f64>] {
        &self.normals
    }

    /// Replace the vertex positions and recompute normals.
    pub fn set_vertices(&mut self, vertices: Vec<Point3<f64>>) -> Result<()> {
        if vertices.len() != self.vertices.len() {
            return Err(Error::DimensionMismatch {
                what: "vertex positions",
                expected: self.vertices.len(),
                actual: vertices.len(),
            });
        }
        self.vertices = vertices;
        self.normals = vertex_normals(&self.vertices, &self.faces);
        Ok(())
    }

    /// Replace the labels.
    pub fn set_labels(&mut self, labels: Vec<Label>) -> Result<()> {
        if labels.len() != self.vertices.len() {
            return Err(Error::LabelCountMismatch {
                expected: self.vertices.len(),
                actual: labels.len(),
            });
        }
        self.labels = labels;
        Ok(())
    }

    /// Mean of all vertex positions (origin for an empty mesh).
    pub fn centroid(&self) -> Point3<f64> {
        if self.vertices.is_empty() {
            return Point3::origin();
        }
        let sum = self
            .vertices
            .iter()
            .fold(Vector3::zeros(), |acc, v| acc + v.coords);
        Point3::from(sum / self.vertices.len() as f64)
    }

    /// Axis aligned bounding box as `(min, max)`.
    pub fn bounding_box(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.vertices.first()?;
        let mut min = *first;
        let mut max = *first;
        for v in &self.vertices {
            min = min.inf(v);
            max = max.sup(v);
        }
        Some((min, max))
    }

    /// Move every vertex by `offset`.
    pub fn translate(&mut self, offset: &Vector3<f64>) {
        for v in &mut self.vertices {
            *v += offset;
        }
    }

    /// Number of vertices per label, sorted by label.
    pub fn label_histogram(&self) -> Vec<(Label, usize)> {
        let mut counts: HashMap<Label, usize> = HashMap::new();
        for &l in &self.labels {
            *counts.entry(l).or_insert(0) += 1;
        }
        let mut hist: Vec<_> = counts.into_iter().collect();
        hist.sort_unstable();
        hist
    }

    /// Cotangent Laplacian of the current geometry.
    pub fn cotangent_laplacian(&self) -> CsrMatrix {
        cotangent_laplacian(&self.vertices, &self.faces)
    }

    /// Whether most vertex normals point away from the centroid.
    pub fn is_outward_oriented(&self) -> bool {
        let c = self.centroid();
        let outward = self
            .vertices
            .iter()
            .zip(&self.normals)
            .filter(|(v, n)| (*v - c).dot(n) > 0.0)
            .count();
        outward * 2 > self.vertices.len()
    }

    /// Make face orientation consistent per connected patch and flip patches
    /// with negative signed volume so that normals point outward.
    pub fn orient_outward(&mut self) {
        let components = orient_consistently(&mut self.faces);
        for component in components {
            let volume: f64 = component
                .iter()
                .map(|&fi| {
                    let [a, b, c] = self.faces[fi];
                    self.vertices[a]
                        .coords
                        .dot(&self.vertices[b].coords.cross(&self.vertices[c].coords))
                })
                .sum();
            if volume < 0.0 {
                for fi in component {
                    self.faces[fi].swap(1, 2);
                }
            }
        }
        self.normals = vertex_normals(&self.vertices, &self.faces);
    }
}

/// Angle-weighted per-vertex normals.
///
/// Vertices without incident area get a zero normal.
pub fn vertex_normals(vertices: &[Point3<f64>], faces: &[[usize; 3]]) -> Vec<Vector3<f64>> {
    let mut normals = vec![Vector3::zeros(); vertices.len()];
    for face in faces {
        let p = [vertices[face[0]], vertices[face[1]], vertices[face[2]]];
        let n = (p[1] - p[0]).cross(&(p[2] - p[0]));
        let len = n.norm();
        if len < 1e-300 {
            continue;
        }
        let n = n / len;
        for k in 0..3 {
            let e1 = p[(k + 1) % 3] - p[k];
            let e2 = p[(k + 2) % 3] - p[k];
            let angle = e1.angle(&e2);
            normals[face[k]] += angle * n;
        }
    }
    for n in &mut normals {
        let len = n.norm();
        if len > 0.0 {
            *n /= len;
        }
    }
    normals
}

/// Flip faces so that neighbours traverse shared edges in opposite
/// directions. Returns the faces of each connected patch.
fn orient_consistently(faces: &mut [[usize; 3]]) -> Vec<Vec<usize>> {
    let mut edge_faces: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    for (fi, f) in faces.iter().enumerate() {
        for k in 0..3 {
            let (a, b) = (f[k], f[(k + 1) % 3]);
            edge_faces.entry((a.min(b), a.max(b))).or_default().push(fi);
        }
    }

    let has_directed = |f: &[usize; 3], a: usize, b: usize| {
        (0..3).any(|k| f[k] == a && f[(k + 1) % 3] == b)
    };

    let mut visited = vec![false; faces.len()];
    let mut components = Vec::new();
    for seed in 0..faces.len() {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        let mut component = vec![seed];
        let mut queue = VecDeque::from([seed]);
        while let Some(fi) = queue.pop_front() {
            let f = faces[fi];
            for k in 0..3 {
                let (a, b) = (f[k], f[(k + 1) % 3]);
                let Some(neighbours) = edge_faces.get(&(a.min(b), a.max(b))) else {
                    continue;
                };
                for &nj in neighbours {
                    if visited[nj] {
                        continue;
                    }
                    visited[nj] = true;
                    if has_directed(&faces[nj], a, b) {
                        faces[nj].swap(1, 2);
                    }
                    component.push(nj);
                    queue.push_back(nj);
                }
            }
        }
        components.push(component);
    }
    components
}
