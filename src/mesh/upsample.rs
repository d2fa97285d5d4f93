//! Midpoint subdivision.

use std::collections::HashMap;

use nalgebra::Point3;

use super::{vertex_normals, Mesh};

impl Mesh {
    /// Split every triangle into four at its edge midpoints, `n_times` times.
    ///
    /// Existing vertices keep their index, position and label. Edge midpoints
    /// are appended with label 0.
    pub fn upsample(&mut self, n_times: usize) -> &mut Self {
        for _ in 0..n_times {
            self.upsample_once();
        }
        self
    }

    fn upsample_once(&mut self) {
        let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
        let mut faces = Vec::with_capacity(self.faces.len() * 4);

        for fi in 0..self.faces.len() {
            let [a, b, c] = self.faces[fi];
            let ab = self.midpoint(&mut midpoints, a, b);
            let bc = self.midpoint(&mut midpoints, b, c);
            let ca = self.midpoint(&mut midpoints, c, a);
            faces.push([a, ab, ca]);
            faces.push([ab, b, bc]);
            faces.push([ca, bc, c]);
            faces.push([ab, bc, ca]);
        }

        self.faces = faces;
        self.normals = vertex_normals(&self.vertices, &self.faces);
    }

    fn midpoint(&mut self, cache: &mut HashMap<(usize, usize), usize>, a: usize, b: usize) -> usize {
        let key = (a.min(b), a.max(b));
        if let Some(&index) = cache.get(&key) {
            return index;
        }
        let p = Point3::from((self.vertices[a].coords + self.vertices[b].coords) * 0.5);
        let index = self.vertices.len();
        self.vertices.push(p);
        self.labels.push(0);
        cache.insert(key, index);
        index
    }
}

#[cfg(test)]
mod tests {
    use crate::mesh::tests::{cube, tetrahedron};
    use nalgebra::Point3;

    #[test]
    fn test_upsample_counts() {
        let mut mesh = tetrahedron();
        mesh.upsample(1);
        // 4 + 6 edges
        assert_eq!(mesh.vertex_count(), 10);
        assert_eq!(mesh.triangle_count(), 16);
        assert_eq!(mesh.labels().len(), 10);
        assert_eq!(mesh.normals().len(), 10);

        mesh.upsample(1);
        // 10 + 24 edges
        assert_eq!(mesh.vertex_count(), 34);
        assert_eq!(mesh.triangle_count(), 64);
    }

    #[test]
    fn test_upsample_zero_is_noop() {
        let mut mesh = tetrahedron();
        let before = mesh.clone();
        mesh.upsample(0);
        assert_eq!(mesh, before);
    }

    #[test]
    fn test_upsample_keeps_vertices_and_labels() {
        let mut mesh = tetrahedron();
        let before = mesh.clone();
        mesh.upsample(1);
        assert_eq!(&mesh.vertices()[..4], before.vertices());
        assert_eq!(&mesh.labels()[..4], before.labels());
    }

    #[test]
    fn test_upsample_midpoints_get_label_zero() {
        let mut mesh = tetrahedron();
        mesh.set_labels(vec![3, 5, 7, 9]).unwrap();
        mesh.upsample(2);
        assert_eq!(&mesh.labels()[..4], &[3, 5, 7, 9]);
        assert_eq!(mesh.labels().len(), 34);
        assert!(mesh.labels()[4..].iter().all(|&l| l == 0));
    }

    #[test]
    fn test_upsample_preserves_orientation() {
        let mut mesh = cube(Point3::origin(), 1.0);
        mesh.upsample(2);
        assert!(mesh.is_outward_oriented());
        let c = mesh.centroid();
        assert!((c - Point3::origin()).norm() < 1e-12);
    }
}
