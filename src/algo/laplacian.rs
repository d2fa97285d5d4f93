//! Cotangent Laplacian.
//!
//! The matrix has `L_ij = ½ (cot α_ij + cot β_ij)` for every edge `ij`, where
//! `α_ij` and `β_ij` are the angles opposite the edge, and `L_ii = -Σ_j L_ij`.
//! It is negative semi-definite, so `-L` is the usual positive form.

use nalgebra::Point3;

use super::sparse::CsrMatrix;

/// Build the cotangent Laplacian of a triangle mesh.
pub fn cotangent_laplacian(vertices: &[Point3<f64>], faces: &[[usize; 3]]) -> CsrMatrix {
    let n = vertices.len();
    let mut triplets = Vec::with_capacity(faces.len() * 12);

    for face in faces {
        for k in 0..3 {
            let i = face[(k + 1) % 3];
            let j = face[(k + 2) % 3];
            // Angle at corner k is opposite edge (i, j)
            let w = 0.5 * cotangent_angle(&vertices[face[k]], &vertices[i], &vertices[j]);
            triplets.push((i, j, w));
            triplets.push((j, i, w));
            triplets.push((i, i, -w));
            triplets.push((j, j, -w));
        }
    }

    CsrMatrix::from_triplets(n, n, triplets)
}

/// Compute cotangent of angle at vertex a in triangle (a, b, c).
pub fn cotangent_angle(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> f64 {
    let ab = b - a;
    let ac = c - a;

    let dot = ab.dot(&ac);
    let cross_len = ab.cross(&ac).norm();

    if cross_len < 1e-12 {
        0.0
    } else {
        dot / cross_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::cube;
    use nalgebra::DVector;

    #[test]
    fn test_cotangent_angle() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.0);
        let c = Point3::new(0.0, 1.0, 0.0);
        assert!(cotangent_angle(&a, &b, &c).abs() < 1e-12);
        // 45 degrees at b
        assert!((cotangent_angle(&b, &a, &c) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_right_triangle() {
        let v = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let l = cotangent_laplacian(&v, &[[0, 1, 2]]);
        // Edge (1, 2) is opposite the right angle
        assert!(l.get(1, 2).abs() < 1e-12);
        assert!((l.get(0, 1) - 0.5).abs() < 1e-12);
        assert!((l.get(0, 2) - 0.5).abs() < 1e-12);
        assert!((l.get(0, 0) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rows_sum_to_zero_and_symmetric() {
        let mesh = cube(Point3::new(0.3, -1.0, 2.0), 1.5);
        let l = cotangent_laplacian(mesh.vertices(), mesh.faces());
        let ones = DVector::from_element(mesh.vertex_count(), 1.0);
        assert!(l.mul_vec(&ones).norm() < 1e-12);
        for (i, j, v) in l.triplets() {
            assert!((l.get(j, i) - v).abs() < 1e-12);
        }
    }

    #[test]
    fn test_linear_precision_on_flat_grid() {
        // Interior vertex of a planar mesh: L applied to a linear function is 0
        let v: Vec<_> = (0..3)
            .flat_map(|j| (0..3).map(move |i| Point3::new(i as f64, j as f64, 0.0)))
            .collect();
        let mut faces = Vec::new();
        for j in 0..2 {
            for i in 0..2 {
                let v00 = j * 3 + i;
                faces.push([v00, v00 + 1, v00 + 4]);
                faces.push([v00, v00 + 4, v00 + 3]);
            }
        }
        let l = cotangent_laplacian(&v, &faces);
        let f = DVector::from_iterator(9, v.iter().map(|p| 2.0 * p.x - p.y));
        assert!(l.mul_vec(&f)[4].abs() < 1e-12);
    }
}
