//! Barycentric points and ray casting.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

use super::Mesh;
use crate::error::{Error, Result};

/// A point on a mesh triangle in barycentric coordinates.
///
/// The point is `u * v0 + v * v1 + (1 - u - v) * v2` where `v0`, `v1` and
/// `v2` are the corners of triangle `triangle`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarycentricPoint {
    /// Weights of the first and second triangle corner.
    pub uv: [f64; 2],
    /// Triangle index.
    pub triangle: usize,
}

impl BarycentricPoint {
    /// Create a new barycentric point.
    pub const fn new(u: f64, v: f64, triangle: usize) -> Self {
        Self { uv: [u, v], triangle }
    }

    /// Weights of all three corners.
    #[inline]
    pub fn weights(&self) -> [f64; 3] {
        [self.uv[0], self.uv[1], 1.0 - self.uv[0] - self.uv[1]]
    }
}

/// A ray with origin and direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    /// Ray origin.
    pub origin: Point3<f64>,
    /// Ray direction; distances are measured in multiples of its length.
    pub direction: Vector3<f64>,
}

impl Ray {
    /// Create a new ray.
    pub const fn new(origin: Point3<f64>, direction: Vector3<f64>) -> Self {
        Self { origin, direction }
    }
}

/// Closest intersection of a ray with a mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayMeshIntersection {
    /// Hit position on the mesh.
    pub position: BarycentricPoint,
    /// Distance along the ray; negative for hits behind the origin and
    /// infinite if nothing was hit.
    pub signed_distance: f64,
}

impl Default for RayMeshIntersection {
    fn default() -> Self {
        Self {
            position: BarycentricPoint::new(0.0, 0.0, 0),
            signed_distance: f64::INFINITY,
        }
    }
}

impl RayMeshIntersection {
    /// Whether the ray hit the mesh.
    #[inline]
    pub fn is_hit(&self) -> bool {
        self.signed_distance.is_finite()
    }
}

impl Mesh {
    /// Cartesian coordinates of a barycentric point.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTriangleIndex`] if the triangle does not exist.
    pub fn cartesian_representation(&self, point: &BarycentricPoint) -> Result<Point3<f64>> {
        let values = self.barycentric_interpolation(
            std::slice::from_ref(point),
            self.vertex_coordinates(),
            3,
        )?;
        Ok(Point3::new(values[0], values[1], values[2]))
    }

    /// Cartesian coordinates of many barycentric points.
    pub fn cartesian_representations(&self, points: &[BarycentricPoint]) -> Result<Vec<Point3<f64>>> {
        let values = self.barycentric_interpolation(points, self.vertex_coordinates(), 3)?;
        Ok(values
            .chunks_exact(3)
            .map(|c| Point3::new(c[0], c[1], c[2]))
            .collect())
    }

    /// Interpolate a per-vertex attribute of `dims` components at `points`.
    ///
    /// `attributes` holds `dims` consecutive values per vertex. The result
    /// holds `dims` consecutive values per point.
    pub fn barycentric_interpolation(
        &self,
        points: &[BarycentricPoint],
        attributes: impl AsRef<[f64]>,
        dims: usize,
    ) -> Result<Vec<f64>> {
        let attributes = attributes.as_ref();
        if attributes.len() != dims * self.vertex_count() {
            return Err(Error::DimensionMismatch {
                what: "vertex attributes",
                expected: dims * self.vertex_count(),
                actual: attributes.len(),
            });
        }
        if let Some(bad) = points.iter().find(|p| p.triangle >= self.triangle_count()) {
            return Err(Error::InvalidTriangleIndex {
                index: bad.triangle,
                count: self.triangle_count(),
            });
        }

        let mut out = Vec::with_capacity(points.len() * dims);
        for p in points {
            let face = self.faces()[p.triangle];
            let w = p.weights();
            for i in 0..dims {
                out.push(
                    w[0] * attributes[dims * face[0] + i]
                        + w[1] * attributes[dims * face[1] + i]
                        + w[2] * attributes[dims * face[2] + i],
                );
            }
        }
        Ok(out)
    }

    /// Closest intersection of the ray, searching in both directions.
    pub fn ray_intersection(&self, ray: &Ray) -> RayMeshIntersection {
        let mut best = RayMeshIntersection::default();
        if let Some((triangle, t, b1, b2)) = self.first_hit(&ray.origin, &ray.direction) {
            best = RayMeshIntersection {
                position: BarycentricPoint::new(1.0 - b1 - b2, b1, triangle),
                signed_distance: t,
            };
        }
        if let Some((triangle, t, b1, b2)) = self.first_hit(&ray.origin, &-ray.direction) {
            if best.signed_distance.abs() > t {
                best = RayMeshIntersection {
                    position: BarycentricPoint::new(1.0 - b1 - b2, b1, triangle),
                    signed_distance: -t,
                };
            }
        }
        best
    }

    /// Closest intersections of many rays, in parallel.
    pub fn ray_intersections(&self, rays: &[Ray]) -> Vec<RayMeshIntersection> {
        rays.par_iter().map(|r| self.ray_intersection(r)).collect()
    }

    fn vertex_coordinates(&self) -> Vec<f64> {
        self.vertices()
            .iter()
            .flat_map(|v| [v.x, v.y, v.z])
            .collect()
    }

    /// Nearest forward hit as `(triangle, t, b1, b2)` where `b1` and `b2`
    /// weight the second and third corner.
    fn first_hit(&self, origin: &Point3<f64>, dir: &Vector3<f64>) -> Option<(usize, f64, f64, f64)> {
        let mut best: Option<(usize, f64, f64, f64)> = None;
        for (fi, face) in self.faces().iter().enumerate() {
            let v = self.vertices();
            if let Some((t, b1, b2)) = moller_trumbore(origin, dir, &v[face[0]], &v[face[1]], &v[face[2]]) {
                if best.map_or(true, |(_, bt, _, _)| t < bt) {
                    best = Some((fi, t, b1, b2));
                }
            }
        }
        best
    }
}

/// Möller–Trumbore ray/triangle test. Returns `(t, b1, b2)` for hits with
/// `t >= 0`.
fn moller_trumbore(
    origin: &Point3<f64>,
    dir: &Vector3<f64>,
    p0: &Point3<f64>,
    p1: &Point3<f64>,
    p2: &Point3<f64>,
) -> Option<(f64, f64, f64)> {
    const EPSILON: f64 = 1e-12;

    let e1 = p1 - p0;
    let e2 = p2 - p0;
    let p = dir.cross(&e2);
    let det = e1.dot(&p);
    if det.abs() < EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - p0;
    let b1 = s.dot(&p) * inv_det;
    if !(0.0..=1.0).contains(&b1) {
        return None;
    }
    let q = s.cross(&e1);
    let b2 = dir.dot(&q) * inv_det;
    if b2 < 0.0 || b1 + b2 > 1.0 {
        return None;
    }
    let t = e2.dot(&q) * inv_det;
    (t >= 0.0).then_some((t, b1, b2))
}
