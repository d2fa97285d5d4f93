//! Sparse matrices and a preconditioned conjugate gradient solver.
//!
//! [`CsrMatrix`] stores the ARAP system matrices row-compressed, and
//! [`conjugate_gradient`] solves the resulting symmetric positive definite
//! systems with a Jacobi preconditioner.

use nalgebra::{DVector, Matrix3};

use crate::error::{Error, Result};

/// Row-compressed sparse matrix of `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    rows: usize,
    cols: usize,
    /// `row_ptr[i]..row_ptr[i + 1]` indexes the entries of row `i`.
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Assemble a matrix from `(row, col, value)` entries.
    ///
    /// Entries that land on the same position accumulate.
    pub fn from_triplets(rows: usize, cols: usize, mut triplets: Vec<(usize, usize, f64)>) -> Self {
        triplets.sort_unstable_by_key(|&(r, c, _)| (r, c));

        let mut row_ptr = vec![0; rows + 1];
        let mut col_idx: Vec<usize> = Vec::with_capacity(triplets.len());
        let mut values: Vec<f64> = Vec::with_capacity(triplets.len());
        let mut last: Option<(usize, usize)> = None;

        for (r, c, v) in triplets {
            if last == Some((r, c)) {
                if let Some(acc) = values.last_mut() {
                    *acc += v;
                }
            } else {
                col_idx.push(c);
                values.push(v);
                row_ptr[r + 1] += 1;
                last = Some((r, c));
            }
        }

        for r in 0..rows {
            row_ptr[r + 1] += row_ptr[r];
        }

        Self {
            rows,
            cols,
            row_ptr,
            col_idx,
            values,
        }
    }

    /// Row count.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.rows
    }

    /// Column count.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.cols
    }

    /// Number of explicitly stored entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Iterate over `(col, value)` of row `i`.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        self.col_idx[range.clone()]
            .iter()
            .copied()
            .zip(self.values[range].iter().copied())
    }

    /// Value at `(i, j)`, zero if not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.row(i).find(|&(c, _)| c == j).map_or(0.0, |(_, v)| v)
    }

    /// Main diagonal.
    pub fn diagonal(&self) -> DVector<f64> {
        DVector::from_fn(self.rows.min(self.cols), |i, _| self.get(i, i))
    }

    /// All entries as triplets.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.rows).flat_map(move |i| self.row(i).map(move |(j, v)| (i, j, v)))
    }

    /// Multiply every entry by `factor`.
    pub fn scale(mut self, factor: f64) -> Self {
        for v in &mut self.values {
            *v *= factor;
        }
        self
    }

    /// Entry-wise sum of two matrices of equal shape.
    pub fn add(&self, other: &CsrMatrix) -> Result<CsrMatrix> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(Error::DimensionMismatch {
                what: "sparse matrix sum",
                expected: self.rows * self.cols,
                actual: other.rows * other.cols,
            });
        }
        let triplets = self.triplets().chain(other.triplets()).collect();
        Ok(CsrMatrix::from_triplets(self.rows, self.cols, triplets))
    }

    /// Kronecker product with the 3x3 identity, `self ⊗ I₃`.
    pub fn kron_identity3(&self) -> CsrMatrix {
        let triplets = self
            .triplets()
            .flat_map(|(i, j, v)| (0..3).map(move |k| (3 * i + k, 3 * j + k, v)))
            .collect();
        CsrMatrix::from_triplets(3 * self.rows, 3 * self.cols, triplets)
    }

    /// Block diagonal matrix from 3x3 blocks.
    pub fn block_diagonal3(blocks: &[Matrix3<f64>]) -> CsrMatrix {
        let n = blocks.len();
        let mut triplets = Vec::with_capacity(9 * n);
        for (i, b) in blocks.iter().enumerate() {
            for k in 0..3 {
                for l in 0..3 {
                    triplets.push((3 * i + k, 3 * i + l, b[(k, l)]));
                }
            }
        }
        CsrMatrix::from_triplets(3 * n, 3 * n, triplets)
    }

    /// Matrix-vector product.
    ///
    /// `x` must have [`ncols`](Self::ncols) entries.
    pub fn mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        debug_assert_eq!(x.len(), self.cols, "operand length does not match column count");
        DVector::from_fn(self.rows, |i, _| self.row(i).map(|(j, v)| v * x[j]).sum())
    }
}

/// Outcome of a conjugate gradient run.
#[derive(Debug, Clone, PartialEq)]
pub struct CgSolution {
    /// Last iterate.
    pub x: DVector<f64>,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Relative residual `|b - a x| / |b|` of `x`.
    pub residual: f64,
    /// Whether `residual` dropped below the tolerance.
    pub converged: bool,
}

/// Run the Jacobi-preconditioned conjugate gradient method on `a * x = b`.
///
/// Iteration starts from `x0`, or from zero, and stops once
/// `|b - a x| / |b|` drops below `tolerance` or after `max_iter` steps. The
/// last iterate is returned either way. A zero right-hand side yields the
/// zero vector.
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] if `a` is not square of the size of
/// `b`, or `x0` has the wrong length.
pub fn conjugate_gradient_iterate(
    a: &CsrMatrix,
    b: &DVector<f64>,
    x0: Option<&DVector<f64>>,
    max_iter: usize,
    tolerance: f64,
) -> Result<CgSolution> {
    let n = b.len();
    if a.nrows() != n || a.ncols() != n {
        return Err(Error::DimensionMismatch {
            what: "conjugate gradient system",
            expected: n,
            actual: a.nrows(),
        });
    }
    if let Some(x0) = x0 {
        if x0.len() != n {
            return Err(Error::DimensionMismatch {
                what: "conjugate gradient initial guess",
                expected: n,
                actual: x0.len(),
            });
        }
    }

    let b_norm = b.norm();
    if b_norm < 1e-15 {
        return Ok(CgSolution {
            x: DVector::zeros(n),
            iterations: 0,
            residual: 0.0,
            converged: true,
        });
    }

    let mut x = x0.cloned().unwrap_or_else(|| DVector::zeros(n));
    let inv_diag = a
        .diagonal()
        .map(|d| if d.abs() > 1e-300 { 1.0 / d } else { 1.0 });

    let mut r = b - a.mul_vec(&x);
    let mut residual = r.norm() / b_norm;
    let mut z = r.component_mul(&inv_diag);
    let mut p = z.clone();
    let mut rz = r.dot(&z);
    let mut iterations = 0;

    while residual >= tolerance && iterations < max_iter {
        let ap = a.mul_vec(&p);
        let p_ap = p.dot(&ap);
        if p_ap.abs() < 1e-300 {
            break;
        }
        let alpha = rz / p_ap;
        x += alpha * &p;
        r -= alpha * &ap;
        residual = r.norm() / b_norm;
        iterations += 1;

        z = r.component_mul(&inv_diag);
        let rz_new = r.dot(&z);
        p = &z + (rz_new / rz) * &p;
        rz = rz_new;
    }

    Ok(CgSolution {
        x,
        iterations,
        residual,
        converged: residual < tolerance,
    })
}

/// Solve `a * x = b` for symmetric positive definite `a`.
///
/// See [`conjugate_gradient_iterate`] for the iteration.
///
/// # Errors
///
/// Returns [`Error::ConvergenceFailed`] if the residual is still above the
/// tolerance after `max_iter` iterations.
pub fn conjugate_gradient(
    a: &CsrMatrix,
    b: &DVector<f64>,
    x0: Option<&DVector<f64>>,
    max_iter: usize,
    tolerance: f64,
) -> Result<DVector<f64>> {
    let solution = conjugate_gradient_iterate(a, b, x0, max_iter, tolerance)?;
    if !solution.converged {
        return Err(Error::ConvergenceFailed {
            iterations: solution.iterations,
        });
    }
    Ok(solution.x)
}
