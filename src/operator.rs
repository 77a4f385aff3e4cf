use faer_core::mul::matmul;
use faer_core::{Mat, MatRef, Parallelism, mat};

/// A linear map `A: R^ncols -> R^nrows` known only through its products.
///
/// Both products accumulate into a caller-owned buffer:
/// `out <- alpha * op(A) v + beta * out`. When `beta == 0` the previous
/// contents of `out` are ignored, so a buffer holding NaNs can be reused
/// without clearing it first. Implementations must never resize `out`.
pub trait LinearOperator {
    /// Dimension of the output space of `A`.
    fn nrows(&self) -> usize;

    /// Dimension of the input space of `A`.
    fn ncols(&self) -> usize;

    /// `out <- alpha * A v + beta * out` with `v.len() == ncols`, `out.len() == nrows`.
    fn apply_into(&self, alpha: f64, v: &[f64], beta: f64, out: &mut [f64]);

    /// `out <- alpha * A^T v + beta * out` with `v.len() == nrows`, `out.len() == ncols`.
    fn apply_transpose_into(&self, alpha: f64, v: &[f64], beta: f64, out: &mut [f64]);

    /// Squared Euclidean norm of every column of `A`, written into `out`.
    fn column_sq_norms_into(&self, out: &mut [f64]);
}

impl<T: LinearOperator + ?Sized> LinearOperator for &T {
    fn nrows(&self) -> usize {
        (**self).nrows()
    }

    fn ncols(&self) -> usize {
        (**self).ncols()
    }

    fn apply_into(&self, alpha: f64, v: &[f64], beta: f64, out: &mut [f64]) {
        (**self).apply_into(alpha, v, beta, out);
    }

    fn apply_transpose_into(&self, alpha: f64, v: &[f64], beta: f64, out: &mut [f64]) {
        (**self).apply_transpose_into(alpha, v, beta, out);
    }

    fn column_sq_norms_into(&self, out: &mut [f64]) {
        (**self).column_sq_norms_into(out);
    }
}

/// `out <- beta * out`, treating `beta == 0` as an overwrite with zeros.
pub(crate) fn scale_accumulator(beta: f64, out: &mut [f64]) {
    if beta == 0.0 {
        out.fill(0.0);
    } else if beta != 1.0 {
        for value in out.iter_mut() {
            *value *= beta;
        }
    }
}

/// Dense column-major Jacobian backed by a faer matrix.
#[derive(Debug, Clone)]
pub struct DenseMatrix {
    inner: Mat<f64>,
}

impl DenseMatrix {
    /// An `nrows x ncols` matrix of zeros.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            inner: Mat::zeros(nrows, ncols),
        }
    }

    /// Builds a matrix from `f(row, col)`.
    pub fn from_fn(nrows: usize, ncols: usize, f: impl FnMut(usize, usize) -> f64) -> Self {
        Self {
            inner: Mat::from_fn(nrows, ncols, f),
        }
    }

    /// Builds a matrix from row-major nested slices; all rows must have equal length.
    pub fn from_rows(rows: &[&[f64]]) -> Self {
        let nrows = rows.len();
        let ncols = rows.first().map_or(0, |row| row.len());
        Self::from_fn(nrows, ncols, |i, j| rows[i][j])
    }

    pub fn read(&self, row: usize, col: usize) -> f64 {
        self.inner.read(row, col)
    }

    pub fn write(&mut self, row: usize, col: usize, value: f64) {
        self.inner.write(row, col, value);
    }

    /// Sets every entry to zero, keeping the allocation.
    pub fn fill_zero(&mut self) {
        for col in 0..self.inner.ncols() {
            for row in 0..self.inner.nrows() {
                self.inner.write(row, col, 0.0);
            }
        }
    }

    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.inner.as_ref()
    }
}

impl From<Mat<f64>> for DenseMatrix {
    fn from(inner: Mat<f64>) -> Self {
        Self { inner }
    }
}

impl LinearOperator for DenseMatrix {
    fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    fn apply_into(&self, alpha: f64, v: &[f64], beta: f64, out: &mut [f64]) {
        let rhs = mat::from_column_major_slice::<f64>(v, self.ncols(), 1);
        let acc = mat::from_column_major_slice_mut::<f64>(out, self.nrows(), 1);
        // faer computes acc <- a * acc + b * lhs * rhs, with `None` meaning overwrite.
        let keep = (beta != 0.0).then_some(beta);
        matmul(acc, self.inner.as_ref(), rhs, keep, alpha, Parallelism::None);
    }

    fn apply_transpose_into(&self, alpha: f64, v: &[f64], beta: f64, out: &mut [f64]) {
        let rhs = mat::from_column_major_slice::<f64>(v, self.nrows(), 1);
        let acc = mat::from_column_major_slice_mut::<f64>(out, self.ncols(), 1);
        let keep = (beta != 0.0).then_some(beta);
        matmul(
            acc,
            self.inner.as_ref().transpose(),
            rhs,
            keep,
            alpha,
            Parallelism::None,
        );
    }

    fn column_sq_norms_into(&self, out: &mut [f64]) {
        let nrows = self.nrows();
        for (col, norm) in out.iter_mut().enumerate() {
            let mut sum = 0.0;
            for row in 0..nrows {
                let value = self.inner.read(row, col);
                sum += value * value;
            }
            *norm = sum;
        }
    }
}
