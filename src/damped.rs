//! Tikhonov-damped system `[A; diag(d)]` folded into a single operator.
//!
//! LSMR applied to this operator with right-hand side `[b; 0]` minimizes
//! `||A x - b||^2 + ||d o x||^2` without the algorithm knowing about the
//! damping. Parameter-space vectors are additionally rescaled by
//! `1 / sqrt(1 + d^2)` (a Jacobi-style preconditioner), so the solution of the
//! augmented problem must be divided by `sqrt(1 + d^2)` to recover `x`.

use core::cell::RefCell;

use crate::operator::LinearOperator;

/// Per-parameter damping state for one outer iteration.
///
/// Owned by the iterative step solver and refreshed in place whenever `lambda`
/// or the column norms change.
#[derive(Debug, Clone)]
pub struct Damping {
    diagonal: Vec<f64>,
    sqrt_normalization: Vec<f64>,
    scratch: Vec<f64>,
}

impl Damping {
    pub fn new(ncols: usize) -> Self {
        Self {
            diagonal: vec![0.0; ncols],
            sqrt_normalization: vec![1.0; ncols],
            scratch: vec![0.0; ncols],
        }
    }

    /// Sets `d = lambda * sqrt(dtd)` and `sqrt(1 + d^2)`.
    ///
    /// `dtd` is expected to be clamped away from zero already.
    pub fn update(&mut self, lambda: f64, dtd: &[f64]) {
        for ((d, norm), &sq) in self
            .diagonal
            .iter_mut()
            .zip(self.sqrt_normalization.iter_mut())
            .zip(dtd)
        {
            *d = lambda * sq.sqrt();
            *norm = (1.0 + *d * *d).sqrt();
        }
    }

    pub fn diagonal(&self) -> &[f64] {
        &self.diagonal
    }

    pub fn sqrt_normalization(&self) -> &[f64] {
        &self.sqrt_normalization
    }

    /// Maps a solution of the preconditioned augmented problem back to parameter space.
    pub fn unscale(&self, x: &mut [f64]) {
        for (xi, &norm) in x.iter_mut().zip(&self.sqrt_normalization) {
            *xi /= norm;
        }
    }

    /// Borrows the damping state as an operator over `base`.
    pub fn operator<'a, A: LinearOperator + ?Sized>(&'a mut self, base: &'a A) -> DampedOperator<'a, A> {
        DampedOperator {
            base,
            diagonal: &self.diagonal,
            sqrt_normalization: &self.sqrt_normalization,
            scratch: RefCell::new(&mut self.scratch),
        }
    }
}

/// The operator `[A; diag(d)] * diag(1 / sqrt(1 + d^2))`.
///
/// Output vectors are laid out as `[data (A.nrows); damping (A.ncols)]`.
pub struct DampedOperator<'a, A: ?Sized> {
    base: &'a A,
    diagonal: &'a [f64],
    sqrt_normalization: &'a [f64],
    scratch: RefCell<&'a mut Vec<f64>>,
}

impl<A: LinearOperator + ?Sized> LinearOperator for DampedOperator<'_, A> {
    fn nrows(&self) -> usize {
        self.base.nrows() + self.base.ncols()
    }

    fn ncols(&self) -> usize {
        self.base.ncols()
    }

    fn apply_into(&self, alpha: f64, v: &[f64], beta: f64, out: &mut [f64]) {
        let mut scratch = self.scratch.borrow_mut();
        for ((s, &vi), &norm) in scratch.iter_mut().zip(v).zip(self.sqrt_normalization) {
            *s = vi / norm;
        }
        let (data, damping) = out.split_at_mut(self.base.nrows());
        self.base.apply_into(alpha, &scratch, beta, data);
        for ((z, &s), &d) in damping.iter_mut().zip(scratch.iter()).zip(self.diagonal) {
            *z = if beta == 0.0 {
                alpha * s * d
            } else {
                beta * *z + alpha * s * d
            };
        }
    }

    fn apply_transpose_into(&self, alpha: f64, v: &[f64], beta: f64, out: &mut [f64]) {
        let mut scratch = self.scratch.borrow_mut();
        let (data, damping) = v.split_at(self.base.nrows());
        self.base.apply_transpose_into(1.0, data, 0.0, &mut scratch);
        for (i, slot) in out.iter_mut().enumerate() {
            let value = (scratch[i] + damping[i] * self.diagonal[i]) / self.sqrt_normalization[i];
            *slot = if beta == 0.0 {
                alpha * value
            } else {
                beta * *slot + alpha * value
            };
        }
    }

    fn column_sq_norms_into(&self, out: &mut [f64]) {
        self.base.column_sq_norms_into(out);
        for ((norm, &d), &scale) in out
            .iter_mut()
            .zip(self.diagonal)
            .zip(self.sqrt_normalization)
        {
            *norm = (*norm + d * d) / (scale * scale);
        }
    }
}
