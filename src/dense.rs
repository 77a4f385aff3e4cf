use dyn_stack::{GlobalPodBuffer, PodStack, ReborrowMut};
use faer_cholesky::llt::compute::{
    LltParams, LltRegularization, cholesky_in_place, cholesky_in_place_req,
};
use faer_cholesky::llt::solve::{solve_in_place_req, solve_in_place_with_conj};
use faer_core::mul::matmul;
use faer_core::{Conj, Mat, Parallelism, mat};

use crate::error::SolverError;
use crate::operator::{DenseMatrix, LinearOperator};

/// Direct solver for the damped normal equations of a small dense Jacobian.
///
/// Holds `M = J^T J + lambda^2 diag(dtd)`, the right-hand side and the
/// factorization workspace; all are reused across outer iterations.
pub struct DenseSolver {
    normal: Mat<f64>,
    rhs: Vec<f64>,
    stack: GlobalPodBuffer,
    parallelism: Parallelism,
}

impl DenseSolver {
    /// Create a solver for `ncols` parameters.
    pub fn new(ncols: usize, parallelism: Parallelism) -> Result<Self, SolverError> {
        let factor_req = cholesky_in_place_req::<f64>(ncols, parallelism, LltParams::default())
            .map_err(|_| SolverError::WorkspaceOverflow)?;
        let solve_req = solve_in_place_req::<f64>(ncols, 1, parallelism)
            .map_err(|_| SolverError::WorkspaceOverflow)?;
        let req = factor_req
            .try_or(solve_req)
            .map_err(|_| SolverError::WorkspaceOverflow)?;
        let stack = GlobalPodBuffer::try_new(req).map_err(|_| SolverError::WorkspaceAlloc)?;

        Ok(Self {
            normal: Mat::zeros(ncols, ncols),
            rhs: vec![0.0; ncols],
            stack,
            parallelism,
        })
    }

    pub fn ncols(&self) -> usize {
        self.rhs.len()
    }

    /// Solves `(J^T J + lambda^2 diag(dtd)) step = -J^T residuals`.
    ///
    /// Returns `false` (leaving `step` untouched) when the damped matrix is
    /// not numerically positive definite.
    pub fn solve(
        &mut self,
        jacobian: &DenseMatrix,
        residuals: &[f64],
        dtd: &[f64],
        lambda: f64,
        step: &mut [f64],
    ) -> bool {
        let n = self.ncols();
        let j = jacobian.as_ref();
        matmul(
            self.normal.as_mut(),
            j.transpose(),
            j,
            None,
            1.0,
            self.parallelism,
        );
        let lambda2 = lambda * lambda;
        for (i, &sq) in dtd.iter().enumerate() {
            let diag = self.normal.read(i, i);
            self.normal.write(i, i, diag + lambda2 * sq);
        }

        jacobian.apply_transpose_into(-1.0, residuals, 0.0, &mut self.rhs);

        let mut stack = PodStack::new(&mut self.stack);
        let factorized = cholesky_in_place(
            self.normal.as_mut(),
            LltRegularization::default(),
            self.parallelism,
            stack.rb_mut(),
            LltParams::default(),
        );
        if factorized.is_err() {
            log::debug!("damped normal matrix is not positive definite (lambda = {lambda:e})");
            return false;
        }

        let rhs_mat = mat::from_column_major_slice_mut::<f64>(&mut self.rhs, n, 1);
        let mut stack = PodStack::new(&mut self.stack);
        solve_in_place_with_conj(
            self.normal.as_ref(),
            Conj::No,
            rhs_mat,
            self.parallelism,
            stack.rb_mut(),
        );
        step.copy_from_slice(&self.rhs);
        true
    }
}
