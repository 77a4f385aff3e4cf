//! Damped nonlinear least squares with a Levenberg-Marquardt (LM) outer loop.
//!
//! This crate minimizes `||f(x)||^2` for residuals `f(x)` with Jacobian `J(x)`.
//! The Jacobian is any [`LinearOperator`]: a dense matrix, a sparse matrix
//! with a fixed pattern, or a matrix-free operator that only knows how to
//! compute `J v` and `J^T u`.
//!
//! How it works (high level):
//! - Solve `(J^T J + lambda^2 diag(dtd)) p = -J^T f` for the step `p`, where
//!   `dtd` holds the squared column norms of `J` (floored away from zero).
//! - Dense Jacobians may factorize that system directly ([`DenseSolver`]).
//! - Any operator can instead run LSMR on the augmented system
//!   `[J; lambda sqrt(dtd)] p = [-f; 0]` ([`IterativeSolver`]), which never
//!   forms `J^T J`.
//! - Accept or reject the step from the ratio of actual to predicted decrease
//!   and adapt `lambda`.
//!
//! Calling it:
//! - Implement [`Problem`] to fill residuals and the Jacobian.
//! - Build an [`LmSolver`] with [`LmSolver::dense`] or [`LmSolver::iterative`].
//! - Call [`LmSolver::solve`] and inspect [`SolverStats`].
//!
//! Example:
//! ```rust,no_run
//! use lm_lsmr::{DenseMatrix, LmSolver, LsmrParams, Problem, SolverOptions};
//!
//! struct OneD;
//! impl Problem<DenseMatrix> for OneD {
//!     fn residuals(&mut self, x: &[f64], r: &mut [f64]) {
//!         r[0] = x[0] - 1.0;
//!     }
//!     fn jacobian(&mut self, _x: &[f64], jac: &mut DenseMatrix) {
//!         jac.write(0, 0, 1.0);
//!     }
//! }
//!
//! let mut solver = LmSolver::iterative(1, 1, LsmrParams::default()).unwrap();
//! let mut jacobian = DenseMatrix::zeros(1, 1);
//! let mut x = vec![0.0];
//! let stats = solver
//!     .solve(&mut OneD, &mut jacobian, &mut x, &SolverOptions::default(), None)
//!     .unwrap();
//! assert!(stats.converged());
//! ```

mod damped;
mod dense;
mod error;
mod lsmr;
mod operator;
mod pattern;
mod report;
mod solver;

pub use damped::{DampedOperator, Damping};
pub use dense::DenseSolver;
pub use error::{SolveError, SolverError};
pub use lsmr::{Lsmr, LsmrInfo, LsmrParams, LsmrStop};
pub use operator::{DenseMatrix, LinearOperator};
pub use pattern::{PatternError, SparseMatrix, SparsityPattern};
pub use report::{IterationReport, Reporter, SolveStatus, SolverStats, StdoutReporter};
pub use solver::{IterativeSolver, LmSolver, Problem, SolverOptions, StepSolver};

pub use faer_core::Parallelism;
