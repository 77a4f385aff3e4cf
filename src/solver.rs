use std::time::{Duration, Instant};

use faer_core::Parallelism;

use crate::damped::Damping;
use crate::dense::DenseSolver;
use crate::error::{SolveError, SolverError};
use crate::lsmr::{Lsmr, LsmrInfo, LsmrParams};
use crate::operator::{DenseMatrix, LinearOperator};
use crate::report::{
    IterationReport, Reporter, SolveStatus, SolverStats, StdoutReporter, emit_line,
};

/// Options controlling the Levenberg-Marquardt solve.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Converge when an accepted step has `||step||_inf < tol`.
    pub tol: f64,
    /// Maximum number of outer iterations.
    pub max_iters: usize,
    /// Initial damping parameter.
    pub lambda_init: f64,
    /// Minimum damping parameter.
    pub lambda_min: f64,
    /// Maximum damping parameter.
    pub lambda_max: f64,
    /// Factor by which lambda grows on rejection and shrinks on very good steps.
    pub lambda_factor: f64,
    /// Floor applied to the squared column norms before damping.
    pub min_diagonal: f64,
    /// Steps with gain ratio above this are accepted.
    pub min_step_quality: f64,
    /// Accepted steps with gain ratio above this also shrink lambda.
    pub good_step_quality: f64,
    /// Emit per-iteration diagnostics to stdout by default.
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            tol: 1e-8,
            max_iters: 1000,
            lambda_init: 10.0,
            lambda_min: 1e-16,
            lambda_max: 1e16,
            lambda_factor: 10.0,
            min_diagonal: 1e-6,
            min_step_quality: 1e-3,
            good_step_quality: 0.75,
            verbose: false,
        }
    }
}

/// Nonlinear least squares problem with residuals f(x) and Jacobian J(x).
///
/// `J` is whatever operator the caller chose to represent the Jacobian:
/// a [`DenseMatrix`], a [`SparseMatrix`](crate::SparseMatrix) or a
/// matrix-free type implementing [`LinearOperator`].
pub trait Problem<J: ?Sized> {
    /// Fill residuals f(x).
    fn residuals(&mut self, x: &[f64], residuals: &mut [f64]);
    /// Repopulate the Jacobian at x in place.
    fn jacobian(&mut self, x: &[f64], jacobian: &mut J);
}

/// Solver for the damped subproblem
/// `(J^T J + lambda^2 diag(dtd)) step = -J^T f` of one outer iteration.
pub trait StepSolver<J: ?Sized> {
    /// Writes the step and returns the number of inner iterations consumed,
    /// or `None` when the subproblem could not be solved at this `lambda`.
    fn solve_step(
        &mut self,
        jacobian: &J,
        residuals: &[f64],
        dtd: &[f64],
        lambda: f64,
        step: &mut [f64],
    ) -> Option<usize>;

    /// Whether the workspace was sized for an `nrows x ncols` Jacobian.
    fn fits(&self, nrows: usize, ncols: usize) -> bool;
}

impl StepSolver<DenseMatrix> for DenseSolver {
    fn solve_step(
        &mut self,
        jacobian: &DenseMatrix,
        residuals: &[f64],
        dtd: &[f64],
        lambda: f64,
        step: &mut [f64],
    ) -> Option<usize> {
        self.solve(jacobian, residuals, dtd, lambda, step)
            .then_some(0)
    }

    fn fits(&self, _nrows: usize, ncols: usize) -> bool {
        self.ncols() == ncols
    }
}

/// Matrix-free step solver: LSMR on the damped, preconditioned operator.
pub struct IterativeSolver {
    lsmr: Lsmr,
    damping: Damping,
    rhs: Vec<f64>,
    params: LsmrParams,
    last_info: Option<LsmrInfo>,
}

impl IterativeSolver {
    pub fn new(nrows: usize, ncols: usize, params: LsmrParams) -> Self {
        Self {
            lsmr: Lsmr::new(nrows + ncols, ncols),
            damping: Damping::new(ncols),
            rhs: vec![0.0; nrows + ncols],
            params,
            last_info: None,
        }
    }

    pub fn params(&self) -> &LsmrParams {
        &self.params
    }

    /// Summary of the most recent inner solve.
    pub fn last_info(&self) -> Option<&LsmrInfo> {
        self.last_info.as_ref()
    }
}

impl<J: LinearOperator + ?Sized> StepSolver<J> for IterativeSolver {
    fn solve_step(
        &mut self,
        jacobian: &J,
        residuals: &[f64],
        dtd: &[f64],
        lambda: f64,
        step: &mut [f64],
    ) -> Option<usize> {
        // Right-hand side [-f; 0] of the augmented problem.
        let (data, damped) = self.rhs.split_at_mut(residuals.len());
        for (b, &f) in data.iter_mut().zip(residuals) {
            *b = -f;
        }
        damped.fill(0.0);

        self.damping.update(lambda, dtd);
        step.fill(0.0);
        let info = {
            let op = self.damping.operator(jacobian);
            self.lsmr
                .solve_unchecked(&op, &self.rhs, step, &self.params)
        };
        self.damping.unscale(step);

        if !info.stop.is_converged() {
            log::debug!(
                "inner solve stopped early after {} iterations: {:?} (cond ~ {:.1e})",
                info.iterations,
                info.stop,
                info.cond_a
            );
        }
        self.last_info = Some(info);
        Some(info.iterations)
    }

    fn fits(&self, nrows: usize, ncols: usize) -> bool {
        self.rhs.len() == nrows + ncols && self.lsmr.ncols() == ncols
    }
}

/// Levenberg-Marquardt solver for min ||f(x)||^2.
///
/// Every buffer is allocated at construction and reused by each call to
/// [`LmSolver::solve`]; independent solvers share no state.
pub struct LmSolver<S> {
    nrows: usize,
    ncols: usize,
    step_solver: S,
    residuals: Vec<f64>,
    trial_residuals: Vec<f64>,
    predicted: Vec<f64>,
    dtd: Vec<f64>,
    step: Vec<f64>,
    x_trial: Vec<f64>,
}

enum ReporterSlot<'a> {
    External(&'a mut dyn Reporter),
    Local(StdoutReporter),
    None,
}

impl<'a> ReporterSlot<'a> {
    fn new(reporter: Option<&'a mut dyn Reporter>, verbose: bool) -> Self {
        match reporter {
            Some(r) => Self::External(r),
            None if verbose => Self::Local(StdoutReporter::new()),
            None => Self::None,
        }
    }

    fn as_mut(&mut self) -> Option<&mut dyn Reporter> {
        match self {
            Self::External(r) => Some(*r),
            Self::Local(r) => Some(r),
            Self::None => None,
        }
    }
}

impl LmSolver<DenseSolver> {
    /// Solver that factorizes the damped normal equations of a dense Jacobian.
    pub fn dense(
        nrows: usize,
        ncols: usize,
        parallelism: Parallelism,
    ) -> Result<Self, SolverError> {
        let step_solver = DenseSolver::new(ncols, parallelism)?;
        Self::with_step_solver(nrows, ncols, step_solver)
    }
}

impl LmSolver<IterativeSolver> {
    /// Solver that runs LSMR on the damped system; works for any operator.
    pub fn iterative(
        nrows: usize,
        ncols: usize,
        params: LsmrParams,
    ) -> Result<Self, SolverError> {
        Self::with_step_solver(nrows, ncols, IterativeSolver::new(nrows, ncols, params))
    }
}

impl<S> LmSolver<S> {
    /// Create a solver for `nrows` residuals and `ncols` parameters.
    ///
    /// A step solver sized for another problem is reported by
    /// [`LmSolver::solve`] as [`SolveError::StepSolverShape`].
    pub fn with_step_solver(
        nrows: usize,
        ncols: usize,
        step_solver: S,
    ) -> Result<Self, SolverError> {
        if nrows == 0 || ncols == 0 {
            return Err(SolverError::InvalidDimensions { nrows, ncols });
        }
        Ok(Self {
            nrows,
            ncols,
            step_solver,
            residuals: vec![0.0; nrows],
            trial_residuals: vec![0.0; nrows],
            predicted: vec![0.0; nrows],
            dtd: vec![0.0; ncols],
            step: vec![0.0; ncols],
            x_trial: vec![0.0; ncols],
        })
    }

    /// Number of residuals.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of parameters.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn step_solver(&self) -> &S {
        &self.step_solver
    }

    /// Solve for x in-place using Levenberg-Marquardt.
    ///
    /// `jacobian` is refreshed through `problem` whenever a step is accepted;
    /// rejected steps reuse it. Non-convergence is reported in the returned
    /// status, never as an error.
    pub fn solve<J, P>(
        &mut self,
        problem: &mut P,
        jacobian: &mut J,
        x: &mut [f64],
        options: &SolverOptions,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<SolverStats, SolveError>
    where
        J: LinearOperator + ?Sized,
        P: Problem<J> + ?Sized,
        S: StepSolver<J>,
    {
        let n = self.ncols;
        if x.len() != n {
            return Err(SolveError::ParameterLength {
                expected: n,
                actual: x.len(),
            });
        }
        let expected = (self.nrows, self.ncols);
        let actual = (jacobian.nrows(), jacobian.ncols());
        if expected != actual {
            return Err(SolveError::JacobianShape { expected, actual });
        }
        if !self.step_solver.fits(self.nrows, self.ncols) {
            return Err(SolveError::StepSolverShape {
                nrows: self.nrows,
                ncols: self.ncols,
            });
        }
        let start_time = options.verbose.then(Instant::now);
        let mut reporter = ReporterSlot::new(reporter, options.verbose);

        let mut lambda = clamp_lambda(options.lambda_init, options);

        problem.residuals(x, &mut self.residuals);
        let mut residual = dot(&self.residuals, &self.residuals);
        if !residual.is_finite() {
            let stats = SolverStats {
                status: SolveStatus::NumericalFailure,
                iterations: 0,
                outer_iterations: 0,
                inner_iterations: 0,
                residual,
                step_inf: f64::INFINITY,
                lambda,
            };
            return Ok(finish_stats(stats, start_time, &mut reporter));
        }

        let mut need_jacobian = true;
        let mut outer = 0;
        let mut inner = 0;
        let mut step_inf = 0.0;

        let status = loop {
            if outer >= options.max_iters {
                break SolveStatus::MaxIterations;
            }
            if residual == 0.0 {
                break SolveStatus::ConvergedResidual;
            }
            outer += 1;

            if need_jacobian {
                problem.jacobian(x, jacobian);
                jacobian.column_sq_norms_into(&mut self.dtd);
                for d in self.dtd.iter_mut() {
                    *d = d.max(options.min_diagonal);
                }
                need_jacobian = false;
            }

            // Solve (J^T J + lambda^2 diag(dtd)) step = -J^T f.
            let Some(inner_step) = self.step_solver.solve_step(
                jacobian,
                &self.residuals,
                &self.dtd,
                lambda,
                &mut self.step,
            ) else {
                if let Some(reporter) = reporter.as_mut() {
                    reporter.on_iteration(&IterationReport {
                        iteration: outer,
                        residual,
                        trial_residual: residual,
                        rho: 0.0,
                        lambda,
                        step_inf: 0.0,
                        inner_iterations: 0,
                        accepted: false,
                    });
                }
                lambda = (lambda * options.lambda_factor).min(options.lambda_max);
                continue;
            };
            inner += inner_step;

            if self.step.iter().all(|&s| s == 0.0) {
                step_inf = 0.0;
                break SolveStatus::ConvergedGradient;
            }
            step_inf = max_abs(&self.step);

            // Residual predicted by the linear model: ||f + J step||^2.
            self.predicted.copy_from_slice(&self.residuals);
            jacobian.apply_into(1.0, &self.step, 1.0, &mut self.predicted);
            let predicted = dot(&self.predicted, &self.predicted);

            for ((xt, &xi), &dx) in self.x_trial.iter_mut().zip(x.iter()).zip(&self.step) {
                *xt = xi + dx;
            }
            problem.residuals(&self.x_trial, &mut self.trial_residuals);
            let trial = dot(&self.trial_residuals, &self.trial_residuals);

            // NaN (no predicted decrease, or a non-finite trial) rejects the step.
            let rho = (residual - trial) / (residual - predicted);
            let accepted = rho > options.min_step_quality;

            if let Some(reporter) = reporter.as_mut() {
                reporter.on_iteration(&IterationReport {
                    iteration: outer,
                    residual,
                    trial_residual: trial,
                    rho,
                    lambda,
                    step_inf,
                    inner_iterations: inner_step,
                    accepted,
                });
            }
            log::trace!(
                "iter {outer}: residual {residual:.4e} trial {trial:.4e} rho {rho:.3} lambda {lambda:.1e}"
            );

            if accepted {
                x.copy_from_slice(&self.x_trial);
                std::mem::swap(&mut self.residuals, &mut self.trial_residuals);
                residual = trial;
                need_jacobian = true;
                if rho > options.good_step_quality {
                    lambda = (lambda / options.lambda_factor).max(options.lambda_min);
                }
                if step_inf < options.tol {
                    break SolveStatus::ConvergedStep;
                }
            } else {
                lambda = (lambda * options.lambda_factor).min(options.lambda_max);
            }
        };

        let stats = SolverStats {
            status,
            iterations: outer + inner,
            outer_iterations: outer,
            inner_iterations: inner,
            residual,
            step_inf,
            lambda,
        };
        Ok(finish_stats(stats, start_time, &mut reporter))
    }
}

fn clamp_lambda(lambda: f64, options: &SolverOptions) -> f64 {
    lambda.max(options.lambda_min).min(options.lambda_max)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        sum += x * y;
    }
    sum
}

fn max_abs(x: &[f64]) -> f64 {
    let mut max = 0.0;
    for &v in x {
        let v = v.abs();
        if v > max || v.is_nan() {
            max = v;
        }
    }
    max
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{:.3} s", secs)
    } else if secs >= 1e-3 {
        format!("{:.3} ms", secs * 1e3)
    } else if secs >= 1e-6 {
        format!("{:.3} us", secs * 1e6)
    } else {
        format!("{:.0} ns", secs * 1e9)
    }
}

fn finish_stats(
    stats: SolverStats,
    start_time: Option<Instant>,
    reporter: &mut ReporterSlot<'_>,
) -> SolverStats {
    if let Some(reporter) = reporter.as_mut() {
        reporter.on_finish();
    }
    if let Some(start) = start_time {
        let elapsed = format_duration(start.elapsed());
        emit_line(&format!(
            "{:?} after {} iterations ({} inner), time: {elapsed}",
            stats.status, stats.iterations, stats.inner_iterations
        ));
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OneDProblem;

    impl Problem<DenseMatrix> for OneDProblem {
        fn residuals(&mut self, x: &[f64], residuals: &mut [f64]) {
            residuals[0] = x[0] - 2.0;
        }

        fn jacobian(&mut self, _x: &[f64], jacobian: &mut DenseMatrix) {
            jacobian.write(0, 0, 1.0);
        }
    }

    /// Residuals that are never evaluated by the shape checks.
    struct ZeroProblem;

    impl Problem<DenseMatrix> for ZeroProblem {
        fn residuals(&mut self, _x: &[f64], residuals: &mut [f64]) {
            residuals.fill(0.0);
        }

        fn jacobian(&mut self, _x: &[f64], jacobian: &mut DenseMatrix) {
            jacobian.fill_zero();
        }
    }

    #[test]
    fn solves_simple_problem() {
        let mut solver = LmSolver::dense(1, 1, Parallelism::None).unwrap();
        let mut jacobian = DenseMatrix::zeros(1, 1);
        let mut x = [0.0];
        let stats = solver
            .solve(
                &mut OneDProblem,
                &mut jacobian,
                &mut x,
                &SolverOptions::default(),
                None,
            )
            .unwrap();
        assert!(stats.converged(), "{:?}", stats.status);
        assert!((x[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn solves_simple_problem_iteratively() {
        let mut solver = LmSolver::iterative(1, 1, LsmrParams::default()).unwrap();
        let mut jacobian = DenseMatrix::zeros(1, 1);
        let mut x = [0.0];
        let stats = solver
            .solve(
                &mut OneDProblem,
                &mut jacobian,
                &mut x,
                &SolverOptions::default(),
                None,
            )
            .unwrap();
        assert!(stats.converged(), "{:?}", stats.status);
        assert!(stats.inner_iterations > 0);
        assert_eq!(stats.iterations, stats.outer_iterations + stats.inner_iterations);
        assert!(solver.step_solver().last_info().is_some());
        assert!((x[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let mut solver = LmSolver::dense(1, 1, Parallelism::None).unwrap();
        let mut jacobian = DenseMatrix::zeros(2, 1);
        let mut x = [0.0];
        let err = solver
            .solve(
                &mut OneDProblem,
                &mut jacobian,
                &mut x,
                &SolverOptions::default(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, SolveError::JacobianShape { .. }));
        assert!(matches!(
            LmSolver::iterative(0, 3, LsmrParams::default()),
            Err(SolverError::InvalidDimensions { nrows: 0, ncols: 3 })
        ));
    }

    #[test]
    fn rejects_step_solver_built_for_another_size() {
        let params = LsmrParams {
            max_iters: 7,
            ..LsmrParams::default()
        };
        let step_solver = IterativeSolver::new(5, 3, params);
        assert_eq!(step_solver.params().max_iters, 7);
        let mut solver = LmSolver::with_step_solver(10, 3, step_solver).unwrap();
        let mut jacobian = DenseMatrix::zeros(10, 3);
        let mut x = [0.0; 3];
        let err = solver
            .solve(
                &mut ZeroProblem,
                &mut jacobian,
                &mut x,
                &SolverOptions::default(),
                None,
            )
            .unwrap_err();
        assert_eq!(err, SolveError::StepSolverShape { nrows: 10, ncols: 3 });
        assert_eq!(x, [0.0; 3]);

        let mut dense = LmSolver::with_step_solver(
            10,
            3,
            DenseSolver::new(2, Parallelism::None).unwrap(),
        )
        .unwrap();
        let err = dense
            .solve(
                &mut ZeroProblem,
                &mut jacobian,
                &mut x,
                &SolverOptions::default(),
                None,
            )
            .unwrap_err();
        assert_eq!(err, SolveError::StepSolverShape { nrows: 10, ncols: 3 });
    }

    #[test]
    fn max_abs_propagates_nan() {
        assert!(max_abs(&[1.0, f64::NAN, 2.0]).is_nan());
        assert_eq!(max_abs(&[-3.0, 2.0]), 3.0);
    }
}
