use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets};

/// Why a Levenberg-Marquardt solve stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// An accepted step had infinity norm below `tol`.
    ConvergedStep,
    /// The damped subproblem produced an exactly zero step (`J^T f = 0`).
    ConvergedGradient,
    /// The residual is exactly zero.
    ConvergedResidual,
    /// `max_iters` outer iterations ran without converging.
    MaxIterations,
    /// The residual at the starting point is not finite.
    NumericalFailure,
}

impl SolveStatus {
    pub fn is_converged(self) -> bool {
        matches!(
            self,
            Self::ConvergedStep | Self::ConvergedGradient | Self::ConvergedResidual
        )
    }
}

/// Outcome of a solve. `x` itself is updated in place.
#[derive(Debug, Clone)]
pub struct SolverStats {
    pub status: SolveStatus,
    /// Outer iterations plus inner linear-solver iterations.
    pub iterations: usize,
    pub outer_iterations: usize,
    pub inner_iterations: usize,
    /// Sum of squared residuals at the returned `x`.
    pub residual: f64,
    /// Infinity norm of the last computed step.
    pub step_inf: f64,
    /// Damping after the last update.
    pub lambda: f64,
}

impl SolverStats {
    pub fn converged(&self) -> bool {
        self.status.is_converged()
    }
}

#[derive(Debug, Clone)]
pub struct IterationReport {
    pub iteration: usize,
    pub residual: f64,
    pub trial_residual: f64,
    pub rho: f64,
    /// Damping used to compute this step.
    pub lambda: f64,
    pub step_inf: f64,
    pub inner_iterations: usize,
    pub accepted: bool,
}

pub(crate) fn emit_line(line: &str) {
    if log::log_enabled!(log::Level::Info) {
        log::info!("{line}");
    } else {
        println!("{line}");
    }
}

pub trait Reporter {
    fn on_iteration(&mut self, report: &IterationReport);
    fn on_finish(&mut self) {}
}

/// Collects iterations and prints them as one table when the solve ends.
pub struct StdoutReporter {
    rows: Vec<IterationReport>,
}

impl StdoutReporter {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }
}

impl Default for StdoutReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for StdoutReporter {
    fn on_iteration(&mut self, report: &IterationReport) {
        self.rows.push(report.clone());
    }

    fn on_finish(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        if !log::log_enabled!(log::Level::Info) {
            println!();
        }
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("iter").set_alignment(CellAlignment::Right),
            Cell::new("residual").set_alignment(CellAlignment::Right),
            Cell::new("trial").set_alignment(CellAlignment::Right),
            Cell::new("rho").set_alignment(CellAlignment::Right),
            Cell::new("lambda").set_alignment(CellAlignment::Right),
            Cell::new("step").set_alignment(CellAlignment::Right),
            Cell::new("inner").set_alignment(CellAlignment::Right),
            Cell::new("accepted"),
        ]);
        for row in &self.rows {
            table.add_row(vec![
                Cell::new(row.iteration).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.4e}", row.residual)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.4e}", row.trial_residual))
                    .set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.3}", row.rho)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1e}", row.lambda)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1e}", row.step_inf)).set_alignment(CellAlignment::Right),
                Cell::new(row.inner_iterations).set_alignment(CellAlignment::Right),
                Cell::new(if row.accepted { "yes" } else { "no" }),
            ]);
        }

        for line in table.to_string().lines() {
            emit_line(line);
        }
        self.rows.clear();
    }
}
