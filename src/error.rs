use core::fmt;

/// Errors while constructing a solver or its workspace.
#[derive(Debug)]
pub enum SolverError {
    /// The problem has zero rows or columns.
    InvalidDimensions { nrows: usize, ncols: usize },
    /// Workspace requirement overflowed.
    WorkspaceOverflow,
    /// Workspace allocation failed.
    WorkspaceAlloc,
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDimensions { nrows, ncols } => {
                write!(f, "invalid dimensions: nrows={nrows}, ncols={ncols}")
            }
            Self::WorkspaceOverflow => write!(f, "workspace size overflow"),
            Self::WorkspaceAlloc => write!(f, "workspace allocation failed"),
        }
    }
}

impl std::error::Error for SolverError {}

/// Shape errors detected at the start of a solve call.
///
/// Nothing is iterated when one of these is returned; numerical trouble
/// during a solve is reported through a status instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveError {
    /// The parameter vector has the wrong length.
    ParameterLength { expected: usize, actual: usize },
    /// The right-hand side (or residual) vector has the wrong length.
    ResidualLength { expected: usize, actual: usize },
    /// The Jacobian operator does not have the solver's shape.
    JacobianShape {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    /// The step solver's workspace was built for a different problem size.
    StepSolverShape { nrows: usize, ncols: usize },
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterLength { expected, actual } => {
                write!(f, "x length {actual} does not match expected {expected}")
            }
            Self::ResidualLength { expected, actual } => {
                write!(f, "residual length {actual} does not match expected {expected}")
            }
            Self::JacobianShape { expected, actual } => write!(
                f,
                "jacobian is {}x{}, expected {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
            Self::StepSolverShape { nrows, ncols } => {
                write!(f, "step solver workspace does not fit a {nrows}x{ncols} problem")
            }
        }
    }
}

impl std::error::Error for SolveError {}
