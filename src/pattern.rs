use core::fmt;
use core::ops::Range;

use crate::operator::{LinearOperator, scale_accumulator};

/// Nonzero layout of a sparse operator in compressed sparse column (CSC) form.
///
/// Zero-based indices, rows sorted within every column.
#[derive(Debug, Clone)]
pub struct SparsityPattern {
    nrows: usize,
    ncols: usize,
    col_ptrs: Vec<usize>,
    row_indices: Vec<usize>,
}

/// Validation errors for a SparsityPattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// col_ptrs length is not ncols + 1.
    ColPtrLen { expected: usize, actual: usize },
    /// col_ptrs[0] is not 0.
    ColPtrStart { value: usize },
    /// col_ptrs is not non-decreasing.
    ColPtrNotMonotonic { col: usize, prev: usize, next: usize },
    /// col_ptrs[ncols] does not match row_indices length.
    ColPtrOutOfBounds { last: usize, row_indices_len: usize },
    /// A row index is >= nrows.
    RowIndexOutOfBounds { col: usize, row: usize, nrows: usize },
    /// Row indices in a column are not strictly increasing.
    RowIndexNotSorted { col: usize, prev: usize, next: usize },
    /// A (row, col) entry lies outside the pattern.
    MissingEntry { row: usize, col: usize },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColPtrLen { expected, actual } => {
                write!(f, "col_ptrs length {actual} does not match expected {expected}")
            }
            Self::ColPtrStart { value } => write!(f, "col_ptrs must start at 0 (got {value})"),
            Self::ColPtrNotMonotonic { col, prev, next } => {
                write!(f, "col_ptrs not monotonic at col {col}: {prev} > {next}")
            }
            Self::ColPtrOutOfBounds {
                last,
                row_indices_len,
            } => write!(
                f,
                "col_ptrs end {last} does not match row_indices length {row_indices_len}"
            ),
            Self::RowIndexOutOfBounds { col, row, nrows } => {
                write!(f, "row index {row} in col {col} exceeds nrows {nrows}")
            }
            Self::RowIndexNotSorted { col, prev, next } => {
                write!(f, "row indices not sorted in col {col}: {prev} >= {next}")
            }
            Self::MissingEntry { row, col } => {
                write!(f, "entry ({row}, {col}) is not in the sparsity pattern")
            }
        }
    }
}

impl std::error::Error for PatternError {}

impl SparsityPattern {
    /// Validates and wraps CSC index arrays.
    ///
    /// Requirements:
    /// - `col_ptrs.len() == ncols + 1`
    /// - `col_ptrs` is non-decreasing and starts at `0`
    /// - `col_ptrs[ncols] == row_indices.len()`
    /// - row indices are strictly increasing and `< nrows` within each column
    pub fn new(
        nrows: usize,
        ncols: usize,
        col_ptrs: Vec<usize>,
        row_indices: Vec<usize>,
    ) -> Result<Self, PatternError> {
        if col_ptrs.len() != ncols + 1 {
            return Err(PatternError::ColPtrLen {
                expected: ncols + 1,
                actual: col_ptrs.len(),
            });
        }
        if col_ptrs[0] != 0 {
            return Err(PatternError::ColPtrStart { value: col_ptrs[0] });
        }
        for (col, window) in col_ptrs.windows(2).enumerate() {
            if window[0] > window[1] {
                return Err(PatternError::ColPtrNotMonotonic {
                    col,
                    prev: window[0],
                    next: window[1],
                });
            }
        }
        let last = col_ptrs[ncols];
        if last != row_indices.len() {
            return Err(PatternError::ColPtrOutOfBounds {
                last,
                row_indices_len: row_indices.len(),
            });
        }

        for col in 0..ncols {
            let rows = &row_indices[col_ptrs[col]..col_ptrs[col + 1]];
            if let Some(&row) = rows.iter().find(|&&row| row >= nrows) {
                return Err(PatternError::RowIndexOutOfBounds { col, row, nrows });
            }
            if let Some(pair) = rows.windows(2).find(|pair| pair[0] >= pair[1]) {
                return Err(PatternError::RowIndexNotSorted {
                    col,
                    prev: pair[0],
                    next: pair[1],
                });
            }
        }

        Ok(Self {
            nrows,
            ncols,
            col_ptrs,
            row_indices,
        })
    }

    /// Builds a pattern from unordered `(row, col)` pairs; duplicates are merged.
    pub fn from_entries(
        nrows: usize,
        ncols: usize,
        entries: &[(usize, usize)],
    ) -> Result<Self, PatternError> {
        let mut cols: Vec<Vec<usize>> = vec![Vec::new(); ncols];
        for &(row, col) in entries {
            if col >= ncols {
                return Err(PatternError::MissingEntry { row, col });
            }
            cols[col].push(row);
        }
        let mut col_ptrs = Vec::with_capacity(ncols + 1);
        let mut row_indices = Vec::with_capacity(entries.len());
        col_ptrs.push(0);
        for mut rows in cols {
            rows.sort_unstable();
            rows.dedup();
            row_indices.extend_from_slice(&rows);
            col_ptrs.push(row_indices.len());
        }
        Self::new(nrows, ncols, col_ptrs, row_indices)
    }

    /// Output dimension.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Input dimension.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.row_indices.len()
    }

    pub fn col_ptrs(&self) -> &[usize] {
        &self.col_ptrs
    }

    pub fn row_indices(&self) -> &[usize] {
        &self.row_indices
    }

    /// Index range in row_indices for the given column.
    pub fn col_range(&self, col: usize) -> Range<usize> {
        self.col_ptrs[col]..self.col_ptrs[col + 1]
    }

    /// Sorted row indices for the given column.
    pub fn row_indices_of_col(&self, col: usize) -> &[usize] {
        &self.row_indices[self.col_range(col)]
    }

    /// Position of `(row, col)` in the value array, if stored.
    pub fn position(&self, row: usize, col: usize) -> Option<usize> {
        if col >= self.ncols {
            return None;
        }
        let range = self.col_range(col);
        let start = range.start;
        self.row_indices[range]
            .binary_search(&row)
            .ok()
            .map(|offset| start + offset)
    }
}

/// Sparse Jacobian with a fixed pattern and mutable values.
///
/// The pattern is fixed at construction; `Problem::jacobian` only rewrites
/// the values, so no allocation happens once the solve has started.
#[derive(Debug, Clone)]
pub struct SparseMatrix {
    pattern: SparsityPattern,
    values: Vec<f64>,
}

impl SparseMatrix {
    /// A matrix with the given pattern and every stored value set to zero.
    pub fn new(pattern: SparsityPattern) -> Self {
        let values = vec![0.0; pattern.nnz()];
        Self { pattern, values }
    }

    pub fn pattern(&self) -> &SparsityPattern {
        &self.pattern
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Sets every stored value to zero.
    pub fn fill_zero(&mut self) {
        self.values.fill(0.0);
    }

    /// Sorted row indices for the given column.
    pub fn row_indices_of_col(&self, col: usize) -> &[usize] {
        self.pattern.row_indices_of_col(col)
    }

    /// Stored values of one column, in the order of `row_indices_of_col`.
    pub fn values_of_col_mut(&mut self, col: usize) -> &mut [f64] {
        let range = self.pattern.col_range(col);
        &mut self.values[range]
    }

    /// Writes one stored entry.
    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<(), PatternError> {
        let pos = self
            .pattern
            .position(row, col)
            .ok_or(PatternError::MissingEntry { row, col })?;
        self.values[pos] = value;
        Ok(())
    }

    /// Reads an entry; entries outside the pattern are zero.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.pattern
            .position(row, col)
            .map_or(0.0, |pos| self.values[pos])
    }
}

impl LinearOperator for SparseMatrix {
    fn nrows(&self) -> usize {
        self.pattern.nrows()
    }

    fn ncols(&self) -> usize {
        self.pattern.ncols()
    }

    fn apply_into(&self, alpha: f64, v: &[f64], beta: f64, out: &mut [f64]) {
        scale_accumulator(beta, out);
        let rows = self.pattern.row_indices();
        for (col, &vc) in v.iter().enumerate() {
            let scaled = alpha * vc;
            if scaled == 0.0 {
                continue;
            }
            for idx in self.pattern.col_range(col) {
                out[rows[idx]] += self.values[idx] * scaled;
            }
        }
    }

    fn apply_transpose_into(&self, alpha: f64, v: &[f64], beta: f64, out: &mut [f64]) {
        let rows = self.pattern.row_indices();
        for (col, slot) in out.iter_mut().enumerate() {
            let mut sum = 0.0;
            for idx in self.pattern.col_range(col) {
                sum += self.values[idx] * v[rows[idx]];
            }
            *slot = if beta == 0.0 {
                alpha * sum
            } else {
                alpha * sum + beta * *slot
            };
        }
    }

    fn column_sq_norms_into(&self, out: &mut [f64]) {
        for (col, norm) in out.iter_mut().enumerate() {
            *norm = self.values[self.pattern.col_range(col)]
                .iter()
                .map(|value| value * value)
                .sum();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsorted_rows() {
        let err = SparsityPattern::new(3, 1, vec![0, 2], vec![2, 1]).unwrap_err();
        assert_eq!(err, PatternError::RowIndexNotSorted { col: 0, prev: 2, next: 1 });
    }

    #[test]
    fn rejects_out_of_bounds_rows() {
        let err = SparsityPattern::new(2, 1, vec![0, 1], vec![5]).unwrap_err();
        assert_eq!(err, PatternError::RowIndexOutOfBounds { col: 0, row: 5, nrows: 2 });
    }

    #[test]
    fn rejects_bad_col_ptrs() {
        assert!(matches!(
            SparsityPattern::new(2, 2, vec![0, 1], vec![0]),
            Err(PatternError::ColPtrLen { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            SparsityPattern::new(2, 1, vec![1, 1], vec![0]),
            Err(PatternError::ColPtrStart { value: 1 })
        ));
        assert!(matches!(
            SparsityPattern::new(2, 2, vec![0, 2, 1], vec![0, 1]),
            Err(PatternError::ColPtrNotMonotonic { col: 1, .. })
        ));
    }

    #[test]
    fn sparse_products_match_dense_arithmetic() {
        // [1 0]
        // [2 3]
        // [0 4]
        let pattern = SparsityPattern::from_entries(3, 2, &[(1, 1), (0, 0), (1, 0), (2, 1)]).unwrap();
        let mut a = SparseMatrix::new(pattern);
        a.set(0, 0, 1.0).unwrap();
        a.set(1, 0, 2.0).unwrap();
        a.set(1, 1, 3.0).unwrap();
        a.set(2, 1, 4.0).unwrap();
        assert!(a.set(2, 0, 1.0).is_err());
        assert_eq!(a.pattern().nnz(), 4);
        assert_eq!(a.pattern().col_ptrs(), &[0, 2, 4]);
        assert_eq!(a.pattern().row_indices(), &[0, 1, 1, 2]);
        assert_eq!(a.values(), &[1.0, 2.0, 3.0, 4.0]);

        let mut y = [1.0, 1.0, 1.0];
        a.apply_into(1.0, &[1.0, 2.0], -1.0, &mut y);
        assert_eq!(y, [0.0, 7.0, 7.0]);

        let mut z = [f64::NAN; 2];
        a.apply_transpose_into(2.0, &[1.0, 1.0, 1.0], 0.0, &mut z);
        assert_eq!(z, [6.0, 14.0]);

        let mut norms = [0.0; 2];
        a.column_sq_norms_into(&mut norms);
        assert_eq!(norms, [5.0, 25.0]);
        assert_eq!(a.get(2, 0), 0.0);
    }
}
