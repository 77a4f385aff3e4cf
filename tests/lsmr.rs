use lm_lsmr::{
    Damping, DenseMatrix, DenseSolver, LinearOperator, Lsmr, LsmrParams, LsmrStop, Parallelism,
};

const A_ROWS: [[f64; 3]; 6] = [
    [1.0, 2.0, 0.5],
    [0.0, 1.0, -1.0],
    [3.0, 0.0, 1.0],
    [1.0, 1.0, 1.0],
    [-2.0, 0.5, 0.0],
    [0.0, -1.0, 2.0],
];

const B_INCONSISTENT: [f64; 6] = [1.0, -2.0, 0.5, 3.0, 1.0, -1.0];

fn tall_matrix() -> DenseMatrix {
    DenseMatrix::from_fn(6, 3, |i, j| A_ROWS[i][j])
}

fn hilbert(n: usize) -> DenseMatrix {
    DenseMatrix::from_fn(n, n, |i, j| 1.0 / (i + j + 1) as f64)
}

fn residual_norm(a: &impl LinearOperator, x: &[f64], b: &[f64]) -> f64 {
    let mut r = b.to_vec();
    a.apply_into(1.0, x, -1.0, &mut r);
    r.iter().map(|v| v * v).sum::<f64>().sqrt()
}

fn norm(x: &[f64]) -> f64 {
    x.iter().map(|v| v * v).sum::<f64>().sqrt()
}

fn solve(a: &impl LinearOperator, b: &[f64], params: &LsmrParams) -> (Vec<f64>, lm_lsmr::LsmrInfo) {
    let mut lsmr = Lsmr::new(a.nrows(), a.ncols());
    let mut x = vec![0.0; a.ncols()];
    let info = lsmr.solve(a, b, &mut x, params).unwrap();
    (x, info)
}

#[test]
fn consistent_system_is_solved_exactly() {
    let a = tall_matrix();
    let x_star = [0.5, -1.0, 2.0];
    let mut b = vec![0.0; 6];
    a.apply_into(1.0, &x_star, 0.0, &mut b);

    let (x, info) = solve(&a, &b, &LsmrParams::default());
    assert!(info.stop.is_converged(), "{:?}", info.stop);
    assert!(info.iterations <= 3, "{} iterations", info.iterations);
    assert!(residual_norm(&a, &x, &b) < 1e-12);
    for (xi, ei) in x.iter().zip(x_star) {
        assert!((xi - ei).abs() < 1e-10);
    }
}

#[test]
fn damping_shrinks_solution() {
    let a = tall_matrix();
    let mut last_norm_x = f64::INFINITY;
    let mut last_norm_r = 0.0;
    for damp in [0.0, 0.5, 1.0, 2.0, 5.0] {
        let params = LsmrParams {
            damp,
            ..LsmrParams::default()
        };
        let (x, info) = solve(&a, &B_INCONSISTENT, &params);
        assert!(info.stop.is_converged(), "damp {damp}: {:?}", info.stop);
        let norm_x = norm(&x);
        let norm_r = residual_norm(&a, &x, &B_INCONSISTENT);
        assert!(norm_x < last_norm_x, "damp {damp}: ||x|| = {norm_x}");
        assert!(norm_r > last_norm_r, "damp {damp}: ||r|| = {norm_r}");
        last_norm_x = norm_x;
        last_norm_r = norm_r;
    }
}

#[test]
fn ill_conditioned_system_hits_condition_limit() {
    let a = hilbert(8);
    let b = vec![1.0; 8];

    let params = LsmrParams {
        conlim: 10.0,
        ..LsmrParams::default()
    };
    let (x, info) = solve(&a, &b, &params);
    assert_eq!(info.stop, LsmrStop::ConditionLimit);
    assert!(!info.stop.is_converged());
    assert!(info.cond_a >= 10.0);
    assert!(x.iter().all(|v| v.is_finite()));

    let (_, info) = solve(&a, &b, &LsmrParams::default());
    assert!(info.stop.is_converged(), "{:?}", info.stop);
    assert!(info.iterations > 3);

    let params = LsmrParams {
        max_iters: 3,
        ..LsmrParams::default()
    };
    let (_, info) = solve(&a, &b, &params);
    assert_eq!(info.stop, LsmrStop::MaxIterations);
    assert_eq!(info.iterations, 3);
}

/// Row-major matrix that only exposes products.
struct RowMajor<'a> {
    rows: &'a [[f64; 3]],
}

impl LinearOperator for RowMajor<'_> {
    fn nrows(&self) -> usize {
        self.rows.len()
    }

    fn ncols(&self) -> usize {
        3
    }

    fn apply_into(&self, alpha: f64, v: &[f64], beta: f64, out: &mut [f64]) {
        for (o, row) in out.iter_mut().zip(self.rows) {
            let dot: f64 = row.iter().zip(v).map(|(a, b)| a * b).sum();
            *o = if beta == 0.0 { alpha * dot } else { alpha * dot + beta * *o };
        }
    }

    fn apply_transpose_into(&self, alpha: f64, v: &[f64], beta: f64, out: &mut [f64]) {
        for (j, o) in out.iter_mut().enumerate() {
            let dot: f64 = self.rows.iter().zip(v).map(|(row, b)| row[j] * b).sum();
            *o = if beta == 0.0 { alpha * dot } else { alpha * dot + beta * *o };
        }
    }

    fn column_sq_norms_into(&self, out: &mut [f64]) {
        for (j, o) in out.iter_mut().enumerate() {
            *o = self.rows.iter().map(|row| row[j] * row[j]).sum();
        }
    }
}

#[test]
fn matrix_free_operator_matches_dense() {
    let dense = tall_matrix();
    let free = RowMajor { rows: &A_ROWS };
    let params = LsmrParams {
        damp: 0.5,
        ..LsmrParams::default()
    };
    let (x_dense, _) = solve(&dense, &B_INCONSISTENT, &params);
    let (x_free, _) = solve(&free, &B_INCONSISTENT, &params);
    for (a, b) in x_dense.iter().zip(&x_free) {
        assert!((a - b).abs() < 1e-12, "{a} vs {b}");
    }
}

#[test]
fn internal_damping_matches_ridge_normal_equations() {
    let a = tall_matrix();
    let params = LsmrParams {
        damp: 0.3,
        ..LsmrParams::default()
    };
    let (x, _) = solve(&a, &B_INCONSISTENT, &params);

    // residuals = -b so that -J^T f = A^T b.
    let residuals: Vec<f64> = B_INCONSISTENT.iter().map(|b| -b).collect();
    let mut dense = DenseSolver::new(3, Parallelism::None).unwrap();
    let mut step = [0.0; 3];
    assert!(dense.solve(&a, &residuals, &[1.0; 3], 0.3, &mut step));
    for (xi, si) in x.iter().zip(step) {
        assert!((xi - si).abs() < 1e-10, "{xi} vs {si}");
    }
}

#[test]
fn damped_operator_step_matches_cholesky_step() {
    let a = tall_matrix();
    let lambda = 0.3;
    let mut dtd = [0.0; 3];
    a.column_sq_norms_into(&mut dtd);

    let mut dense = DenseSolver::new(3, Parallelism::None).unwrap();
    let mut expected = [0.0; 3];
    assert!(dense.solve(&a, &B_INCONSISTENT, &dtd, lambda, &mut expected));

    let mut damping = Damping::new(3);
    damping.update(lambda, &dtd);
    let mut rhs = vec![0.0; 9];
    for (r, b) in rhs.iter_mut().zip(B_INCONSISTENT) {
        *r = -b;
    }
    let mut lsmr = Lsmr::new(9, 3);
    let mut step = [0.0; 3];
    let info = {
        let op = damping.operator(&a);
        assert_eq!((op.nrows(), op.ncols()), (9, 3));
        lsmr.solve(&op, &rhs, &mut step, &LsmrParams::default())
            .unwrap()
    };
    assert!(info.stop.is_converged(), "{:?}", info.stop);
    damping.unscale(&mut step);

    for (s, e) in step.iter().zip(expected) {
        assert!((s - e).abs() < 1e-10, "{s} vs {e}");
    }
}
