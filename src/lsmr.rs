//! LSMR: iterative least squares via Golub-Kahan bidiagonalization.
//!
//! Solves `min ||A x - b||^2 + damp^2 ||x||^2` touching `A` only through
//! `A v` and `A^T u`. Running estimates of `||r||`, `||A^T r||`, `||A||` and
//! `cond(A)` are maintained with plane rotations, so every stopping rule costs
//! O(1) per iteration on top of the two operator products.
//!
//! Reference: D. C.-L. Fong and M. A. Saunders, "LSMR: An iterative algorithm
//! for sparse least-squares problems", SIAM J. Sci. Comput. 33(5), 2011.

use crate::error::SolveError;
use crate::operator::LinearOperator;

/// Tolerances and limits for one LSMR solve.
#[derive(Debug, Clone, Copy)]
pub struct LsmrParams {
    /// Relative accuracy of `A`; also the orthogonality tolerance on `A^T r`.
    pub atol: f64,
    /// Relative accuracy of `b`.
    pub btol: f64,
    /// Stop once the estimated `cond(A)` exceeds this (`<= 0` disables).
    pub conlim: f64,
    /// Maximum number of bidiagonalization steps.
    pub max_iters: usize,
    /// Internal Tikhonov damping.
    pub damp: f64,
}

impl Default for LsmrParams {
    fn default() -> Self {
        Self {
            atol: 1e-10,
            btol: 1e-10,
            conlim: 1e10,
            max_iters: 100,
            damp: 0.0,
        }
    }
}

/// Which stopping rule ended an LSMR solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LsmrStop {
    /// `A^T r` vanished: `x` already solves the problem exactly.
    ExactFit,
    /// `||r|| / ||b|| <= btol + atol ||A|| ||x|| / ||b||`.
    ResidualTolerance,
    /// `||A^T r|| / (||A|| ||r||) <= atol`.
    OrthogonalityTolerance,
    /// `1 / cond(A) <= 1 / conlim`.
    ConditionLimit,
    /// The residual test fell below machine precision.
    ResidualStagnation,
    /// The orthogonality test fell below machine precision.
    OrthogonalityStagnation,
    /// `cond(A)` exceeded `1 / eps`.
    ConditionStagnation,
    /// The iteration limit was reached.
    MaxIterations,
}

impl LsmrStop {
    /// True for the rules that signal a usable least-squares solution.
    pub fn is_converged(self) -> bool {
        !matches!(
            self,
            Self::ConditionLimit | Self::ConditionStagnation | Self::MaxIterations
        )
    }
}

/// Summary of one LSMR solve.
#[derive(Debug, Clone, Copy)]
pub struct LsmrInfo {
    pub iterations: usize,
    pub stop: LsmrStop,
    /// Estimate of `||b - A x||` (including the damping block).
    pub norm_r: f64,
    /// Estimate of `||A^T r||`.
    pub norm_ar: f64,
    /// Frobenius-norm estimate of the (damped) operator.
    pub norm_a: f64,
    /// Condition number estimate.
    pub cond_a: f64,
    pub norm_x: f64,
}

/// LSMR work vectors for a fixed operator shape.
///
/// All four vectors are allocated once; `solve` runs without allocating and
/// overwrites them on every call.
#[derive(Debug, Clone)]
pub struct Lsmr {
    u: Vec<f64>,
    v: Vec<f64>,
    h: Vec<f64>,
    hbar: Vec<f64>,
}

impl Lsmr {
    /// Workspace for operators mapping `R^ncols` to `R^nrows`.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            u: vec![0.0; nrows],
            v: vec![0.0; ncols],
            h: vec![0.0; ncols],
            hbar: vec![0.0; ncols],
        }
    }

    pub fn nrows(&self) -> usize {
        self.u.len()
    }

    pub fn ncols(&self) -> usize {
        self.v.len()
    }

    /// Improves `x` in place towards `argmin ||A x - b||^2 + damp^2 ||x - x0||^2`,
    /// where `x0` is the value of `x` on entry.
    ///
    /// With a cold start (`x0 = 0`) this is the usual Tikhonov problem; a
    /// warm start with `damp > 0` regularizes towards `x0` instead of zero.
    pub fn solve<A: LinearOperator + ?Sized>(
        &mut self,
        a: &A,
        b: &[f64],
        x: &mut [f64],
        params: &LsmrParams,
    ) -> Result<LsmrInfo, SolveError> {
        let expected = (self.nrows(), self.ncols());
        let actual = (a.nrows(), a.ncols());
        if expected != actual {
            return Err(SolveError::JacobianShape { expected, actual });
        }
        if b.len() != self.nrows() {
            return Err(SolveError::ResidualLength {
                expected: self.nrows(),
                actual: b.len(),
            });
        }
        if x.len() != self.ncols() {
            return Err(SolveError::ParameterLength {
                expected: self.ncols(),
                actual: x.len(),
            });
        }
        Ok(self.solve_unchecked(a, b, x, params))
    }

    pub(crate) fn solve_unchecked<A: LinearOperator + ?Sized>(
        &mut self,
        a: &A,
        b: &[f64],
        x: &mut [f64],
        params: &LsmrParams,
    ) -> LsmrInfo {
        let Self { u, v, h, hbar } = self;
        let damp = params.damp;
        let ctol = if params.conlim > 0.0 {
            1.0 / params.conlim
        } else {
            0.0
        };

        // beta * u = b - A x, alpha * v = A^T u.
        u.copy_from_slice(b);
        a.apply_into(-1.0, x, 1.0, u);
        let mut beta = norm2(u);
        if beta > 0.0 {
            scale(u, 1.0 / beta);
        }
        a.apply_transpose_into(1.0, u, 0.0, v);
        let mut alpha = norm2(v);
        if alpha > 0.0 {
            scale(v, 1.0 / alpha);
        }

        let mut zetabar = alpha * beta;
        let mut alphabar = alpha;
        let mut rho: f64 = 1.0;
        let mut rhobar: f64 = 1.0;
        let mut cbar: f64 = 1.0;
        let mut sbar: f64 = 0.0;

        h.copy_from_slice(v);
        hbar.fill(0.0);

        // ||r|| estimation.
        let mut betadd = beta;
        let mut betad: f64 = 0.0;
        let mut rhodold: f64 = 1.0;
        let mut tautildeold: f64 = 0.0;
        let mut thetatilde: f64 = 0.0;
        let mut zeta: f64 = 0.0;
        let mut d: f64 = 0.0;

        // ||A|| and cond(A) estimation.
        let mut norm_a2 = alpha * alpha;
        let mut norm_a = norm_a2.sqrt();
        let mut cond_a: f64 = 1.0;
        let mut maxrbar: f64 = 0.0;
        let mut minrbar: f64 = 1e100;

        let normb = beta;
        let mut norm_r = beta;
        let mut norm_ar = alpha * beta;
        let mut norm_x = norm2(x);

        if norm_ar == 0.0 {
            return LsmrInfo {
                iterations: 1,
                stop: LsmrStop::ExactFit,
                norm_r,
                norm_ar,
                norm_a,
                cond_a,
                norm_x,
            };
        }

        let mut iter = 0;
        let stop = loop {
            iter += 1;

            // Continue the bidiagonalization.
            a.apply_into(1.0, v, -alpha, u);
            beta = norm2(u);
            if beta > 0.0 {
                scale(u, 1.0 / beta);
                a.apply_transpose_into(1.0, u, -beta, v);
                alpha = norm2(v);
                if alpha > 0.0 {
                    scale(v, 1.0 / alpha);
                }
            }

            // Rotation Qhat_{k,2k+1} absorbs the damping.
            let alphahat = alphabar.hypot(damp);
            let (chat, shat) = if alphahat > 0.0 {
                (alphabar / alphahat, damp / alphahat)
            } else {
                (1.0, 0.0)
            };

            // Rotation Q_i turns B_i into R_i.
            let rhoold = rho;
            rho = alphahat.hypot(beta);
            if rho == 0.0 {
                break LsmrStop::ExactFit;
            }
            let c = alphahat / rho;
            let s = beta / rho;
            let thetanew = s * alpha;
            alphabar = c * alpha;

            // Rotation Qbar_i turns R_i^T into Rbar_i.
            let rhobarold = rhobar;
            let zetaold = zeta;
            let thetabar = sbar * rho;
            let rhotemp = cbar * rho;
            rhobar = rhotemp.hypot(thetanew);
            if rhobar == 0.0 {
                break LsmrStop::ExactFit;
            }
            cbar = rhotemp / rhobar;
            sbar = thetanew / rhobar;
            zeta = cbar * zetabar;
            zetabar = -sbar * zetabar;

            // Update hbar, x, h.
            let hbar_scale = -thetabar * rho / (rhoold * rhobarold);
            for (hb, &hi) in hbar.iter_mut().zip(h.iter()) {
                *hb = hi + hbar_scale * *hb;
            }
            let x_scale = zeta / (rho * rhobar);
            for (xi, &hb) in x.iter_mut().zip(hbar.iter()) {
                *xi += x_scale * hb;
            }
            let h_scale = -thetanew / rho;
            for (hi, &vi) in h.iter_mut().zip(v.iter()) {
                *hi = vi + h_scale * *hi;
            }

            // Estimate ||r||: apply Qhat, then Q, then Qtilde_{k-1}.
            let betaacute = chat * betadd;
            let betacheck = -shat * betadd;
            let betahat = c * betaacute;
            betadd = -s * betaacute;

            let thetatildeold = thetatilde;
            let rhotildeold = rhodold.hypot(thetabar);
            let ctildeold = rhodold / rhotildeold;
            let stildeold = thetabar / rhotildeold;
            thetatilde = stildeold * rhobar;
            rhodold = ctildeold * rhobar;
            betad = -stildeold * betad + ctildeold * betahat;

            tautildeold = (zetaold - thetatildeold * tautildeold) / rhotildeold;
            let taud = (zeta - thetatilde * tautildeold) / rhodold;
            d += betacheck * betacheck;
            norm_r = (d + (betad - taud).powi(2) + betadd * betadd).sqrt();

            // Estimate ||A||.
            norm_a2 += beta * beta;
            norm_a = norm_a2.sqrt();
            norm_a2 += alpha * alpha;

            // Estimate cond(A).
            maxrbar = maxrbar.max(rhobarold);
            if iter > 1 {
                minrbar = minrbar.min(rhobarold);
            }
            cond_a = maxrbar.max(rhotemp) / minrbar.min(rhotemp);

            norm_ar = zetabar.abs();
            norm_x = norm2(x);

            let test1 = norm_r / normb;
            let test2 = norm_ar / (norm_a * norm_r);
            let test3 = 1.0 / cond_a;
            let t1 = test1 / (1.0 + norm_a * norm_x / normb);
            let rtol = params.btol + params.atol * norm_a * norm_x / normb;

            // Tolerance tests take precedence, so a solve that converges on
            // its last allowed iteration is reported as converged.
            if test1 <= rtol {
                break LsmrStop::ResidualTolerance;
            }
            if test2 <= params.atol {
                break LsmrStop::OrthogonalityTolerance;
            }
            if test3 <= ctol {
                break LsmrStop::ConditionLimit;
            }
            // Rounding-based guards: these still fire when atol, btol or
            // conlim are set to zero, acting like eps-sized tolerances.
            if 1.0 + t1 <= 1.0 {
                break LsmrStop::ResidualStagnation;
            }
            if 1.0 + test2 <= 1.0 {
                break LsmrStop::OrthogonalityStagnation;
            }
            if 1.0 + test3 <= 1.0 {
                break LsmrStop::ConditionStagnation;
            }
            if iter >= params.max_iters {
                break LsmrStop::MaxIterations;
            }
        };

        log::trace!("lsmr stopped after {iter} iterations: {stop:?}");
        LsmrInfo {
            iterations: iter,
            stop,
            norm_r,
            norm_ar,
            norm_a,
            cond_a,
            norm_x,
        }
    }
}

fn norm2(x: &[f64]) -> f64 {
    x.iter().map(|v| v * v).sum::<f64>().sqrt()
}

fn scale(x: &mut [f64], factor: f64) {
    for v in x.iter_mut() {
        *v *= factor;
    }
}
