//! Jacobi-preconditioned BiCGSTAB for the diffusion solve.

use super::banded::CsrMatrix;
use super::{LinearSolver, SolveStats};

/// Iterative solver over a fixed CSR operator.
pub struct BiCgStab {
    /// System matrix
    matrix: CsrMatrix,
    /// Inverse diagonal (1 where the diagonal is zero)
    ///
    /// Saddle-point rows without a diagonal make Jacobi useless;
    /// [`SolverConfig::build`](super::SolverConfig::build) refuses them.
    inv_diag: Vec<f64>,
    /// Maximum iterations
    pub max_iterations: usize,
    /// Relative residual tolerance
    pub tolerance: f64,
}

impl BiCgStab {
    /// Create a solver with explicit limits.
    pub fn with_config(matrix: CsrMatrix, max_iterations: usize, tolerance: f64) -> Self {
        let inv_diag = matrix
            .diagonal()
            .into_iter()
            .map(|d| if d.abs() > f64::MIN_POSITIVE { 1.0 / d } else { 1.0 })
            .collect();
        Self {
            matrix,
            inv_diag,
            max_iterations,
            tolerance,
        }
    }

    fn precondition(&self, r: &[f64], z: &mut [f64]) {
        for ((z, &r), &d) in z.iter_mut().zip(r).zip(&self.inv_diag) {
            *z = r * d;
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

impl LinearSolver for BiCgStab {
    /// Solve using `x` as the initial guess.
    fn solve(&self, rhs: &[f64], x: &mut [f64]) -> SolveStats {
        let n = self.matrix.size();
        let mut r = vec![0.0; n];
        self.matrix.mul_vec(x, &mut r);
        for (ri, bi) in r.iter_mut().zip(rhs) {
            *ri = bi - *ri;
        }

        let b_norm = norm(rhs).max(f64::MIN_POSITIVE);
        let mut residual = norm(&r) / b_norm;
        if residual < self.tolerance {
            return SolveStats {
                iterations: 0,
                residual,
                converged: true,
            };
        }

        let r_hat = r.clone();
        let mut p = vec![0.0; n];
        let mut v = vec![0.0; n];
        let mut p_hat = vec![0.0; n];
        let mut s = vec![0.0; n];
        let mut s_hat = vec![0.0; n];
        let mut t = vec![0.0; n];
        let (mut rho, mut alpha, mut omega) = (1.0, 1.0, 1.0);
        let mut iterations = 0;

        // Every `break` is a breakdown; `iterations` counts completed sweeps
        while iterations < self.max_iterations {
            let rho_next = dot(&r_hat, &r);
            if rho_next.abs() < f64::MIN_POSITIVE {
                break;
            }
            let beta = (rho_next / rho) * (alpha / omega);
            rho = rho_next;
            for i in 0..n {
                p[i] = r[i] + beta * (p[i] - omega * v[i]);
            }

            self.precondition(&p, &mut p_hat);
            self.matrix.mul_vec(&p_hat, &mut v);
            let r_hat_v = dot(&r_hat, &v);
            if r_hat_v.abs() < f64::MIN_POSITIVE {
                break;
            }
            alpha = rho / r_hat_v;
            for i in 0..n {
                s[i] = r[i] - alpha * v[i];
            }

            let s_norm = norm(&s) / b_norm;
            if s_norm < self.tolerance {
                for i in 0..n {
                    x[i] += alpha * p_hat[i];
                }
                return SolveStats {
                    iterations: iterations + 1,
                    residual: s_norm,
                    converged: true,
                };
            }

            self.precondition(&s, &mut s_hat);
            self.matrix.mul_vec(&s_hat, &mut t);
            let t_t = dot(&t, &t);
            if t_t < f64::MIN_POSITIVE {
                break;
            }
            omega = dot(&t, &s) / t_t;
            for i in 0..n {
                x[i] += alpha * p_hat[i] + omega * s_hat[i];
                r[i] = s[i] - omega * t[i];
            }

            let next = norm(&r) / b_norm;
            if !next.is_finite() || omega.abs() < f64::MIN_POSITIVE {
                break;
            }
            iterations += 1;
            residual = next;
            if residual < self.tolerance {
                return SolveStats {
                    iterations,
                    residual,
                    converged: true,
                };
            }
        }

        SolveStats {
            iterations,
            residual,
            converged: false,
        }
    }
}
