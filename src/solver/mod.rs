//! Time integration engine and the linear solvers behind the diffusion step.
//!
//! Every timestep is a Godunov split:
//!
//! 1. Reaction: each excitable node's ionic ODE is sub-stepped explicitly,
//!    producing an intermediate potential `Vtilde`.
//! 2. Diffusion: the pre-factorized tissue operator is solved once with a
//!    right-hand side built from `Vtilde` (and the previous gap potential).
//!
//! The operator is assembled into a [`SystemBuilder`] and either factorized
//! once ([`BandedLu`]) or handed to [`BiCgStab`]. Both implement
//! [`LinearSolver`], so the per-step code never knows which one it uses.

mod banded;
mod bicgstab;
mod partition;
mod simulator;

use serde::{Deserialize, Serialize};

pub use banded::{BandedLu, CsrMatrix, SystemBuilder};
pub use bicgstab::BiCgStab;
pub use partition::Partitioning;
pub use simulator::{
    FieldState, NullObserver, RunState, RunSummary, Schedule, SimulationClock, Simulator,
    StepObserver,
};

/// Relative residual tolerance for iterative diffusion solves.
pub const CONVERGENCE_TOLERANCE: f64 = 1e-10;

/// Maximum iterations per iterative diffusion solve.
pub const MAX_ITERATIONS: usize = 2000;

/// Outcome of one linear solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveStats {
    pub iterations: usize,
    pub residual: f64,
    pub converged: bool,
}

/// A linear operator that has been prepared for repeated solves.
///
/// Implementations are immutable after construction and may be shared
/// across threads.
pub trait LinearSolver: Send + Sync {
    /// Solve `A x = rhs`. `x` holds the initial guess on entry.
    fn solve(&self, rhs: &[f64], x: &mut [f64]) -> SolveStats;
}

/// Which solver backs the tissue operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    /// Banded LU, factorized once per sweep value
    #[default]
    Direct,
    /// Jacobi-preconditioned BiCGSTAB
    Iterative,
}

impl SolverKind {
    /// Parse a solver name (case-insensitive).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "direct" | "lu" => Some(Self::Direct),
            "iterative" | "bicgstab" => Some(Self::Iterative),
            _ => None,
        }
    }
}

/// Solver selection and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub kind: SolverKind,
    /// Iteration cap for the iterative solver
    pub max_iterations: usize,
    /// Relative residual tolerance for the iterative solver
    pub tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            kind: SolverKind::Direct,
            max_iterations: MAX_ITERATIONS,
            tolerance: CONVERGENCE_TOLERANCE,
        }
    }
}

impl SolverConfig {
    /// Prepare a solver for an assembled system.
    pub fn build(&self, builder: &SystemBuilder) -> crate::Result<Box<dyn LinearSolver>> {
        let solver: Box<dyn LinearSolver> = match self.kind {
            SolverKind::Direct => Box::new(builder.factor_banded()?),
            SolverKind::Iterative => {
                let matrix = builder.to_csr();
                if let Some(row) = matrix.diagonal().iter().position(|d| *d == 0.0) {
                    return Err(crate::CardiacError::config(format!(
                        "row {row} has no diagonal entry; the iterative solver \
                         needs one on every row (use the direct solver)"
                    )));
                }
                Box::new(BiCgStab::with_config(
                    matrix,
                    self.max_iterations,
                    self.tolerance,
                ))
            }
        };
        Ok(solver)
    }
}
