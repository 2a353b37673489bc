//! Tissue formulations and the pre-factorized diffusion operator.
//!
//! A [`TissueModel`] knows how to assemble its implicit diffusion operator
//! for a fixed `dt`, how to build a right-hand side from the reaction
//! result, and how to read the potential fields back out of a solution.
//! [`TissueSystem`] pairs a model with its prepared solver; it is built once
//! per sweep value and only ever re-solved, never re-factorized.

mod bidomain;
mod emi;
mod grid;

use serde::{Deserialize, Serialize};

pub use bidomain::{Bidomain, BidomainParams};
pub use emi::{Emi, EmiGeometry, EmiParams};
pub use grid::{nearest_site, Axis, GridSpec, NodeIndicators, Point, Region};

use crate::error::{CardiacError, Result};
use crate::solver::{LinearSolver, SolveStats, SolverConfig, SystemBuilder};

/// The two supported tissue formulations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Formulation {
    Bidomain,
    Emi,
}

impl Formulation {
    /// Parse a formulation name (case-insensitive).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bidomain" => Some(Self::Bidomain),
            "emi" => Some(Self::Emi),
            _ => None,
        }
    }

    /// Whether the formulation carries a gap-junction potential.
    pub fn has_gap_potential(self) -> bool {
        matches!(self, Self::Emi)
    }
}

/// Formulation selection with its geometry and material parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormulationConfig {
    Bidomain {
        #[serde(default)]
        grid: GridSpec,
        #[serde(default)]
        params: BidomainParams,
    },
    Emi {
        #[serde(default)]
        geometry: EmiGeometry,
        #[serde(default)]
        params: EmiParams,
    },
}

impl Default for FormulationConfig {
    fn default() -> Self {
        Self::Bidomain {
            grid: GridSpec::default(),
            params: BidomainParams::default(),
        }
    }
}

impl FormulationConfig {
    /// Default geometry and parameters for a formulation.
    pub fn default_for(formulation: Formulation) -> Self {
        match formulation {
            Formulation::Bidomain => Self::default(),
            Formulation::Emi => Self::Emi {
                geometry: EmiGeometry::default(),
                params: EmiParams::default(),
            },
        }
    }

    pub fn formulation(&self) -> Formulation {
        match self {
            Self::Bidomain { .. } => Formulation::Bidomain,
            Self::Emi { .. } => Formulation::Emi,
        }
    }

    /// Build the tissue model.
    pub fn build(&self) -> Result<Box<dyn TissueModel>> {
        let model: Box<dyn TissueModel> = match self {
            Self::Bidomain { grid, params } => Box::new(Bidomain::new(*grid, *params)?),
            Self::Emi { geometry, params } => Box::new(Emi::new(*geometry, *params)?),
        };
        Ok(model)
    }
}

/// One tissue formulation's discrete operator.
pub trait TissueModel: Send + Sync {
    fn formulation(&self) -> Formulation;

    /// Size of the linear system.
    fn num_unknowns(&self) -> usize;

    /// Positions of the transmembrane-potential DOFs.
    fn potential_sites(&self) -> &[Point];

    /// Positions of the gap-potential DOFs (empty without gap junctions).
    fn gap_sites(&self) -> &[Point] {
        &[]
    }

    /// Assemble the implicit operator for timestep `dt`.
    fn assemble(&self, dt: f64) -> Result<SystemBuilder>;

    /// Right-hand side from the reaction result and the previous gap field.
    fn fill_rhs(&self, dt: f64, vtilde: &[f64], w_old: &[f64], rhs: &mut [f64]);

    /// Copy the potential fields out of a solution vector.
    fn extract(&self, solution: &[f64], v: &mut [f64], w: &mut [f64]);
}

/// An assembled, prepared tissue operator for a fixed `dt`.
pub struct TissueSystem {
    model: Box<dyn TissueModel>,
    solver: Box<dyn LinearSolver>,
    dt: f64,
    rhs: Vec<f64>,
    solution: Vec<f64>,
}

impl TissueSystem {
    /// Assemble and factorize the operator. Called once per sweep value.
    pub fn assemble(model: Box<dyn TissueModel>, dt: f64, solver: &SolverConfig) -> Result<Self> {
        let builder = model.assemble(dt)?;
        let (kl, ku) = builder.bandwidths();
        log::debug!(
            "assembled {:?} operator: {} unknowns, bandwidth ({}, {})",
            model.formulation(),
            builder.size(),
            kl,
            ku
        );
        let prepared = solver.build(&builder)?;
        let n = model.num_unknowns();

        Ok(Self {
            model,
            solver: prepared,
            dt,
            rhs: vec![0.0; n],
            solution: vec![0.0; n],
        })
    }

    pub fn model(&self) -> &dyn TissueModel {
        self.model.as_ref()
    }

    pub fn formulation(&self) -> Formulation {
        self.model.formulation()
    }

    pub fn num_unknowns(&self) -> usize {
        self.rhs.len()
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// One diffusion step: build the right-hand side from `vtilde` and the
    /// current gap field, solve, and overwrite `v` and `w` with the result.
    pub fn diffuse(
        &mut self,
        step: usize,
        vtilde: &[f64],
        v: &mut [f64],
        w: &mut [f64],
    ) -> Result<SolveStats> {
        self.model.fill_rhs(self.dt, vtilde, w, &mut self.rhs);

        // Zero initial guess keeps iterative solves reproducible on restart
        self.solution.fill(0.0);
        let stats = self.solver.solve(&self.rhs, &mut self.solution);
        if !stats.converged {
            return Err(CardiacError::SolverDivergence {
                step,
                iterations: stats.iterations,
                residual: stats.residual,
            });
        }

        self.model.extract(&self.solution, v, w);
        Ok(stats)
    }
}
