//! Bidomain formulation on a cell-centered voxel grid.
//!
//! Unknowns are interleaved per voxel as `[V_k, phi_e_k]`. With `K_i`, `K_e`
//! the anisotropic conductance Laplacians and `M` the lumped volume, the
//! implicit diffusion step reads
//!
//! ```text
//! [ chi*Cm/dt * M + K_i    K_i       ] [ V     ]   [ chi*Cm/dt * M * Vtilde ]
//! [ K_i                    K_i + K_e ] [ phi_e ] = [ 0                      ]
//! ```
//!
//! Grid boundaries carry no flux. `phi_e` is pinned to zero at voxel 0.

use serde::{Deserialize, Serialize};

use super::grid::{Axis, GridSpec, Point};
use super::{Formulation, TissueModel};
use crate::error::{CardiacError, Result};
use crate::solver::SystemBuilder;

/// Material parameters of the bidomain model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BidomainParams {
    /// Intracellular conductivity per axis (mS/mm)
    pub sigma_i: [f64; 3],
    /// Extracellular conductivity per axis (mS/mm)
    pub sigma_e: [f64; 3],
    /// Membrane surface-to-volume ratio (1/mm)
    pub surface_to_volume: f64,
    /// Membrane capacitance (uF/mm^2)
    pub capacitance: f64,
}

impl Default for BidomainParams {
    fn default() -> Self {
        Self {
            sigma_i: [0.17, 0.019, 0.019],
            sigma_e: [0.62, 0.24, 0.24],
            surface_to_volume: 140.0,
            capacitance: 0.01,
        }
    }
}

impl BidomainParams {
    pub fn validate(&self) -> Result<()> {
        if self.sigma_i.iter().chain(&self.sigma_e).any(|&s| !(s > 0.0)) {
            return Err(CardiacError::config("bidomain conductivities must be positive"));
        }
        if !(self.surface_to_volume > 0.0) || !(self.capacitance > 0.0) {
            return Err(CardiacError::config(
                "surface-to-volume ratio and capacitance must be positive",
            ));
        }
        Ok(())
    }
}

/// Homogenized tissue slab.
#[derive(Debug, Clone)]
pub struct Bidomain {
    grid: GridSpec,
    params: BidomainParams,
    sites: Vec<Point>,
}

impl Bidomain {
    pub fn new(grid: GridSpec, params: BidomainParams) -> Result<Self> {
        grid.validate()?;
        params.validate()?;
        let sites = (0..grid.num_voxels()).map(|v| grid.center(v)).collect();
        Ok(Self { grid, params, sites })
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    fn mass(&self, dt: f64) -> f64 {
        let h = self.grid.spacing;
        self.params.surface_to_volume * self.params.capacitance * h * h * h / dt
    }
}

impl TissueModel for Bidomain {
    fn formulation(&self) -> Formulation {
        Formulation::Bidomain
    }

    fn num_unknowns(&self) -> usize {
        2 * self.grid.num_voxels()
    }

    fn potential_sites(&self) -> &[Point] {
        &self.sites
    }

    fn assemble(&self, dt: f64) -> Result<SystemBuilder> {
        let h = self.grid.spacing;
        let mass = self.mass(dt);
        let mut builder = SystemBuilder::new(self.num_unknowns());

        for k in 0..self.grid.num_voxels() {
            builder.add(2 * k, 2 * k, mass);

            for axis in Axis::ALL {
                let Some(n) = self.grid.upper_neighbor(k, axis) else {
                    continue;
                };
                // Face conductance: sigma * area / distance = sigma * h
                let g_i = self.params.sigma_i[axis.index()] * h;
                let g_e = self.params.sigma_e[axis.index()] * h;
                let v = [2 * k, 2 * n];
                let phi = [2 * k + 1, 2 * n + 1];

                builder.stamp_conductance(Some(v[0]), Some(v[1]), g_i);
                builder.stamp_coupling(v, phi, g_i);
                builder.stamp_coupling(phi, v, g_i);
                builder.stamp_conductance(Some(phi[0]), Some(phi[1]), g_i + g_e);
            }
        }

        builder.pin(1);
        Ok(builder)
    }

    fn fill_rhs(&self, dt: f64, vtilde: &[f64], _w_old: &[f64], rhs: &mut [f64]) {
        let mass = self.mass(dt);
        for (k, &vt) in vtilde.iter().enumerate() {
            rhs[2 * k] = mass * vt;
            rhs[2 * k + 1] = 0.0;
        }
    }

    fn extract(&self, solution: &[f64], v: &mut [f64], _w: &mut [f64]) {
        for (k, out) in v.iter_mut().enumerate() {
            *out = solution[2 * k];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{SolverConfig, SolverKind};
    use approx::assert_relative_eq;

    fn solve(model: &Bidomain, dt: f64, vtilde: &[f64], kind: SolverKind) -> Vec<f64> {
        let builder = model.assemble(dt).unwrap();
        let config = SolverConfig {
            kind,
            ..SolverConfig::default()
        };
        let solver = config.build(&builder).unwrap();
        let mut rhs = vec![0.0; model.num_unknowns()];
        model.fill_rhs(dt, vtilde, &[], &mut rhs);
        let mut x = vec![0.0; model.num_unknowns()];
        assert!(solver.solve(&rhs, &mut x).converged);
        let mut v = vec![0.0; vtilde.len()];
        model.extract(&x, &mut v, &mut []);
        v
    }

    #[test]
    fn test_single_voxel_passes_potential_through() {
        let model = Bidomain::new(GridSpec::new(1, 1, 1, 0.1), BidomainParams::default()).unwrap();
        let v = solve(&model, 0.01, &[-42.0], SolverKind::Direct);
        assert_relative_eq!(v[0], -42.0, epsilon = 1e-12);
    }

    #[test]
    fn test_uniform_field_is_preserved() {
        let model = Bidomain::new(GridSpec::new(5, 3, 1, 0.1), BidomainParams::default()).unwrap();
        let vtilde = vec![-83.0; 15];
        let v = solve(&model, 0.01, &vtilde, SolverKind::Direct);
        for vi in v {
            assert_relative_eq!(vi, -83.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_diffusion_conserves_charge_and_smooths() {
        let model = Bidomain::new(GridSpec::new(8, 1, 1, 0.1), BidomainParams::default()).unwrap();
        let mut vtilde = vec![-80.0; 8];
        vtilde[0] = 20.0;
        let v = solve(&model, 0.05, &vtilde, SolverKind::Direct);

        // Zero-flux boundaries: the mean potential is unchanged
        let mean_before: f64 = vtilde.iter().sum::<f64>() / 8.0;
        let mean_after: f64 = v.iter().sum::<f64>() / 8.0;
        assert_relative_eq!(mean_before, mean_after, epsilon = 1e-9);
        assert!(v[0] < 20.0);
        assert!(v[1] > -80.0);
    }

    #[test]
    fn test_iterative_matches_direct() {
        let model = Bidomain::new(GridSpec::new(6, 4, 1, 0.1), BidomainParams::default()).unwrap();
        let vtilde: Vec<f64> = (0..24).map(|i| -80.0 + i as f64).collect();
        let direct = solve(&model, 0.01, &vtilde, SolverKind::Direct);
        let iterative = solve(&model, 0.01, &vtilde, SolverKind::Iterative);
        for (a, b) in direct.iter().zip(&iterative) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rejects_bad_conductivity() {
        let params = BidomainParams {
            sigma_i: [0.0, 0.1, 0.1],
            ..BidomainParams::default()
        };
        assert!(Bidomain::new(GridSpec::default(), params).is_err());
    }
}
