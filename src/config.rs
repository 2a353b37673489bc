//! Run configuration.
//!
//! A complete run is described by one [`SimulatorConfig`], loaded from JSON.
//! Every field has a default so partial files work. [`SimulatorConfig::validate`]
//! runs before any compute work and rejects inconsistent settings.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cell::{IntegratorKind, StimulusSpec};
use crate::error::{CardiacError, Result};
use crate::solver::{SolverConfig, SolverKind};
use crate::tissue::{Formulation, FormulationConfig, Point, Region};
use crate::DEFAULT_SUBSTEPS;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub formulation: FormulationConfig,
    pub time: TimeConfig,
    pub stimulus: StimulusConfig,
    pub sweep: SweepConfig,
    pub solver: SolverConfig,
    pub output: OutputConfig,
    /// Nodes outside this box never run the ionic model (all nodes if unset)
    pub excitable_region: Option<Region>,
    /// Resume the first sweep value from the checkpoint directory
    pub restart: bool,
    /// Number of partitions for the reaction phase
    pub threads: usize,
}

/// Timestep, horizon and ODE sub-stepping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Outer (diffusion) timestep (ms)
    pub dt: f64,
    /// End of the simulated interval (ms)
    pub final_time: f64,
    /// ODE sub-steps per outer step
    pub substeps: usize,
    pub integrator: IntegratorKind,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            dt: 0.01,
            final_time: 500.0,
            substeps: DEFAULT_SUBSTEPS,
            integrator: IntegratorKind::ForwardEuler,
        }
    }
}

/// S1 pulse train, S2 timing relative to S1, and the electrode region.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StimulusConfig {
    pub s1: StimulusSpec,
    /// Delay from S1 start to S2 start (ms)
    pub s1s2_interval: f64,
    /// S2 pulse length (ms)
    pub s2_duration: f64,
    /// Region where both pulses are applied
    pub electrode: Region,
}

impl Default for StimulusConfig {
    fn default() -> Self {
        Self {
            s1: StimulusSpec::new(0.0, 1000.0, 2.0, 120.0),
            s1s2_interval: 300.0,
            s2_duration: 2.0,
            electrode: Region::new([0.0, 0.0, 0.0], [0.3, f64::MAX, f64::MAX]),
        }
    }
}

impl StimulusConfig {
    /// The S2 pulse for a given magnitude and S1–S2 interval.
    pub fn s2_spec(&self, magnitude: f64, interval: f64) -> StimulusSpec {
        StimulusSpec::new(
            self.s1.start + interval,
            self.s1.period,
            self.s2_duration,
            magnitude,
        )
    }
}

/// S2 magnitude scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub min_s2: f64,
    pub max_s2: f64,
    pub increment: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            min_s2: 120.0,
            max_s2: 122.0,
            increment: 1.0,
        }
    }
}

/// Output locations and cadences (in steps; `None` disables).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub checkpoint_directory: PathBuf,
    pub sample_every: Option<usize>,
    pub plot_every: Option<usize>,
    pub checkpoint_every: Option<usize>,
    /// Sample point coordinates, one entry per point in each array
    pub sample_x: Vec<f64>,
    pub sample_y: Vec<f64>,
    pub sample_z: Vec<f64>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output"),
            checkpoint_directory: PathBuf::from("checkpoint"),
            sample_every: Some(10),
            plot_every: None,
            checkpoint_every: None,
            sample_x: Vec::new(),
            sample_y: Vec::new(),
            sample_z: Vec::new(),
        }
    }
}

impl OutputConfig {
    /// Sample points zipped from the coordinate arrays. A missing z array
    /// places every point in the z = 0 plane.
    pub fn sample_points(&self) -> Result<Vec<Point>> {
        let n = self.sample_x.len();
        if self.sample_y.len() != n {
            return Err(CardiacError::mismatched("sample_y", n, self.sample_y.len()));
        }
        if !self.sample_z.is_empty() && self.sample_z.len() != n {
            return Err(CardiacError::mismatched("sample_z", n, self.sample_z.len()));
        }
        Ok((0..n)
            .map(|i| {
                let z = self.sample_z.get(i).copied().unwrap_or(0.0);
                [self.sample_x[i], self.sample_y[i], z]
            })
            .collect())
    }
}

impl SimulatorConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| CardiacError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| CardiacError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Switch formulation, using that formulation's default geometry.
    pub fn with_formulation(mut self, formulation: Formulation) -> Self {
        if self.formulation.formulation() != formulation {
            self.formulation = FormulationConfig::default_for(formulation);
        }
        self
    }

    pub fn with_integrator(mut self, integrator: IntegratorKind) -> Self {
        self.time.integrator = integrator;
        self
    }

    pub fn with_timestep(mut self, dt: f64, final_time: f64) -> Self {
        self.time.dt = dt;
        self.time.final_time = final_time;
        self
    }

    pub fn with_substeps(mut self, substeps: usize) -> Self {
        self.time.substeps = substeps;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output.directory = dir.into();
        self
    }

    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Reject inconsistent settings before any work starts.
    pub fn validate(&self) -> Result<()> {
        let t = &self.time;
        if !(t.dt > 0.0) || !(t.final_time > 0.0) {
            return Err(CardiacError::config("dt and final_time must be positive"));
        }
        if t.substeps == 0 {
            return Err(CardiacError::config("substeps must be at least 1"));
        }

        let s = &self.stimulus;
        for (name, spec) in [("S1", &s.s1)] {
            if !(spec.period > 0.0) || spec.duration < 0.0 || spec.start < 0.0 {
                return Err(CardiacError::config(format!(
                    "{name} needs a positive period and non-negative start and duration"
                )));
            }
        }
        if s.s2_duration < 0.0 || s.s1s2_interval < 0.0 {
            return Err(CardiacError::config(
                "S2 duration and S1-S2 interval must be non-negative",
            ));
        }
        // S2 repeats with the S1 period, so its window must close inside it
        let s2_end = s.s1.start + s.s1s2_interval + s.s2_duration;
        if s2_end > s.s1.period {
            return Err(CardiacError::config(format!(
                "S2 window ends at {} ms, after the {} ms stimulus period",
                s2_end, s.s1.period
            )));
        }

        let sw = &self.sweep;
        if !(sw.increment > 0.0) || sw.max_s2 < sw.min_s2 {
            return Err(CardiacError::config(format!(
                "invalid S2 sweep [{}, {}] step {}",
                sw.min_s2, sw.max_s2, sw.increment
            )));
        }

        if self.solver.max_iterations == 0 || !(self.solver.tolerance > 0.0) {
            return Err(CardiacError::config("solver limits must be positive"));
        }
        // Bulk-potential rows of the mixed EMI system have no diagonal
        if self.solver.kind == SolverKind::Iterative
            && self.formulation.formulation() == Formulation::Emi
        {
            return Err(CardiacError::config(
                "the EMI operator is a saddle-point system; use the direct solver",
            ));
        }

        for (name, every) in [
            ("sample_every", self.output.sample_every),
            ("plot_every", self.output.plot_every),
            ("checkpoint_every", self.output.checkpoint_every),
        ] {
            if every == Some(0) {
                return Err(CardiacError::config(format!("{name} must be at least 1")));
            }
        }
        self.output.sample_points()?;

        Ok(())
    }
}
