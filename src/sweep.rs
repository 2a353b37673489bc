//! S2 magnitude sweep.
//!
//! Each magnitude gets its own [`Simulator`]: fresh clock, fields and tissue
//! operator. A failure that only concerns one run (divergence, a singular
//! or non-converging operator, output I/O) is recorded and the sweep moves
//! on. Anything else stops the sweep.

use crate::cell::IonicModel;
use crate::checkpoint::CheckpointStore;
use crate::config::{SimulatorConfig, SweepConfig};
use crate::error::Result;
use crate::solver::{RunSummary, Simulator, StepObserver};

/// The magnitudes of a sweep, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    values: Vec<f64>,
}

impl SweepPlan {
    /// `min + k * increment` for every `k` that stays within `max`.
    pub fn new(min: f64, max: f64, increment: f64) -> Self {
        let count = ((max - min) / increment + 1e-9).floor() as usize + 1;
        Self {
            values: (0..count).map(|k| min + k as f64 * increment).collect(),
        }
    }

    pub fn from_config(sweep: &SweepConfig) -> Self {
        Self::new(sweep.min_s2, sweep.max_s2, sweep.increment)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Result of one sweep value.
#[derive(Debug)]
pub struct SweepOutcome {
    /// Magnitude the run was scheduled with
    pub nominal_s2: f64,
    /// Magnitude the run actually used (differs after a restart)
    pub s2_magnitude: f64,
    pub s1s2_interval: f64,
    /// Time the run started from
    pub start_time: f64,
    pub result: Result<RunSummary>,
}

impl SweepOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run every magnitude of the sweep.
///
/// `make_model` supplies a fresh ionic model per run. `make_observer` is
/// called with the run's simulator and whether it resumed from a checkpoint.
/// A restart requested in `config` applies to the first run only.
pub fn run_sweep<M, F, O>(
    config: &SimulatorConfig,
    mut make_model: F,
    mut make_observer: O,
) -> Result<Vec<SweepOutcome>>
where
    M: IonicModel,
    F: FnMut() -> M,
    O: FnMut(&Simulator<M>, bool) -> Result<Box<dyn StepObserver>>,
{
    config.validate()?;
    let plan = SweepPlan::from_config(&config.sweep);
    log::info!("S2 sweep over {} values: {:?}", plan.len(), plan.values());

    let mut restart = config.restart;
    let mut outcomes = Vec::with_capacity(plan.len());

    for &nominal in plan.values() {
        let resumed = std::mem::take(&mut restart);
        let mut sim = match Simulator::from_config(make_model(), config, nominal) {
            Ok(sim) => sim,
            Err(e) if e.is_sweep_local() => {
                log::error!("S2 = {} could not be set up: {}", nominal, e);
                outcomes.push(SweepOutcome {
                    nominal_s2: nominal,
                    s2_magnitude: nominal,
                    s1s2_interval: config.stimulus.s1s2_interval,
                    start_time: 0.0,
                    result: Err(e),
                });
                continue;
            }
            Err(e) => return Err(e),
        };

        if resumed {
            let store = CheckpointStore::new(&config.output.checkpoint_directory);
            let record = store.load(Simulator::<M>::gate_names(), sim.has_gap_potential())?;
            sim.restore(&record)?;
        }

        let start_time = sim.clock().current_time;
        let result =
            make_observer(&sim, resumed).and_then(|mut observer| sim.run(observer.as_mut()));

        let result = match result {
            Err(e) if !e.is_sweep_local() => return Err(e),
            Err(e) => {
                log::error!("S2 = {} aborted: {}", sim.s2_magnitude(), e);
                Err(e)
            }
            ok => ok,
        };

        outcomes.push(SweepOutcome {
            nominal_s2: nominal,
            s2_magnitude: sim.s2_magnitude(),
            s1s2_interval: sim.s1s2_interval(),
            start_time,
            result,
        });
    }

    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    if failed > 0 {
        log::warn!("{} of {} sweep values failed", failed, outcomes.len());
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_includes_both_ends() {
        let plan = SweepPlan::new(120.0, 122.0, 1.0);
        assert_eq!(plan.values(), &[120.0, 121.0, 122.0]);
    }

    #[test]
    fn test_plan_tolerates_rounding() {
        let plan = SweepPlan::new(0.1, 0.3, 0.1);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_plan_single_value() {
        let plan = SweepPlan::new(50.0, 50.0, 5.0);
        assert_eq!(plan.values(), &[50.0]);

        let plan = SweepPlan::new(50.0, 54.0, 5.0);
        assert_eq!(plan.values(), &[50.0]);
    }
}
