//! Magnitude sweeps and checkpoint/restart.

use std::fs;

use cardiac_core::checkpoint::CheckpointStore;
use cardiac_core::output::{run_directory, FileOutputs, SAMPLE_FILE};
use cardiac_core::solver::{NullObserver, StepObserver};
use cardiac_core::tissue::{BidomainParams, FormulationConfig, GridSpec, Region};
use cardiac_core::cell::{GateKinetics, StimulusConstants};
use cardiac_core::{
    run_sweep, CardiacError, GrayPathmanathan, IonicModel, Simulator, SimulatorConfig,
};

fn strip(dir: &std::path::Path) -> SimulatorConfig {
    let mut config = SimulatorConfig::default().with_timestep(0.01, 1.0);
    config.formulation = FormulationConfig::Bidomain {
        grid: GridSpec::new(5, 2, 1, 0.1),
        params: BidomainParams::default(),
    };
    config.stimulus.s1.start = 0.0;
    config.stimulus.electrode = Region::new([0.0; 3], [0.1, 1.0, 1.0]);
    config.stimulus.s1s2_interval = 0.5;
    config.stimulus.s2_duration = 0.2;
    config.output.directory = dir.join("out");
    config.output.checkpoint_directory = dir.join("checkpoint");
    config.output.sample_every = Some(25);
    config.output.sample_x = vec![0.05, 0.45];
    config.output.sample_y = vec![0.05, 0.05];
    config
}

#[test]
fn test_sweep_runs_each_magnitude_from_zero() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = strip(dir.path()).with_timestep(0.01, 0.2);
    config.sweep.min_s2 = 120.0;
    config.sweep.max_s2 = 122.0;
    config.sweep.increment = 1.0;

    let mut applied = Vec::new();
    let outcomes = run_sweep(
        &config,
        || GrayPathmanathan,
        |sim, resumed| {
            assert!(!resumed);
            applied.push(sim.protocol().s2().magnitude);
            Ok(Box::new(NullObserver) as Box<dyn StepObserver>)
        },
    )
    .unwrap();

    assert_eq!(outcomes.len(), 3);
    for (k, outcome) in outcomes.iter().enumerate() {
        let expected = 120.0 + k as f64;
        assert_eq!(outcome.start_time, 0.0);
        assert_eq!(outcome.nominal_s2, expected);
        assert_eq!(outcome.s2_magnitude, expected);
        assert_eq!(outcome.result.as_ref().unwrap().steps, 20);
    }
    assert_eq!(applied, vec![120.0, 121.0, 122.0]);
}

#[test]
fn test_sweep_writes_sample_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = strip(dir.path()).with_timestep(0.01, 0.5);
    config.sweep.min_s2 = 10.0;
    config.sweep.max_s2 = 20.0;
    config.sweep.increment = 10.0;

    let outcomes = run_sweep(
        &config,
        || GrayPathmanathan,
        |sim, resumed| {
            let outputs = FileOutputs::for_run(
                &config,
                sim.s2_magnitude(),
                sim.potential_sites(),
                resumed,
            )?;
            Ok(Box::new(outputs) as Box<dyn StepObserver>)
        },
    )
    .unwrap();
    assert!(outcomes.iter().all(|o| o.is_ok()));

    for s2 in [10.0, 20.0] {
        let path = run_directory(&config.output.directory, s2).join(SAMPLE_FILE);
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "time,V(0.05;0.05;0),V(0.45;0.05;0)");
        // Steps 0, 25 and the final step 50
        assert_eq!(lines.len(), 4);
    }
}

#[test]
fn test_restart_is_bit_identical() {
    let dir = tempfile::tempdir().unwrap();
    let mut first_leg = strip(dir.path()).with_timestep(0.01, 1.0);
    first_leg.output.checkpoint_every = Some(100);
    let full = first_leg.clone().with_timestep(0.01, 1.5);
    let points = first_leg.output.sample_points().unwrap();

    // 100 steps, checkpoint written at the final step
    let store = CheckpointStore::new(&first_leg.output.checkpoint_directory);
    let mut a = Simulator::from_config(GrayPathmanathan, &first_leg, 121.0).unwrap();
    let sites = a.potential_sites().to_vec();
    let checkpoints = Some(store.clone());
    let mut outputs =
        FileOutputs::create(dir.path().join("a"), &sites, &points, checkpoints, false).unwrap();
    assert_eq!(a.run(&mut outputs).unwrap().steps, 100);
    assert!(store.exists());
    drop(outputs);

    // Resume for 50 more, appending to the same trace
    let mut b = Simulator::from_config(GrayPathmanathan, &full, 0.0).unwrap();
    let record = store
        .load(Simulator::<GrayPathmanathan>::gate_names(), false)
        .unwrap();
    b.restore(&record).unwrap();
    assert_eq!(b.clock().step_count, 100);
    assert_eq!(b.s2_magnitude(), 121.0);
    let mut outputs = FileOutputs::create(dir.path().join("a"), &sites, &points, None, true).unwrap();
    assert_eq!(b.run(&mut outputs).unwrap().steps, 50);
    drop(outputs);

    // Uninterrupted 150 steps
    let mut c = Simulator::from_config(GrayPathmanathan, &full, 121.0).unwrap();
    let mut outputs = FileOutputs::create(dir.path().join("c"), &sites, &points, None, false).unwrap();
    assert_eq!(c.run(&mut outputs).unwrap().steps, 150);
    drop(outputs);

    assert_eq!(b.clock().current_time, c.clock().current_time);
    assert_eq!(b.fields(), c.fields());
    for dof in 0..c.fields().v.len() {
        assert_eq!(b.population().states(dof), c.population().states(dof));
    }

    // Steps 0, 25, ..., 150 once each, identical to the uninterrupted trace
    let resumed = fs::read_to_string(dir.path().join("a").join(SAMPLE_FILE)).unwrap();
    let straight = fs::read_to_string(dir.path().join("c").join(SAMPLE_FILE)).unwrap();
    assert_eq!(resumed.lines().count(), 1 + 7);
    assert_eq!(resumed, straight);
}

#[test]
fn test_sweep_restart_applies_to_first_value_only() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = strip(dir.path()).with_timestep(0.01, 0.3);
    config.output.checkpoint_every = Some(30);

    // Leave a checkpoint at t = 0.3 with a different S2 setting
    let mut seed = config.clone();
    seed.stimulus.s1s2_interval = 0.25;
    let mut sim = Simulator::from_config(GrayPathmanathan, &seed, 99.0).unwrap();
    let store = CheckpointStore::new(&config.output.checkpoint_directory);
    let sites = sim.potential_sites().to_vec();
    let mut outputs =
        FileOutputs::create(dir.path().join("seed"), &sites, &[], Some(store), false).unwrap();
    sim.run(&mut outputs).unwrap();

    let mut config = config.with_timestep(0.01, 0.6).with_restart(true);
    config.sweep.min_s2 = 120.0;
    config.sweep.max_s2 = 121.0;
    config.sweep.increment = 1.0;

    let mut resumes = Vec::new();
    let outcomes = run_sweep(
        &config,
        || GrayPathmanathan,
        |_, resumed| {
            resumes.push(resumed);
            Ok(Box::new(NullObserver) as Box<dyn StepObserver>)
        },
    )
    .unwrap();

    assert_eq!(resumes, vec![true, false]);

    let first = &outcomes[0];
    assert_eq!(first.nominal_s2, 120.0);
    assert_eq!(first.s2_magnitude, 99.0);
    assert_eq!(first.s1s2_interval, 0.25);
    assert!((first.start_time - 0.3).abs() < 1e-12);
    assert_eq!(first.result.as_ref().unwrap().steps, 30);

    let second = &outcomes[1];
    assert_eq!(second.s2_magnitude, 121.0);
    assert_eq!(second.s1s2_interval, 0.5);
    assert_eq!(second.start_time, 0.0);
    assert_eq!(second.result.as_ref().unwrap().steps, 60);
}

#[test]
fn test_singular_operator_fails_each_value_only() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = strip(dir.path());
    // Membrane mass of a 1 nm voxel is far below the pivot tolerance
    config.formulation = FormulationConfig::Bidomain {
        grid: GridSpec::new(1, 1, 1, 1e-6),
        params: BidomainParams::default(),
    };
    config.output.sample_x.clear();
    config.output.sample_y.clear();

    let mut observers = 0;
    let outcomes = run_sweep(
        &config,
        || GrayPathmanathan,
        |_, _| {
            observers += 1;
            Ok(Box::new(NullObserver) as Box<dyn StepObserver>)
        },
    )
    .unwrap();

    assert_eq!(observers, 0);
    assert_eq!(outcomes.len(), 3);
    for (k, outcome) in outcomes.iter().enumerate() {
        assert_eq!(outcome.nominal_s2, 120.0 + k as f64);
        assert_eq!(outcome.start_time, 0.0);
        assert!(matches!(
            outcome.result,
            Err(CardiacError::SingularMatrix { row: 0 })
        ));
    }
}

#[test]
fn test_missing_checkpoint_aborts_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let config = strip(dir.path()).with_restart(true);
    let result = run_sweep(
        &config,
        || GrayPathmanathan,
        |_, _| Ok(Box::new(NullObserver) as Box<dyn StepObserver>),
    );
    assert!(matches!(result, Err(CardiacError::FileRead { .. })));
}

/// Gray–Pathmanathan cell whose potential turns to NaN while stimulated.
struct Brittle {
    breaks: bool,
}

impl IonicModel for Brittle {
    const NUM_STATES: usize = GrayPathmanathan::NUM_STATES;
    const NUM_RATES: usize = GrayPathmanathan::NUM_RATES;
    const NUM_ALGEBRAIC: usize = GrayPathmanathan::NUM_ALGEBRAIC;
    const NUM_CONSTS: usize = GrayPathmanathan::NUM_CONSTS;
    const STIMULUS: StimulusConstants = GrayPathmanathan::STIMULUS;
    const STATE_NAMES: &'static [&'static str] = GrayPathmanathan::STATE_NAMES;

    fn init_consts(&self, consts: &mut [f64], rates: &mut [f64], states: &mut [f64]) {
        GrayPathmanathan.init_consts(consts, rates, states);
    }

    fn compute_rates(&self, t: f64, c: &[f64], rates: &mut [f64], s: &[f64], a: &mut [f64]) {
        GrayPathmanathan.compute_rates(t, c, rates, s, a);
        if self.breaks && c[Self::STIMULUS.amplitude] != 0.0 {
            rates[0] = f64::NAN;
        }
    }

    fn compute_variables(&self, t: f64, c: &[f64], r: &[f64], s: &[f64], a: &mut [f64]) {
        GrayPathmanathan.compute_variables(t, c, r, s, a);
    }

    fn gate_kinetics(&self, index: usize, c: &[f64], a: &[f64]) -> Option<GateKinetics> {
        GrayPathmanathan.gate_kinetics(index, c, a)
    }
}

#[test]
fn test_divergence_is_local_to_sweep_value() {
    let dir = tempfile::tempdir().unwrap();
    let config = strip(dir.path()).with_timestep(0.01, 0.2);

    // Only the second sweep value gets a cell that blows up under S1
    let mut built = 0;
    let outcomes = run_sweep(
        &config,
        || {
            built += 1;
            Brittle { breaks: built == 2 }
        },
        |_, _| Ok(Box::new(NullObserver) as Box<dyn StepObserver>),
    )
    .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].is_ok());
    match &outcomes[1].result {
        Err(CardiacError::NumericalDivergence { variable, time, .. }) => {
            assert_eq!(variable, "V");
            assert!((time - 0.01).abs() < 1e-12);
        }
        other => panic!("expected divergence, got {other:?}"),
    }
    assert_eq!(outcomes[2].s2_magnitude, 122.0);
    assert_eq!(outcomes[2].result.as_ref().unwrap().steps, 20);
}
