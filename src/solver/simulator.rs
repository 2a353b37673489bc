//! Operator-splitting time loop.

use crate::cell::{
    integrate_node, CellPopulation, IntegratorKind, IonicModel, PopulationChunk, StimulusProtocol,
};
use crate::checkpoint::CheckpointRecord;
use crate::config::{SimulatorConfig, StimulusConfig};
use crate::error::{CardiacError, Result};
use crate::tissue::{NodeIndicators, Point, TissueModel, TissueSystem};

use super::Partitioning;

/// Simulation time and step counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationClock {
    pub current_time: f64,
    pub dt: f64,
    pub final_time: f64,
    pub step_count: usize,
}

impl SimulationClock {
    pub fn new(dt: f64, final_time: f64) -> Self {
        Self {
            current_time: 0.0,
            dt,
            final_time,
            step_count: 0,
        }
    }

    /// Whether the horizon has been reached. A small fraction of `dt` absorbs
    /// accumulated rounding in `current_time`.
    pub fn is_done(&self) -> bool {
        self.current_time + 1e-6 * self.dt >= self.final_time
    }

    fn advance(&mut self) {
        self.current_time += self.dt;
        self.step_count += 1;
    }

    fn resume_at(&mut self, time: f64) {
        self.current_time = time;
        self.step_count = (time / self.dt).round() as usize;
    }
}

/// Loop state between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    AwaitStep,
    Done,
}

/// Output cadences in steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Schedule {
    pub sample_every: Option<usize>,
    pub plot_every: Option<usize>,
    pub checkpoint_every: Option<usize>,
}

impl Schedule {
    fn due(every: Option<usize>, step: usize) -> bool {
        matches!(every, Some(n) if n > 0 && step % n == 0)
    }

    pub fn sample_due(&self, step: usize) -> bool {
        Self::due(self.sample_every, step)
    }

    pub fn plot_due(&self, step: usize) -> bool {
        Self::due(self.plot_every, step)
    }

    pub fn checkpoint_due(&self, step: usize) -> bool {
        Self::due(self.checkpoint_every, step)
    }
}

/// Committed potential fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldState {
    /// Transmembrane potential per potential DOF
    pub v: Vec<f64>,
    /// Gap-junction potential per gap DOF (empty for bidomain)
    pub w: Vec<f64>,
}

/// Receives the outputs due at a step boundary.
///
/// A failed sample aborts the run. Failed plot dumps and checkpoints are
/// logged and skipped.
pub trait StepObserver {
    fn sample(&mut self, _time: f64, _v: &[f64]) -> Result<()> {
        Ok(())
    }

    fn plot(&mut self, _step: usize, _time: f64, _v: &[f64]) -> Result<()> {
        Ok(())
    }

    fn checkpoint(&mut self, _record: &CheckpointRecord) -> Result<()> {
        Ok(())
    }
}

/// Observer that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl StepObserver for NullObserver {}

/// Summary of a completed run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub steps: usize,
    pub final_time: f64,
    pub s2_magnitude: f64,
    pub s1s2_interval: f64,
    /// Highest potential reached anywhere
    pub peak_potential: f64,
}

/// Read-only inputs of the reaction phase, shared by all partitions.
struct ReactionContext<'a, M> {
    model: &'a M,
    protocol: &'a StimulusProtocol,
    indicators: &'a NodeIndicators,
    v_old: &'a [f64],
    integrator: IntegratorKind,
    time: f64,
    dt: f64,
    substeps: usize,
}

impl<M: IonicModel> ReactionContext<'_, M> {
    fn react(&self, mut chunk: PopulationChunk<'_>, vtilde: &mut [f64]) -> Result<()> {
        let first = chunk.first_dof();
        for (local, out) in vtilde.iter_mut().enumerate() {
            let dof = first + local;
            let v_old = self.v_old[dof];
            if !self.indicators.is_excitable(dof) {
                *out = v_old;
                continue;
            }

            let mut node = chunk.node_mut(local);
            node.states[0] = v_old;
            *out = integrate_node(
                self.model,
                self.integrator,
                self.protocol,
                self.indicators.in_electrode(dof),
                self.time,
                self.dt,
                self.substeps,
                dof,
                &mut node,
            )?;
        }
        Ok(())
    }
}

/// One sweep value's simulation: ionic population, tissue operator and clock.
pub struct Simulator<M: IonicModel> {
    model: M,
    clock: SimulationClock,
    stimulus: StimulusConfig,
    base_consts: Vec<f64>,
    protocol: StimulusProtocol,
    population: CellPopulation,
    indicators: NodeIndicators,
    system: TissueSystem,
    fields: FieldState,
    vtilde: Vec<f64>,
    partitioning: Partitioning,
    integrator: IntegratorKind,
    substeps: usize,
    schedule: Schedule,
    s2_magnitude: f64,
    s1s2_interval: f64,
    /// Step restored from a checkpoint; its checkpoint is not rewritten
    resumed_at: Option<usize>,
}

impl<M: IonicModel> Simulator<M> {
    /// Build the tissue described by `config` and set up a run for one S2
    /// magnitude.
    pub fn from_config(model: M, config: &SimulatorConfig, s2_magnitude: f64) -> Result<Self> {
        let tissue = config.formulation.build()?;
        Self::with_tissue(model, tissue, config, s2_magnitude)
    }

    /// Set up a run on an already constructed tissue model.
    pub fn with_tissue(
        model: M,
        tissue: Box<dyn TissueModel>,
        config: &SimulatorConfig,
        s2_magnitude: f64,
    ) -> Result<Self> {
        config.validate()?;

        let time = &config.time;
        let system = TissueSystem::assemble(tissue, time.dt, &config.solver)?;
        let sites = system.model().potential_sites();
        let indicators = NodeIndicators::project(
            sites,
            config.excitable_region.as_ref(),
            &config.stimulus.electrode,
        );
        let num_dofs = sites.len();
        let num_gap = system.model().gap_sites().len();

        let (population, base_consts) = CellPopulation::new(&model, num_dofs);
        let s1s2_interval = config.stimulus.s1s2_interval;
        let protocol = StimulusProtocol::new::<M>(
            &base_consts,
            config.stimulus.s1,
            config.stimulus.s2_spec(s2_magnitude, s1s2_interval),
        );
        let fields = FieldState {
            v: population.state_field(0),
            w: vec![0.0; num_gap],
        };

        let partitioning = Partitioning::new(num_dofs, config.threads);
        log::info!(
            "{:?} tissue: {} potential dofs ({} excitable, {} under the electrode), {} unknowns, {} partition(s)",
            system.formulation(),
            num_dofs,
            indicators.num_excitable(),
            indicators.num_in_electrode(),
            system.num_unknowns(),
            partitioning.num_parts()
        );

        Ok(Self {
            model,
            clock: SimulationClock::new(time.dt, time.final_time),
            stimulus: config.stimulus.clone(),
            base_consts,
            protocol,
            population,
            indicators,
            system,
            fields,
            vtilde: vec![0.0; num_dofs],
            partitioning,
            integrator: time.integrator,
            substeps: time.substeps,
            schedule: Schedule {
                sample_every: config.output.sample_every,
                plot_every: config.output.plot_every,
                checkpoint_every: config.output.checkpoint_every,
            },
            s2_magnitude,
            s1s2_interval,
            resumed_at: None,
        })
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn state(&self) -> RunState {
        if self.clock.is_done() {
            RunState::Done
        } else {
            RunState::AwaitStep
        }
    }

    pub fn fields(&self) -> &FieldState {
        &self.fields
    }

    pub fn population(&self) -> &CellPopulation {
        &self.population
    }

    pub fn indicators(&self) -> &NodeIndicators {
        &self.indicators
    }

    pub fn protocol(&self) -> &StimulusProtocol {
        &self.protocol
    }

    pub fn potential_sites(&self) -> &[Point] {
        self.system.model().potential_sites()
    }

    pub fn s2_magnitude(&self) -> f64 {
        self.s2_magnitude
    }

    pub fn s1s2_interval(&self) -> f64 {
        self.s1s2_interval
    }

    pub fn set_schedule(&mut self, schedule: Schedule) {
        self.schedule = schedule;
    }

    /// Names of the gating states, in checkpoint order.
    pub fn gate_names() -> &'static [&'static str] {
        M::STATE_NAMES.get(1..).unwrap_or(&[])
    }

    /// Whether the formulation carries a gap potential.
    pub fn has_gap_potential(&self) -> bool {
        self.system.formulation().has_gap_potential()
    }

    /// Gather the current state into a checkpoint record.
    pub fn checkpoint_record(&self) -> CheckpointRecord {
        let gates = Self::gate_names()
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), self.population.state_field(i + 1)))
            .collect();

        CheckpointRecord {
            current_time: self.clock.current_time,
            s2_magnitude: self.s2_magnitude,
            s1s2_interval: self.s1s2_interval,
            v: self.fields.v.clone(),
            w: self.has_gap_potential().then(|| self.fields.w.clone()),
            gates,
        }
    }

    /// Resume from a checkpoint. The record's S2 magnitude and interval
    /// replace the values this run was created with.
    pub fn restore(&mut self, record: &CheckpointRecord) -> Result<()> {
        let n = self.fields.v.len();
        if record.v.len() != n {
            return Err(CardiacError::mismatched("checkpoint V", n, record.v.len()));
        }
        match (&record.w, self.has_gap_potential()) {
            (Some(w), true) if w.len() != self.fields.w.len() => {
                return Err(CardiacError::mismatched(
                    "checkpoint W",
                    self.fields.w.len(),
                    w.len(),
                ));
            }
            (None, true) => {
                return Err(CardiacError::mismatched("checkpoint W", self.fields.w.len(), 0));
            }
            _ => {}
        }

        let mut gates = Vec::with_capacity(Self::gate_names().len());
        for name in Self::gate_names() {
            let values = record
                .gate(name)
                .ok_or_else(|| CardiacError::mismatched(format!("checkpoint gate {name}"), n, 0))?;
            if values.len() != n {
                return Err(CardiacError::mismatched(
                    format!("checkpoint gate {name}"),
                    n,
                    values.len(),
                ));
            }
            gates.push(values);
        }

        for (i, values) in gates.into_iter().enumerate() {
            self.population.set_state_field(i + 1, values);
        }
        self.population.set_state_field(0, &record.v);
        self.fields.v.copy_from_slice(&record.v);
        if let (Some(w), true) = (&record.w, self.has_gap_potential()) {
            self.fields.w.copy_from_slice(w);
        }

        self.s2_magnitude = record.s2_magnitude;
        self.s1s2_interval = record.s1s2_interval;
        self.protocol = StimulusProtocol::new::<M>(
            &self.base_consts,
            self.stimulus.s1,
            self.stimulus.s2_spec(self.s2_magnitude, self.s1s2_interval),
        );
        self.clock.resume_at(record.current_time);
        self.resumed_at = Some(self.clock.step_count);

        log::info!(
            "resumed at t = {} ms (step {}), S2 = {}, S1-S2 interval = {} ms",
            record.current_time,
            self.clock.step_count,
            self.s2_magnitude,
            self.s1s2_interval
        );
        Ok(())
    }

    /// Emit the outputs due at the current step from the committed fields.
    ///
    /// Nothing is emitted at the step a run resumed from: the run that wrote
    /// the checkpoint already sampled and plotted that step.
    fn snapshot(&mut self, observer: &mut dyn StepObserver) -> Result<()> {
        let step = self.clock.step_count;
        let time = self.clock.current_time;
        if self.resumed_at == Some(step) {
            return Ok(());
        }

        if self.schedule.sample_due(step) {
            observer.sample(time, &self.fields.v)?;
        }
        if self.schedule.plot_due(step) {
            if let Err(e) = observer.plot(step, time, &self.fields.v) {
                log::warn!("skipping plot dump at step {}: {}", step, e);
            }
        }
        if self.schedule.checkpoint_due(step) {
            if let Err(e) = observer.checkpoint(&self.checkpoint_record()) {
                log::warn!("skipping checkpoint at step {}: {}", step, e);
            }
        }
        Ok(())
    }

    /// Reaction phase: sub-step every excitable node into `vtilde`.
    fn react(&mut self) -> Result<()> {
        let ctx = ReactionContext {
            model: &self.model,
            protocol: &self.protocol,
            indicators: &self.indicators,
            v_old: &self.fields.v,
            integrator: self.integrator,
            time: self.clock.current_time,
            dt: self.clock.dt,
            substeps: self.substeps,
        };
        let chunks = self.population.split_mut(self.partitioning.ends());
        let outputs = self.partitioning.split_mut(&mut self.vtilde);

        if chunks.len() == 1 {
            for (chunk, out) in chunks.into_iter().zip(outputs) {
                ctx.react(chunk, out)?;
            }
            return Ok(());
        }

        let ctx = &ctx;
        let results: Vec<Result<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = chunks
                .into_iter()
                .zip(outputs)
                .map(|(chunk, out)| scope.spawn(move || ctx.react(chunk, out)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        });

        // Lowest partition's error first
        results.into_iter().collect()
    }

    /// Advance one timestep. Returns the loop state after the step.
    pub fn step(&mut self, observer: &mut dyn StepObserver) -> Result<RunState> {
        if self.clock.is_done() {
            return Ok(RunState::Done);
        }

        self.snapshot(observer)?;
        self.react()?;

        let step = self.clock.step_count;
        self.system
            .diffuse(step, &self.vtilde, &mut self.fields.v, &mut self.fields.w)?;

        let t_new = self.clock.current_time + self.clock.dt;
        for (name, field) in [("V", &self.fields.v), ("W", &self.fields.w)] {
            if let Some((dof, &value)) = field.iter().enumerate().find(|(_, x)| !x.is_finite()) {
                return Err(CardiacError::divergence(t_new, dof, name, value));
            }
        }

        self.clock.advance();
        Ok(self.state())
    }

    /// Run to the final time. Outputs due at the final step are emitted
    /// after the last step.
    pub fn run(&mut self, observer: &mut dyn StepObserver) -> Result<RunSummary> {
        let start_step = self.clock.step_count;
        let mut peak = self.fields.v.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        while self.step(observer)? == RunState::AwaitStep {
            peak = self.fields.v.iter().copied().fold(peak, f64::max);
        }
        peak = self.fields.v.iter().copied().fold(peak, f64::max);
        self.snapshot(observer)?;

        let summary = RunSummary {
            steps: self.clock.step_count - start_step,
            final_time: self.clock.current_time,
            s2_magnitude: self.s2_magnitude,
            s1s2_interval: self.s1s2_interval,
            peak_potential: peak,
        };
        log::info!(
            "S2 = {}: {} steps to t = {:.3} ms, peak V = {:.2} mV",
            summary.s2_magnitude,
            summary.steps,
            summary.final_time,
            summary.peak_potential
        );
        Ok(summary)
    }
}
