//! Ionic cell models and their per-node integration.
//!
//! An ionic model is a small ODE system evaluated independently at every
//! excitable degree of freedom. The model itself is a pure function of its
//! constant, state and rate arrays, described by the [`IonicModel`] trait.
//!
//! Per-node storage lives in [`CellPopulation`]: three flat arenas
//! (`num_dofs * NUM_STATES`, `num_dofs * NUM_RATES`, `num_dofs * NUM_ALGEBRAIC`)
//! so that the hot reaction loop never allocates.

mod gray_pathmanathan;
mod integrator;
mod stimulus;

pub use gray_pathmanathan::GrayPathmanathan;
pub use integrator::{advance_substep, integrate_node, IntegratorKind, NodeState};
pub use stimulus::{is_active, StimulusKind, StimulusProtocol, StimulusSpec};

/// Indices of the stimulus constants inside a model's constant vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StimulusConstants {
    pub start: usize,
    pub period: usize,
    pub duration: usize,
    pub amplitude: usize,
}

/// Gating kinetics `dx/dt = (x_inf - x) / tau` at the current state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateKinetics {
    pub x_inf: f64,
    pub tau: f64,
}

/// A fixed-shape ionic cell model.
///
/// `states[0]` is always the transmembrane potential; the remaining states
/// are gating variables.
pub trait IonicModel: Send + Sync {
    const NUM_STATES: usize;
    const NUM_RATES: usize;
    const NUM_ALGEBRAIC: usize;
    const NUM_CONSTS: usize;

    /// Where the built-in periodic stimulus reads its parameters.
    const STIMULUS: StimulusConstants;

    /// Human-readable state names, `STATE_NAMES[0]` being the potential.
    const STATE_NAMES: &'static [&'static str];

    /// Fill default constants and initial states.
    fn init_consts(&self, consts: &mut [f64], rates: &mut [f64], states: &mut [f64]);

    /// Evaluate rates and the algebraic variables they depend on.
    fn compute_rates(
        &self,
        t: f64,
        consts: &[f64],
        rates: &mut [f64],
        states: &[f64],
        algebraic: &mut [f64],
    );

    /// Evaluate algebraic variables only.
    fn compute_variables(
        &self,
        t: f64,
        consts: &[f64],
        rates: &[f64],
        states: &[f64],
        algebraic: &mut [f64],
    );

    /// Linear kinetics of gating state `index`, read from freshly computed
    /// algebraic variables. `None` for non-gating states.
    fn gate_kinetics(&self, index: usize, consts: &[f64], algebraic: &[f64]) -> Option<GateKinetics>;
}

/// Per-node ionic storage for every potential degree of freedom.
#[derive(Debug, Clone)]
pub struct CellPopulation {
    num_dofs: usize,
    num_states: usize,
    num_rates: usize,
    num_algebraic: usize,
    states: Vec<f64>,
    rates: Vec<f64>,
    algebraic: Vec<f64>,
}

impl CellPopulation {
    /// Allocate storage for `num_dofs` nodes, each initialised by the model.
    ///
    /// Returns the population together with the model's default constants.
    pub fn new<M: IonicModel>(model: &M, num_dofs: usize) -> (Self, Vec<f64>) {
        let mut consts = vec![0.0; M::NUM_CONSTS];
        let mut rates = vec![0.0; M::NUM_RATES];
        let mut states = vec![0.0; M::NUM_STATES];
        model.init_consts(&mut consts, &mut rates, &mut states);

        let mut population = Self {
            num_dofs,
            num_states: M::NUM_STATES,
            num_rates: M::NUM_RATES,
            num_algebraic: M::NUM_ALGEBRAIC,
            states: Vec::with_capacity(num_dofs * M::NUM_STATES),
            rates: Vec::with_capacity(num_dofs * M::NUM_RATES),
            algebraic: vec![0.0; num_dofs * M::NUM_ALGEBRAIC],
        };
        for _ in 0..num_dofs {
            population.states.extend_from_slice(&states);
            population.rates.extend_from_slice(&rates);
        }

        (population, consts)
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    /// State vector of one node.
    pub fn states(&self, dof: usize) -> &[f64] {
        &self.states[dof * self.num_states..(dof + 1) * self.num_states]
    }

    /// Algebraic vector of one node.
    pub fn algebraic(&self, dof: usize) -> &[f64] {
        &self.algebraic[dof * self.num_algebraic..(dof + 1) * self.num_algebraic]
    }

    /// Mutable view of one node's storage.
    pub fn node_mut(&mut self, dof: usize) -> NodeState<'_> {
        NodeState {
            states: &mut self.states[dof * self.num_states..(dof + 1) * self.num_states],
            rates: &mut self.rates[dof * self.num_rates..(dof + 1) * self.num_rates],
            algebraic: &mut self.algebraic
                [dof * self.num_algebraic..(dof + 1) * self.num_algebraic],
        }
    }

    /// Split the population into disjoint mutable chunks at the given DOF
    /// boundaries (ascending, ending at `num_dofs`).
    pub fn split_mut(&mut self, ends: &[usize]) -> Vec<PopulationChunk<'_>> {
        let mut chunks = Vec::with_capacity(ends.len());
        let mut states = self.states.as_mut_slice();
        let mut rates = self.rates.as_mut_slice();
        let mut algebraic = self.algebraic.as_mut_slice();
        let mut start = 0;

        for &end in ends {
            let count = end - start;
            let (s, s_rest) = states.split_at_mut(count * self.num_states);
            let (r, r_rest) = rates.split_at_mut(count * self.num_rates);
            let (a, a_rest) = algebraic.split_at_mut(count * self.num_algebraic);
            chunks.push(PopulationChunk {
                first_dof: start,
                num_states: self.num_states,
                num_rates: self.num_rates,
                num_algebraic: self.num_algebraic,
                states: s,
                rates: r,
                algebraic: a,
            });
            states = s_rest;
            rates = r_rest;
            algebraic = a_rest;
            start = end;
        }

        chunks
    }

    /// Gather one state variable across all nodes.
    pub fn state_field(&self, index: usize) -> Vec<f64> {
        self.states
            .chunks_exact(self.num_states)
            .map(|s| s[index])
            .collect()
    }

    /// Scatter a field into one state variable of all nodes.
    pub fn set_state_field(&mut self, index: usize, values: &[f64]) {
        for (s, &v) in self.states.chunks_exact_mut(self.num_states).zip(values) {
            s[index] = v;
        }
    }
}

/// A contiguous, exclusively borrowed range of nodes.
pub struct PopulationChunk<'a> {
    first_dof: usize,
    num_states: usize,
    num_rates: usize,
    num_algebraic: usize,
    states: &'a mut [f64],
    rates: &'a mut [f64],
    algebraic: &'a mut [f64],
}

impl<'a> PopulationChunk<'a> {
    /// Global index of the first node in this chunk.
    pub fn first_dof(&self) -> usize {
        self.first_dof
    }

    /// Number of nodes in this chunk.
    pub fn len(&self) -> usize {
        self.states.len() / self.num_states
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Mutable view of the node with local index `local`.
    pub fn node_mut(&mut self, local: usize) -> NodeState<'_> {
        NodeState {
            states: &mut self.states[local * self.num_states..(local + 1) * self.num_states],
            rates: &mut self.rates[local * self.num_rates..(local + 1) * self.num_rates],
            algebraic: &mut self.algebraic
                [local * self.num_algebraic..(local + 1) * self.num_algebraic],
        }
    }
}
