//! Gray & Pathmanathan (2016) minimal cardiac action potential model.
//!
//! Three states (V, m, h), a fast sodium current with Hodgkin–Huxley style
//! gating and a rectifying potassium current. Units: mV, ms, uA/mm^2.

use super::{GateKinetics, IonicModel, StimulusConstants};

// Constant indices
const G_NA: usize = 0;
const E_NA: usize = 1;
const E_K: usize = 2;
const E_H: usize = 3;
const E_M: usize = 4;
const K_M: usize = 5;
const K_R: usize = 6;
const K_H: usize = 7;
const TAU_M: usize = 8;
const TAU_HO: usize = 9;
const DELTA_H: usize = 10;
const G_K: usize = 11;
const C_M: usize = 12;
const STIM_START: usize = 13;
const STIM_PERIOD: usize = 14;
const STIM_DURATION: usize = 15;
const STIM_AMPLITUDE: usize = 16;

// State indices
const V: usize = 0;
const M: usize = 1;
const H: usize = 2;

// Algebraic indices
const M_INF: usize = 0;
const H_INF: usize = 1;
const TAU_H: usize = 2;
const I_NA: usize = 3;
const I_K: usize = 4;
const I_TOT: usize = 5;
const I_STIM: usize = 6;

/// The Gray–Pathmanathan model. Stateless; all data lives in the arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrayPathmanathan;

impl GrayPathmanathan {
    fn m_inf(consts: &[f64], v: f64) -> f64 {
        1.0 / (1.0 + ((v - consts[E_M]) / consts[K_M]).exp())
    }

    fn h_inf(consts: &[f64], v: f64) -> f64 {
        1.0 / (1.0 + ((v - consts[E_H]) / consts[K_H]).exp())
    }

    fn tau_h(consts: &[f64], v: f64) -> f64 {
        let x = (v - consts[E_H]) / consts[K_H];
        2.0 * consts[TAU_HO] * (consts[DELTA_H] * x).exp() / (1.0 + x.exp())
    }

    /// Periodic stimulus current; negative while the window is open.
    fn i_stim(t: f64, consts: &[f64]) -> f64 {
        let period = consts[STIM_PERIOD];
        let phase = t - (t / period).floor() * period;
        if phase >= consts[STIM_START] && phase <= consts[STIM_START] + consts[STIM_DURATION] {
            -consts[STIM_AMPLITUDE]
        } else {
            0.0
        }
    }

    fn fill_algebraic(t: f64, consts: &[f64], states: &[f64], algebraic: &mut [f64]) {
        let v = states[V];
        algebraic[M_INF] = Self::m_inf(consts, v);
        algebraic[H_INF] = Self::h_inf(consts, v);
        algebraic[TAU_H] = Self::tau_h(consts, v);
        algebraic[I_NA] = consts[G_NA] * states[M].powi(3) * states[H] * (v - consts[E_NA]);
        algebraic[I_K] =
            consts[G_K] * (v - consts[E_K]) * (-(v - consts[E_K]) / consts[K_R]).exp();
        algebraic[I_TOT] = algebraic[I_NA] + algebraic[I_K];
        algebraic[I_STIM] = Self::i_stim(t, consts);
    }
}

impl IonicModel for GrayPathmanathan {
    const NUM_STATES: usize = 3;
    const NUM_RATES: usize = 3;
    const NUM_ALGEBRAIC: usize = 7;
    const NUM_CONSTS: usize = 17;

    const STIMULUS: StimulusConstants = StimulusConstants {
        start: STIM_START,
        period: STIM_PERIOD,
        duration: STIM_DURATION,
        amplitude: STIM_AMPLITUDE,
    };

    const STATE_NAMES: &'static [&'static str] = &["V", "m", "h"];

    fn init_consts(&self, consts: &mut [f64], _rates: &mut [f64], states: &mut [f64]) {
        consts[G_NA] = 0.11;
        consts[E_NA] = 65.0;
        consts[E_K] = -83.0;
        consts[E_H] = -74.7;
        consts[E_M] = -41.0;
        consts[K_M] = -4.0;
        consts[K_R] = 21.28;
        consts[K_H] = 4.4;
        consts[TAU_M] = 0.12;
        consts[TAU_HO] = 6.80738;
        consts[DELTA_H] = 0.799163;
        consts[G_K] = 0.003;
        consts[C_M] = 0.01;
        consts[STIM_START] = 10.0;
        consts[STIM_PERIOD] = 1000.0;
        consts[STIM_DURATION] = 1.0;
        consts[STIM_AMPLITUDE] = 80.0;

        states[V] = -83.0;
        states[M] = Self::m_inf(consts, states[V]);
        states[H] = Self::h_inf(consts, states[V]);
    }

    fn compute_rates(
        &self,
        t: f64,
        consts: &[f64],
        rates: &mut [f64],
        states: &[f64],
        algebraic: &mut [f64],
    ) {
        Self::fill_algebraic(t, consts, states, algebraic);
        rates[M] = (algebraic[M_INF] - states[M]) / consts[TAU_M];
        rates[H] = (algebraic[H_INF] - states[H]) / algebraic[TAU_H];
        rates[V] = -algebraic[I_TOT] / consts[C_M] - algebraic[I_STIM];
    }

    fn compute_variables(
        &self,
        t: f64,
        consts: &[f64],
        _rates: &[f64],
        states: &[f64],
        algebraic: &mut [f64],
    ) {
        Self::fill_algebraic(t, consts, states, algebraic);
    }

    fn gate_kinetics(&self, index: usize, consts: &[f64], algebraic: &[f64]) -> Option<GateKinetics> {
        match index {
            M => Some(GateKinetics {
                x_inf: algebraic[M_INF],
                tau: consts[TAU_M],
            }),
            H => Some(GateKinetics {
                x_inf: algebraic[H_INF],
                tau: algebraic[TAU_H],
            }),
            _ => None,
        }
    }
}
