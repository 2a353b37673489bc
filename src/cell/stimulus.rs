//! S1–S2 stimulus protocol.
//!
//! Two periodic rectangular pulses share one electrode region. Each node
//! receives one of three constant sets per sub-step: the S1 set, the S2 set,
//! or the "off" set whose stimulus can never fire.

use serde::{Deserialize, Serialize};

use super::{IonicModel, StimulusConstants};

/// Start time written into the "off" constants so the model's own periodic
/// forcing stays closed for any reachable simulation time.
pub const DISABLED_START: f64 = 1.0e12;

/// Timing and strength of one periodic pulse train.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StimulusSpec {
    /// Offset of the pulse inside each period (ms)
    pub start: f64,
    /// Repetition period (ms)
    pub period: f64,
    /// Pulse length (ms)
    pub duration: f64,
    /// Applied current magnitude (uA/uF); applied as negative current
    pub magnitude: f64,
}

impl StimulusSpec {
    pub fn new(start: f64, period: f64, duration: f64, magnitude: f64) -> Self {
        Self {
            start,
            period,
            duration,
            magnitude,
        }
    }
}

/// Which pulse train is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StimulusKind {
    S1,
    S2,
}

/// Whether `spec`'s window is open at time `t`.
///
/// `phase = t mod period`; the window is `[start, start + duration]`,
/// inclusive at both ends. The same rule serves S1 and S2; which pulse wins
/// when both are open is decided by [`StimulusProtocol::select`].
pub fn is_active(t: f64, spec: &StimulusSpec) -> bool {
    let phase = t - (t / spec.period).floor() * spec.period;
    spec.start <= phase && phase <= spec.start + spec.duration
}

/// The protocol plus the three constant vectors it selects between.
#[derive(Debug, Clone)]
pub struct StimulusProtocol {
    s1: StimulusSpec,
    s2: StimulusSpec,
    consts_s1: Vec<f64>,
    consts_s2: Vec<f64>,
    consts_off: Vec<f64>,
}

impl StimulusProtocol {
    /// Build the protocol from the model's default constants.
    pub fn new<M: IonicModel>(base_consts: &[f64], s1: StimulusSpec, s2: StimulusSpec) -> Self {
        let layout = M::STIMULUS;
        Self {
            s1,
            s2,
            consts_s1: with_pulse(base_consts, layout, &s1),
            consts_s2: with_pulse(base_consts, layout, &s2),
            consts_off: disabled(base_consts, layout, s1.period),
        }
    }

    pub fn s1(&self) -> &StimulusSpec {
        &self.s1
    }

    pub fn s2(&self) -> &StimulusSpec {
        &self.s2
    }

    /// Pulse applied at a node at time `t`. S1 is checked first and wins
    /// when both windows are open.
    pub fn select(&self, t: f64, in_electrode: bool) -> Option<StimulusKind> {
        if !in_electrode {
            return None;
        }
        if is_active(t, &self.s1) {
            Some(StimulusKind::S1)
        } else if is_active(t, &self.s2) {
            Some(StimulusKind::S2)
        } else {
            None
        }
    }

    /// Constants a node must use at time `t`.
    pub fn constants(&self, t: f64, in_electrode: bool) -> &[f64] {
        match self.select(t, in_electrode) {
            Some(StimulusKind::S1) => &self.consts_s1,
            Some(StimulusKind::S2) => &self.consts_s2,
            None => &self.consts_off,
        }
    }

    /// Constants configured for one pulse train.
    pub fn constants_for(&self, kind: StimulusKind) -> &[f64] {
        match kind {
            StimulusKind::S1 => &self.consts_s1,
            StimulusKind::S2 => &self.consts_s2,
        }
    }

    /// Constants with stimulation disabled.
    pub fn constants_off(&self) -> &[f64] {
        &self.consts_off
    }
}

fn with_pulse(base: &[f64], layout: StimulusConstants, spec: &StimulusSpec) -> Vec<f64> {
    let mut consts = base.to_vec();
    consts[layout.start] = spec.start;
    consts[layout.period] = spec.period;
    consts[layout.duration] = spec.duration;
    consts[layout.amplitude] = spec.magnitude;
    consts
}

fn disabled(base: &[f64], layout: StimulusConstants, period: f64) -> Vec<f64> {
    let mut consts = base.to_vec();
    consts[layout.start] = DISABLED_START;
    consts[layout.period] = period;
    consts[layout.duration] = 0.0;
    consts[layout.amplitude] = 0.0;
    consts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellPopulation, GrayPathmanathan};

    fn protocol(s1: StimulusSpec, s2: StimulusSpec) -> StimulusProtocol {
        let (_, consts) = CellPopulation::new(&GrayPathmanathan, 1);
        StimulusProtocol::new::<GrayPathmanathan>(&consts, s1, s2)
    }

    #[test]
    fn test_window_bounds_inclusive() {
        let spec = StimulusSpec::new(5.0, 100.0, 2.0, 50.0);
        assert!(!is_active(4.999, &spec));
        assert!(is_active(5.0, &spec));
        assert!(is_active(7.0, &spec));
        assert!(!is_active(7.001, &spec));
        assert!(is_active(106.0, &spec));
    }

    #[test]
    fn test_is_active_idempotent() {
        let spec = StimulusSpec::new(0.0, 1000.0, 2.0, 120.0);
        for &t in &[0.0, 1.0, 2.0, 2.5, 999.0, 1001.0] {
            assert_eq!(is_active(t, &spec), is_active(t, &spec));
        }
    }

    #[test]
    fn test_s1_takes_priority_on_overlap() {
        let s1 = StimulusSpec::new(0.0, 1000.0, 5.0, 120.0);
        let s2 = StimulusSpec::new(3.0, 1000.0, 5.0, 60.0);
        let p = protocol(s1, s2);

        assert_eq!(p.select(4.0, true), Some(StimulusKind::S1));
        assert_eq!(p.constants(4.0, true), p.constants_for(StimulusKind::S1));
        assert_eq!(p.select(6.0, true), Some(StimulusKind::S2));
        assert_eq!(p.constants(6.0, true), p.constants_for(StimulusKind::S2));
    }

    #[test]
    fn test_outside_electrode_always_off() {
        let s1 = StimulusSpec::new(0.0, 1000.0, 5.0, 120.0);
        let p = protocol(s1, StimulusSpec::new(300.0, 1000.0, 2.0, 10.0));
        assert_eq!(p.select(1.0, false), None);
        assert_eq!(p.constants(1.0, false), p.constants_off());
    }

    #[test]
    fn test_off_constants_never_fire() {
        let s1 = StimulusSpec::new(0.0, 1000.0, 5.0, 120.0);
        let p = protocol(s1, s1);
        let off = p.constants_off();
        let layout = GrayPathmanathan::STIMULUS;
        assert_eq!(off[layout.amplitude], 0.0);
        // Model default window (10 ms) must not survive in the off set
        let disabled = StimulusSpec::new(
            off[layout.start],
            off[layout.period],
            off[layout.duration],
            off[layout.amplitude],
        );
        assert!(!is_active(10.5, &disabled));
    }
}
