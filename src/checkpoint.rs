//! Checkpoint files.
//!
//! A checkpoint is a directory of plain-text files:
//!
//! - `state.txt`: current time, S2 magnitude and S1–S2 interval, one per line
//! - `V.txt`: transmembrane potential, one value per line
//! - `W.txt`: gap-junction potential (EMI only)
//! - `<name>_gate.txt`: one file per gating state
//!
//! Values are written with 17 significant digits, enough for a lossless
//! round trip of every `f64`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CardiacError, Result};

const STATE_FILE: &str = "state.txt";
const POTENTIAL_FILE: &str = "V.txt";
const GAP_FILE: &str = "W.txt";

/// Everything needed to resume a run at a step boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    pub current_time: f64,
    pub s2_magnitude: f64,
    pub s1s2_interval: f64,
    pub v: Vec<f64>,
    /// Gap potential, present only for formulations that carry one
    pub w: Option<Vec<f64>>,
    /// Gating fields keyed by state name
    pub gates: Vec<(String, Vec<f64>)>,
}

impl CheckpointRecord {
    /// Field for a named gate.
    pub fn gate(&self, name: &str) -> Option<&[f64]> {
        self.gates
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }
}

/// Reads and writes checkpoints in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a checkpoint has been written here.
    pub fn exists(&self) -> bool {
        self.dir.join(STATE_FILE).is_file()
    }

    /// Write a record, replacing any previous checkpoint files.
    pub fn save(&self, record: &CheckpointRecord) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|source| CardiacError::FileWrite {
            path: self.dir.clone(),
            source,
        })?;

        let state = [record.current_time, record.s2_magnitude, record.s1s2_interval];
        write_vector(&self.dir.join(STATE_FILE), &state)?;
        write_vector(&self.dir.join(POTENTIAL_FILE), &record.v)?;
        if let Some(w) = &record.w {
            write_vector(&self.dir.join(GAP_FILE), w)?;
        }
        for (name, values) in &record.gates {
            write_vector(&self.dir.join(gate_file(name)), values)?;
        }

        log::debug!(
            "checkpoint written to {} at t = {} ms",
            self.dir.display(),
            record.current_time
        );
        Ok(())
    }

    /// Read a record. `gate_names` lists the gating files to expect and
    /// `with_gap` whether `W.txt` must be present.
    pub fn load(&self, gate_names: &[&str], with_gap: bool) -> Result<CheckpointRecord> {
        let state_path = self.dir.join(STATE_FILE);
        let state = read_vector(&state_path)?;
        let [current_time, s2_magnitude, s1s2_interval] = state[..] else {
            return Err(CardiacError::restart(
                state_path,
                format!("expected 3 values, found {}", state.len()),
            ));
        };

        let v = read_vector(&self.dir.join(POTENTIAL_FILE))?;
        let w = if with_gap {
            Some(read_vector(&self.dir.join(GAP_FILE))?)
        } else {
            None
        };

        let mut gates = Vec::with_capacity(gate_names.len());
        for name in gate_names {
            let path = self.dir.join(gate_file(name));
            let values = read_vector(&path)?;
            if values.len() != v.len() {
                return Err(CardiacError::restart(
                    path,
                    format!("{} values, potential field has {}", values.len(), v.len()),
                ));
            }
            gates.push((name.to_string(), values));
        }

        Ok(CheckpointRecord {
            current_time,
            s2_magnitude,
            s1s2_interval,
            v,
            w,
            gates,
        })
    }
}

fn gate_file(name: &str) -> String {
    format!("{name}_gate.txt")
}

/// Write one value per line with lossless precision.
pub fn write_vector(path: &Path, values: &[f64]) -> Result<()> {
    let mut text = String::with_capacity(values.len() * 25);
    for v in values {
        text.push_str(&format!("{v:.17e}\n"));
    }
    fs::write(path, text).map_err(|source| CardiacError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a file written by [`write_vector`].
pub fn read_vector(path: &Path) -> Result<Vec<f64>> {
    let text = fs::read_to_string(path).map_err(|source| CardiacError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(i, line)| {
            line.parse::<f64>().map_err(|e| {
                CardiacError::restart(path, format!("line {}: '{}': {}", i + 1, line, e))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(with_gap: bool) -> CheckpointRecord {
        CheckpointRecord {
            current_time: 1.0 / 3.0,
            s2_magnitude: 121.0,
            s1s2_interval: 275.5,
            v: vec![-83.0, 12.345678901234567, f64::MIN_POSITIVE, -0.1],
            w: with_gap.then(|| vec![1e-300, -2.5]),
            gates: vec![
                ("m".to_string(), vec![0.1, 0.2, 0.3, 0.7 / 3.0]),
                ("h".to_string(), vec![0.9, 0.8, 0.7, 0.6]),
            ],
        }
    }

    #[test]
    fn test_round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("ckpt"));
        assert!(!store.exists());

        let saved = record(true);
        store.save(&saved).unwrap();
        assert!(store.exists());

        let loaded = store.load(&["m", "h"], true).unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.gate("h"), Some(&[0.9, 0.8, 0.7, 0.6][..]));
    }

    #[test]
    fn test_state_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&record(false)).unwrap();

        let text = fs::read_to_string(dir.path().join("state.txt")).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(!dir.path().join("W.txt").exists());
        assert!(dir.path().join("m_gate.txt").exists());
    }

    #[test]
    fn test_missing_gap_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&record(false)).unwrap();
        assert!(matches!(
            store.load(&["m", "h"], true),
            Err(CardiacError::FileRead { .. })
        ));
    }

    #[test]
    fn test_corrupt_state_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&record(false)).unwrap();
        fs::write(dir.path().join("state.txt"), "1.0\n2.0\n").unwrap();
        assert!(matches!(
            store.load(&["m", "h"], false),
            Err(CardiacError::InvalidRestart { .. })
        ));

        fs::write(dir.path().join("state.txt"), "1.0\nabc\n3.0\n").unwrap();
        assert!(matches!(
            store.load(&["m", "h"], false),
            Err(CardiacError::InvalidRestart { .. })
        ));
    }

    #[test]
    fn test_gate_length_must_match_potential() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&record(false)).unwrap();
        write_vector(&dir.path().join("h_gate.txt"), &[0.5]).unwrap();
        assert!(matches!(
            store.load(&["m", "h"], false),
            Err(CardiacError::InvalidRestart { .. })
        ));
    }
}
