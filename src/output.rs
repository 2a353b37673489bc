//! File outputs for one sweep value.
//!
//! Writes the sampled potential traces as CSV, raw potential dumps on the
//! plot cadence and checkpoints into the shared checkpoint directory.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::checkpoint::{write_vector, CheckpointRecord, CheckpointStore};
use crate::config::SimulatorConfig;
use crate::error::{CardiacError, Result};
use crate::solver::StepObserver;
use crate::tissue::{nearest_site, Point};

/// Name of the per-run sample file.
pub const SAMPLE_FILE: &str = "samples.csv";

/// Directory for one S2 magnitude's outputs.
pub fn run_directory(root: &Path, s2_magnitude: f64) -> PathBuf {
    root.join(format!("s2_{s2_magnitude}"))
}

/// Column header naming a sample point by its coordinates.
fn column_name(p: &Point) -> String {
    format!("V({};{};{})", p[0], p[1], p[2])
}

/// CSV trace writer over a fixed set of potential DOFs.
struct SampleWriter {
    path: PathBuf,
    dofs: Vec<usize>,
    writer: csv::Writer<File>,
}

impl SampleWriter {
    fn create(path: PathBuf, dofs: Vec<usize>, points: &[Point], append: bool) -> Result<Self> {
        let resume = append && path.is_file();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(resume)
            .truncate(!resume)
            .open(&path)
            .map_err(|source| CardiacError::FileWrite {
                path: path.clone(),
                source,
            })?;

        let mut writer = csv::Writer::from_writer(file);
        if !resume {
            let header = std::iter::once("time".to_string()).chain(points.iter().map(column_name));
            writer
                .write_record(header)
                .map_err(|source| CardiacError::SampleWrite {
                    path: path.clone(),
                    source,
                })?;
        }

        Ok(Self { path, dofs, writer })
    }

    fn record(&mut self, time: f64, v: &[f64]) -> Result<()> {
        let row = std::iter::once(time.to_string())
            .chain(self.dofs.iter().map(|&dof| v[dof].to_string()));
        self.writer
            .write_record(row)
            .map_err(|source| CardiacError::SampleWrite {
                path: self.path.clone(),
                source,
            })?;
        // Keep the file complete if a later step fails
        self.writer.flush().map_err(|source| CardiacError::FileWrite {
            path: self.path.clone(),
            source,
        })
    }
}

/// [`StepObserver`] writing to disk.
pub struct FileOutputs {
    dir: PathBuf,
    samples: Option<SampleWriter>,
    checkpoints: Option<CheckpointStore>,
}

impl FileOutputs {
    /// Outputs in `dir`. Sample points are snapped to the nearest potential
    /// site. With `append`, an existing sample file is continued instead of
    /// replaced.
    pub fn create(
        dir: impl Into<PathBuf>,
        sites: &[Point],
        sample_points: &[Point],
        checkpoints: Option<CheckpointStore>,
        append: bool,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CardiacError::FileWrite {
            path: dir.clone(),
            source,
        })?;

        let samples = if sample_points.is_empty() {
            None
        } else {
            let dofs = sample_points
                .iter()
                .map(|p| {
                    nearest_site(sites, p)
                        .ok_or_else(|| CardiacError::geometry("no potential sites to sample"))
                })
                .collect::<Result<Vec<_>>>()?;
            for (p, &dof) in sample_points.iter().zip(&dofs) {
                log::debug!("sample point {:?} -> dof {} at {:?}", p, dof, sites[dof]);
            }
            Some(SampleWriter::create(dir.join(SAMPLE_FILE), dofs, sample_points, append)?)
        };

        Ok(Self {
            dir,
            samples,
            checkpoints,
        })
    }

    /// Outputs for one sweep value as described by `config`.
    pub fn for_run(
        config: &SimulatorConfig,
        s2_magnitude: f64,
        sites: &[Point],
        resumed: bool,
    ) -> Result<Self> {
        let checkpoints = config
            .output
            .checkpoint_every
            .map(|_| CheckpointStore::new(&config.output.checkpoint_directory));
        Self::create(
            run_directory(&config.output.directory, s2_magnitude),
            sites,
            &config.output.sample_points()?,
            checkpoints,
            resumed,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl StepObserver for FileOutputs {
    fn sample(&mut self, time: f64, v: &[f64]) -> Result<()> {
        match &mut self.samples {
            Some(writer) => writer.record(time, v),
            None => Ok(()),
        }
    }

    fn plot(&mut self, step: usize, _time: f64, v: &[f64]) -> Result<()> {
        write_vector(&self.dir.join(format!("V_{step}.txt")), v)
    }

    fn checkpoint(&mut self, record: &CheckpointRecord) -> Result<()> {
        match &self.checkpoints {
            Some(store) => store.save(record),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::read_vector;

    fn sites() -> Vec<Point> {
        vec![[0.05, 0.05, 0.0], [0.15, 0.05, 0.0], [0.25, 0.05, 0.0]]
    }

    #[test]
    fn test_samples_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let points = [[0.24, 0.0, 0.0], [0.0, 0.0, 0.0]];
        let mut out = FileOutputs::create(dir.path(), &sites(), &points, None, false).unwrap();
        out.sample(0.0, &[1.0, 2.0, 3.0]).unwrap();
        out.sample(0.5, &[4.0, 5.0, 6.0]).unwrap();

        let text = fs::read_to_string(dir.path().join(SAMPLE_FILE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "time,V(0.24;0;0),V(0;0;0)");
        assert_eq!(lines[1], "0,3,1");
        assert_eq!(lines[2], "0.5,6,4");
    }

    #[test]
    fn test_append_continues_trace() {
        let dir = tempfile::tempdir().unwrap();
        let points = [[0.0, 0.0, 0.0]];
        {
            let mut out = FileOutputs::create(dir.path(), &sites(), &points, None, false).unwrap();
            out.sample(0.0, &[1.0, 2.0, 3.0]).unwrap();
        }
        let mut out = FileOutputs::create(dir.path(), &sites(), &points, None, true).unwrap();
        out.sample(1.0, &[7.0, 2.0, 3.0]).unwrap();

        let text = fs::read_to_string(dir.path().join(SAMPLE_FILE)).unwrap();
        assert_eq!(text.lines().collect::<Vec<_>>(), ["time,V(0;0;0)", "0,1", "1,7"]);
    }

    #[test]
    fn test_plot_dump() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = FileOutputs::create(dir.path(), &sites(), &[], None, false).unwrap();
        out.plot(40, 0.4, &[-83.0, 10.0, 0.5]).unwrap();
        assert_eq!(
            read_vector(&dir.path().join("V_40.txt")).unwrap(),
            vec![-83.0, 10.0, 0.5]
        );
        assert!(!dir.path().join(SAMPLE_FILE).exists());
    }

    #[test]
    fn test_run_directory_name() {
        assert_eq!(
            run_directory(Path::new("out"), 121.0),
            Path::new("out").join("s2_121")
        );
    }
}
