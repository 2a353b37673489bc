//! Error types for the cardiac tissue simulator.
//!
//! This module provides a unified error type [`CardiacError`] that covers
//! configuration problems, numerical divergence, linear-solver failures and
//! checkpoint/output I/O.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`CardiacError`].
pub type Result<T> = std::result::Result<T, CardiacError>;

/// Unified error type for all simulator operations.
#[derive(Error, Debug)]
pub enum CardiacError {
    // ============ Configuration Errors ============
    /// Invalid configuration value
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Two arrays that must agree in length do not
    #[error("Mismatched length for {what}: expected {expected}, found {found}")]
    MismatchedLength {
        what: String,
        expected: usize,
        found: usize,
    },

    /// Invalid geometry (empty grid, no extracellular space, ...)
    #[error("Invalid geometry: {message}")]
    InvalidGeometry { message: String },

    /// Restart data is unreadable or does not match the problem
    #[error("Inconsistent restart data in '{path}': {message}")]
    InvalidRestart { path: PathBuf, message: String },

    // ============ Numerical Errors ============
    /// NaN or Inf appeared in an ionic state or a solved field
    #[error("Numerical divergence at t = {time} ms in {variable} (dof {dof}, value {value})")]
    NumericalDivergence {
        time: f64,
        dof: usize,
        variable: String,
        value: f64,
    },

    /// The assembled tissue operator is singular
    #[error("Singular tissue operator: zero pivot at row {row}")]
    SingularMatrix { row: usize },

    /// Iterative diffusion solve did not converge
    #[error("Diffusion solve did not converge at step {step} after {iterations} iterations (residual: {residual:.2e})")]
    SolverDivergence {
        step: usize,
        iterations: usize,
        residual: f64,
    },

    // ============ I/O Errors ============
    /// Failure reading a file
    #[error("Failed to read '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure writing a file
    #[error("Failed to write '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed configuration file
    #[error("Failed to parse configuration '{path}': {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Failure writing sampled traces
    #[error("Failed to write samples to '{path}': {source}")]
    SampleWrite {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl CardiacError {
    /// Create an invalid configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid geometry error
    pub fn geometry(message: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            message: message.into(),
        }
    }

    /// Create a length mismatch error
    pub fn mismatched(what: impl Into<String>, expected: usize, found: usize) -> Self {
        Self::MismatchedLength {
            what: what.into(),
            expected,
            found,
        }
    }

    /// Create a restart consistency error
    pub fn restart(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidRestart {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a numerical divergence error
    pub fn divergence(time: f64, dof: usize, variable: impl Into<String>, value: f64) -> Self {
        Self::NumericalDivergence {
            time,
            dof,
            variable: variable.into(),
            value,
        }
    }

    /// Errors that abort only the current sweep value, including a singular
    /// operator found at assembly.
    ///
    /// Configuration, geometry, restart and read errors stop the whole sweep.
    pub fn is_sweep_local(&self) -> bool {
        matches!(
            self,
            Self::NumericalDivergence { .. }
                | Self::SolverDivergence { .. }
                | Self::SingularMatrix { .. }
                | Self::FileWrite { .. }
                | Self::SampleWrite { .. }
        )
    }
}
