//! Typed error taxonomy for the coupling engine.
//!
//! Plumbing code propagates `anyhow::Error`; these types ride inside it so callers
//! (the CLI, tests) can `downcast_ref` to classify a failure.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Solver stage an error or working directory belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Transport,
    Transmutation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Transport => f.write_str("transport"),
            Stage::Transmutation => f.write_str("transmutation"),
        }
    }
}

/// Run-control and scenario-shape violations. Always fatal, and always raised
/// before any solver is invoked for the affected scope.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("parameter-set mismatch: expected fields [{expected}], found [{found}]")]
    ParameterMismatch { expected: String, found: String },
    #[error("missing required parameter `{0}`")]
    MissingParameter(String),
    #[error("burn times must strictly increase within a run: {from} -> {to} in run {run}")]
    NonIncreasingTime { run: String, from: f64, to: f64 },
    #[error("invalid flux source: {0}")]
    InvalidFluxSource(String),
    #[error("{0}")]
    Invalid(String),
}

/// An external solver invocation that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} failed for state {state} material {material} after {attempts} attempt(s): {detail}")]
pub struct SolverError {
    pub stage: Stage,
    /// Human-readable State label including its hash.
    pub state: String,
    /// `"-"` for transport, which is not material-scoped.
    pub material: String,
    pub attempts: u32,
    pub detail: String,
}

/// A solver output artifact that is missing or malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse {}: {detail}", path.display())]
pub struct ParseError {
    pub path: PathBuf,
    pub detail: String,
}

impl ParseError {
    pub fn new(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            detail: detail.into(),
        }
    }
}
