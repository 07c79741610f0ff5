//! Build-directory layout.
//!
//! ```text
//! <build_dir>/
//!   <state-digest>/omc/              transport inputs, statepoint, transport.log
//!   <state-digest>/origen<id>/       TAPE4/5/9 inputs, TAPE6.json, transmutation.log
//!   runs/<run-digest>/<material>.*   written libraries
//!   manifest.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::grouping::Run;
use crate::core::material::MaterialId;
use crate::core::state::State;

pub const TRANSPORT_DIR: &str = "omc";
pub const RUNS_DIR: &str = "runs";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Resolved paths under one build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    root: PathBuf,
}

impl BuildLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self, state: &State) -> PathBuf {
        self.root.join(state.digest())
    }

    pub fn transport_dir(&self, state: &State) -> PathBuf {
        self.state_dir(state).join(TRANSPORT_DIR)
    }

    pub fn transmutation_dir(&self, state: &State, material: &MaterialId) -> PathBuf {
        self.state_dir(state).join(material.dir_name())
    }

    /// Output directory of a Run, keyed by its initial State.
    pub fn run_dir(&self, run: &Run) -> PathBuf {
        self.root.join(RUNS_DIR).join(run.initial().digest())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }
}

/// Create `dir` and its parents.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))
}
