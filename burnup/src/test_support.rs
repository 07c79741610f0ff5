//! Deterministic solvers and builders for tests.
//!
//! The mock solvers speak the same artifact formats as the real codes: they
//! read the inputs the adapters materialize and write a statepoint or TAPE6,
//! counting every call.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};

use crate::core::state::{BURN_TIMES, State};
use crate::io::config::{Perturbation, RunControl};
use crate::io::solver::{Solver, SolverRequest};
use crate::io::transmutation::{TAPE4, TAPE5, TAPE6, Tape6, read_tape4, read_tape5, write_tape6};
use crate::io::xs_data::{CrossSectionData, XsRecord};

/// Fresh temporary build directory.
pub fn temp_build_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("tempdir")
}

/// A State from `(name, value)` pairs.
pub fn state(pairs: &[(&str, f64)]) -> State {
    State::new(pairs.iter().map(|(n, v)| (*n, *v))).expect("state")
}

/// Burn-time-only States.
pub fn states_at(times: &[f64]) -> Vec<State> {
    times.iter().map(|t| state(&[(BURN_TIMES, *t)])).collect()
}

/// Default run control rooted at `build_dir`, burning over `[0, 100, 300]`.
pub fn run_control(build_dir: &Path) -> RunControl {
    RunControl {
        build_dir: Some(build_dir.to_path_buf()),
        perturbations: vec![Perturbation {
            name: BURN_TIMES.to_string(),
            values: vec![0.0, 100.0, 300.0],
        }],
        ..RunControl::default()
    }
}

/// Three-group data covering the default fuel, coolant and cladding.
pub fn test_xs_data() -> CrossSectionData {
    let rec = |nuclide: &str, reaction: &str, xs: [f64; 3]| XsRecord {
        nuclide: nuclide.to_string(),
        reaction: reaction.to_string(),
        temperature: 600.0,
        xs: xs.to_vec(),
    };
    CrossSectionData::from_records(vec![
        rec("U235", "fission", [1.2, 1.5, 580.0]),
        rec("U235", "gamma", [0.1, 0.4, 98.0]),
        rec("U235", "total", [6.0, 12.0, 700.0]),
        rec("U238", "fission", [0.3, 0.0, 0.0]),
        rec("U238", "gamma", [0.07, 1.0, 2.7]),
        rec("U238", "total", [7.0, 10.0, 12.0]),
        rec("H1", "gamma", [0.0, 0.0, 0.33]),
        rec("O16", "gamma", [0.0, 0.0, 0.0002]),
        rec("Zr90", "gamma", [0.0, 0.01, 0.01]),
    ])
    .expect("test cross sections")
}

/// Transport mock writing a fixed statepoint.
#[derive(Debug)]
pub struct MockTransport {
    /// Flux tally, ascending energy.
    pub results: Vec<f64>,
    /// Secondary-source tallies by label, ascending energy.
    pub spectra: Vec<(String, Vec<f64>)>,
    pub k: f64,
    calls: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            results: vec![3.0, 2.0, 1.0],
            spectra: Vec::new(),
            k: 1.05,
            calls: AtomicUsize::new(0),
        }
    }
}

impl MockTransport {
    /// Also tally `results` under `label`.
    pub fn with_spectrum(mut self, label: &str, results: Vec<f64>) -> Self {
        self.spectra.push((label.to_string(), results));
        self
    }

    pub fn invocations(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Solver for MockTransport {
    fn exec(&self, request: &SolverRequest) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tallies: Vec<_> = std::iter::once(("flux", &self.results))
            .chain(self.spectra.iter().map(|(label, results)| (label.as_str(), results)))
            .map(|(label, results)| serde_json::json!({ "label": label, "results": results }))
            .collect();
        let body = serde_json::json!({
            "k_combined": [self.k, 0.001],
            "tallies": tallies,
        });
        fs::write(request.workdir.join("statepoint.50.json"), body.to_string())?;
        Ok(())
    }
}

/// Transmutation mock: every mass decays by `exp(-decay_per_day * days)` and
/// burnup grows by `burnup_per_day * days`.
#[derive(Debug)]
pub struct MockTransmutation {
    pub burnup_per_day: f64,
    pub decay_per_day: f64,
    calls: AtomicUsize,
}

impl Default for MockTransmutation {
    fn default() -> Self {
        Self {
            burnup_per_day: 0.01,
            decay_per_day: 1e-4,
            calls: AtomicUsize::new(0),
        }
    }
}

impl MockTransmutation {
    pub fn invocations(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn transmute(&self, workdir: &Path) -> Result<()> {
        let masses = read_tape4(&workdir.join(TAPE4))?;
        let irf = read_tape5(&workdir.join(TAPE5))?;
        let remaining = (-self.decay_per_day * irf.days).exp();
        let mut composition: BTreeMap<String, f64> = masses
            .iter()
            .map(|(nuc, grams)| (nuc.clone(), grams * remaining))
            .collect();
        composition.insert("Xe135".to_string(), 0.0);
        let total: f64 = masses.values().sum();
        let tape6 = Tape6 {
            burnup: self.burnup_per_day * irf.days,
            neutron_production: 2.4 * total * (1.0 - remaining),
            neutron_destruction: total * (1.0 - remaining),
            composition,
        };
        write_tape6(&workdir.join(TAPE6), &tape6)
    }
}

impl Solver for MockTransmutation {
    fn exec(&self, request: &SolverRequest) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transmute(&request.workdir)
    }
}

/// Fails the first `failures` calls in each working directory, then behaves
/// like [`MockTransmutation`].
#[derive(Debug)]
pub struct FlakyTransmutation {
    failures: u32,
    inner: MockTransmutation,
    per_dir: Mutex<HashMap<PathBuf, u32>>,
    calls: AtomicUsize,
}

impl FlakyTransmutation {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            inner: MockTransmutation::default(),
            per_dir: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Never succeeds.
    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }

    pub fn invocations(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Solver for FlakyTransmutation {
    fn exec(&self, request: &SolverRequest) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let seen = {
            let mut per_dir = self
                .per_dir
                .lock()
                .map_err(|_| anyhow!("flaky solver lock poisoned"))?;
            let count = per_dir.entry(request.workdir.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if seen <= self.failures {
            return Err(anyhow!("transient failure {seen} in {}", request.workdir.display()));
        }
        self.inner.transmute(&request.workdir)
    }
}
