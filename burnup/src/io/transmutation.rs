//! Transmutation adapter: one irradiation interval for one material.
//!
//! Inputs written to the working directory:
//!
//! - `TAPE4.INP`: starting composition, one `<nuclide> <grams>` line each.
//! - `TAPE5.INP`: the irradiation card `IRF <days> <flux>`.
//! - `TAPE9.INP`: one-group cross sections, `<nuclide> <reaction> <barns>`.
//!
//! The solver answers with `TAPE6.json`, see [`Tape6`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::errors::{ParseError, SolverError, Stage};
use crate::core::library::StepResult;
use crate::core::material::{Material, MaterialId};
use crate::core::state::State;
use crate::io::config::TransmutationConfig;
use crate::io::layout::{BuildLayout, ensure_dir};
use crate::io::solver::{Solver, SolverRequest, exec_with_retry};

pub const TAPE4: &str = "TAPE4.INP";
pub const TAPE5: &str = "TAPE5.INP";
pub const TAPE9: &str = "TAPE9.INP";
pub const TAPE6: &str = "TAPE6.json";

/// Output artifact of the transmutation solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tape6 {
    /// Burnup accrued over the interval (MWd).
    pub burnup: f64,
    pub neutron_production: f64,
    pub neutron_destruction: f64,
    /// Ending composition, grams.
    pub composition: BTreeMap<String, f64>,
}

/// The irradiation card.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Irradiation {
    pub days: f64,
    pub flux: f64,
}

/// One (State, material) transmutation request.
#[derive(Debug, Clone, Copy)]
pub struct TransmutationJob<'a> {
    pub state: &'a State,
    pub id: &'a MaterialId,
    pub material: &'a Material,
    pub elapsed: f64,
    pub flux: f64,
    /// One-group cross sections keyed by (nuclide, reaction).
    pub xs: &'a BTreeMap<(String, String), f64>,
}

#[derive(Debug, Clone)]
pub struct TransmutationOutcome {
    pub step: StepResult,
    /// Solver calls made; 0 when TAPE6 already existed.
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct TransmutationAdapter<'a> {
    config: &'a TransmutationConfig,
    layout: &'a BuildLayout,
    fuel_atoms_per_molecule: f64,
}

impl<'a> TransmutationAdapter<'a> {
    pub fn new(
        config: &'a TransmutationConfig,
        layout: &'a BuildLayout,
        fuel_atoms_per_molecule: f64,
    ) -> Self {
        Self {
            config,
            layout,
            fuel_atoms_per_molecule,
        }
    }

    /// Run one interval, retrying exec failures up to `max_attempts`.
    ///
    /// A present `TAPE6.json` means the work is done and the solver is skipped.
    /// Parse failures are never retried.
    #[instrument(skip_all, fields(state = %job.state, material = %job.id, stage = %Stage::Transmutation))]
    pub fn solve(
        &self,
        solver: &dyn Solver,
        job: &TransmutationJob<'_>,
    ) -> Result<TransmutationOutcome> {
        let workdir = self.layout.transmutation_dir(job.state, job.id);
        ensure_dir(&workdir)?;
        let output = workdir.join(TAPE6);

        let attempts = if output.exists() {
            debug!(workdir = %workdir.display(), "TAPE6 present, skipping transmutation");
            0
        } else {
            write_inputs(&workdir, job)?;
            let request = SolverRequest::new(
                Stage::Transmutation,
                &workdir,
                Duration::from_secs(self.config.timeout_secs),
                self.config.output_limit_bytes,
            );
            info!(elapsed = job.elapsed, flux = job.flux, "running transmutation");
            exec_with_retry(solver, &request, self.config.max_attempts).map_err(|failure| {
                SolverError {
                    stage: Stage::Transmutation,
                    state: job.state.to_string(),
                    material: job.id.to_string(),
                    attempts: failure.attempts,
                    detail: format!("{:#}", failure.last),
                }
            })?
        };

        if !output.exists() {
            let detail = format!("transmutation produced no {TAPE6}");
            return Err(ParseError::new(&workdir, detail).into());
        }
        let tape6 = read_tape6(&output)?;
        let mut material = Material::from_masses(&tape6.composition);
        if *job.id == MaterialId::Fuel {
            material = material.with_atoms_per_molecule(self.fuel_atoms_per_molecule);
        }
        Ok(TransmutationOutcome {
            step: StepResult {
                elapsed: job.elapsed,
                neutron_production: tape6.neutron_production,
                neutron_destruction: tape6.neutron_destruction,
                burnup: tape6.burnup,
                material,
            },
            attempts,
        })
    }
}

fn write_inputs(workdir: &Path, job: &TransmutationJob<'_>) -> Result<()> {
    let tape4: String = std::iter::once(format!("* {} composition (g)\n", job.id))
        .chain(
            job.material
                .masses()
                .into_iter()
                .map(|(nuc, grams)| format!("{nuc} {grams}\n")),
        )
        .collect();

    let tape5 = format!("* {}\nIRF {} {}\n", job.state.label(), job.elapsed, job.flux);

    let tape9: String = std::iter::once("* one-group cross sections (b)\n".to_string())
        .chain(
            job.xs
                .iter()
                .map(|((nuc, rx), value)| format!("{nuc} {rx} {value}\n")),
        )
        .collect();

    for (name, body) in [(TAPE4, tape4), (TAPE5, tape5), (TAPE9, tape9)] {
        let path = workdir.join(name);
        fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
    }
    Ok(())
}

fn data_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('*'))
}

fn parse_number(path: &Path, field: &str, raw: Option<&str>) -> Result<f64, ParseError> {
    let raw = raw.ok_or_else(|| ParseError::new(path, format!("missing {field}")))?;
    let value: f64 = raw
        .parse()
        .map_err(|_| ParseError::new(path, format!("invalid {field} `{raw}`")))?;
    if !value.is_finite() {
        return Err(ParseError::new(path, format!("non-finite {field}")));
    }
    Ok(value)
}

/// Read a `TAPE4.INP` composition (nuclide -> grams).
pub fn read_tape4(path: &Path) -> Result<BTreeMap<String, f64>> {
    let text = fs::read_to_string(path).map_err(|e| ParseError::new(path, e.to_string()))?;
    let mut masses = BTreeMap::new();
    for line in data_lines(&text) {
        let mut parts = line.split_whitespace();
        let nuc = parts
            .next()
            .ok_or_else(|| ParseError::new(path, "empty composition line"))?;
        let grams = parse_number(path, "mass", parts.next())?;
        masses.insert(nuc.to_string(), grams);
    }
    Ok(masses)
}

/// Read the `IRF` card of a `TAPE5.INP`.
pub fn read_tape5(path: &Path) -> Result<Irradiation> {
    let text = fs::read_to_string(path).map_err(|e| ParseError::new(path, e.to_string()))?;
    let card = data_lines(&text)
        .find(|l| l.starts_with("IRF"))
        .ok_or_else(|| ParseError::new(path, "missing IRF card"))?;
    let mut parts = card.split_whitespace().skip(1);
    Ok(Irradiation {
        days: parse_number(path, "days", parts.next())?,
        flux: parse_number(path, "flux", parts.next())?,
    })
}

/// Read and check a `TAPE6.json`.
pub fn read_tape6(path: &Path) -> Result<Tape6> {
    let text = fs::read_to_string(path).map_err(|e| ParseError::new(path, e.to_string()))?;
    let tape6: Tape6 =
        serde_json::from_str(&text).map_err(|e| ParseError::new(path, e.to_string()))?;
    let scalars = [tape6.burnup, tape6.neutron_production, tape6.neutron_destruction];
    if scalars.iter().chain(tape6.composition.values()).any(|v| !v.is_finite()) {
        return Err(ParseError::new(path, "non-finite value").into());
    }
    Ok(tape6)
}

/// Write a `TAPE6.json` (pretty JSON with trailing newline).
pub fn write_tape6(path: &Path, tape6: &Tape6) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(tape6).context("serialize TAPE6")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
