//! Transport adapter: materialize a pin-cell deck, run the criticality solver
//! once per State, and parse its statepoint.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::errors::{ParseError, SolverError, Stage};
use crate::core::material::Material;
use crate::core::state::State;
use crate::io::config::RunControl;
use crate::io::layout::{BuildLayout, ensure_dir};
use crate::io::solver::{Solver, SolverRequest};
use crate::io::xs_data::{GENERAL_SPECTRUM, REACTIONS, XsEntry, XsSources};

const SETTINGS_TEMPLATE: &str = include_str!("templates/settings.xml");
const MATERIALS_TEMPLATE: &str = include_str!("templates/materials.xml");
const GEOMETRY_TEMPLATE: &str = include_str!("templates/geometry.xml");
const TALLIES_TEMPLATE: &str = include_str!("templates/tallies.xml");

/// Label of the general-purpose flux tally.
pub const FLUX_TALLY: &str = GENERAL_SPECTRUM;
const STATEPOINT_PREFIX: &str = "statepoint";

/// Per-State values of the scenario context.
///
/// Configured defaults, overridden by any State parameter of the same name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioContext {
    pub temperature: f64,
    pub fuel_density: f64,
    pub clad_density: f64,
    pub cool_density: f64,
    pub fuel_cell_radius: f64,
    pub void_cell_radius: f64,
    pub clad_cell_radius: f64,
    pub unit_cell_pitch: f64,
}

impl ScenarioContext {
    pub fn resolve(cfg: &RunControl, state: &State) -> Self {
        let pick = |name: &str, default: f64| state.get(name).unwrap_or(default);
        let geom = &cfg.geometry;
        Self {
            temperature: pick("temperature", cfg.temperature),
            fuel_density: pick("fuel_density", cfg.fuel.density),
            clad_density: pick("clad_density", cfg.clad.density),
            cool_density: pick("cool_density", cfg.cool.density),
            fuel_cell_radius: pick("fuel_cell_radius", geom.fuel_cell_radius),
            void_cell_radius: pick("void_cell_radius", geom.void_cell_radius),
            clad_cell_radius: pick("clad_cell_radius", geom.clad_cell_radius),
            unit_cell_pitch: pick("unit_cell_pitch", geom.unit_cell_pitch),
        }
    }
}

/// Parsed transport output for one State.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportResult {
    pub k: f64,
    pub k_err: f64,
    /// General flux spectrum, descending energy, unit sum.
    pub group_flux: Vec<f64>,
    /// Secondary-source spectra by tally label, same normalization.
    pub spectra: BTreeMap<String, Vec<f64>>,
    /// One vector per tracked nuclide per reaction present in the active data.
    pub xs_table: Vec<XsEntry>,
}

impl TransportResult {
    /// Spectrum tallied under `label`.
    pub fn spectrum(&self, label: &str) -> Option<&[f64]> {
        if label == FLUX_TALLY {
            Some(&self.group_flux)
        } else {
            self.spectra.get(label).map(Vec::as_slice)
        }
    }

    /// One-group value of `entry`, collapsed with its source's spectrum.
    pub fn collapse(&self, entry: &XsEntry) -> Option<f64> {
        self.spectrum(&entry.source).map(|phi| entry.collapse(phi))
    }

    /// One-group cross sections keyed by (nuclide, reaction).
    ///
    /// Entries whose spectrum was not tallied are left out.
    pub fn one_group(&self) -> BTreeMap<(String, String), f64> {
        self.xs_table
            .iter()
            .filter_map(|e| Some(((e.nuclide.clone(), e.reaction.clone()), self.collapse(e)?)))
            .collect()
    }
}

/// Result of [`TransportAdapter::solve`].
#[derive(Debug, Clone)]
pub struct TransportOutcome {
    pub result: TransportResult,
    /// False when a statepoint already existed and the solver was skipped.
    pub invoked: bool,
}

#[derive(Debug, Deserialize)]
struct Statepoint {
    k_combined: [f64; 2],
    tallies: Vec<Tally>,
}

#[derive(Debug, Deserialize)]
struct Tally {
    label: String,
    #[serde(default)]
    energy_bins: Vec<f64>,
    /// Ascending-energy order.
    results: Vec<f64>,
}

#[derive(Debug, Serialize)]
struct MaterialContext {
    id: u32,
    name: &'static str,
    density: f64,
    nuclides: Vec<NuclideContext>,
}

#[derive(Debug, Serialize)]
struct NuclideContext {
    name: String,
    fraction: f64,
}

#[derive(Debug, Serialize)]
struct TallyContext {
    label: String,
    energy_bins: Vec<f64>,
}

/// Renders the solver input deck.
struct DeckTemplates {
    env: Environment<'static>,
}

impl DeckTemplates {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("settings", SETTINGS_TEMPLATE)
            .expect("settings template should be valid");
        env.add_template("materials", MATERIALS_TEMPLATE)
            .expect("materials template should be valid");
        env.add_template("geometry", GEOMETRY_TEMPLATE)
            .expect("geometry template should be valid");
        env.add_template("tallies", TALLIES_TEMPLATE)
            .expect("tallies template should be valid");
        Self { env }
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        let mut rendered = template
            .render(ctx)
            .with_context(|| format!("render {name}.xml"))?;
        rendered.push('\n');
        Ok(rendered)
    }
}

/// Drives the transport solver for States of one execution.
pub struct TransportAdapter<'a> {
    config: &'a RunControl,
    xs_data: &'a XsSources,
    layout: &'a BuildLayout,
    templates: DeckTemplates,
}

impl<'a> TransportAdapter<'a> {
    pub fn new(
        config: &'a RunControl,
        xs_data: &'a XsSources,
        layout: &'a BuildLayout,
    ) -> Self {
        Self {
            config,
            xs_data,
            layout,
            templates: DeckTemplates::new(),
        }
    }

    /// Solve `state` with `fuel` as the current fuel composition.
    ///
    /// Skips the solver when the working directory already holds a statepoint.
    /// Not retried: an exec failure is returned as a [`SolverError`].
    #[instrument(skip_all, fields(state = %state, stage = %Stage::Transport))]
    pub fn solve(
        &self,
        solver: &dyn Solver,
        state: &State,
        fuel: &Material,
    ) -> Result<TransportOutcome> {
        let ctx = ScenarioContext::resolve(self.config, state);
        let workdir = self.layout.transport_dir(state);
        ensure_dir(&workdir)?;

        let invoked = match find_statepoint(&workdir)? {
            Some(path) => {
                debug!(statepoint = %path.display(), "statepoint present, skipping transport");
                false
            }
            None => {
                self.write_inputs(&workdir, &ctx, fuel)?;
                let request = SolverRequest::new(
                    Stage::Transport,
                    &workdir,
                    Duration::from_secs(self.config.transport.timeout_secs),
                    self.config.transport.output_limit_bytes,
                );
                info!(workdir = %workdir.display(), "running transport");
                solver.exec(&request).map_err(|err| SolverError {
                    stage: Stage::Transport,
                    state: state.to_string(),
                    material: "-".to_string(),
                    attempts: 1,
                    detail: format!("{err:#}"),
                })?;
                true
            }
        };

        let path = find_statepoint(&workdir)?.ok_or_else(|| {
            ParseError::new(&workdir, "transport produced no statepoint*.json")
        })?;
        let groups = self.config.group_structure.len() - 1;
        let (k, k_err, mut spectra) = parse_statepoint(&path, groups)?;
        let group_flux = spectra
            .remove(FLUX_TALLY)
            .ok_or_else(|| ParseError::new(&path, format!("missing `{FLUX_TALLY}` tally")))?;
        for source in &self.config.transport.sources {
            let expected = source.energy_bins.len() - 1;
            match spectra.get(&source.label) {
                Some(phi) if phi.len() == expected => {}
                Some(phi) => {
                    let detail = format!(
                        "`{}` tally has {} groups, expected {expected}",
                        source.label,
                        phi.len()
                    );
                    return Err(ParseError::new(&path, detail).into());
                }
                None => {
                    let detail = format!("missing `{}` tally", source.label);
                    return Err(ParseError::new(&path, detail).into());
                }
            }
        }
        let xs_table = self
            .xs_data
            .table_for(&self.config.track_nucs, &REACTIONS, ctx.temperature);

        debug!(k, k_err, invoked, "transport result");
        Ok(TransportOutcome {
            result: TransportResult {
                k,
                k_err,
                group_flux,
                spectra,
                xs_table,
            },
            invoked,
        })
    }

    /// Write settings, materials, geometry and tallies into `workdir`.
    pub fn write_inputs(
        &self,
        workdir: &Path,
        ctx: &ScenarioContext,
        fuel: &Material,
    ) -> Result<()> {
        let cfg = self.config;
        let valid = self.xs_data.nuclides_at(ctx.temperature);
        let geom = &cfg.geometry;
        let half_pitch_x = ctx.unit_cell_pitch * f64::from(geom.lattice_shape[0]) / 2.0;
        let half_pitch_y = ctx.unit_cell_pitch * f64::from(geom.lattice_shape[1]) / 2.0;

        let settings = self.templates.render(
            "settings",
            context! {
                cross_sections => cfg.cross_sections_path().map(|p| p.display().to_string()),
                temperature => ctx.temperature,
                batches => cfg.transport.batches,
                inactive => cfg.transport.inactive,
                particles => cfg.transport.particles,
                half_pitch_x => half_pitch_x,
                half_pitch_y => half_pitch_y,
            },
        )?;

        let cool = cfg.cool.material().restricted_to(&valid);
        let clad = cfg.clad.material().restricted_to(&valid);
        let materials = vec![
            material_context(1, "fuel", ctx.fuel_density, &fuel.restricted_to(&valid)),
            material_context(2, "coolant", ctx.cool_density, &cool),
            material_context(3, "cladding", ctx.clad_density, &clad),
        ];
        let materials = self
            .templates
            .render("materials", context! { materials => materials })?;

        let lattice: Vec<&str> = geom
            .lattice
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let geometry = self.templates.render(
            "geometry",
            context! {
                shape => geom.lattice_shape,
                pitch => ctx.unit_cell_pitch,
                half_pitch_x => half_pitch_x,
                half_pitch_y => half_pitch_y,
                lattice => lattice,
                fuel_cell_radius => ctx.fuel_cell_radius,
                void_cell_radius => ctx.void_cell_radius,
                clad_cell_radius => ctx.clad_cell_radius,
            },
        )?;

        let mut tallies = vec![TallyContext {
            label: FLUX_TALLY.to_string(),
            energy_bins: cfg.group_structure.clone(),
        }];
        tallies.extend(cfg.transport.sources.iter().map(|s| TallyContext {
            label: s.label.clone(),
            energy_bins: s.energy_bins.clone(),
        }));
        let tallies = self
            .templates
            .render("tallies", context! { tallies => tallies })?;

        for (name, body) in [
            ("settings.xml", settings),
            ("materials.xml", materials),
            ("geometry.xml", geometry),
            ("tallies.xml", tallies),
        ] {
            let path = workdir.join(name);
            fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
        }
        Ok(())
    }
}

fn material_context(id: u32, name: &'static str, density: f64, mat: &Material) -> MaterialContext {
    MaterialContext {
        id,
        name,
        density,
        nuclides: mat
            .comp
            .iter()
            .map(|(nuc, frac)| NuclideContext {
                name: nuc.clone(),
                fraction: *frac,
            })
            .collect(),
    }
}

/// Latest `statepoint*.json` in `dir`, by file name.
pub fn find_statepoint(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut found: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(STATEPOINT_PREFIX) && n.ends_with(".json"))
        })
        .collect();
    found.sort();
    Ok(found.pop())
}

/// Parse a statepoint into `(k, k_err, spectra)`.
///
/// Tally results arrive in ascending-energy order and are returned reversed and
/// normalized to unit sum. The general flux tally must have `groups` entries.
fn parse_statepoint(
    path: &Path,
    groups: usize,
) -> Result<(f64, f64, BTreeMap<String, Vec<f64>>)> {
    let contents = fs::read_to_string(path).map_err(|e| ParseError::new(path, e.to_string()))?;
    let sp: Statepoint =
        serde_json::from_str(&contents).map_err(|e| ParseError::new(path, e.to_string()))?;
    let [k, k_err] = sp.k_combined;
    if !k.is_finite() || !k_err.is_finite() {
        return Err(ParseError::new(path, "non-finite k_combined").into());
    }

    let mut spectra = BTreeMap::new();
    for tally in sp.tallies {
        if !tally.energy_bins.is_empty() && tally.energy_bins.len() != tally.results.len() + 1 {
            return Err(ParseError::new(
                path,
                format!(
                    "tally `{}` has {} bins for {} results",
                    tally.label,
                    tally.energy_bins.len(),
                    tally.results.len()
                ),
            )
            .into());
        }
        if tally.label == FLUX_TALLY && tally.results.len() != groups {
            return Err(ParseError::new(
                path,
                format!(
                    "`{FLUX_TALLY}` tally has {} groups, expected {groups}",
                    tally.results.len()
                ),
            )
            .into());
        }
        let mut results = tally.results;
        results.reverse();
        let total: f64 = results.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            let detail = format!("tally `{}` does not sum to a positive flux", tally.label);
            return Err(ParseError::new(path, detail).into());
        }
        spectra.insert(tally.label, results.into_iter().map(|v| v / total).collect());
    }
    Ok((k, k_err, spectra))
}
