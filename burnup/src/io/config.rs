//! Run control stored in `burnup.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::errors::ConfigError;
use crate::core::flux::{FLUX_PARAM, FluxSource, check_flux_value};
use crate::core::material::{Material, MaterialId};
use crate::core::state::{BURN_TIMES, State};
use crate::io::xs_data::GENERAL_SPECTRUM;

/// Environment variable consulted when `transport.cross_sections` is unset.
pub const CROSS_SECTIONS_ENV: &str = "CROSS_SECTIONS";

/// Mass (g) every tracked-nuclide probe starts with.
pub const PROBE_MASS_GRAMS: f64 = 1000.0;

/// Run control (TOML).
///
/// Intended to be edited by humans. Missing fields default to a small
/// light-water-reactor pin cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunControl {
    /// Reactor name; the default build directory is `build-<reactor>`.
    pub reactor: String,

    pub build_dir: Option<PathBuf>,

    /// Worker count for the per-material transmutation fan-out.
    pub workers: usize,

    /// Nuclides evolved as independent probes and reported per Library.
    pub track_nucs: Vec<String>,

    /// Energy-group boundaries (MeV), ascending.
    pub group_structure: Vec<f64>,

    /// Default temperature (K); a `temperature` perturbation overrides it.
    pub temperature: f64,

    pub outputs: Vec<OutputFormat>,

    pub flux: FluxSource,

    pub fuel: FuelConfig,

    pub clad: RegionConfig,

    pub cool: RegionConfig,

    pub geometry: GeometryConfig,

    pub transport: TransportConfig,

    pub transmutation: TransmutationConfig,

    /// Ordered perturbation parameters; the scenario set is their cartesian product.
    pub perturbations: Vec<Perturbation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Perturbation {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Brightlite,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FuelConfig {
    /// Mass fractions.
    pub composition: BTreeMap<String, f64>,
    /// Grams.
    pub mass: f64,
    /// g/cc.
    pub density: f64,
    /// Stoichiometry of the fuel's chemical form (3 for UO2).
    pub atoms_per_molecule: f64,
}

impl Default for FuelConfig {
    fn default() -> Self {
        Self {
            composition: BTreeMap::from([("U235".to_string(), 0.04), ("U238".to_string(), 0.96)]),
            mass: 1000.0,
            density: 19.1,
            atoms_per_molecule: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionConfig {
    pub composition: BTreeMap<String, f64>,
    pub density: f64,
}

impl RegionConfig {
    fn zircaloy() -> Self {
        Self {
            composition: BTreeMap::from([
                ("Zr90".to_string(), 0.5145),
                ("Zr91".to_string(), 0.1122),
                ("Zr92".to_string(), 0.1715),
                ("Zr94".to_string(), 0.1738),
                ("Zr96".to_string(), 0.0280),
            ]),
            density: 6.56,
        }
    }

    fn light_water() -> Self {
        Self {
            composition: BTreeMap::from([("H1".to_string(), 0.1119), ("O16".to_string(), 0.8881)]),
            density: 1.0,
        }
    }

    pub fn material(&self) -> Material {
        Material::new(self.composition.clone(), 1.0)
    }
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self::light_water()
    }
}

/// Pin-cell lattice geometry (cm).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeometryConfig {
    pub fuel_cell_radius: f64,
    pub void_cell_radius: f64,
    pub clad_cell_radius: f64,
    pub unit_cell_pitch: f64,
    /// Universe ids, whitespace separated, one lattice row per line.
    pub lattice: String,
    pub lattice_shape: [u32; 2],
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            fuel_cell_radius: 0.7,
            void_cell_radius: 0.8,
            clad_cell_radius: 0.9,
            unit_cell_pitch: 1.5,
            lattice: "1".to_string(),
            lattice_shape: [1, 1],
        }
    }
}

/// Secondary cross-section data source. The transport deck tallies one flux
/// spectrum on `energy_bins` under `label`, and the source is collapsed with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct XsSourceConfig {
    pub label: String,
    pub path: PathBuf,
    /// Group boundaries (MeV), ascending; the file's vectors follow them.
    pub energy_bins: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Command line of the transport solver.
    pub command: Vec<String>,
    /// Cross-section data file; falls back to `$CROSS_SECTIONS`.
    pub cross_sections: Option<PathBuf>,
    pub particles: u64,
    pub batches: u32,
    pub inactive: u32,
    pub timeout_secs: u64,
    /// Truncate solver stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Consulted in order after the primary file for pairs it lacks.
    pub sources: Vec<XsSourceConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            command: vec!["openmc".to_string()],
            cross_sections: None,
            particles: 1000,
            batches: 50,
            inactive: 10,
            timeout_secs: 6 * 60 * 60,
            output_limit_bytes: 1_000_000,
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransmutationConfig {
    /// Command line of the transmutation solver; derived from `is_thermal` when unset.
    pub command: Option<Vec<String>>,
    pub is_thermal: bool,
    /// Attempts per (State, material) before the failure is fatal.
    pub max_attempts: u32,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for TransmutationConfig {
    fn default() -> Self {
        Self {
            command: None,
            is_thermal: true,
            max_attempts: 3,
            timeout_secs: 60 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl TransmutationConfig {
    pub fn command_line(&self) -> Vec<String> {
        match &self.command {
            Some(cmd) => cmd.clone(),
            None if self.is_thermal => vec!["o2_therm_linux.exe".to_string()],
            None => vec!["o2_fast_linux.exe".to_string()],
        }
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self {
            reactor: "lwr".to_string(),
            build_dir: None,
            workers: 1,
            track_nucs: vec!["U235".to_string(), "U238".to_string()],
            group_structure: vec![0.0, 10.0, 100.0, 1000.0],
            temperature: 600.0,
            outputs: vec![OutputFormat::Brightlite],
            flux: FluxSource::default(),
            fuel: FuelConfig::default(),
            clad: RegionConfig::zircaloy(),
            cool: RegionConfig::light_water(),
            geometry: GeometryConfig::default(),
            transport: TransportConfig::default(),
            transmutation: TransmutationConfig::default(),
            perturbations: vec![Perturbation {
                name: BURN_TIMES.to_string(),
                values: vec![
                    0.0, 3.0, 100.0, 200.0, 300.0, 400.0, 500.0, 600.0, 700.0, 800.0, 900.0,
                    1000.0,
                ],
            }],
        }
    }
}

impl RunControl {
    pub fn validate(&self) -> Result<()> {
        self.check().map_err(anyhow::Error::from)
    }

    fn check(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.reactor.trim().is_empty() {
            return invalid("reactor must be non-empty".into());
        }
        if self.workers == 0 {
            return invalid("workers must be > 0".into());
        }
        for (i, nuc) in self.track_nucs.iter().enumerate() {
            if nuc.trim().is_empty() {
                return invalid("track_nucs entries must be non-empty".into());
            }
            if self.track_nucs[..i].contains(nuc) {
                return invalid(format!("track_nucs lists `{nuc}` twice"));
            }
        }
        if self.group_structure.len() < 2
            || !self.group_structure.windows(2).all(|w| w[0] < w[1])
        {
            return invalid("group_structure must hold at least 2 ascending boundaries".into());
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return invalid(format!("temperature must be > 0, got {}", self.temperature));
        }
        let names = self.param_names();
        if !names.contains(&BURN_TIMES) {
            return Err(ConfigError::MissingParameter(BURN_TIMES.to_string()));
        }
        for (i, p) in self.perturbations.iter().enumerate() {
            if names[..i].contains(&p.name.as_str()) {
                return invalid(format!("perturbation `{}` declared twice", p.name));
            }
            if p.values.is_empty() {
                return invalid(format!("perturbation `{}` has no values", p.name));
            }
        }
        self.flux.validate(&names)?;
        if self.flux == FluxSource::State {
            let values = self
                .perturbations
                .iter()
                .filter(|p| p.name == FLUX_PARAM)
                .flat_map(|p| &p.values);
            for value in values {
                check_flux_value(*value).map_err(|detail| {
                    let detail = format!("`{FLUX_PARAM}` perturbation has {detail}");
                    ConfigError::InvalidFluxSource(detail)
                })?;
            }
        }
        for (i, source) in self.transport.sources.iter().enumerate() {
            let label = source.label.as_str();
            if label.trim().is_empty() || label == GENERAL_SPECTRUM {
                return invalid(format!(
                    "cross-section source label must be non-empty and not `{GENERAL_SPECTRUM}`"
                ));
            }
            if self.transport.sources[..i].iter().any(|s| s.label == label) {
                return invalid(format!("cross-section source `{label}` declared twice"));
            }
            let bins = &source.energy_bins;
            if bins.len() < 2 || !bins.windows(2).all(|w| w[0] < w[1]) {
                return invalid(format!(
                    "cross-section source `{label}` needs at least 2 ascending energy_bins"
                ));
            }
        }
        if self.fuel.composition.is_empty() || self.fuel.composition.values().all(|f| *f <= 0.0) {
            return invalid("fuel.composition must hold at least one nuclide".into());
        }
        if self.fuel.mass <= 0.0 {
            return invalid("fuel.mass must be > 0".into());
        }
        if self.transport.command.is_empty() || self.transport.command[0].trim().is_empty() {
            return invalid("transport.command must be a non-empty array".into());
        }
        if let Some(cmd) = &self.transmutation.command
            && (cmd.is_empty() || cmd[0].trim().is_empty())
        {
            return invalid("transmutation.command must be a non-empty array".into());
        }
        if self.transmutation.max_attempts == 0 {
            return invalid("transmutation.max_attempts must be > 0".into());
        }
        if self.transport.timeout_secs == 0 || self.transmutation.timeout_secs == 0 {
            return invalid("solver timeouts must be > 0".into());
        }
        if self.transport.output_limit_bytes == 0 || self.transmutation.output_limit_bytes == 0 {
            return invalid("solver output limits must be > 0".into());
        }
        Ok(())
    }

    pub fn param_names(&self) -> Vec<&str> {
        self.perturbations.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn build_dir(&self) -> PathBuf {
        self.build_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("build-{}", self.reactor)))
    }

    /// Cross-section data path from the config or `$CROSS_SECTIONS`.
    pub fn cross_sections_path(&self) -> Option<PathBuf> {
        self.transport
            .cross_sections
            .clone()
            .or_else(|| std::env::var_os(CROSS_SECTIONS_ENV).map(PathBuf::from))
    }

    /// Cartesian product of all perturbation values, last parameter varying fastest.
    pub fn states(&self) -> Result<Vec<State>, ConfigError> {
        let mut combos: Vec<Vec<(String, f64)>> = vec![Vec::new()];
        for p in &self.perturbations {
            combos = combos
                .into_iter()
                .flat_map(|prefix| {
                    p.values.iter().map(move |v| {
                        let mut next = prefix.clone();
                        next.push((p.name.clone(), *v));
                        next
                    })
                })
                .collect();
        }
        combos.into_iter().map(State::new).collect()
    }

    /// Starting composition of the fuel and of every tracked-nuclide probe.
    pub fn initial_materials(&self) -> BTreeMap<MaterialId, Material> {
        let mut materials = BTreeMap::new();
        materials.insert(
            MaterialId::Fuel,
            Material::new(self.fuel.composition.clone(), self.fuel.mass)
                .with_atoms_per_molecule(self.fuel.atoms_per_molecule),
        );
        for nuc in &self.track_nucs {
            materials.insert(
                MaterialId::Nuclide(nuc.clone()),
                Material::pure(nuc, PROBE_MASS_GRAMS),
            );
        }
        materials
    }
}

/// Load run control from a TOML file.
///
/// If the file is missing, returns `RunControl::default()`.
pub fn load_config(path: &Path) -> Result<RunControl> {
    if !path.exists() {
        let cfg = RunControl::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunControl =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write run control to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunControl) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
