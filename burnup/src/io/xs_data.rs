//! Group-wise cross-section data sources.
//!
//! Each source is loaded from a JSON array of `{ nuclide, reaction, temperature,
//! xs }` records whose `xs` vectors are in descending-energy group order. The
//! primary source lives on the configured group structure and is collapsed with
//! the general flux spectrum; every further source has its own group structure
//! and is collapsed with the spectrum tallied under its label.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::errors::ParseError;
use crate::io::config::XsSourceConfig;

/// Reactions tabulated for every tracked nuclide.
pub const REACTIONS: [&str; 10] = [
    "total",
    "absorption",
    "gamma",
    "gamma_1",
    "z_2n",
    "z_2n_1",
    "z_3n",
    "proton",
    "alpha",
    "fission",
];

pub const FISSION: &str = "fission";

/// Label of the general flux spectrum, which also collapses the primary source.
pub const GENERAL_SPECTRUM: &str = "flux";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XsRecord {
    pub nuclide: String,
    pub reaction: String,
    /// Kelvin.
    pub temperature: f64,
    /// Barns per group.
    pub xs: Vec<f64>,
}

/// One row of the cross-section table handed to the transmutation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XsEntry {
    pub nuclide: String,
    pub reaction: String,
    /// Label of the spectrum this vector is collapsed with.
    pub source: String,
    pub xs: Vec<f64>,
}

impl XsEntry {
    /// Flux-weighted one-group value.
    pub fn collapse(&self, phi: &[f64]) -> f64 {
        let total: f64 = phi.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        self.xs.iter().zip(phi).map(|(s, p)| s * p).sum::<f64>() / total
    }
}

/// One data source on a single group structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrossSectionData {
    records: Vec<XsRecord>,
}

impl CrossSectionData {
    /// Build from records; every `xs` vector must have the same group count.
    pub fn from_records(records: Vec<XsRecord>) -> Result<Self, String> {
        if let Some(first) = records.first() {
            let groups = first.xs.len();
            if let Some(bad) = records.iter().find(|r| r.xs.len() != groups) {
                return Err(format!(
                    "{} {} at {} K has {} groups, expected {groups}",
                    bad.nuclide,
                    bad.reaction,
                    bad.temperature,
                    bad.xs.len()
                ));
            }
        }
        Ok(Self { records })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read cross sections {}", path.display()))?;
        let records: Vec<XsRecord> = serde_json::from_str(&contents)
            .map_err(|e| ParseError::new(path, e.to_string()))?;
        let data = Self::from_records(records).map_err(|detail| ParseError::new(path, detail))?;
        debug!(records = data.records.len(), path = %path.display(), "loaded cross sections");
        Ok(data)
    }

    pub fn records(&self) -> &[XsRecord] {
        &self.records
    }

    /// Groups per vector, or `None` for an empty data set.
    pub fn group_count(&self) -> Option<usize> {
        self.records.first().map(|r| r.xs.len())
    }

    /// Tabulated temperature closest to `temperature` (lower one on ties).
    pub fn active_temperature(&self, temperature: f64) -> Option<f64> {
        self.records
            .iter()
            .map(|r| r.temperature)
            .min_by(|a, b| {
                (a - temperature)
                    .abs()
                    .total_cmp(&(b - temperature).abs())
                    .then(a.total_cmp(b))
            })
    }

    /// Nuclides present in the data at the active temperature.
    pub fn nuclides_at(&self, temperature: f64) -> BTreeSet<String> {
        let Some(active) = self.active_temperature(temperature) else {
            return BTreeSet::new();
        };
        self.records
            .iter()
            .filter(|r| r.temperature == active)
            .map(|r| r.nuclide.clone())
            .collect()
    }

    pub fn lookup(&self, nuclide: &str, reaction: &str, temperature: f64) -> Option<&[f64]> {
        let active = self.active_temperature(temperature)?;
        self.records
            .iter()
            .find(|r| r.temperature == active && r.nuclide == nuclide && r.reaction == reaction)
            .map(|r| r.xs.as_slice())
    }
}

/// The primary source followed by labelled secondary sources, in lookup order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XsSources {
    primary: CrossSectionData,
    secondary: Vec<(String, CrossSectionData)>,
}

impl From<CrossSectionData> for XsSources {
    fn from(primary: CrossSectionData) -> Self {
        Self {
            primary,
            secondary: Vec::new(),
        }
    }
}

impl XsSources {
    /// Load the primary file and every configured secondary source.
    pub fn load(primary: &Path, secondary: &[XsSourceConfig]) -> Result<Self> {
        let mut sources = Self::from(CrossSectionData::load(primary)?);
        for source in secondary {
            let data = CrossSectionData::load(&source.path)
                .with_context(|| format!("load cross-section source `{}`", source.label))?;
            sources = sources.with_source(&source.label, data);
        }
        Ok(sources)
    }

    pub fn with_source(mut self, label: &str, data: CrossSectionData) -> Self {
        self.secondary.push((label.to_string(), data));
        self
    }

    pub fn primary(&self) -> &CrossSectionData {
        &self.primary
    }

    /// Secondary sources as `(label, data)` in lookup order.
    pub fn secondary(&self) -> &[(String, CrossSectionData)] {
        &self.secondary
    }

    fn all(&self) -> impl Iterator<Item = (&str, &CrossSectionData)> {
        std::iter::once((GENERAL_SPECTRUM, &self.primary))
            .chain(self.secondary.iter().map(|(label, data)| (label.as_str(), data)))
    }

    /// Nuclides present in any source at its active temperature.
    pub fn nuclides_at(&self, temperature: f64) -> BTreeSet<String> {
        self.all()
            .flat_map(|(_, data)| data.nuclides_at(temperature))
            .collect()
    }

    /// One vector per requested reaction per nuclide, skipping absent pairs.
    ///
    /// The first source holding a (nuclide, reaction) pair supplies it, and the
    /// entry names that source's spectrum.
    pub fn table_for(
        &self,
        nuclides: &[String],
        reactions: &[&str],
        temperature: f64,
    ) -> Vec<XsEntry> {
        let mut table = Vec::new();
        for nuc in nuclides {
            for rx in reactions {
                let found = self
                    .all()
                    .find_map(|(label, data)| Some((label, data.lookup(nuc, rx, temperature)?)));
                if let Some((label, xs)) = found {
                    table.push(XsEntry {
                        nuclide: nuc.clone(),
                        reaction: (*rx).to_string(),
                        source: label.to_string(),
                        xs: xs.to_vec(),
                    });
                }
            }
        }
        table
    }
}
