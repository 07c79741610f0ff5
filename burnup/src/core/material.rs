//! Nuclide compositions and the identities of transmuted materials.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Identity of a material evolved by the transmutation solver.
///
/// Ordering is `Fuel` first, then probes by nuclide name; the sequential fan-out
/// and every writer iterate in this order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MaterialId {
    /// The bulk fuel, evolving across the whole Run.
    Fuel,
    /// Independent single-nuclide probe for a tracked nuclide.
    Nuclide(String),
}

impl MaterialId {
    /// Working-directory suffix (`origen<id>`).
    pub fn dir_name(&self) -> String {
        format!("origen{self}")
    }
}

impl fmt::Display for MaterialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterialId::Fuel => f.write_str("fuel"),
            MaterialId::Nuclide(nuc) => f.write_str(nuc),
        }
    }
}

impl Serialize for MaterialId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A composition (nuclide -> mass fraction) with a total mass in grams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Mass fractions; sum to 1 unless the material is empty.
    pub comp: BTreeMap<String, f64>,
    pub mass: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atoms_per_molecule: Option<f64>,
}

impl Material {
    /// Build from (possibly unnormalized) fractions; non-positive entries are dropped.
    pub fn new(comp: BTreeMap<String, f64>, mass: f64) -> Self {
        let comp: BTreeMap<String, f64> = comp.into_iter().filter(|(_, f)| *f > 0.0).collect();
        let total: f64 = comp.values().sum();
        let comp = if total > 0.0 {
            comp.into_iter().map(|(n, f)| (n, f / total)).collect()
        } else {
            BTreeMap::new()
        };
        Self {
            comp,
            mass,
            atoms_per_molecule: None,
        }
    }

    /// `mass` grams of a single nuclide.
    pub fn pure(nuclide: &str, mass: f64) -> Self {
        Self::new(BTreeMap::from([(nuclide.to_string(), 1.0)]), mass)
    }

    /// Build from absolute nuclide masses, dropping zero-mass nuclides.
    pub fn from_masses(masses: &BTreeMap<String, f64>) -> Self {
        let kept: BTreeMap<String, f64> = masses
            .iter()
            .filter(|(_, m)| **m > 0.0)
            .map(|(n, m)| (n.clone(), *m))
            .collect();
        let total: f64 = kept.values().sum();
        Self::new(kept, total)
    }

    pub fn with_atoms_per_molecule(mut self, atoms: f64) -> Self {
        self.atoms_per_molecule = Some(atoms);
        self
    }

    /// Mass of `nuclide` in grams (0 when absent).
    pub fn mass_of(&self, nuclide: &str) -> f64 {
        self.comp.get(nuclide).map_or(0.0, |f| f * self.mass)
    }

    pub fn masses(&self) -> BTreeMap<String, f64> {
        self.comp
            .iter()
            .map(|(n, f)| (n.clone(), f * self.mass))
            .collect()
    }

    /// Sub-material holding only nuclides in `allowed`, renormalized, with the
    /// mass of the kept nuclides.
    pub fn restricted_to(&self, allowed: &BTreeSet<String>) -> Material {
        let masses: BTreeMap<String, f64> = self
            .masses()
            .into_iter()
            .filter(|(n, _)| allowed.contains(n))
            .collect();
        let mut restricted = Material::from_masses(&masses);
        restricted.atoms_per_molecule = self.atoms_per_molecule;
        restricted
    }

    pub fn is_empty(&self) -> bool {
        self.comp.is_empty()
    }
}

/// Mass number parsed from a nuclide name such as `U235` or `Am242M`.
pub fn mass_number(nuclide: &str) -> Option<u32> {
    let digits: String = nuclide
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok().filter(|a| *a > 0)
}
