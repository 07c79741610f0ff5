//! Per-material time-series accumulation.
//!
//! A [`Library`] grows strictly by appension: every series gains exactly one
//! element per step, so all series always share the same length. The first
//! element is a synthetic time-zero entry seeded from the initial composition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::material::{Material, MaterialId};

/// Output of one coupled step for one material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Length of the irradiation interval (days).
    pub elapsed: f64,
    pub neutron_production: f64,
    pub neutron_destruction: f64,
    /// Burnup accrued over this interval (MWd).
    pub burnup: f64,
    /// Composition at the end of the interval.
    pub material: Material,
}

/// Ordered time series for one material.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Library {
    pub material: MaterialId,
    /// Cumulative burn time (days).
    pub time: Vec<f64>,
    pub neutron_production: Vec<f64>,
    pub neutron_destruction: Vec<f64>,
    /// Cumulative burnup (MWd).
    pub burnup: Vec<f64>,
    /// Mass (g) of every tracked nuclide at every step.
    pub nuclide_mass: BTreeMap<String, Vec<f64>>,
    /// Composition snapshot at every step.
    pub materials: Vec<Material>,
}

impl Library {
    /// Library holding only the time-zero entry.
    pub fn new(material: MaterialId, initial: Material, tracked: &[String]) -> Self {
        let nuclide_mass = tracked
            .iter()
            .map(|nuc| (nuc.clone(), vec![initial.mass_of(nuc)]))
            .collect();
        Self {
            material,
            time: vec![0.0],
            neutron_production: vec![0.0],
            neutron_destruction: vec![0.0],
            burnup: vec![0.0],
            nuclide_mass,
            materials: vec![initial],
        }
    }

    /// Append one step to every series in lock-step.
    pub fn append(&mut self, step: &StepResult) {
        let time = self.time.last().copied().unwrap_or(0.0) + step.elapsed;
        let burnup = self.burnup.last().copied().unwrap_or(0.0) + step.burnup;
        self.time.push(time);
        self.neutron_production.push(step.neutron_production);
        self.neutron_destruction.push(step.neutron_destruction);
        self.burnup.push(burnup);
        for (nuc, series) in &mut self.nuclide_mass {
            series.push(step.material.mass_of(nuc));
        }
        self.materials.push(step.material.clone());
    }

    /// Number of entries (including time zero).
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Latest composition snapshot.
    pub fn current(&self) -> &Material {
        // new() seeds one snapshot and append() only grows the vector.
        &self.materials[self.materials.len() - 1]
    }

    /// True when every series has the same, non-zero length.
    pub fn is_consistent(&self) -> bool {
        let n = self.time.len();
        n > 0
            && self.neutron_production.len() == n
            && self.neutron_destruction.len() == n
            && self.burnup.len() == n
            && self.materials.len() == n
            && self.nuclide_mass.values().all(|s| s.len() == n)
    }
}

/// The Libraries of one Run, keyed by material identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibrarySet {
    libraries: BTreeMap<MaterialId, Library>,
}

impl LibrarySet {
    /// One Library per material, each seeded with its time-zero entry.
    pub fn new(initial: BTreeMap<MaterialId, Material>, tracked: &[String]) -> Self {
        let libraries = initial
            .into_iter()
            .map(|(id, mat)| (id.clone(), Library::new(id, mat, tracked)))
            .collect();
        Self { libraries }
    }

    /// Append one step for one material.
    pub fn append(&mut self, id: &MaterialId, step: &StepResult) -> Result<(), String> {
        let library = self
            .libraries
            .get_mut(id)
            .ok_or_else(|| format!("no library for material '{id}'"))?;
        library.append(step);
        Ok(())
    }

    /// Fold a complete step (one result per material) or nothing at all.
    pub fn fold_step(&mut self, results: &BTreeMap<MaterialId, StepResult>) -> Result<(), String> {
        let expected: Vec<&MaterialId> = self.libraries.keys().collect();
        let actual: Vec<&MaterialId> = results.keys().collect();
        if expected != actual {
            return Err(format!(
                "step results cover [{}] but libraries are [{}]",
                join_ids(&actual),
                join_ids(&expected)
            ));
        }
        for (id, step) in results {
            self.append(id, step)?;
        }
        Ok(())
    }

    pub fn get(&self, id: &MaterialId) -> Option<&Library> {
        self.libraries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MaterialId, &Library)> {
        self.libraries.iter()
    }

    /// Latest snapshot of every material.
    pub fn current_materials(&self) -> BTreeMap<MaterialId, Material> {
        self.libraries
            .iter()
            .map(|(id, lib)| (id.clone(), lib.current().clone()))
            .collect()
    }

    /// Entries per Library (they are all equal).
    pub fn steps(&self) -> usize {
        self.libraries.values().next().map_or(0, Library::len)
    }

    pub fn is_consistent(&self) -> bool {
        let n = self.steps();
        self.libraries
            .values()
            .all(|lib| lib.is_consistent() && lib.len() == n)
    }
}

fn join_ids(ids: &[&MaterialId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
