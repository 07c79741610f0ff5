//! Total-flux magnitude for one irradiation step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::errors::ConfigError;
use crate::core::material::{Material, mass_number};
use crate::core::state::State;

/// State parameter carrying an explicit flux (n/cm^2/s).
pub const FLUX_PARAM: &str = "flux";
/// Recoverable energy per fission, 200 MeV in joules.
pub const FISSION_ENERGY_J: f64 = 3.204e-11;
pub const AVOGADRO: f64 = 6.022_140_76e23;
pub const BARN_CM2: f64 = 1e-24;

/// Where the step's flux magnitude comes from. Exactly one source is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FluxSource {
    /// Read the `flux` parameter of each State.
    State,
    /// Back-solve from a fuel specific power (W/g).
    SpecificPower { fuel_specific_power: f64 },
}

impl Default for FluxSource {
    fn default() -> Self {
        FluxSource::SpecificPower {
            fuel_specific_power: 1.0,
        }
    }
}

impl FluxSource {
    /// Check the source against the perturbation parameter names.
    pub fn validate(&self, param_names: &[&str]) -> Result<(), ConfigError> {
        let has_flux = param_names.contains(&FLUX_PARAM);
        match self {
            FluxSource::State if !has_flux => Err(ConfigError::InvalidFluxSource(format!(
                "mode \"state\" needs a `{FLUX_PARAM}` perturbation parameter"
            ))),
            FluxSource::SpecificPower { .. } if has_flux => {
                Err(ConfigError::InvalidFluxSource(format!(
                    "mode \"specific_power\" conflicts with the `{FLUX_PARAM}` perturbation parameter"
                )))
            }
            FluxSource::SpecificPower {
                fuel_specific_power,
            } if *fuel_specific_power <= 0.0 || !fuel_specific_power.is_finite() => {
                Err(ConfigError::InvalidFluxSource(format!(
                    "fuel_specific_power must be > 0, got {fuel_specific_power}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Check that `state` can be stepped under this source.
    ///
    /// In `state` mode the State must carry a positive `flux` value.
    pub fn check_state(&self, state: &State) -> Result<(), ConfigError> {
        let FluxSource::State = self else {
            return Ok(());
        };
        let flux = state
            .get(FLUX_PARAM)
            .ok_or_else(|| ConfigError::MissingParameter(FLUX_PARAM.to_string()))?;
        check_flux_value(flux).map_err(|detail| {
            ConfigError::InvalidFluxSource(format!("state {state} has {detail}"))
        })
    }
}

/// An explicit flux must be finite and positive.
pub fn check_flux_value(flux: f64) -> Result<(), String> {
    if flux.is_finite() && flux > 0.0 {
        Ok(())
    } else {
        Err(format!("non-positive flux {flux}"))
    }
}

/// Flux magnitude for stepping `state` from the current `fuel` snapshot.
///
/// `fission_xs` maps nuclide -> flux-collapsed fission cross section (barns).
pub fn flux_magnitude(
    source: &FluxSource,
    state: &State,
    fuel: &Material,
    fission_xs: &BTreeMap<String, f64>,
) -> Result<f64, ConfigError> {
    match source {
        FluxSource::State => {
            source.check_state(state)?;
            state
                .get(FLUX_PARAM)
                .ok_or_else(|| ConfigError::MissingParameter(FLUX_PARAM.to_string()))
        }
        FluxSource::SpecificPower {
            fuel_specific_power,
        } => back_solve_flux(*fuel_specific_power, fuel, fission_xs),
    }
}

/// Solve `P * M = E_f * sum_i(N_i * sigma_f_i) * phi` for `phi`.
pub fn back_solve_flux(
    specific_power: f64,
    fuel: &Material,
    fission_xs: &BTreeMap<String, f64>,
) -> Result<f64, ConfigError> {
    let macroscopic: f64 = fuel
        .masses()
        .iter()
        .filter_map(|(nuc, grams)| {
            let sigma = fission_xs.get(nuc)?;
            let atoms = grams / f64::from(mass_number(nuc)?) * AVOGADRO;
            Some(atoms * sigma * BARN_CM2)
        })
        .sum();
    if macroscopic <= 0.0 || !macroscopic.is_finite() {
        return Err(ConfigError::InvalidFluxSource(
            "fuel has no fission cross section data; cannot back-solve flux".to_string(),
        ));
    }
    Ok(specific_power * fuel.mass / (FISSION_ENERGY_J * macroscopic))
}
