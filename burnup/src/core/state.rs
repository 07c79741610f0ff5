//! Scenario points: immutable tuples of named perturbation-parameter values.
//!
//! A [`State`] is a value type. Equality and hashing cover every field (name and
//! bit-exact value), which makes it usable as the memoization key of the engine.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::errors::ConfigError;

/// Name of the parameter that orders States within a Run (days).
pub const BURN_TIMES: &str = "burn_times";

/// One named perturbation-parameter value.
#[derive(Debug, Clone, Serialize)]
pub struct Param {
    pub name: String,
    pub value: f64,
}

impl PartialEq for Param {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value.to_bits() == other.value.to_bits()
    }
}

impl Eq for Param {}

impl Hash for Param {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.value.to_bits().hash(state);
    }
}

/// Ordered tuple of perturbation parameters, one of which is [`BURN_TIMES`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct State {
    params: Vec<Param>,
    #[serde(skip)]
    time_index: usize,
}

impl State {
    /// Build a State, rejecting duplicate names, non-finite values and a missing burn time.
    pub fn new<I, S>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut params: Vec<Param> = Vec::new();
        for (name, value) in pairs {
            let name = name.into();
            if params.iter().any(|p| p.name == name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate parameter `{name}` in state"
                )));
            }
            if !value.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "parameter `{name}` must be finite, got {value}"
                )));
            }
            // -0.0 and 0.0 must hash identically.
            let value = if value == 0.0 { 0.0 } else { value };
            params.push(Param { name, value });
        }
        let time_index = params
            .iter()
            .position(|p| p.name == BURN_TIMES)
            .ok_or_else(|| ConfigError::MissingParameter(BURN_TIMES.to_string()))?;
        Ok(Self { params, time_index })
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn burn_time(&self) -> f64 {
        self.params[self.time_index].value
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.params.iter().find(|p| p.name == name).map(|p| p.value)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    /// Compare every field except the burn time.
    ///
    /// Errors when the two States do not carry the same ordered field names.
    pub fn same_except_burn_time(&self, other: &State) -> Result<bool, ConfigError> {
        if self.field_names() != other.field_names() {
            return Err(ConfigError::ParameterMismatch {
                expected: self.field_names().join(", "),
                found: other.field_names().join(", "),
            });
        }
        Ok(self
            .params
            .iter()
            .zip(&other.params)
            .filter(|(a, _)| a.name != BURN_TIMES)
            .all(|(a, b)| a == b))
    }

    /// `name=value` pairs joined by `, `.
    pub fn label(&self) -> String {
        self.params
            .iter()
            .map(|p| format!("{}={}", p.name, p.value))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Stable short digest of the full field tuple (16 hex chars).
    ///
    /// Used to name working directories, so it must not change across releases.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for p in &self.params {
            hasher.update(p.name.as_bytes());
            hasher.update(b"=");
            hasher.update(p.value.to_bits().to_le_bytes());
            hasher.update(b";");
        }
        let result = hasher.finalize();
        hex::encode(&result[..8])
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] #{}", self.label(), self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn state(pairs: &[(&str, f64)]) -> State {
        State::new(pairs.iter().map(|(n, v)| (*n, *v))).expect("state")
    }

    #[test]
    fn equality_and_hash_cover_all_fields() {
        let a = state(&[("enrichment", 0.04), (BURN_TIMES, 100.0)]);
        let b = state(&[("enrichment", 0.04), (BURN_TIMES, 100.0)]);
        let c = state(&[("enrichment", 0.05), (BURN_TIMES, 100.0)]);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<State> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&a));
    }

    #[test]
    fn negative_zero_is_normalized() {
        let a = state(&[(BURN_TIMES, 0.0)]);
        let b = state(&[(BURN_TIMES, -0.0)]);
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn missing_burn_time_is_rejected() {
        let err = State::new([("enrichment", 0.04)]).unwrap_err();
        assert_eq!(err, ConfigError::MissingParameter(BURN_TIMES.to_string()));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let err = State::new([(BURN_TIMES, f64::NAN)]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn same_except_burn_time_ignores_time_only() {
        let a = state(&[("enrichment", 0.04), (BURN_TIMES, 0.0)]);
        let b = state(&[("enrichment", 0.04), (BURN_TIMES, 300.0)]);
        let c = state(&[("enrichment", 0.05), (BURN_TIMES, 0.0)]);
        assert!(a.same_except_burn_time(&b).expect("compare"));
        assert!(!a.same_except_burn_time(&c).expect("compare"));
    }

    #[test]
    fn same_except_burn_time_rejects_shape_mismatch() {
        let a = state(&[("enrichment", 0.04), (BURN_TIMES, 0.0)]);
        let b = state(&[(BURN_TIMES, 0.0)]);
        let err = a.same_except_burn_time(&b).unwrap_err();
        assert!(matches!(err, ConfigError::ParameterMismatch { .. }));
    }

    #[test]
    fn digest_is_stable_and_distinguishes_states() {
        let a = state(&[("enrichment", 0.04), (BURN_TIMES, 100.0)]);
        let b = state(&[("enrichment", 0.04), (BURN_TIMES, 200.0)]);
        assert_eq!(a.digest(), a.clone().digest());
        assert_eq!(a.digest().len(), 16);
        assert_ne!(a.digest(), b.digest());
    }
}
