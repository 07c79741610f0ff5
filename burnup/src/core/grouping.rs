//! Run grouping: partition scenario points into time-ordered Runs.

use std::collections::HashSet;

use serde::Serialize;
use tracing::warn;

use crate::core::errors::ConfigError;
use crate::core::state::State;

/// States sharing every parameter except burn time, strictly increasing by burn time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Run {
    states: Vec<State>,
}

impl Run {
    /// Build a Run from already-grouped States. Sorts by burn time and rejects
    /// repeated times (zero elapsed) and members that differ in non-time fields.
    pub fn new(mut states: Vec<State>) -> Result<Self, ConfigError> {
        let Some(first) = states.first().cloned() else {
            return Err(ConfigError::Invalid("a run needs at least one state".into()));
        };
        for state in &states {
            if !first.same_except_burn_time(state)? {
                return Err(ConfigError::Invalid(format!(
                    "state {state} does not belong to run of {first}"
                )));
            }
        }
        states.sort_by(|a, b| a.burn_time().total_cmp(&b.burn_time()));
        let run = Self { states };
        run.check_increasing()?;
        Ok(run)
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The initial condition (time-zero member).
    pub fn initial(&self) -> &State {
        &self.states[0]
    }

    pub fn burn_times(&self) -> Vec<f64> {
        self.states.iter().map(State::burn_time).collect()
    }

    /// Label of the shared non-time parameters plus the initial State's digest.
    pub fn label(&self) -> String {
        let shared: Vec<String> = self
            .initial()
            .params()
            .iter()
            .filter(|p| p.name != crate::core::state::BURN_TIMES)
            .map(|p| format!("{}={}", p.name, p.value))
            .collect();
        if shared.is_empty() {
            format!("run #{}", self.initial().digest())
        } else {
            format!("run [{}] #{}", shared.join(", "), self.initial().digest())
        }
    }

    /// Elapsed time between consecutive members; errors on zero or negative gaps.
    pub fn check_increasing(&self) -> Result<(), ConfigError> {
        for pair in self.states.windows(2) {
            let (from, to) = (pair[0].burn_time(), pair[1].burn_time());
            if to - from <= 0.0 {
                return Err(ConfigError::NonIncreasingTime {
                    run: self.label(),
                    from,
                    to,
                });
            }
        }
        Ok(())
    }
}

/// Result of grouping: the Runs plus any dropped duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grouping {
    pub runs: Vec<Run>,
    /// Duplicates dropped in input order (first occurrence kept).
    pub duplicates: Vec<State>,
}

/// Partition `states` into Runs.
///
/// Runs appear in order of their first member; each State joins the first open
/// Run whose representative matches it in every field except burn time. Exact
/// duplicates are dropped with a warning. States with differing field shapes
/// are a fatal [`ConfigError::ParameterMismatch`].
pub fn group_runs<I>(states: I) -> Result<Grouping, ConfigError>
where
    I: IntoIterator<Item = State>,
{
    let mut open: Vec<Vec<State>> = Vec::new();
    let mut seen: HashSet<State> = HashSet::new();
    let mut duplicates = Vec::new();

    for state in states {
        if seen.contains(&state) {
            warn!(state = %state, "dropping duplicate state");
            duplicates.push(state);
            continue;
        }
        let mut placed = false;
        for members in &mut open {
            if members[0].same_except_burn_time(&state)? {
                members.push(state.clone());
                placed = true;
                break;
            }
        }
        if !placed {
            open.push(vec![state.clone()]);
        }
        seen.insert(state);
    }

    let runs = open.into_iter().map(Run::new).collect::<Result<Vec<_>, _>>()?;
    Ok(Grouping { runs, duplicates })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::BURN_TIMES;

    fn st(enrichment: f64, time: f64) -> State {
        State::new([("enrichment", enrichment), (BURN_TIMES, time)]).expect("state")
    }

    #[test]
    fn groups_by_non_time_fields_and_sorts_by_time() {
        let grouping = group_runs(vec![
            st(0.04, 300.0),
            st(0.05, 100.0),
            st(0.04, 0.0),
            st(0.05, 0.0),
            st(0.04, 100.0),
        ])
        .expect("group");

        assert_eq!(grouping.runs.len(), 2);
        assert_eq!(grouping.runs[0].burn_times(), vec![0.0, 100.0, 300.0]);
        assert_eq!(grouping.runs[1].burn_times(), vec![0.0, 100.0]);
        assert_eq!(grouping.runs[0].initial().get("enrichment"), Some(0.04));
        assert!(grouping.duplicates.is_empty());
    }

    #[test]
    fn grouping_is_a_partition() {
        let input: Vec<State> = [0.01, 0.02, 0.03]
            .iter()
            .flat_map(|e| [0.0, 10.0, 20.0].map(|t| st(*e, t)))
            .rev()
            .collect();
        let grouping = group_runs(input.clone()).expect("group");

        let mut flattened: Vec<State> = grouping
            .runs
            .iter()
            .flat_map(|run| run.states().to_vec())
            .collect();
        assert_eq!(flattened.len(), input.len());
        for state in &input {
            let position = flattened.iter().position(|s| s == state).expect("present");
            flattened.remove(position);
        }
        assert!(flattened.is_empty());
        for run in &grouping.runs {
            assert!(run.burn_times().windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn duplicates_are_dropped_first_seen_wins() {
        let grouping = group_runs(vec![st(0.04, 0.0), st(0.04, 100.0), st(0.04, 0.0)])
            .expect("group");
        assert_eq!(grouping.runs.len(), 1);
        assert_eq!(grouping.runs[0].len(), 2);
        assert_eq!(grouping.duplicates, vec![st(0.04, 0.0)]);
    }

    #[test]
    fn mismatched_shapes_are_fatal() {
        let other = State::new([(BURN_TIMES, 0.0)]).expect("state");
        let err = group_runs(vec![st(0.04, 0.0), other]).unwrap_err();
        assert!(matches!(err, ConfigError::ParameterMismatch { .. }));
    }

    #[test]
    fn run_new_rejects_repeated_times() {
        let err = Run::new(vec![st(0.04, 10.0), st(0.04, 10.0)]).unwrap_err();
        assert!(matches!(err, ConfigError::NonIncreasingTime { .. }));
    }

    #[test]
    fn empty_input_yields_no_runs() {
        let grouping = group_runs(Vec::new()).expect("group");
        assert!(grouping.runs.is_empty());
    }
}
