//! Coupling engine: drives transport and transmutation through every Run.
//!
//! The engine is an explicit context object. It owns the State cache and the
//! in-progress Libraries for one execution, so two engines never share state.
//!
//! Per (Run, index) a step moves through
//! `NotStarted -> TransportPending -> TransportDone -> TransmutationPending ->
//! StepComplete`; a cache hit jumps straight to `StepComplete`. After the last
//! index the engine is `RunComplete`. Index 0 is the initial condition and is
//! never transmuted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::core::errors::ConfigError;
use crate::core::flux::flux_magnitude;
use crate::core::grouping::Run;
use crate::core::library::{LibrarySet, StepResult};
use crate::core::material::MaterialId;
use crate::core::state::State;
use crate::fanout::{FanOut, StepInputs};
use crate::io::config::RunControl;
use crate::io::layout::BuildLayout;
use crate::io::manifest::RunSummary;
use crate::io::solver::{CommandSolver, Solver};
use crate::io::transmutation::TransmutationAdapter;
use crate::io::transport::{ScenarioContext, TransportAdapter};
use crate::io::xs_data::{FISSION, XsSources};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepPhase {
    NotStarted,
    TransportPending,
    TransportDone,
    TransmutationPending,
    StepComplete,
    RunComplete,
}

/// The two external solvers.
#[derive(Clone)]
pub struct Solvers {
    pub transport: Arc<dyn Solver>,
    pub transmutation: Arc<dyn Solver>,
}

impl Solvers {
    /// Subprocess solvers from the configured command lines.
    pub fn from_config(cfg: &RunControl) -> Result<Self> {
        Ok(Self {
            transport: Arc::new(CommandSolver::from_command_line(&cfg.transport.command)?),
            transmutation: Arc::new(CommandSolver::from_command_line(
                &cfg.transmutation.command_line(),
            )?),
        })
    }
}

/// Combined result of one computed State.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedStep {
    pub k: f64,
    pub k_err: f64,
    /// Total flux magnitude used for the interval.
    pub flux: f64,
    pub steps: BTreeMap<MaterialId, StepResult>,
}

/// Counters over the engine's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub transport_invocations: usize,
    /// Including retries.
    pub transmutation_invocations: usize,
    pub cache_hits: usize,
    pub steps_computed: usize,
}

/// A finished Run handed to the caller.
pub struct RunReport<'a> {
    pub run: &'a Run,
    pub libraries: &'a LibrarySet,
    pub summary: RunSummary,
}

struct EngineContext {
    config: RunControl,
    xs_data: XsSources,
    layout: BuildLayout,
    solvers: Solvers,
    fanout: FanOut,
}

pub struct CouplingEngine {
    ctx: EngineContext,
    cache: HashMap<State, CachedStep>,
    stats: EngineStats,
    phase: StepPhase,
}

impl CouplingEngine {
    pub fn new(
        config: RunControl,
        xs_data: impl Into<XsSources>,
        solvers: Solvers,
    ) -> Result<Self> {
        config.validate()?;
        let xs_data = xs_data.into();
        check_sources(&config, &xs_data)?;
        let layout = BuildLayout::new(config.build_dir());
        let fanout = FanOut::new(config.workers)?;
        Ok(Self {
            ctx: EngineContext {
                config,
                xs_data,
                layout,
                solvers,
                fanout,
            },
            cache: HashMap::new(),
            stats: EngineStats::default(),
            phase: StepPhase::NotStarted,
        })
    }

    pub fn config(&self) -> &RunControl {
        &self.ctx.config
    }

    pub fn layout(&self) -> &BuildLayout {
        &self.ctx.layout
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    pub fn cached(&self, state: &State) -> Option<&CachedStep> {
        self.cache.get(state)
    }

    /// Reject Runs the configuration cannot drive, before any solver runs.
    pub fn check_runs(&self, runs: &[Run]) -> Result<(), ConfigError> {
        let flux = &self.ctx.config.flux;
        for run in runs {
            run.check_increasing()?;
            flux.validate(&run.initial().field_names())?;
            for state in run.states() {
                flux.check_state(state)?;
            }
        }
        Ok(())
    }

    /// Drive one Run to completion and return its Libraries.
    ///
    /// A failure aborts this Run only; the cache keeps every step completed so far.
    #[instrument(skip_all, fields(run = %run.label(), states = run.len()))]
    pub fn run(&mut self, run: &Run) -> Result<LibrarySet> {
        self.check_runs(std::slice::from_ref(run))?;
        let ctx = &self.ctx;
        let cfg = &ctx.config;
        let transport = TransportAdapter::new(cfg, &ctx.xs_data, &ctx.layout);
        let transmutation = TransmutationAdapter::new(
            &cfg.transmutation,
            &ctx.layout,
            cfg.fuel.atoms_per_molecule,
        );
        let mut libraries = LibrarySet::new(cfg.initial_materials(), &cfg.track_nucs);
        info!("starting run");

        for (offset, pair) in run.states().windows(2).enumerate() {
            let index = offset + 1;
            let (prev, state) = (&pair[0], &pair[1]);
            let elapsed = state.burn_time() - prev.burn_time();
            self.phase = StepPhase::NotStarted;

            if let Some(cached) = self.cache.get(state) {
                debug!(index, state = %state, "cache hit");
                libraries.fold_step(&cached.steps).map_err(|e| anyhow!(e))?;
                self.stats.cache_hits += 1;
                self.phase = StepPhase::StepComplete;
                continue;
            }

            self.phase = StepPhase::TransportPending;
            let fuel = libraries
                .get(&MaterialId::Fuel)
                .map(|lib| lib.current().clone())
                .ok_or_else(|| anyhow!("run has no fuel library"))?;
            let outcome = transport.solve(ctx.solvers.transport.as_ref(), state, &fuel)?;
            if outcome.invoked {
                self.stats.transport_invocations += 1;
            }
            self.phase = StepPhase::TransportDone;

            let temperature = ScenarioContext::resolve(cfg, state).temperature;
            let fuel_nucs: Vec<String> = fuel.comp.keys().cloned().collect();
            let fission: BTreeMap<String, f64> = ctx
                .xs_data
                .table_for(&fuel_nucs, &[FISSION], temperature)
                .iter()
                .filter_map(|e| Some((e.nuclide.clone(), outcome.result.collapse(e)?)))
                .collect();
            let flux = flux_magnitude(&cfg.flux, state, &fuel, &fission)?;
            let xs = outcome.result.one_group();

            self.phase = StepPhase::TransmutationPending;
            let inputs = StepInputs {
                state,
                elapsed,
                flux,
                xs: &xs,
            };
            let fanned = ctx.fanout.run_materials(
                &transmutation,
                ctx.solvers.transmutation.as_ref(),
                &inputs,
                &libraries.current_materials(),
            )?;
            self.stats.transmutation_invocations += fanned.invocations;

            libraries.fold_step(&fanned.steps).map_err(|e| anyhow!(e))?;
            debug!(index, state = %state, k = outcome.result.k, flux, "step complete");
            self.cache.insert(
                state.clone(),
                CachedStep {
                    k: outcome.result.k,
                    k_err: outcome.result.k_err,
                    flux,
                    steps: fanned.steps,
                },
            );
            self.stats.steps_computed += 1;
            self.phase = StepPhase::StepComplete;
        }

        self.phase = StepPhase::RunComplete;
        info!(steps = libraries.steps(), "run complete");
        Ok(libraries)
    }

    /// Drive every Run in order, handing each finished Run to `on_run`.
    ///
    /// All Runs are checked before the first solver call. The first failure
    /// stops the execution; Runs already handed to `on_run` are unaffected.
    pub fn run_all<F>(&mut self, runs: &[Run], mut on_run: F) -> Result<Vec<RunSummary>>
    where
        F: FnMut(RunReport<'_>) -> Result<()>,
    {
        self.check_runs(runs)?;
        let mut summaries = Vec::with_capacity(runs.len());
        for run in runs {
            let before = self.stats;
            let libraries = self.run(run)?;
            let after = self.stats;
            let summary = RunSummary {
                label: run.label(),
                digest: run.initial().digest(),
                burn_times: run.burn_times(),
                states: run.states().iter().map(State::digest).collect(),
                cache_hits: after.cache_hits - before.cache_hits,
                transport_invocations: after.transport_invocations - before.transport_invocations,
                transmutation_invocations: after.transmutation_invocations
                    - before.transmutation_invocations,
                outputs: Vec::new(),
            };
            on_run(RunReport {
                run,
                libraries: &libraries,
                summary: summary.clone(),
            })?;
            summaries.push(summary);
        }
        Ok(summaries)
    }
}

/// Every data source must match the group structure of the tally it is collapsed with.
fn check_sources(config: &RunControl, xs_data: &XsSources) -> Result<(), ConfigError> {
    let groups = config.group_structure.len() - 1;
    if let Some(found) = xs_data.primary().group_count()
        && found != groups
    {
        return Err(ConfigError::Invalid(format!(
            "cross sections have {found} groups but group_structure defines {groups}"
        )));
    }
    let labels: Vec<&str> = xs_data.secondary().iter().map(|(l, _)| l.as_str()).collect();
    let configured: Vec<&str> = config
        .transport
        .sources
        .iter()
        .map(|s| s.label.as_str())
        .collect();
    if labels != configured {
        return Err(ConfigError::Invalid(format!(
            "loaded cross-section sources {labels:?} do not match transport.sources {configured:?}"
        )));
    }
    for ((label, data), source) in xs_data.secondary().iter().zip(&config.transport.sources) {
        let groups = source.energy_bins.len() - 1;
        if let Some(found) = data.group_count()
            && found != groups
        {
            return Err(ConfigError::Invalid(format!(
                "cross-section source `{label}` has {found} groups but its energy_bins define {groups}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::BURN_TIMES;
    use crate::test_support::{MockTransmutation, MockTransport, run_control, test_xs_data};

    fn engine(
        dir: &std::path::Path,
    ) -> (CouplingEngine, Arc<MockTransport>, Arc<MockTransmutation>) {
        let transport = Arc::new(MockTransport::default());
        let transmutation = Arc::new(MockTransmutation::default());
        let engine = CouplingEngine::new(
            run_control(dir),
            test_xs_data(),
            Solvers {
                transport: transport.clone(),
                transmutation: transmutation.clone(),
            },
        )
        .expect("engine");
        (engine, transport, transmutation)
    }

    fn run(times: &[f64]) -> Run {
        Run::new(
            times
                .iter()
                .map(|t| State::new([(BURN_TIMES, *t)]).expect("state"))
                .collect(),
        )
        .expect("run")
    }

    #[test]
    fn single_state_run_has_only_time_zero() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut engine, transport, transmutation) = engine(temp.path());
        let libs = engine.run(&run(&[0.0])).expect("run");

        assert_eq!(libs.steps(), 1);
        assert!(libs.is_consistent());
        assert_eq!(transport.invocations(), 0);
        assert_eq!(transmutation.invocations(), 0);
        assert_eq!(engine.phase(), StepPhase::RunComplete);
    }

    #[test]
    fn computed_steps_are_cached_by_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut engine, transport, _) = engine(temp.path());
        engine.run(&run(&[0.0, 10.0])).expect("run");

        let state = State::new([(BURN_TIMES, 10.0)]).expect("state");
        let cached = engine.cached(&state).expect("cached");
        assert_eq!(cached.steps.len(), 3);
        assert!(cached.flux > 0.0);
        assert_eq!(transport.invocations(), 1);
        assert_eq!(engine.stats().steps_computed, 1);
    }

    #[test]
    fn group_count_mismatch_is_a_config_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cfg = run_control(temp.path());
        cfg.group_structure = vec![0.0, 1.0];
        let err = CouplingEngine::new(
            cfg,
            test_xs_data(),
            Solvers {
                transport: Arc::new(MockTransport::default()),
                transmutation: Arc::new(MockTransmutation::default()),
            },
        )
        .err()
        .expect("error");
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn unconfigured_secondary_source_is_a_config_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let xs = XsSources::from(test_xs_data()).with_source("fast", test_xs_data());
        let err = CouplingEngine::new(
            run_control(temp.path()),
            xs,
            Solvers {
                transport: Arc::new(MockTransport::default()),
                transmutation: Arc::new(MockTransmutation::default()),
            },
        )
        .err()
        .expect("error");
        let config = err.downcast_ref::<ConfigError>().expect("config error");
        assert!(config.to_string().contains("transport.sources"), "{config}");
    }
}
