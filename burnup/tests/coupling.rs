//! Engine-level tests driving whole Runs through mock solvers.
//!
//! The mocks read the decks the adapters write and answer with real artifacts,
//! so these tests cover materialization, resume checks, retries and the
//! library fold together.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use burnup::core::errors::{ConfigError, SolverError, Stage};
use burnup::core::flux::{FLUX_PARAM, FluxSource};
use burnup::core::grouping::{Run, group_runs};
use burnup::core::material::MaterialId;
use burnup::core::state::BURN_TIMES;
use burnup::engine::{CouplingEngine, Solvers};
use burnup::io::config::{Perturbation, RunControl, XsSourceConfig};
use burnup::io::solver::Solver;
use burnup::io::transmutation::{TAPE5, TAPE9, read_tape5};
use burnup::io::xs_data::{CrossSectionData, XsRecord, XsSources};
use burnup::test_support::{
    FlakyTransmutation, MockTransmutation, MockTransport, run_control, state, states_at,
    temp_build_dir, test_xs_data,
};

fn engine_with(
    cfg: RunControl,
    transmutation: Arc<dyn Solver>,
) -> (CouplingEngine, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::default());
    let engine = CouplingEngine::new(
        cfg,
        test_xs_data(),
        Solvers {
            transport: transport.clone(),
            transmutation,
        },
    )
    .expect("engine");
    (engine, transport)
}

fn run_at(times: &[f64]) -> Run {
    Run::new(states_at(times)).expect("run")
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-9, "{actual:?} vs {expected:?}");
    }
}

/// Burning over `[0, 100, 300]` yields one entry per State in every Library,
/// with cumulative time and burnup.
#[test]
fn scenario_accumulates_time_and_burnup() {
    let temp = temp_build_dir();
    let transmutation = Arc::new(MockTransmutation::default());
    let (mut engine, transport) = engine_with(run_control(temp.path()), transmutation.clone());

    let libs = engine.run(&run_at(&[0.0, 100.0, 300.0])).expect("run");

    assert!(libs.is_consistent());
    assert_eq!(libs.steps(), 3);
    for id in [
        MaterialId::Fuel,
        MaterialId::Nuclide("U235".into()),
        MaterialId::Nuclide("U238".into()),
    ] {
        let lib = libs.get(&id).expect("library");
        assert_close(&lib.time, &[0.0, 100.0, 300.0]);
        assert_close(&lib.burnup, &[0.0, 1.0, 3.0]);
        assert_eq!(lib.nuclide_mass["U235"].len(), 3);
    }
    let probe = libs.get(&MaterialId::Nuclide("U235".into())).expect("probe");
    assert!((probe.nuclide_mass["U235"][0] - 1000.0).abs() < 1e-9);
    assert!(probe.nuclide_mass["U235"][2] < probe.nuclide_mass["U235"][1]);

    assert_eq!(transport.invocations(), 2);
    assert_eq!(transmutation.invocations(), 6);
    assert_eq!(engine.stats().steps_computed, 2);
}

#[test]
fn single_state_run_never_calls_solvers() {
    let temp = temp_build_dir();
    let transmutation = Arc::new(MockTransmutation::default());
    let (mut engine, transport) = engine_with(run_control(temp.path()), transmutation.clone());

    let libs = engine.run(&run_at(&[0.0])).expect("run");

    assert_eq!(libs.steps(), 1);
    let fuel = libs.get(&MaterialId::Fuel).expect("fuel");
    assert_eq!(fuel.time, vec![0.0]);
    assert!((fuel.nuclide_mass["U235"][0] - 40.0).abs() < 1e-9);
    assert_eq!(transport.invocations(), 0);
    assert_eq!(transmutation.invocations(), 0);
}

/// Two transient failures, then success: three calls for the one material.
#[test]
fn transient_transmutation_failures_are_retried() {
    let temp = temp_build_dir();
    let mut cfg = run_control(temp.path());
    cfg.track_nucs = Vec::new();
    let flaky = Arc::new(FlakyTransmutation::new(2));
    let (mut engine, _) = engine_with(cfg, flaky.clone());

    let libs = engine.run(&run_at(&[0.0, 100.0])).expect("run");

    assert_eq!(flaky.invocations(), 3);
    assert_eq!(engine.stats().transmutation_invocations, 3);
    assert_eq!(libs.steps(), 2);
}

#[test]
fn exhausted_retries_fail_the_run_with_a_solver_error() {
    let temp = temp_build_dir();
    let mut cfg = run_control(temp.path());
    cfg.track_nucs = Vec::new();
    let failing = Arc::new(FlakyTransmutation::always_failing());
    let (mut engine, _) = engine_with(cfg, failing.clone());

    let err = engine.run(&run_at(&[0.0, 100.0])).unwrap_err();

    assert_eq!(failing.invocations(), 3);
    let solver = err.downcast_ref::<SolverError>().expect("solver error");
    assert_eq!(solver.stage, Stage::Transmutation);
    assert_eq!(solver.attempts, 3);
    assert_eq!(solver.material, "fuel");
    assert!(solver.state.contains("burn_times=100"), "{}", solver.state);
}

/// A State shared by two Runs is computed once; the second Run folds the cached step.
#[test]
fn shared_state_is_served_from_the_cache() {
    let temp = temp_build_dir();
    let transmutation = Arc::new(MockTransmutation::default());
    let (mut engine, transport) = engine_with(run_control(temp.path()), transmutation.clone());

    let short = engine.run(&run_at(&[0.0, 100.0])).expect("short run");
    let long = engine.run(&run_at(&[0.0, 100.0, 300.0])).expect("long run");

    assert_eq!(transport.invocations(), 2);
    assert_eq!(transmutation.invocations(), 6);
    assert_eq!(engine.stats().cache_hits, 1);
    let fuel_short = short.get(&MaterialId::Fuel).expect("fuel");
    let fuel_long = long.get(&MaterialId::Fuel).expect("fuel");
    assert_eq!(fuel_short.burnup[1], fuel_long.burnup[1]);
    assert_eq!(fuel_short.materials[1], fuel_long.materials[1]);
}

/// A second execution over the same build directory reuses every artifact.
#[test]
fn rerun_over_existing_build_dir_invokes_nothing() {
    let temp = temp_build_dir();
    let run = run_at(&[0.0, 100.0, 300.0]);

    let first_mock = Arc::new(MockTransmutation::default());
    let (mut first, _) = engine_with(run_control(temp.path()), first_mock.clone());
    let expected = first.run(&run).expect("first run");

    let second_mock = Arc::new(MockTransmutation::default());
    let (mut second, transport) = engine_with(run_control(temp.path()), second_mock.clone());
    let actual = second.run(&run).expect("second run");

    assert_eq!(transport.invocations(), 0);
    assert_eq!(second_mock.invocations(), 0);
    assert_eq!(second.stats().transport_invocations, 0);
    assert_eq!(
        serde_json::to_string(&actual).expect("json"),
        serde_json::to_string(&expected).expect("json")
    );
}

#[test]
fn worker_count_does_not_change_results() {
    let run = run_at(&[0.0, 100.0, 300.0]);
    let results: Vec<_> = [1, 4]
        .into_iter()
        .map(|workers| {
            let temp = temp_build_dir();
            let mut cfg = run_control(temp.path());
            cfg.workers = workers;
            cfg.track_nucs = vec!["U235".into(), "U238".into(), "Pu239".into()];
            let (mut engine, _) = engine_with(cfg, Arc::new(MockTransmutation::default()));
            engine.run(&run).expect("run")
        })
        .collect();
    assert_eq!(results[0], results[1]);
}

#[test]
fn run_all_reports_per_run_summaries() {
    let temp = temp_build_dir();
    let (mut engine, _) = engine_with(
        run_control(temp.path()),
        Arc::new(MockTransmutation::default()),
    );
    let grouping = group_runs([
        state(&[("fuel_density", 10.0), ("burn_times", 0.0)]),
        state(&[("fuel_density", 10.0), ("burn_times", 50.0)]),
        state(&[("fuel_density", 11.0), ("burn_times", 0.0)]),
        state(&[("fuel_density", 11.0), ("burn_times", 50.0)]),
    ])
    .expect("grouping");
    assert_eq!(grouping.runs.len(), 2);

    let mut seen = Vec::new();
    let summaries = engine
        .run_all(&grouping.runs, |report| {
            assert!(report.libraries.is_consistent());
            seen.push(report.summary.label.clone());
            Ok(())
        })
        .expect("run all");

    assert_eq!(summaries.len(), 2);
    assert_eq!(seen.len(), 2);
    for summary in &summaries {
        assert_eq!(summary.burn_times, vec![0.0, 50.0]);
        assert_eq!(summary.transport_invocations, 1);
        assert_eq!(summary.cache_hits, 0);
    }
}

#[test]
fn grouping_partitions_by_non_time_fields() {
    let grouping = group_runs([
        state(&[("temperature", 600.0), ("burn_times", 100.0)]),
        state(&[("temperature", 900.0), ("burn_times", 0.0)]),
        state(&[("temperature", 600.0), ("burn_times", 0.0)]),
        state(&[("temperature", 600.0), ("burn_times", 100.0)]),
    ])
    .expect("grouping");

    assert_eq!(grouping.runs.len(), 2);
    assert_eq!(grouping.duplicates.len(), 1);
    let total: usize = grouping.runs.iter().map(Run::len).sum();
    assert_eq!(total, 3);
    for run in &grouping.runs {
        let times = run.burn_times();
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }
}

/// Run control whose flux comes from a `flux` parameter on every State.
fn state_flux_control(root: &std::path::Path, fluxes: Vec<f64>) -> RunControl {
    let mut cfg = run_control(root);
    cfg.flux = FluxSource::State;
    cfg.perturbations = vec![
        Perturbation {
            name: FLUX_PARAM.to_string(),
            values: fluxes,
        },
        Perturbation {
            name: BURN_TIMES.to_string(),
            values: vec![0.0, 100.0],
        },
    ];
    cfg
}

/// Each step irradiates at the flux carried by its State.
#[test]
fn state_flux_reaches_the_irradiation_card() {
    let temp = temp_build_dir();
    let cfg = state_flux_control(temp.path(), vec![2e14]);
    let grouping = group_runs(cfg.states().expect("states")).expect("grouping");
    let transmutation = Arc::new(MockTransmutation::default());
    let (mut engine, transport) = engine_with(cfg, transmutation.clone());

    let summaries = engine.run_all(&grouping.runs, |_| Ok(())).expect("run all");

    assert_eq!(summaries.len(), 1);
    assert_eq!(transport.invocations(), 1);
    let burned = state(&[(FLUX_PARAM, 2e14), (BURN_TIMES, 100.0)]);
    assert_eq!(engine.cached(&burned).expect("cached").flux, 2e14);
    let card = engine
        .layout()
        .transmutation_dir(&burned, &MaterialId::Fuel)
        .join(TAPE5);
    let irradiation = read_tape5(&card).expect("tape5");
    assert_eq!(irradiation.flux, 2e14);
    assert_eq!(irradiation.days, 100.0);
}

#[test]
fn non_positive_state_flux_fails_before_any_solver() {
    let temp = temp_build_dir();
    let transmutation = Arc::new(MockTransmutation::default());
    let (mut engine, transport) = engine_with(
        state_flux_control(temp.path(), vec![2e14]),
        transmutation.clone(),
    );
    let run = Run::new(vec![
        state(&[(FLUX_PARAM, 0.0), (BURN_TIMES, 0.0)]),
        state(&[(FLUX_PARAM, 0.0), (BURN_TIMES, 100.0)]),
    ])
    .expect("run");

    let err = engine.run(&run).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::InvalidFluxSource(_))
    ));
    assert_eq!(transport.invocations(), 0);
    assert_eq!(transmutation.invocations(), 0);
}

#[test]
fn non_positive_state_flux_is_rejected_at_construction() {
    let temp = temp_build_dir();
    let err = CouplingEngine::new(
        state_flux_control(temp.path(), vec![3e14, -1.0]),
        test_xs_data(),
        Solvers {
            transport: Arc::new(MockTransport::default()),
            transmutation: Arc::new(MockTransmutation::default()),
        },
    )
    .err()
    .expect("error");
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::InvalidFluxSource(_))
    ));
}

/// Pu239 is only in the `fast` source, so its one-group value comes from the
/// `fast` tally rather than the general flux.
#[test]
fn secondary_source_feeds_transmutation_cross_sections() {
    let temp = temp_build_dir();
    let mut cfg = run_control(temp.path());
    cfg.track_nucs.push("Pu239".to_string());
    cfg.transport.sources.push(XsSourceConfig {
        label: "fast".to_string(),
        path: PathBuf::from("fast.json"),
        energy_bins: vec![0.0, 100.0, 1000.0],
    });
    let fast = CrossSectionData::from_records(vec![XsRecord {
        nuclide: "Pu239".to_string(),
        reaction: "fission".to_string(),
        temperature: 600.0,
        xs: vec![2.0, 6.0],
    }])
    .expect("fast xs");
    let xs = XsSources::from(test_xs_data()).with_source("fast", fast);
    let transport = Arc::new(MockTransport::default().with_spectrum("fast", vec![1.0, 3.0]));
    let mut engine = CouplingEngine::new(
        cfg,
        xs,
        Solvers {
            transport: transport.clone(),
            transmutation: Arc::new(MockTransmutation::default()),
        },
    )
    .expect("engine");

    engine.run(&run_at(&[0.0, 100.0])).expect("run");

    let burned = state(&[(BURN_TIMES, 100.0)]);
    let tape9 = fs::read_to_string(
        engine
            .layout()
            .transmutation_dir(&burned, &MaterialId::Fuel)
            .join(TAPE9),
    )
    .expect("tape9");
    let pu: f64 = tape9
        .lines()
        .find_map(|l| l.strip_prefix("Pu239 fission "))
        .expect("Pu239 line")
        .parse()
        .expect("value");
    assert!((pu - 3.0).abs() < 1e-12, "{tape9}");
    assert!(tape9.contains("U235 fission "), "{tape9}");
}
