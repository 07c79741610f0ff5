//! Per-material transmutation fan-out.
//!
//! At fixed flux the fuel and every tracked-nuclide probe evolve independently,
//! so one step's transmutation calls can run on a worker pool. Results are only
//! returned once every material has finished; a failure in one worker never
//! yields a partial map.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, instrument};

use crate::core::library::StepResult;
use crate::core::material::{Material, MaterialId};
use crate::core::state::State;
use crate::io::solver::Solver;
use crate::io::transmutation::{TransmutationAdapter, TransmutationJob, TransmutationOutcome};

/// Shared inputs of one step's fan-out.
#[derive(Debug, Clone, Copy)]
pub struct StepInputs<'a> {
    pub state: &'a State,
    pub elapsed: f64,
    pub flux: f64,
    pub xs: &'a BTreeMap<(String, String), f64>,
}

/// Every material's result for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutResult {
    pub steps: BTreeMap<MaterialId, StepResult>,
    /// Solver calls made, retries included.
    pub invocations: usize,
}

/// Runs materials sequentially (1 worker) or on a fixed-size pool.
pub struct FanOut {
    workers: usize,
    pool: Option<ThreadPool>,
}

impl FanOut {
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = if workers > 1 {
            Some(
                ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("burnup-worker-{i}"))
                    .build()
                    .context("build transmutation worker pool")?,
            )
        } else {
            None
        };
        Ok(Self { workers, pool })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Transmute every material in `materials` over one interval.
    ///
    /// With one worker, materials run in identifier order and the first failure
    /// stops the step. With a pool, every call runs to completion and the
    /// failure of the lowest identifier is reported.
    #[instrument(skip_all, fields(state = %inputs.state, workers = self.workers, materials = materials.len()))]
    pub fn run_materials(
        &self,
        adapter: &TransmutationAdapter<'_>,
        solver: &dyn Solver,
        inputs: &StepInputs<'_>,
        materials: &BTreeMap<MaterialId, Material>,
    ) -> Result<FanOutResult> {
        let jobs: Vec<TransmutationJob<'_>> = materials
            .iter()
            .map(|(id, material)| TransmutationJob {
                state: inputs.state,
                id,
                material,
                elapsed: inputs.elapsed,
                flux: inputs.flux,
                xs: inputs.xs,
            })
            .collect();

        // Collecting into `Result` keeps identifier order, so the reported
        // failure is the one with the lowest id.
        let outcomes: Vec<TransmutationOutcome> = match &self.pool {
            None => jobs
                .iter()
                .map(|job| adapter.solve(solver, job))
                .collect::<Result<_>>()?,
            Some(pool) => {
                let results: Vec<Result<TransmutationOutcome>> = pool.install(|| {
                    jobs.par_iter()
                        .map(|job| adapter.solve(solver, job))
                        .collect()
                });
                results.into_iter().collect::<Result<_>>()?
            }
        };

        let mut steps = BTreeMap::new();
        let mut invocations = 0;
        for (job, outcome) in jobs.iter().zip(outcomes) {
            invocations += outcome.attempts as usize;
            steps.insert(job.id.clone(), outcome.step);
        }
        debug!(invocations, "fan-out complete");
        Ok(FanOutResult { steps, invocations })
    }
}
