//! Solver abstraction for external physics codes.
//!
//! The [`Solver`] trait decouples the coupling engine from the actual transport
//! and transmutation executables. An implementation runs once in a prepared
//! working directory and must leave its output artifact there; everything else
//! (input materialization, resume checks, retries, parsing) belongs to the
//! adapters in [`crate::io::transport`] and [`crate::io::transmutation`].
//! Tests use deterministic solvers from `test_support` that write artifacts
//! without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::errors::Stage;
use crate::io::process::run_bounded;

/// Parameters for one solver invocation.
#[derive(Debug, Clone)]
pub struct SolverRequest {
    pub stage: Stage,
    /// Working directory holding the solver's inputs; outputs land here too.
    pub workdir: PathBuf,
    /// Where captured stdout/stderr is written.
    pub log_path: PathBuf,
    pub timeout: Duration,
    /// Truncate solver output logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl SolverRequest {
    pub fn new(stage: Stage, workdir: &Path, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            stage,
            workdir: workdir.to_path_buf(),
            log_path: workdir.join(format!("{stage}.log")),
            timeout,
            output_limit_bytes,
        }
    }
}

/// Abstraction over solver backends.
pub trait Solver: Send + Sync {
    /// Run the solver once in `request.workdir`. Must write its output artifact there.
    fn exec(&self, request: &SolverRequest) -> Result<()>;
}

/// Solver that spawns a configured command line inside the working directory.
#[derive(Debug, Clone)]
pub struct CommandSolver {
    program: String,
    args: Vec<String>,
}

impl CommandSolver {
    /// Build from a command line (`[program, args...]`).
    pub fn from_command_line(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("solver command line is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Solver for CommandSolver {
    #[instrument(skip_all, fields(stage = %request.stage, program = %self.program))]
    fn exec(&self, request: &SolverRequest) -> Result<()> {
        info!(workdir = %request.workdir.display(), "starting solver");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&request.workdir);

        let output = run_bounded(cmd, request.timeout, request.output_limit_bytes)
            .with_context(|| format!("run {}", self.program))?;

        write_solver_log(
            &request.log_path,
            &output.render_log(&request.stage.to_string()),
            request.output_limit_bytes,
        )?;

        if output.succeeded() {
            debug!("solver completed successfully");
            return Ok(());
        }
        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "solver timed out");
            Err(anyhow!(
                "{} timed out after {:?}",
                self.program,
                request.timeout
            ))
        } else {
            warn!(exit_code = ?output.status.code(), "solver failed");
            Err(anyhow!(
                "{} failed with status {:?}",
                self.program,
                output.status.code()
            ))
        }
    }
}

/// Every attempt of a retried invocation failed.
#[derive(Debug)]
pub struct ExecFailure {
    pub attempts: u32,
    /// Error of the last attempt.
    pub last: anyhow::Error,
}

/// Invoke `solver` up to `max_attempts` times, stopping at the first success.
///
/// Returns the number of attempts made.
pub fn exec_with_retry(
    solver: &dyn Solver,
    request: &SolverRequest,
    max_attempts: u32,
) -> Result<u32, ExecFailure> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match solver.exec(request) {
            Ok(()) => return Ok(attempt),
            Err(err) if attempt < max_attempts => {
                warn!(
                    stage = %request.stage,
                    attempt,
                    max_attempts,
                    err = %format!("{err:#}"),
                    "solver attempt failed, retrying"
                );
                attempt += 1;
            }
            Err(err) => {
                return Err(ExecFailure {
                    attempts: attempt,
                    last: err,
                });
            }
        }
    }
}

fn write_solver_log(path: &Path, log: &str, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create solver log dir {}", parent.display()))?;
    }
    if log.len() > output_limit {
        let mut cut = output_limit;
        while !log.is_char_boundary(cut) {
            cut -= 1;
        }
        let truncated = format!("{}\n[truncated {} bytes]\n", &log[..cut], log.len() - cut);
        fs::write(path, truncated)
            .with_context(|| format!("write solver log {}", path.display()))?;
        return Ok(());
    }
    fs::write(path, log).with_context(|| format!("write solver log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSolver {
        failures: u32,
        calls: AtomicU32,
    }

    impl Solver for CountingSolver {
        fn exec(&self, _request: &SolverRequest) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(anyhow!("transient failure {call}"));
            }
            Ok(())
        }
    }

    fn request(dir: &Path) -> SolverRequest {
        SolverRequest::new(Stage::Transmutation, dir, Duration::from_secs(1), 1000)
    }

    /// Verifies a solver that fails twice succeeds on the third attempt.
    #[test]
    fn retry_stops_at_first_success() {
        let temp = tempfile::tempdir().expect("tempdir");
        let solver = CountingSolver {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let attempts = exec_with_retry(&solver, &request(temp.path()), 3).expect("retry");
        assert_eq!(attempts, 3);
        assert_eq!(solver.calls.load(Ordering::SeqCst), 3);
    }

    /// Verifies exhaustion reports the attempt count and the last error.
    #[test]
    fn retry_gives_up_after_max_attempts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let solver = CountingSolver {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let failure = exec_with_retry(&solver, &request(temp.path()), 3).unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(failure.last.to_string().contains("transient failure 3"));
        assert_eq!(solver.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn request_logs_next_to_inputs() {
        let req = request(Path::new("/tmp/work"));
        assert_eq!(req.log_path, PathBuf::from("/tmp/work/transmutation.log"));
    }

    #[test]
    fn empty_command_line_is_rejected() {
        assert!(CommandSolver::from_command_line(&[]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_solver_writes_log_and_reports_exit_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let solver = CommandSolver::from_command_line(&[
            "sh".to_string(),
            "-c".to_string(),
            "echo running; exit 2".to_string(),
        ])
        .expect("solver");
        let req = request(temp.path());
        let err = solver.exec(&req).unwrap_err();
        assert!(err.to_string().contains("status Some(2)"));
        let log = fs::read_to_string(&req.log_path).expect("log");
        assert!(log.contains("running"));
    }

    #[cfg(unix)]
    #[test]
    fn command_solver_distinguishes_timeout_from_success() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sh = |script: &str| {
            CommandSolver::from_command_line(&[
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
            ])
            .expect("solver")
        };
        let mut req = request(temp.path());
        sh("exit 0").exec(&req).expect("success");

        req.timeout = Duration::from_millis(100);
        let err = sh("sleep 5").exec(&req).unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
    }
}
