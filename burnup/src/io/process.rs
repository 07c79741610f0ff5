//! Solver subprocesses: bounded wall time, bounded captured output.

use std::io::{self, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// One captured stream. Bytes past the limit are drained and counted, never kept.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamCapture {
    pub bytes: Vec<u8>,
    pub dropped: u64,
}

impl StreamCapture {
    fn read_bounded<R: Read>(mut reader: R, limit: usize) -> io::Result<Self> {
        let mut bytes = Vec::new();
        (&mut reader).take(limit as u64).read_to_end(&mut bytes)?;
        let dropped = io::copy(&mut reader, &mut io::sink())?;
        Ok(Self { bytes, dropped })
    }

    fn append_to(&self, log: &mut String, label: &str, stream: &str) {
        log.push_str(&format!("=== {stream} ===\n"));
        log.push_str(&String::from_utf8_lossy(&self.bytes));
        if self.dropped > 0 {
            log.push_str(&format!("\n[{label} {stream} truncated {} bytes]\n", self.dropped));
        }
    }
}

/// How a solver process ended.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    /// The process was killed at the deadline.
    pub timed_out: bool,
    pub stdout: StreamCapture,
    pub stderr: StreamCapture,
}

impl ProcessOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Both streams as the body of a `<stage>.log` file.
    pub fn render_log(&self, label: &str) -> String {
        let mut log = String::new();
        self.stdout.append_to(&mut log, label, "stdout");
        log.push('\n');
        self.stderr.append_to(&mut log, label, "stderr");
        if self.timed_out {
            log.push_str(&format!("\n[{label} timed out]\n"));
        }
        log
    }
}

/// Spawn `cmd`, wait at most `timeout`, and capture up to `output_limit_bytes`
/// of each stream.
///
/// Solvers read their inputs from the working directory, so stdin is closed.
/// Both pipes are drained on their own threads while the child runs.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_bounded(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| {
        error!(err = %e, "failed to spawn solver");
        anyhow::Error::from(e).context("spawn solver")
    })?;
    debug!(pid = child.id(), "solver spawned");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("solver stdout not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("solver stderr not piped"))?;
    let stdout = thread::spawn(move || StreamCapture::read_bounded(stdout, output_limit_bytes));
    let stderr = thread::spawn(move || StreamCapture::read_bounded(stderr, output_limit_bytes));

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for solver")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "solver over deadline, killing");
            child.kill().context("kill solver")?;
            (child.wait().context("reap killed solver")?, true)
        }
    };

    let output = ProcessOutput {
        status,
        timed_out,
        stdout: join_capture(stdout, "stdout")?,
        stderr: join_capture(stderr, "stderr")?,
    };
    if output.stdout.dropped > 0 || output.stderr.dropped > 0 {
        warn!(
            stdout_dropped = output.stdout.dropped,
            stderr_dropped = output.stderr.dropped,
            "solver output truncated"
        );
    }
    debug!(exit_code = ?status.code(), timed_out, "solver exited");
    Ok(output)
}

fn join_capture(
    handle: JoinHandle<io::Result<StreamCapture>>,
    stream: &str,
) -> Result<StreamCapture> {
    handle
        .join()
        .map_err(|_| anyhow!("{stream} reader panicked"))?
        .with_context(|| format!("read solver {stream}"))
}
