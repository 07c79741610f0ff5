//! `burnup`: generate burnup libraries by coupling transport and transmutation solvers.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use burnup::core::errors::{ConfigError, ParseError, SolverError};
use burnup::core::grouping::group_runs;
use burnup::engine::{CouplingEngine, Solvers};
use burnup::exit_codes;
use burnup::io::config::{RunControl, load_config, write_config};
use burnup::io::manifest::{Manifest, write_manifest};
use burnup::io::writer::write_library_set;
use burnup::io::xs_data::XsSources;

#[derive(Parser)]
#[command(
    name = "burnup",
    version,
    about = "Burnup-criticality library generator"
)]
struct Cli {
    /// Run control file.
    #[arg(long, global = true, default_value = "burnup.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default run control file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the Runs the scenario set groups into.
    Runs,
    /// Execute every Run and write libraries into the build directory.
    Run {
        /// Override the transmutation worker count.
        #[arg(long)]
        workers: Option<usize>,
    },
}

fn main() {
    burnup::logging::init();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Runs => cmd_runs(&cli.config),
        Command::Run { workers } => cmd_run(&cli.config, workers),
    };
    if let Err(err) = result {
        eprintln!("{err:#}");
        std::process::exit(exit_code_for(&err));
    }
}

/// Map an error onto the CLI's exit codes by the first typed cause found.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.is::<SolverError>() {
            return exit_codes::SOLVER_FAILED;
        }
        if cause.is::<ParseError>() {
            return exit_codes::PARSE_FAILED;
        }
        if cause.is::<ConfigError>() {
            return exit_codes::INVALID;
        }
    }
    exit_codes::INVALID
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &RunControl::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

fn cmd_runs(path: &Path) -> Result<()> {
    let cfg = load_config(path)?;
    let grouping = group_runs(cfg.states()?)?;
    for state in &grouping.duplicates {
        eprintln!("warning: dropped duplicate state {state}");
    }
    for run in &grouping.runs {
        let times: Vec<String> = run.burn_times().iter().map(ToString::to_string).collect();
        println!("{}: burn_times [{}]", run.label(), times.join(", "));
    }
    Ok(())
}

fn cmd_run(path: &Path, workers: Option<usize>) -> Result<()> {
    let mut cfg = load_config(path)?;
    if let Some(workers) = workers {
        cfg.workers = workers;
        cfg.validate()?;
    }
    let grouping = group_runs(cfg.states()?)?;

    let xs_path = cfg.cross_sections_path().ok_or_else(|| {
        ConfigError::Invalid(
            "no cross-section data: set transport.cross_sections or $CROSS_SECTIONS".to_string(),
        )
    })?;
    let xs_data = XsSources::load(&xs_path, &cfg.transport.sources)?;
    let solvers = Solvers::from_config(&cfg)?;

    let formats = cfg.outputs.clone();
    let mut manifest = Manifest::new(&cfg.reactor, cfg.workers, Utc::now());
    manifest.duplicates = grouping.duplicates.iter().map(ToString::to_string).collect();

    let mut engine = CouplingEngine::new(cfg, xs_data, solvers)?;
    let layout = engine.layout().clone();
    fs::create_dir_all(layout.root())
        .with_context(|| format!("create build dir {}", layout.root().display()))?;
    let manifest_path = layout.manifest_path();
    write_manifest(&manifest_path, &manifest)?;

    engine.run_all(&grouping.runs, |report| {
        let dir = layout.run_dir(report.run);
        let written = write_library_set(&dir, report.libraries, &formats)?;
        let mut summary = report.summary;
        summary.outputs = written.iter().map(|p| p.display().to_string()).collect();
        println!(
            "{}: {} step(s), {} cache hit(s)",
            summary.label,
            report.libraries.steps(),
            summary.cache_hits
        );
        manifest.runs.push(summary);
        write_manifest(&manifest_path, &manifest)
    })?;

    manifest.finished_at = Some(Utc::now());
    write_manifest(&manifest_path, &manifest)?;
    let stats = engine.stats();
    info!(
        transport = stats.transport_invocations,
        transmutation = stats.transmutation_invocations,
        cache_hits = stats.cache_hits,
        duration_secs = ?manifest.duration_secs(),
        "execution complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["burnup", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.config, PathBuf::from("burnup.toml"));
    }

    #[test]
    fn parse_run_with_workers_and_config() {
        let cli = Cli::parse_from(["burnup", "--config", "x.toml", "run", "--workers", "4"]);
        assert!(matches!(cli.command, Command::Run { workers: Some(4) }));
        assert_eq!(cli.config, PathBuf::from("x.toml"));
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        let solver: anyhow::Error = SolverError {
            stage: burnup::core::errors::Stage::Transport,
            state: "s".into(),
            material: "-".into(),
            attempts: 1,
            detail: "boom".into(),
        }
        .into();
        assert_eq!(exit_code_for(&solver), exit_codes::SOLVER_FAILED);

        let parse = anyhow::Error::from(ParseError::new("x", "bad")).context("load");
        assert_eq!(exit_code_for(&parse), exit_codes::PARSE_FAILED);

        let other = anyhow::anyhow!("plain");
        assert_eq!(exit_code_for(&other), exit_codes::INVALID);
    }
}
