use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use klocka_config::KlockaConfig;
use klocka_simulator::{load_scenario, ScenarioRunner};
use klocka_telemetry::{EventLogger, MetricsRecorder};

#[derive(Parser)]
#[command(name = "klocka", version, about)]
pub struct Cli {
    /// Configuration file; defaults to config/klocka.yaml plus KLOCKA_* overrides
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scenario file on a fresh virtual clock
    Simulate(SimulateArgs),
    /// Run generated scenarios twice each and compare their state hashes
    Fuzz(FuzzArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Scenario file (YAML)
    #[arg(short, long)]
    pub scenario: PathBuf,
    /// Fail unless the run produces this state hash
    #[arg(long)]
    pub validate_hash: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct FuzzArgs {
    /// Initial seed (incremented per iteration); defaults to simulator.seed
    #[arg(long)]
    pub seed: Option<u64>,
    /// Number of generated scenarios; defaults to simulator.fuzz_iterations
    #[arg(long)]
    pub iterations: Option<usize>,
    /// Maximum top-level steps per scenario; defaults to simulator.max_steps
    #[arg(long)]
    pub max_steps: Option<usize>,
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => KlockaConfig::load_from_path(path),
        None => KlockaConfig::load(),
    }
    .context("failed to load configuration")?;

    EventLogger::init(&config.telemetry.log_level);

    let metrics = if config.telemetry.metrics_enabled {
        Some(MetricsRecorder::new().context("failed to register metrics")?)
    } else {
        None
    };
    let mut runner = ScenarioRunner::new(config.clock.clone());
    if let Some(metrics) = &metrics {
        runner = runner.with_metrics(metrics.clone());
    }

    match cli.command {
        Commands::Simulate(args) => run_simulation(&runner, &args)?,
        Commands::Fuzz(args) => run_fuzz(&runner, &config, &args)?,
    }

    if let Some(metrics) = metrics {
        print!("{}", metrics.gather_metrics()?);
    }
    Ok(())
}

fn run_simulation(runner: &ScenarioRunner, args: &SimulateArgs) -> anyhow::Result<()> {
    let scenario = load_scenario(&args.scenario)
        .with_context(|| format!("failed to load scenario {}", args.scenario.display()))?;
    let report = runner
        .run(&scenario)
        .with_context(|| format!("scenario '{}' failed", scenario.name))?;

    info!(
        scenario = %report.name,
        firings = report.trace.len(),
        elapsed = ?report.elapsed,
        "Simulation finished"
    );
    println!("State hash: {}", report.state_hash);

    if let Some(expected) = &args.validate_hash {
        if !expected.eq_ignore_ascii_case(&report.state_hash) {
            bail!(
                "state hash mismatch: expected {expected}, got {}",
                report.state_hash
            );
        }
        println!("Hash validated");
    }
    Ok(())
}

fn run_fuzz(runner: &ScenarioRunner, config: &KlockaConfig, args: &FuzzArgs) -> anyhow::Result<()> {
    let seed = args.seed.unwrap_or(config.simulator.seed);
    let iterations = args.iterations.unwrap_or(config.simulator.fuzz_iterations);
    let max_steps = args.max_steps.unwrap_or(config.simulator.max_steps);

    let report = runner
        .fuzz(seed, iterations, max_steps)
        .context("fuzzing failed")?;
    println!(
        "Fuzzed {} scenarios ({} firings) from seed {}: {}",
        report.iterations, report.firings, report.seed, report.digest
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::try_parse_from([
            "klocka",
            "simulate",
            "--scenario",
            "scenarios/heartbeat.yaml",
            "--validate-hash",
            "abcd",
        ])
        .unwrap();
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.scenario, PathBuf::from("scenarios/heartbeat.yaml"));
                assert_eq!(args.validate_hash.as_deref(), Some("abcd"));
            }
            Commands::Fuzz(_) => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_parse_fuzz_with_global_config() {
        let cli = Cli::try_parse_from(["klocka", "fuzz", "--seed", "9", "--config", "ci.yaml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("ci.yaml")));
        match cli.command {
            Commands::Fuzz(args) => {
                assert_eq!(args.seed, Some(9));
                assert_eq!(args.iterations, None);
            }
            Commands::Simulate(_) => panic!("expected fuzz"),
        }
    }
}
