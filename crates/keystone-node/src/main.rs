//! Keystone - Governance deployment tooling.
//!
//! Validates deployment configuration and replays governance scenarios
//! offline against a fresh deployment.

pub mod config;
pub mod scenario;
pub mod telemetry;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::NodeConfig;
use crate::scenario::Scenario;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "keystone")]
#[command(about = "Keystone - token-weighted governance tooling")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Config file path
    #[arg(short, long, value_name = "FILE", env = "KEYSTONE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level, overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and print it
    CheckConfig,

    /// Replay a scenario file against a fresh deployment
    Simulate {
        /// Scenario file (TOML)
        #[arg(short, long, value_name = "FILE")]
        scenario: PathBuf,

        /// Print every emitted event as a JSON line
        #[arg(long)]
        events: bool,

        /// Write the final deployment state as JSON
        #[arg(long, value_name = "FILE")]
        state_out: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };

    // Override with CLI args
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json {
        config.logging.format = "json".to_string();
    }

    config.validate()?;
    telemetry::init_from_config(&config.logging)?;

    match args.command {
        Command::CheckConfig => check_config(&config),
        Command::Simulate {
            scenario,
            events,
            state_out,
        } => simulate(&config, &scenario, events, state_out),
    }
}

fn check_config(config: &NodeConfig) -> anyhow::Result<()> {
    info!(name = %config.name, "configuration is valid");
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn simulate(
    config: &NodeConfig,
    path: &Path,
    print_events: bool,
    state_out: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!(scenario = %path.display(), "running scenario");
    let scenario = Scenario::from_file(path)?;
    let report = scenario.run(&config.governance)?;

    if print_events {
        for event in &report.events {
            println!("{}", serde_json::to_string(event)?);
        }
    }

    if let Some(out) = state_out {
        let json = serde_json::to_string_pretty(&report.final_state)?;
        std::fs::write(&out, json)
            .with_context(|| format!("Failed to write state to '{}'", out.display()))?;
        info!(path = %out.display(), "final state written");
    }

    info!(
        steps = report.steps,
        expected_failures = report.expected_failures,
        executed_calls = report.executed_calls,
        events = report.events.len(),
        "scenario passed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_args() {
        let args = Args::parse_from([
            "keystone",
            "--log-level", "debug",
            "simulate",
            "--scenario", "demos/lifecycle.toml",
            "--events",
        ]);

        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(!args.json);
        match args.command {
            Command::Simulate { scenario, events, state_out } => {
                assert_eq!(scenario, PathBuf::from("demos/lifecycle.toml"));
                assert!(events);
                assert!(state_out.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_check_config_command() {
        let args = Args::parse_from(["keystone", "check-config", "--json"]);
        assert!(args.json);
        assert!(matches!(args.command, Command::CheckConfig));
    }

    #[test]
    fn test_demo_scenario_passes() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos/lifecycle.toml");
        let scenario = Scenario::from_file(&path).unwrap();
        let report = scenario.run(&NodeConfig::default().governance).unwrap();
        assert!(report.executed_calls > 0);
    }
}
