//! cachenet CLI
//!
//! Runs one caching scenario and prints the run report and collector results
//! as JSON.
//!
//! # Example
//!
//! ```bash
//! # Run a scenario with the seed stored in the file
//! cachenet run scenario.json
//!
//! # Override the seed and stop after 10 simulated seconds
//! cachenet run scenario.json --seed 42 --until 10000000 --output results.json
//!
//! # Only check that the scenario builds
//! cachenet validate scenario.json
//! ```

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use cachenet_core::{Collector, ScenarioConfig};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// In-network caching simulator.
#[derive(Parser, Debug)]
#[command(name = "cachenet")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scenario once
    Run {
        /// Scenario file (JSON)
        scenario: PathBuf,

        /// Overrides the seed in the scenario
        #[arg(long)]
        seed: Option<u64>,

        /// Simulated-time horizon in microseconds
        #[arg(long)]
        until: Option<u64>,

        /// Write results here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Build a scenario without running it
    Validate {
        /// Scenario file (JSON)
        scenario: PathBuf,
    },
}

fn load(path: &PathBuf) -> Result<ScenarioConfig, Box<dyn Error>> {
    let text = fs::read_to_string(path)?;
    Ok(ScenarioConfig::from_json_str(&text)?)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,cachenet_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Args::parse().command {
        Command::Validate { scenario } => {
            let config = load(&scenario)?;
            let (sim, collectors) = config.build()?;
            info!(
                nodes = sim.network().nodes().count(),
                caches = sim.network().cache_nodes().len(),
                strategy = sim.strategy().name(),
                collectors = collectors.len(),
                "scenario is valid"
            );
            println!("{}: ok", scenario.display());
        }
        Command::Run {
            scenario,
            seed,
            until,
            output,
        } => {
            let mut config = load(&scenario)?;
            if let Some(seed) = seed {
                config.seed = seed;
            }
            if until.is_some() {
                config.until = until;
            }
            let limits = config.limits();
            let (mut sim, mut collectors) = config.build()?;
            let report = sim.run(&mut collectors, limits)?;
            info!(
                events = report.processed_events,
                requests = report.requests,
                end_time = report.end_time,
                "run finished"
            );
            let document = json!({
                "seed": config.seed,
                "strategy": sim.strategy().name(),
                "report": report,
                "results": collectors.results(),
            });
            let text = serde_json::to_string_pretty(&document)?;
            match output {
                Some(path) => fs::write(path, text + "\n")?,
                None => println!("{text}"),
            }
        }
    }
    Ok(())
}
