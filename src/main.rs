//! EV charging site simulator entry point: CLI wiring and config-driven runs.

use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ev_site_sim::config::ScenarioConfig;
use ev_site_sim::io::export::{export_load_profile, export_outcomes};
use ev_site_sim::sim::engine::Engine;
use ev_site_sim::sim::policy::PolicyKind;

/// Simulates power sharing at an EV charging site.
///
/// If no --scenario or --preset is given, the two_branch preset is used.
#[derive(Parser, Debug)]
#[command(name = "ev-site-sim", version, about)]
struct Cli {
    /// Load the scenario from a TOML file
    #[arg(long, conflicts_with = "preset")]
    scenario: Option<PathBuf>,

    /// Use a built-in preset (two_branch, wallbox)
    #[arg(long)]
    preset: Option<String>,

    /// Override the configured allocation policy
    #[arg(long)]
    policy: Option<String>,

    /// Write the per-step load profile to a CSV file
    #[arg(long)]
    csv_out: Option<PathBuf>,

    /// Write the per-session outcomes to a CSV file
    #[arg(long)]
    outcomes_out: Option<PathBuf>,

    /// Skip the per-step output
    #[arg(long)]
    quiet: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .without_time()
        .compact()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> ScenarioConfig {
    let loaded = match (&cli.scenario, &cli.preset) {
        (Some(path), _) => ScenarioConfig::from_toml_file(path),
        (None, Some(name)) => ScenarioConfig::from_preset(name),
        (None, None) => Ok(ScenarioConfig::two_branch()),
    };
    loaded.unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    })
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let mut config = load_config(&cli);
    if let Some(policy) = &cli.policy {
        config.simulation.policy = policy.clone();
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        eprintln!("available policies: {}", PolicyKind::NAMES.join(", "));
        process::exit(1);
    }

    let scenario = config.into_scenario().unwrap_or_else(|e| {
        eprintln!("error: {e}");
        process::exit(1);
    });
    let mut engine = Engine::new(scenario).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        process::exit(1);
    });

    let report = engine.run().unwrap_or_else(|e| {
        eprintln!("error: {e}");
        process::exit(1);
    });

    if !cli.quiet {
        for record in &report.records {
            println!("{record}");
        }
        println!();
    }

    println!("Session outcomes:");
    for (status, count) in &engine.registry().status_counts() {
        println!("  {status:<22} {count}");
    }

    if let Some(path) = &cli.csv_out {
        write_or_exit("load profile", path, || {
            export_load_profile(&report.records, engine.tree(), path)
        });
    }
    if let Some(path) = &cli.outcomes_out {
        write_or_exit("outcomes", path, || {
            export_outcomes(&report.outcomes, engine.tree(), path)
        });
    }
}

fn write_or_exit(what: &str, path: &Path, write: impl FnOnce() -> std::io::Result<()>) {
    if let Err(e) = write() {
        eprintln!("error: failed to write {what} CSV: {e}");
        process::exit(1);
    }
    eprintln!("{what} written to {}", path.display());
}
