//! `atomex` command line: seeded simulations and configuration checks

use anyhow::{bail, Context, Result};
use atomex_core::EngineConfig;
use atomex_engine::{run_simulator_with, simulation_engine_config, SimulatorConfig};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("atomex")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Atomic execution engine")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Run a seeded end-to-end simulation")
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("atoms")
                        .long("atoms")
                        .default_value("60")
                        .value_parser(value_parser!(usize))
                        .help("Number of atoms in the synthetic masterplan"),
                )
                .arg(
                    Arg::new("width")
                        .long("width")
                        .default_value("8")
                        .value_parser(value_parser!(usize))
                        .help("Atoms per dependency layer"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.15")
                        .value_parser(value_parser!(f64))
                        .help("Chance a generation fails validation"),
                )
                .arg(
                    Arg::new("error-rate")
                        .long("error-rate")
                        .default_value("0.05")
                        .value_parser(value_parser!(f64))
                        .help("Chance a generation call errors"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Engine configuration file (TOML or YAML)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Load and validate an engine configuration file")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Configuration file (TOML or YAML)"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn probability(args: &ArgMatches, name: &str) -> Result<f64> {
    let value = args.get_one::<f64>(name).copied().unwrap_or_default();
    if !(0.0..=1.0).contains(&value) {
        bail!("--{name} must be within [0, 1], got {value}");
    }
    Ok(value)
}

async fn simulate(args: &ArgMatches) -> Result<bool> {
    let seed = args.get_one::<u64>("seed").copied().unwrap_or(42);
    let config = SimulatorConfig {
        seed,
        atoms: args.get_one::<usize>("atoms").copied().unwrap_or(60),
        width: args.get_one::<usize>("width").copied().unwrap_or(8),
        failure_rate: probability(args, "failure-rate")?,
        backend_error_rate: probability(args, "error-rate")?,
        ..SimulatorConfig::default()
    };
    let engine_config = match args.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::from_path(path).with_context(|| format!("loading {}", path.display()))?,
        None => simulation_engine_config(seed),
    };

    let json = args.get_flag("json");
    if !json {
        println!("Running atomex simulation...");
        println!("Seed: {}", config.seed);
        println!("Atoms: {}", config.atoms);
        println!("Width: {}", config.width);
        println!();
    }

    let report = run_simulator_with(config, engine_config).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report.passed())
}

fn check_config(args: &ArgMatches) -> Result<()> {
    let path = args
        .get_one::<PathBuf>("path")
        .context("missing configuration path")?;
    let config = EngineConfig::from_path(path).with_context(|| format!("loading {}", path.display()))?;
    println!("{}", toml::to_string_pretty(&config)?);
    println!("Configuration OK");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let passed = simulate(args).await?;
            std::process::exit(if passed { 0 } else { 1 });
        }
        Some(("check-config", args)) => check_config(args),
        _ => unreachable!("subcommand required"),
    }
}
