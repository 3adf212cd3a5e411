mod commands;
mod input;
mod output;
mod simulation;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;

use commands::american::AmericanArgs;
use commands::real_options::{FlexibleRealOptionArgs, RealOptionArgs};
use commands::simulation::SimulateGbmArgs;
use commands::sweep::SweepArgs;

/// Least-Squares Monte Carlo valuation of American and real options
#[derive(Parser)]
#[command(
    name = "lsmv",
    version,
    about = "Least-Squares Monte Carlo valuation of American and real options",
    long_about = "A CLI for valuing early-exercise claims on pre-simulated or GBM-generated \
                  paths: American options, the option to invest with construction lag and \
                  CAPEX schedules, operational flexibility (suspend, resume, abandon) and \
                  scenario sweeps."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Value an American option by backward induction
    American(AmericanArgs),
    /// Value the option to invest in a project
    RealOption(RealOptionArgs),
    /// Value the option to invest with suspension, resumption and abandonment
    RealOptionOf(FlexibleRealOptionArgs),
    /// Simulate geometric Brownian motion state variables
    SimulateGbm(SimulateGbmArgs),
    /// Sweep strikes or CAPEX levels over one set of paths
    Sweep(SweepArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn main() {
    let cli = Cli::parse();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::American(args) => commands::american::run_american(args),
        Commands::RealOption(args) => commands::real_options::run_real_option(args),
        Commands::RealOptionOf(args) => commands::real_options::run_flexible_real_option(args),
        Commands::SimulateGbm(args) => commands::simulation::run_simulate_gbm(args),
        Commands::Sweep(args) => commands::sweep::run_sweep(args),
        Commands::Version => {
            println!("lsmv {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
