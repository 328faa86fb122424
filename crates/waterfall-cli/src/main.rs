mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use commands::irr::IrrArgs;
use commands::scenarios::ScenariosArgs;
use commands::validate::ValidateArgs;
use commands::waterfall::WaterfallArgs;

/// Real-estate LP/GP distribution waterfalls
#[derive(Parser)]
#[command(
    name = "rewf",
    version,
    about = "Real-estate LP/GP distribution waterfalls",
    long_about = "Runs multi-tier LP/GP distribution waterfalls with decimal precision. \
                  Supports preferred returns, GP catch-up, IRR and equity-multiple \
                  promote tiers, management fees, clawback true-ups and \
                  downside/base/upside scenario analysis."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log engine progress to stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a distribution waterfall over a cash-flow schedule
    Waterfall(WaterfallArgs),
    /// Run downside/base/upside cases through one configuration
    Scenarios(ScenariosArgs),
    /// Calculate the IRR and equity multiple of a cash-flow schedule
    Irr(IrrArgs),
    /// Validate a waterfall configuration without running it
    Validate(ValidateArgs),
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

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Waterfall(args) => commands::waterfall::run_waterfall(args),
        Commands::Scenarios(args) => commands::scenarios::run_scenarios(args),
        Commands::Irr(args) => commands::irr::run_irr(args),
        Commands::Validate(args) => commands::validate::run_validate(args),
        Commands::Version => {
            println!("rewf {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => output::format_output(&cli.output, &value),
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
