//! ormline CLI
//!
//! Runs built-in unit of work scenarios against the in-memory driver.
//!
//! # Commands
//!
//! - `demo` - Run a scenario and print the commit summaries and driver journal
//! - `version` - Show version information

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::demo::{OutputFormat, Scenario};
use tracing_subscriber::EnvFilter;

/// ormline command-line demos.
#[derive(Parser)]
#[command(name = "ormline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a built-in scenario
    Demo {
        /// Scenario to run
        #[arg(value_enum)]
        scenario: Scenario,

        /// Output format (text, json)
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Demo { scenario, format } => {
            commands::demo::run(scenario, format)?;
        }
        Commands::Version => {
            println!("ormline CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("ormline core v{}", ormline_core::VERSION);
        }
    }

    Ok(())
}
