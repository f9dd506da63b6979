//! Trivit CLI
//!
//! Command-line tools for the phone/watch sync subsystem.
//!
//! # Commands
//!
//! - `simulate` - Run a phone and a watch over an in-memory link
//! - `decode` - Decode a captured wire message
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Trivit sync tools.
#[derive(Parser)]
#[command(name = "trivit")]
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
    /// Simulate a phone and a watch syncing over an in-memory link
    Simulate {
        /// Scenario file (JSON); the built-in demo runs if omitted
        #[arg(short, long)]
        scenario: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Decode a captured wire message
    Decode {
        /// File holding the payload
        input: PathBuf,

        /// The file holds hex text instead of raw bytes
        #[arg(long)]
        hex: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
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
        Commands::Simulate { scenario, format } => {
            commands::simulate::run(scenario.as_deref(), &format)?;
        }
        Commands::Decode { input, hex, format } => {
            commands::decode::run(&input, hex, &format)?;
        }
        Commands::Version => {
            println!("Trivit CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Wire messages: {}",
                commands::supported_messages().join(", ")
            );
        }
    }

    Ok(())
}
