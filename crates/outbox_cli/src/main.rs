//! Outbox CLI
//!
//! Command-line tools for Outbox store directories.
//!
//! # Commands
//!
//! - `inspect` - Display partition sizes and row counts
//! - `pending` - List the pending mutations in queue order
//! - `verify` - Check partition integrity
//! - `compact` - Rewrite partitions without superseded records

mod commands;

use clap::{Parser, Subcommand};
use commands::CliError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Outbox store maintenance tools.
#[derive(Parser)]
#[command(name = "outbox")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display partition sizes and row counts
    Inspect {
        /// Show per-collection counts
        #[arg(short, long)]
        collections: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List pending mutations, oldest first
    Pending {
        /// Maximum number of mutations to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify partition integrity
    Verify,

    /// Rewrite partitions without superseded records
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Inspect {
            collections,
            format,
        } => {
            let path = cli.path.ok_or(CliError::MissingPath("inspect"))?;
            commands::inspect::run(&path, collections, &format)
        }
        Commands::Pending { limit, format } => {
            let path = cli.path.ok_or(CliError::MissingPath("pending"))?;
            commands::pending::run(&path, limit, &format)
        }
        Commands::Verify => {
            let path = cli.path.ok_or(CliError::MissingPath("verify"))?;
            commands::verify::run(&path)
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or(CliError::MissingPath("compact"))?;
            commands::compact::run(&path, dry_run)
        }
        Commands::Version => {
            println!("Outbox CLI v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
