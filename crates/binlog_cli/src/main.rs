//! Binlog CLI
//!
//! Command-line tools for binary log directories.
//!
//! # Commands
//!
//! - `list` - List log files and their headers
//! - `dump` - Print records, from files or from a dump server
//! - `verify` - Check checksums, positions and group structure
//! - `purge` - Remove old log files
//! - `serve` - Stream the log to replicas over TCP

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::dump::DumpOptions;
use commands::purge::PurgeTarget;
use commands::serve::ServeOptions;
use commands::OutputFormat;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Binary log command-line tools.
#[derive(Parser)]
#[command(name = "binlog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Base name of the log files
    #[arg(global = true, long, default_value = "binlog")]
    base_name: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List log files
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print log records
    Dump {
        /// File to start in (default: the oldest file)
        file: Option<String>,

        /// Offset in the start file
        #[arg(short, long, default_value = "4")]
        start_position: u64,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Read from a dump server at this address instead of the directory
        #[arg(short, long)]
        remote: Option<String>,

        /// Server id to present to the dump server
        #[arg(long, default_value = "0")]
        server_id: u32,
    },

    /// Verify log integrity
    Verify,

    /// Remove old log files
    Purge {
        /// Remove every file before this one
        #[arg(long)]
        to: Option<String>,

        /// Remove files last modified before this time (seconds since the epoch)
        #[arg(long)]
        before: Option<u64>,
    },

    /// Serve the log to replicas
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:3307")]
        bind: SocketAddr,

        /// Maximum concurrent dump sessions
        #[arg(long, default_value = "64")]
        max_connections: usize,

        /// Idle heartbeat interval in seconds (0 disables)
        #[arg(long, default_value = "30")]
        heartbeat: u64,

        /// Server id stamped on records this process writes
        #[arg(long, default_value = "1")]
        server_id: u32,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; stdout is kept for command output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let base = cli.base_name.as_str();
    match cli.command {
        Commands::List { format } => {
            let path = cli.path.ok_or("Log path required for list")?;
            commands::list::run(&path, base, format)?;
        }
        Commands::Dump {
            file,
            start_position,
            limit,
            format,
            remote,
            server_id,
        } => {
            let options = DumpOptions {
                file,
                start_position,
                limit,
            };
            match remote {
                Some(addr) => commands::dump::run_remote(&addr, server_id, &options, format)?,
                None => {
                    let path = cli.path.ok_or("Log path or --remote required for dump")?;
                    commands::dump::run(&path, base, &options, format)?;
                }
            }
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Log path required for verify")?;
            commands::verify::run(&path, base)?;
        }
        Commands::Purge { to, before } => {
            let path = cli.path.ok_or("Log path required for purge")?;
            let target = PurgeTarget::from_args(to, before)?;
            commands::purge::run(&path, base, &target)?;
        }
        Commands::Serve {
            bind,
            max_connections,
            heartbeat,
            server_id,
        } => {
            let path = cli.path.ok_or("Log path required for serve")?;
            let options = ServeOptions {
                bind,
                max_connections,
                heartbeat_secs: heartbeat,
                server_id,
            };
            commands::serve::run(&path, base, &options)?;
        }
        Commands::Version => {
            println!("binlog CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
