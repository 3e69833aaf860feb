//! Georeplica CLI - operator tool for the consistency core
//!
//! Usage:
//!   georeplica simulate --regions us-east-1,us-west-2,eu-west-1
//!   georeplica resolve us-east-1 --config region.json --down us-east-1 --healthy us-west-2
//!   georeplica health --config region.json --lag-ms 6000 --divergence 2
//!   georeplica audit --data-dir ./audit-data --append "put k1" --tamper 0

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log at debug level (RUST_LOG still applies)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run N regions over an in-memory broker and show they converge
    Simulate {
        /// Comma-separated region ids
        #[arg(short, long, value_delimiter = ',', default_value = "us-east-1,us-west-2,eu-west-1")]
        regions: Vec<String>,

        /// Local writes per region before gossip
        #[arg(short, long, default_value_t = 5)]
        writes: u32,
    },

    /// Resolve the serving region for a target under the given health
    Resolve {
        /// Region requests are addressed to
        region: String,

        /// Region config file (JSON) holding the DR pair table
        #[arg(short, long)]
        config: PathBuf,

        /// Regions to mark DOWN
        #[arg(long)]
        down: Vec<String>,

        /// Regions to mark UNHEALTHY
        #[arg(long)]
        unhealthy: Vec<String>,

        /// Regions to mark HEALTHY
        #[arg(long)]
        healthy: Vec<String>,
    },

    /// Compute the local health record from lag and divergence inputs
    Health {
        /// Region config file (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = 0)]
        lag_ms: u64,

        #[arg(long, default_value_t = 0)]
        divergence: u64,
    },

    /// Append to a durable log and audit it against a signed tree head
    Audit {
        /// RocksDB directory of the log
        #[arg(short, long)]
        data_dir: PathBuf,

        /// Entries to append before auditing
        #[arg(short, long)]
        append: Vec<String>,

        /// Publish the tree head over a copy with this entry altered
        #[arg(long)]
        tamper: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    ui::print_banner();

    match args.command {
        Command::Simulate { regions, writes } => commands::simulate(regions, writes).await,
        Command::Resolve {
            region,
            config,
            down,
            unhealthy,
            healthy,
        } => commands::resolve(&region, &config, &down, &unhealthy, &healthy),
        Command::Health {
            config,
            lag_ms,
            divergence,
        } => commands::health(config.as_deref(), lag_ms, divergence),
        Command::Audit {
            data_dir,
            append,
            tamper,
        } => commands::audit(&data_dir, &append, tamper).await,
    }
}
