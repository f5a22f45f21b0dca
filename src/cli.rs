use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// burrow: snapshot and restore PostgreSQL databases in place
#[derive(Parser, Debug)]
#[command(name = "burrow", version, about = "Take, restore and ship point-in-time snapshots of a PostgreSQL database.", long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Increase log verbosity (-v = debug, -vv = trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or repair .burrow.toml and bootstrap the tracker database
    Init,

    /// Snapshot the working database under a name
    Snapshot {
        /// Name for the snapshot (prompted for when omitted)
        name: Option<String>,
    },

    /// List snapshots recorded for this project
    List,

    /// Replace the working database with a snapshot
    Restore {
        /// Name of the snapshot (interactive pick when omitted)
        #[arg(conflicts_with = "latest")]
        name: Option<String>,

        /// Restore the most recent snapshot
        #[arg(long)]
        latest: bool,
    },

    /// Delete a snapshot and its catalog entry
    Delete {
        /// Name of the snapshot to delete (interactive pick when omitted)
        name: Option<String>,
    },

    /// Dump the working database and upload it to the configured bucket
    Export {
        /// Override the configured bucket
        #[arg(long)]
        bucket: Option<String>,
        /// Override the configured region
        #[arg(long)]
        region: Option<String>,
        /// Override the configured key prefix
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Fetch a dump from the configured bucket into the backups directory
    Download {
        /// Override the configured bucket
        #[arg(long)]
        bucket: Option<String>,
        /// Override the configured region
        #[arg(long)]
        region: Option<String>,
        /// Override the configured key prefix
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Load a dump file into the working database
    Load {
        /// Dump file to load (defaults to the newest in the backups directory)
        file: Option<PathBuf>,
    },

    /// Run the statements in the backups directory's execute.sql
    Execute,

    /// Print CLI version
    Version,
}
