mod catalog;
mod cli;
mod config;
mod dump;
mod engine;
mod error;
mod logging;
mod ops;
mod prompt;
mod remote;
mod server;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use error::BurrowError;

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("Error: {err}");
        if let Some(hint) = err.downcast_ref::<BurrowError>().and_then(|e| e.hint()) {
            eprintln!("Hint: {hint}");
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init => {
            ops::do_init()?;
        }
        Commands::Snapshot { name } => {
            ops::do_snapshot(name)?;
        }
        Commands::List => {
            ops::do_list()?;
        }
        Commands::Restore { name, latest } => {
            ops::do_restore(name, latest)?;
        }
        Commands::Delete { name } => {
            ops::do_delete(name)?;
        }
        Commands::Export {
            bucket,
            region,
            prefix,
        } => {
            ops::do_export(bucket, region, prefix)?;
        }
        Commands::Download {
            bucket,
            region,
            prefix,
        } => {
            ops::do_download(bucket, region, prefix)?;
        }
        Commands::Load { file } => {
            ops::do_load(file)?;
        }
        Commands::Execute => {
            ops::do_execute()?;
        }
        Commands::Version => {
            ops::do_version();
        }
    }

    Ok(())
}
