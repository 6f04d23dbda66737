//! Conveyor CLI entrypoint.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod handlers;

use commands::Commands;

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(author, version, about = "Conveyor workflow engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => handlers::validate(&path)?,
        Commands::Run {
            path,
            param,
            timeout,
            json,
        } => handlers::run(&path, &param, timeout, json)?,
        Commands::Poke {
            path,
            param,
            window,
            log_dir,
        } => handlers::poke(&path, &param, window, &log_dir)?,
    }

    Ok(())
}
