use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rota_cli::commands::{activity, claim, complete, history, profile, stats, status};
use rota_cli::{Cli, Commands, Config, Pool};

/// Load config and open the pool.
fn open_pool(config_path: Option<&Path>) -> Result<Pool> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    Pool::open(&config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let mut pool = open_pool(cli.config.as_deref())?;
    let mut stdout = io::stdout().lock();
    let now = Utc::now();

    match command {
        Commands::Status { json } => status::run(&mut stdout, &mut pool, now, *json)?,
        Commands::Claim { slot, name, json } => {
            claim::run(&mut stdout, &mut pool, *slot, name, now, *json)?;
        }
        Commands::Complete { slot, name, json } => {
            complete::run(&mut stdout, &mut pool, *slot, name, now, *json)?;
        }
        Commands::Stats { json } => stats::run(&mut stdout, &mut pool, now, *json)?,
        Commands::History { limit, json } => history::run(&mut stdout, &pool, *limit, *json)?,
        Commands::Activity { limit, json } => activity::run(&mut stdout, &pool, *limit, *json)?,
        Commands::Profile { name, json } => profile::run(&mut stdout, &pool, name, *json)?,
    }

    Ok(())
}
