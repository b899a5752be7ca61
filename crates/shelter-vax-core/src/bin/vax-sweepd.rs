use anyhow::{Context, Result};
use clap::Parser;
use shelter_vax_core::{logging, Config, Database, OverdueSweeper, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "vax-sweepd")]
#[command(about = "Marks stale vaccination protocols overdue once a day", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the database path from the config
    #[arg(long)]
    database: Option<PathBuf>,

    /// Run a single sweep and exit
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load().context("loading default config")?,
    };
    let engine_config = config.engine_config()?;

    let db_path = cli.database.unwrap_or_else(|| config.database.path.clone());
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let db = Database::open_with_timeout(&db_path, config.busy_timeout())
        .with_context(|| format!("opening database {}", db_path.display()))?;

    let sweeper = OverdueSweeper::new(db, Arc::new(SystemClock), engine_config);

    if cli.once {
        let count = sweeper.run_once();
        println!("{} protocols marked overdue", count);
        return Ok(());
    }

    tracing::info!(database = %db_path.display(), wait = ?sweeper.until_next_run(), "Overdue sweeper started");
    sweeper.spawn().context("starting sweeper thread")?.wait();
    Ok(())
}
