//! mailmove - Move mail between IMAP servers or into Gmail
//!
//! `mailmove <CONFIG>` performs one migration and prints a summary.
//! `mailmove --jobs [FILE]` runs recurring migrations from a job file.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use migrate::jobs::JobStore;
use migrate::{JsonFileJobStore, MigrationConfig, MigratorRegistry, Scheduler, run_migration};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

/// Job file used by `--jobs` when no path is given
const DEFAULT_JOBS_FILE: &str = "jobs.json";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Migration config file (JSON)
    #[arg(required_unless_present = "jobs", conflicts_with = "jobs")]
    config: Option<PathBuf>,

    /// Run scheduled jobs from FILE (default: ~/.config/mailmove/jobs.json)
    #[arg(long, value_name = "FILE")]
    jobs: Option<Option<PathBuf>>,

    /// Seconds between scheduler polls
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    poll_secs: u64,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Usage errors exit 1; --help and --version are not errors
            let code = if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
            let _ = e.print();
            return code;
        }
    };

    let result = match (&cli.jobs, &cli.config) {
        (Some(jobs), _) => run_scheduler(jobs.as_deref(), cli.poll_secs),
        (None, Some(config)) => run_once(config, cli.json),
        (None, None) => Err(anyhow::anyhow!("Missing config path")),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_once(path: &Path, json: bool) -> Result<()> {
    let config = MigrationConfig::load(path)?;
    let report = run_migration(&config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

fn run_scheduler(path: Option<&Path>, poll_secs: u64) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            config::init()?;
            config::config_path(DEFAULT_JOBS_FILE).context("Could not determine config directory")?
        }
    };

    let mut store = JsonFileJobStore::new(&path);
    let jobs = store.list()?;
    info!("Loaded {} job(s) from {}", jobs.len(), path.display());

    let mut scheduler = Scheduler::new(&mut store, MigratorRegistry::builtin());
    scheduler.run_forever(Duration::from_secs(poll_secs))
}
