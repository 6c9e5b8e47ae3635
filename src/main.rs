use anyhow::{Context, Result};
use clap::Parser;
use docstore_migrate::{CancelSignal, MigrateError, MigrationConfig, Migrator, StepRegistry};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit code for arguments clap rejects; kept apart from lock contention (2).
const INVALID_INPUT: u8 = 3;

#[derive(Parser)]
#[command(name = "migrate")]
#[command(about = "Migrates document store data from an older schema version to the current one")]
#[command(version)]
struct Cli {
    /// Schema version the stored data is at, e.g. 1.6.0
    #[arg(value_name = "FROM_VERSION", required_unless_present_any = ["list", "forget", "purge_history", "force_unlock"])]
    from_version: Option<String>,

    /// Rehearse the run: no store mutation, no checkpoint
    #[arg(value_name = "DRY_RUN", default_value_t = false, action = clap::ArgAction::Set)]
    dry_run: bool,

    /// Per-call store timeout in milliseconds
    #[arg(value_name = "TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the available steps and the recorded history
    #[arg(long, conflicts_with_all = ["forget", "purge_history"])]
    list: bool,

    /// Drop the checkpoint of one step so it replays on the next run
    #[arg(long, value_name = "STEP_ID", conflicts_with = "purge_history")]
    forget: Option<String>,

    /// Drop every checkpoint
    #[arg(long)]
    purge_history: bool,

    /// Remove the run lock left by a crashed run; make sure no run is alive first
    #[arg(long, conflicts_with_all = ["list", "forget", "purge_history"])]
    force_unlock: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(INVALID_INPUT)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<MigrateError>())
        .map_or(1, |err| u8::try_from(err.exit_code()).unwrap_or(1))
}

fn load_config(cli: &Cli) -> Result<MigrationConfig> {
    let config = match &cli.config {
        Some(path) => MigrationConfig::load(path)?,
        None => MigrationConfig::default(),
    };
    let mut config = config
        .apply_env()
        .context("invalid MIGRATE_* environment override")?;

    if let Some(timeout_ms) = cli.timeout_ms {
        let store = config
            .store
            .clone()
            .request_timeout(Duration::from_millis(timeout_ms));
        config = config.store(store);
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let registry = StepRegistry::with_builtin_steps().context("built-in steps are inconsistent")?;
    let migrator = Migrator::from_config(&config, registry)
        .await
        .context("failed to set up the migration")?;

    if cli.list {
        return list(&migrator).await;
    }

    if cli.force_unlock {
        if migrator.force_unlock()? {
            println!("Removed the run lock");
        } else {
            println!("No run lock to remove");
        }
        return Ok(());
    }

    if let Some(step_id) = &cli.forget {
        if migrator.forget(step_id).await? {
            println!("Forgot {}; it will run again on the next migration", step_id);
        } else {
            println!("No checkpoint recorded for {}", step_id);
        }
        return Ok(());
    }

    if cli.purge_history {
        let purged = migrator.purge_history().await?;
        println!("Purged {} checkpoint(s)", purged);
        return Ok(());
    }

    let from = cli
        .from_version
        .as_deref()
        .ok_or_else(|| MigrateError::Config("missing FROM_VERSION".to_string()))?;

    let cancel = CancelSignal::on_ctrl_c();
    let report = migrator.run(from, cli.dry_run, &cancel).await?;
    println!("{}", report.render());
    report.into_result()?;
    Ok(())
}

async fn list(migrator: &Migrator) -> Result<()> {
    println!("Available migration steps up to {}:", migrator.current_version());
    println!("{}", migrator.describe_available());

    let history = migrator.history().await?;
    if history.is_empty() {
        println!("No step has been applied yet");
        return Ok(());
    }
    println!("Applied steps:");
    for record in history {
        println!("- {} ({})", record.step_id, record.completed_at.to_rfc3339());
    }
    Ok(())
}
