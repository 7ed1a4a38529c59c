//! Upkeep migration CLI
//!
//! Applies and inspects the schema migrations compiled into `upkeep`, and
//! lists schedules that are past due.

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::process;
use thiserror::Error;

use upkeep::connection::redacted;
use upkeep::migration::{MigrationError, Migrator};
use upkeep::{connect, ConnectionError, PgExecutor, PgStore, Store, StoreError, UpkeepConfig};

#[derive(Parser)]
#[command(name = "upkeep-migrate")]
#[command(about = "Schema migrations and overdue-schedule report for upkeep")]
#[command(version)]
struct Cli {
    /// Database connection URL (overrides configuration)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Configuration file
    #[arg(long, default_value = "config/config.toml")]
    config: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show applied and pending migrations
    Status,

    /// Apply pending migrations
    Up {
        /// Number of migrations to apply (default: all pending)
        #[arg(long)]
        steps: Option<usize>,

        /// Print the SQL that would run without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Roll back applied migrations, newest first
    Down {
        #[arg(long, default_value = "1")]
        steps: usize,

        #[arg(long)]
        dry_run: bool,
    },

    /// Check that applied migrations still match their recorded checksums
    Validate,

    /// List active schedules whose next due date has passed
    Overdue {
        /// Report as of this date (default: today, UTC)
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] upkeep::config::ConfigError),
    #[error("connection failed: {0}")]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("could not encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = UpkeepConfig::load_from(&cli.config)?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    log::debug!("connecting to {}", redacted(&config.database.url));

    let migrator = Migrator::from_config(&config.migrations);
    let executor = || -> Result<PgExecutor, CliError> {
        Ok(PgExecutor::new(connect(&config.database.url)?))
    };

    match cli.command {
        Commands::Status => handle_status(&migrator, &executor()?),
        Commands::Up { steps, dry_run } => handle_up(&migrator, &executor()?, steps, dry_run),
        Commands::Down { steps, dry_run } => handle_down(&migrator, &executor()?, steps, dry_run),
        Commands::Validate => {
            let checked = migrator.validate_checksums(&executor()?)?;
            println!("{} {checked} applied migration(s) match", "ok".green());
            Ok(())
        }
        Commands::Overdue { as_of, json } => {
            let store = PgStore::from_executor(executor()?);
            handle_overdue(&store, as_of.unwrap_or_else(|| Utc::now().date_naive()), json)
        }
    }
}

/// Hide the password part of a connection URL.
fn handle_status(migrator: &Migrator, executor: &PgExecutor) -> Result<(), CliError> {
    let status = migrator.status(executor)?;

    println!("{}", "Applied".bold());
    if status.applied.is_empty() {
        println!("  none");
    }
    for record in &status.applied {
        let took = record
            .execution_time_ms
            .map_or_else(|| "n/a".to_string(), |ms| format!("{ms}ms"));
        println!(
            "  {} m{}_{} ({}, {took})",
            "✓".green(),
            record.version,
            record.name,
            record.applied_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("{}", "Pending".bold());
    if status.pending.is_empty() {
        println!("  none");
    }
    for pending in &status.pending {
        println!("  {} m{}_{}", "…".yellow(), pending.version, pending.name);
    }

    println!(
        "\n{} applied, {} pending",
        status.applied.len(),
        status.pending.len()
    );
    Ok(())
}

fn handle_up(
    migrator: &Migrator,
    executor: &PgExecutor,
    steps: Option<usize>,
    dry_run: bool,
) -> Result<(), CliError> {
    if dry_run {
        let status = migrator.status(executor)?;
        if status.pending.is_empty() {
            println!("No pending migrations");
            return Ok(());
        }
        let take = steps.unwrap_or(status.pending.len());
        for pending in status.pending.iter().take(take) {
            println!("-- m{}_{} ({})", pending.version, pending.name, pending.checksum);
            for statement in &pending.statements {
                println!("{statement};\n");
            }
        }
        return Ok(());
    }

    let applied = migrator.up(executor, steps)?;
    if applied.is_empty() {
        println!("No pending migrations");
    }
    for record in &applied {
        println!("{} m{}_{}", "applied".green(), record.version, record.name);
    }
    Ok(())
}

fn handle_down(
    migrator: &Migrator,
    executor: &PgExecutor,
    steps: usize,
    dry_run: bool,
) -> Result<(), CliError> {
    if dry_run {
        let mut applied = migrator.status(executor)?.applied;
        applied.sort_by_key(|m| std::cmp::Reverse(m.version));
        if applied.is_empty() {
            println!("No applied migrations to roll back");
        }
        for record in applied.iter().take(steps) {
            println!("would roll back m{}_{}", record.version, record.name);
        }
        return Ok(());
    }

    let rolled_back = migrator.down(executor, Some(steps))?;
    if rolled_back.is_empty() {
        println!("No applied migrations to roll back");
    }
    for record in &rolled_back {
        println!("{} m{}_{}", "rolled back".yellow(), record.version, record.name);
    }
    Ok(())
}

fn handle_overdue(store: &PgStore, today: NaiveDate, json: bool) -> Result<(), CliError> {
    let overdue = store.run(|tx| tx.overdue_schedules(today))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&overdue)?);
        return Ok(());
    }
    if overdue.is_empty() {
        println!("Nothing overdue as of {today}");
        return Ok(());
    }
    for schedule in &overdue {
        println!(
            "{:>4}d  {}  {}  (due {}, {})",
            -schedule.days_until_due(today),
            schedule.id,
            schedule.title,
            schedule.next_due_date,
            schedule.priority
        );
    }
    println!("\n{} overdue schedule(s) as of {today}", overdue.len());
    Ok(())
}
