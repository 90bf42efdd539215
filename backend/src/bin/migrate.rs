//! Apply, revert, or inspect the bookshelf schema migrations.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::ffi::OsString;
use std::io::{self, Write};
use std::sync::Arc;

use bookshelf::config::PostgresSettings;
use bookshelf::domain::ports::{MigrationOutcome, Migrator};
use bookshelf::outbound::persistence::{APP_MIGRATIONS, PostgresMigrator, TracingQueryObserver};
use clap::{Parser, Subcommand};
use ortho_config::OrthoConfig;
use tokio::runtime::Builder;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

/// `bookshelf-migrate` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "bookshelf-migrate",
    about = "Apply or revert versioned schema scripts in the bookshelf namespace",
    version
)]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Apply every pending script.
    Up,
    /// Revert the most recently applied batch.
    Down,
    /// List applied scripts.
    Status,
}

fn main() -> io::Result<()> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| io::Error::other(format!("create Tokio runtime: {error}")))?;
    runtime.block_on(async_main())
}

async fn async_main() -> io::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let args = CliArgs::try_parse().map_err(io::Error::other)?;
    let settings = PostgresSettings::load_from_iter([OsString::from("bookshelf-migrate")])
        .map_err(|error| io::Error::other(format!("load database settings: {error}")))?;
    let config = settings
        .migrator_config()
        .map_err(|error| io::Error::other(format!("database settings: {error}")))?;
    let migrator =
        PostgresMigrator::new(APP_MIGRATIONS, config).with_observer(Arc::new(TracingQueryObserver));

    let mut stdout = io::stdout().lock();
    match args.command {
        Command::Up => {
            let outcome = migrator.up().await.map_err(io::Error::other)?;
            write_outcome(&mut stdout, "applied", &outcome)
        }
        Command::Down => {
            let outcome = migrator.down().await.map_err(io::Error::other)?;
            write_outcome(&mut stdout, "reverted", &outcome)
        }
        Command::Status => {
            let records = migrator.applied().await.map_err(io::Error::other)?;
            if records.is_empty() {
                writeln!(stdout, "no migrations applied")?;
            }
            for record in records {
                writeln!(
                    stdout,
                    "{:>16}  batch {:<3} {}  {}",
                    record.version,
                    record.batch,
                    record.applied_at.to_rfc3339(),
                    record.name
                )?;
            }
            Ok(())
        }
    }
}

fn write_outcome(out: &mut impl Write, verb: &str, outcome: &MigrationOutcome) -> io::Result<()> {
    if matches!(outcome, MigrationOutcome::NoChange) {
        return writeln!(out, "nothing to do");
    }
    for script in outcome.scripts() {
        writeln!(out, "{verb} {} ({})", script.version, script.name)?;
    }
    Ok(())
}
