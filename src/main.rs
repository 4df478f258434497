use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use meter_readings::{
    find_account_by_external_id, get_readings_for_account, process_file, seed_accounts_from_csv,
    verify_count, StoreConfig,
};

/// Validate and store batches of meter readings
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    store: StoreConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load accounts from CSV (skipped when accounts already exist)
    Seed {
        /// Accounts CSV; defaults to the configured seed file
        file: Option<PathBuf>,
    },

    /// Validate a meter readings CSV and store the accepted rows
    Import {
        file: PathBuf,
    },

    /// List stored readings for an account
    Readings {
        account_id: i64,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let conn = cli.store.open_database()?;

    match cli.command {
        Command::Seed { file } => {
            let path = file.unwrap_or_else(|| cli.store.seed_file.clone());
            let inserted = seed_accounts_from_csv(&conn, &path)?;
            println!("✓ Seeded {} accounts", inserted);
        }
        Command::Import { file } => {
            let outcome = process_file(&conn, &file, cli.store.batch_options())?;

            println!("{}", serde_json::to_string_pretty(&outcome)?);
            println!("✓ Database contains {} readings", verify_count(&conn)?);

            if outcome.is_fatal() {
                std::process::exit(1);
            }
        }
        Command::Readings { account_id } => {
            let account = find_account_by_external_id(&conn, account_id)?
                .with_context(|| format!("Account {} does not exist", account_id))?;

            println!("{} {} ({})", account.first_name, account.last_name, account.account_id);
            for reading in get_readings_for_account(&conn, account.id)? {
                println!("  {}  {:>5}", reading.reading_time, reading.reading_value);
            }
        }
    }

    Ok(())
}
