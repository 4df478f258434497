// 🌱 Account seeding - load customer accounts from CSV on first start

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct AccountRow {
    #[serde(rename = "AccountId")]
    account_id: i64,

    #[serde(rename = "FirstName", default)]
    first_name: String,

    #[serde(rename = "LastName", default)]
    last_name: String,
}

/// Names in the account export are wrapped in single quotes
fn clean_name(raw: &str) -> String {
    raw.replace('\'', "").trim().to_string()
}

/// Seed accounts from `path` when the accounts table is empty.
/// Returns the number of accounts inserted (0 if already seeded).
pub fn seed_accounts_from_csv(conn: &Connection, path: &Path) -> Result<usize> {
    if crate::db::count_accounts(conn)? > 0 {
        log::info!("accounts already seeded, skipping {}", path.display());
        return Ok(0);
    }

    if !path.exists() {
        bail!("Seed accounts file not found: {}", path.display());
    }

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .context("Failed to open seed accounts CSV")?;

    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0;

    for result in rdr.deserialize() {
        let row: AccountRow = result.context("Failed to deserialize account")?;

        tx.execute(
            "INSERT INTO accounts (account_id, first_name, last_name) VALUES (?1, ?2, ?3)",
            params![row.account_id, clean_name(&row.first_name), clean_name(&row.last_name)],
        )
        .with_context(|| format!("Failed to seed account {}", row.account_id))?;

        inserted += 1;
    }

    tx.commit()?;

    log::info!("seeded {} accounts from {}", inserted, path.display());
    Ok(inserted)
}
