// 🗄️ Storage - SQLite schema for accounts and meter readings
// Accounts are seeded once; readings are append-only

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Sortable text layout used for every stored timestamp.
/// Text order == chronological order, so `ORDER BY` and the
/// (account, time) uniqueness constraint both work on the raw column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// ENTITIES
// ============================================================================

/// Customer account, keyed internally by `id` and externally by `account_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Internal storage identifier (system-assigned)
    pub id: i64,

    /// Operator-facing account number, as it appears in uploaded files
    pub account_id: i64,

    pub first_name: String,
    pub last_name: String,
}

/// Durable meter reading. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterReading {
    pub id: i64,

    /// Internal id of the owning account (`Account::id`)
    pub account_ref: i64,

    pub reading_time: NaiveDateTime,
    pub reading_value: i64,
}

/// A reading that passed validation but has not been flushed yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMeterReading {
    pub account_ref: i64,
    pub reading_time: NaiveDateTime,
    pub reading_value: i64,
}

pub fn format_timestamp(time: &NaiveDateTime) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_stored_timestamp(idx: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER UNIQUE NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL
        )",
        [],
    )?;

    // One reading per (account, timestamp) - last line of defence against
    // in-batch collisions and concurrent uploads
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meter_readings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_ref INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            reading_time TEXT NOT NULL,
            reading_value INTEGER NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(account_ref, reading_time)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_readings_account_time
         ON meter_readings(account_ref, reading_time)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ACCOUNTS
// ============================================================================

pub fn insert_account(
    conn: &Connection,
    account_id: i64,
    first_name: &str,
    last_name: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO accounts (account_id, first_name, last_name) VALUES (?1, ?2, ?3)",
        params![account_id, first_name, last_name],
    )
    .with_context(|| format!("Failed to insert account {}", account_id))?;

    Ok(conn.last_insert_rowid())
}

pub fn count_accounts(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;

    Ok(count)
}

pub fn find_account_by_external_id(conn: &Connection, account_id: i64) -> Result<Option<Account>> {
    let account = conn
        .query_row(
            "SELECT id, account_id, first_name, last_name
             FROM accounts
             WHERE account_id = ?1",
            [account_id],
            |row| {
                Ok(Account {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    first_name: row.get(2)?,
                    last_name: row.get(3)?,
                })
            },
        )
        .optional()?;

    Ok(account)
}

// ============================================================================
// READINGS
// ============================================================================

fn reading_from_row(row: &rusqlite::Row) -> rusqlite::Result<MeterReading> {
    let reading_time: String = row.get(2)?;

    Ok(MeterReading {
        id: row.get(0)?,
        account_ref: row.get(1)?,
        reading_time: parse_stored_timestamp(2, &reading_time)?,
        reading_value: row.get(3)?,
    })
}

/// Latest stored reading for an account by timestamp (value is irrelevant)
pub fn most_recent_reading(conn: &Connection, account_ref: i64) -> Result<Option<MeterReading>> {
    let reading = conn
        .query_row(
            "SELECT id, account_ref, reading_time, reading_value
             FROM meter_readings
             WHERE account_ref = ?1
             ORDER BY reading_time DESC
             LIMIT 1",
            [account_ref],
            reading_from_row,
        )
        .optional()?;

    Ok(reading)
}

pub fn reading_exists(conn: &Connection, account_ref: i64, reading_time: &NaiveDateTime) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM meter_readings WHERE account_ref = ?1 AND reading_time = ?2
         )",
        params![account_ref, format_timestamp(reading_time)],
        |row| row.get(0),
    )?;

    Ok(exists)
}

/// Insert every reading inside a single SQLite transaction.
/// Either all rows become durable or none do.
pub fn insert_readings(conn: &Connection, readings: &[NewMeterReading]) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO meter_readings (account_ref, reading_time, reading_value)
             VALUES (?1, ?2, ?3)",
        )?;

        for reading in readings {
            stmt.execute(params![
                reading.account_ref,
                format_timestamp(&reading.reading_time),
                reading.reading_value,
            ])?;
        }
    }

    tx.commit()?;

    Ok(readings.len())
}

pub fn get_readings_for_account(conn: &Connection, account_ref: i64) -> Result<Vec<MeterReading>> {
    let mut stmt = conn.prepare(
        "SELECT id, account_ref, reading_time, reading_value
         FROM meter_readings
         WHERE account_ref = ?1
         ORDER BY reading_time ASC",
    )?;

    let readings = stmt
        .query_map([account_ref], reading_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(readings)
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM meter_readings", [], |row| row.get(0))?;

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, month: u32, year: i32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = setup();
        setup_database(&conn).unwrap();

        assert_eq!(count_accounts(&conn).unwrap(), 0);
        assert_eq!(verify_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_find_account_by_external_id() {
        let conn = setup();
        let id = insert_account(&conn, 2344, "Tommy", "Test").unwrap();

        let account = find_account_by_external_id(&conn, 2344).unwrap().unwrap();
        assert_eq!(account.id, id);
        assert_eq!(account.first_name, "Tommy");

        assert!(find_account_by_external_id(&conn, 9999).unwrap().is_none());
    }

    #[test]
    fn test_external_id_is_unique() {
        let conn = setup();
        insert_account(&conn, 2344, "Tommy", "Test").unwrap();

        assert!(insert_account(&conn, 2344, "Other", "Person").is_err());
    }

    #[test]
    fn test_most_recent_reading_orders_by_time_not_value() {
        let conn = setup();
        let id = insert_account(&conn, 2344, "Tommy", "Test").unwrap();

        let readings = vec![
            NewMeterReading { account_ref: id, reading_time: at(22, 4, 2019, 12, 25), reading_value: 99999 },
            NewMeterReading { account_ref: id, reading_time: at(1, 5, 2019, 9, 0), reading_value: 1 },
        ];
        insert_readings(&conn, &readings).unwrap();

        let latest = most_recent_reading(&conn, id).unwrap().unwrap();
        assert_eq!(latest.reading_time, at(1, 5, 2019, 9, 0));
        assert_eq!(latest.reading_value, 1);
    }

    #[test]
    fn test_reading_exists() {
        let conn = setup();
        let id = insert_account(&conn, 2344, "Tommy", "Test").unwrap();
        let time = at(22, 4, 2019, 12, 25);

        assert!(!reading_exists(&conn, id, &time).unwrap());

        insert_readings(
            &conn,
            &[NewMeterReading { account_ref: id, reading_time: time, reading_value: 1002 }],
        )
        .unwrap();

        assert!(reading_exists(&conn, id, &time).unwrap());
        assert!(!reading_exists(&conn, id, &at(22, 4, 2019, 12, 26)).unwrap());
    }

    #[test]
    fn test_insert_readings_rolls_back_on_constraint_violation() {
        let conn = setup();
        let id = insert_account(&conn, 2344, "Tommy", "Test").unwrap();
        let time = at(22, 4, 2019, 12, 25);

        let readings = vec![
            NewMeterReading { account_ref: id, reading_time: at(21, 4, 2019, 8, 0), reading_value: 10 },
            NewMeterReading { account_ref: id, reading_time: time, reading_value: 20 },
            NewMeterReading { account_ref: id, reading_time: time, reading_value: 30 },
        ];

        let err = insert_readings(&conn, &readings).unwrap_err();
        match err {
            rusqlite::Error::SqliteFailure(e, _) => {
                assert_eq!(e.code, rusqlite::ErrorCode::ConstraintViolation)
            }
            other => panic!("unexpected error: {other}"),
        }

        // Nothing from the failed flush is durable
        assert_eq!(verify_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_get_readings_for_account_ascending() {
        let conn = setup();
        let id = insert_account(&conn, 2344, "Tommy", "Test").unwrap();
        let other = insert_account(&conn, 2233, "Barry", "Test").unwrap();

        insert_readings(
            &conn,
            &[
                NewMeterReading { account_ref: id, reading_time: at(2, 5, 2019, 9, 0), reading_value: 2 },
                NewMeterReading { account_ref: id, reading_time: at(1, 5, 2019, 9, 0), reading_value: 1 },
                NewMeterReading { account_ref: other, reading_time: at(1, 5, 2019, 9, 0), reading_value: 7 },
            ],
        )
        .unwrap();

        let readings = get_readings_for_account(&conn, id).unwrap();
        let values: Vec<i64> = readings.iter().map(|r| r.reading_value).collect();
        assert_eq!(values, vec![1, 2]);
    }
}
