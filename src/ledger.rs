// 📒 Ledger Lookup - account/reading store consulted by the validator
// Abstracts storage so the validation pipeline can be driven by any backend

use crate::db::{self, Account, MeterReading, NewMeterReading};
use anyhow::Result;
use chrono::NaiveDateTime;
use rusqlite::Connection;
use thiserror::Error;

/// Failure of the final bulk flush
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Storage-level uniqueness rejected the flush (race or in-batch collision)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                LedgerError::ConstraintViolation(err.to_string())
            }
            other => LedgerError::Storage(other.to_string()),
        }
    }
}

/// Ledger - the store a batch is validated against and flushed into
pub trait Ledger {
    /// Resolve an operator-facing account number to the stored account
    fn find_account_by_external_id(&self, account_id: i64) -> Result<Option<Account>>;

    /// Latest durable reading for the account, by timestamp
    fn most_recent_reading(&self, account_ref: i64) -> Result<Option<MeterReading>>;

    fn reading_exists(&self, account_ref: i64, reading_time: &NaiveDateTime) -> Result<bool>;

    /// Persist all readings at once. Returns the number written.
    fn bulk_insert(&self, readings: &[NewMeterReading]) -> Result<usize, LedgerError>;
}

impl Ledger for Connection {
    fn find_account_by_external_id(&self, account_id: i64) -> Result<Option<Account>> {
        db::find_account_by_external_id(self, account_id)
    }

    fn most_recent_reading(&self, account_ref: i64) -> Result<Option<MeterReading>> {
        db::most_recent_reading(self, account_ref)
    }

    fn reading_exists(&self, account_ref: i64, reading_time: &NaiveDateTime) -> Result<bool> {
        db::reading_exists(self, account_ref, reading_time)
    }

    fn bulk_insert(&self, readings: &[NewMeterReading]) -> Result<usize, LedgerError> {
        if readings.is_empty() {
            return Ok(0);
        }

        Ok(db::insert_readings(self, readings)?)
    }
}
