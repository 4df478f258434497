// ✅ Record Validator - admission checks for a single meter reading
//
// Checks run in a fixed order and the first failure wins:
//   1. account id is positive
//   2. value is present and 1-5 ASCII digits
//   3. account exists
//   4. timestamp matches one of the accepted layouts
//   5. value parses as an integer
//   6. no stored reading at the same timestamp
//   7. not older than the account's latest stored reading

use crate::db::{Account, NewMeterReading};
use crate::ledger::Ledger;
use crate::parser::CandidateRecord;
use chrono::{NaiveDateTime, Timelike};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

pub const MAX_VALUE_DIGITS: usize = 5;

// ============================================================================
// DATE LAYOUTS
// ============================================================================

/// Accepted timestamp layouts
///
/// Day/month order is ambiguous for dates like "6/5/2019"; the first layout
/// in `DATE_LAYOUT_PRIORITY` that matches decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateLayout {
    /// dd/MM/yyyy HH:mm
    DayMonthPadded,
    /// d/M/yyyy H:mm
    DayMonthUnpadded,
    /// M/d/yyyy H:mm
    MonthDayUnpadded,
    /// MM/dd/yyyy HH:mm
    MonthDayPadded,
    /// yyyy-MM-dd HH:mm:ss
    IsoSeconds,
}

pub const DATE_LAYOUT_PRIORITY: [DateLayout; 5] = [
    DateLayout::DayMonthPadded,
    DateLayout::DayMonthUnpadded,
    DateLayout::MonthDayUnpadded,
    DateLayout::MonthDayPadded,
    DateLayout::IsoSeconds,
];

const PADDED: (usize, usize) = (2, 2);
const UNPADDED: (usize, usize) = (1, 2);
const YEAR: (usize, usize) = (4, 4);

impl DateLayout {
    /// Layout as shown to operators
    pub fn pattern(&self) -> &'static str {
        match self {
            DateLayout::DayMonthPadded => "dd/MM/yyyy HH:mm",
            DateLayout::DayMonthUnpadded => "d/M/yyyy H:mm",
            DateLayout::MonthDayUnpadded => "M/d/yyyy H:mm",
            DateLayout::MonthDayPadded => "MM/dd/yyyy HH:mm",
            DateLayout::IsoSeconds => "yyyy-MM-dd HH:mm:ss",
        }
    }

    fn chrono_format(&self) -> &'static str {
        match self {
            DateLayout::DayMonthPadded | DateLayout::DayMonthUnpadded => "%d/%m/%Y %H:%M",
            DateLayout::MonthDayUnpadded | DateLayout::MonthDayPadded => "%m/%d/%Y %H:%M",
            DateLayout::IsoSeconds => "%Y-%m-%d %H:%M:%S",
        }
    }

    /// Allowed digit count (min, max) of each numeric field, in input order.
    /// chrono accepts unpadded numbers everywhere, so widths are checked here.
    fn field_widths(&self) -> &'static [(usize, usize)] {
        match self {
            DateLayout::DayMonthPadded | DateLayout::MonthDayPadded => {
                &[PADDED, PADDED, YEAR, PADDED, PADDED]
            }
            DateLayout::DayMonthUnpadded | DateLayout::MonthDayUnpadded => {
                &[UNPADDED, UNPADDED, YEAR, UNPADDED, PADDED]
            }
            DateLayout::IsoSeconds => &[YEAR, PADDED, PADDED, PADDED, PADDED, PADDED],
        }
    }

    fn widths_match(&self, raw: &str) -> bool {
        let widths = self.field_widths();
        let groups: Vec<&str> = raw.split(|c: char| !c.is_ascii_digit()).collect();

        groups.len() == widths.len()
            && groups
                .iter()
                .zip(widths)
                .all(|(group, (min, max))| (*min..=*max).contains(&group.len()))
    }

    pub fn parse(&self, raw: &str) -> Option<NaiveDateTime> {
        if !self.widths_match(raw) {
            return None;
        }

        // chrono reads ":60" as a leap second; wall-clock readings never carry one
        NaiveDateTime::parse_from_str(raw, self.chrono_format())
            .ok()
            .filter(|time| time.nanosecond() < 1_000_000_000)
    }
}

/// Try every layout in priority order; first match wins
pub fn parse_reading_time(raw: &str) -> Option<(DateLayout, NaiveDateTime)> {
    DATE_LAYOUT_PRIORITY
        .iter()
        .find_map(|layout| layout.parse(raw).map(|time| (*layout, time)))
}

// ============================================================================
// REJECTIONS
// ============================================================================

/// Why a row was not admitted. `Display` is the operator-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Invalid reading for account {account_id}: Invalid account ID")]
    InvalidAccountId { account_id: i64 },

    #[error("Invalid reading for account {account_id}: Meter reading value is required")]
    MissingValue { account_id: i64 },

    #[error("Invalid reading for account {account_id}: Meter reading value must be in NNNNN format (up to 5 digits)")]
    ValueFormat { account_id: i64 },

    #[error("Account {account_id} does not exist")]
    UnknownAccount { account_id: i64 },

    #[error("Invalid date format for account {account_id}. Expected format: dd/MM/yyyy HH:mm or d/M/yyyy H:mm")]
    InvalidDate { account_id: i64 },

    #[error("Invalid meter reading value for account {account_id}")]
    InvalidValue { account_id: i64 },

    #[error("Duplicate reading for account {account_id} at {reading_time}")]
    DuplicateReading {
        account_id: i64,
        reading_time: NaiveDateTime,
    },

    #[error("Reading date {reading_time} for account {account_id} is older than existing reading {latest}")]
    OutOfOrder {
        account_id: i64,
        reading_time: NaiveDateTime,
        latest: NaiveDateTime,
    },

    /// Storage or other failure while evaluating this one row
    #[error("Error processing reading for account {account_id}: {cause}")]
    Unexpected { account_id: i64, cause: String },
}

/// Result of validating one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(NewMeterReading),
    Rejected(Rejection),
}

// ============================================================================
// SIBLING READINGS (same batch, not yet flushed)
// ============================================================================

/// Readings accepted earlier in the current batch.
///
/// Only consulted when in-batch collision detection is switched on; otherwise
/// siblings are caught by the storage uniqueness constraint at flush time.
#[derive(Debug, Clone, Default)]
pub struct SiblingReadings {
    seen: HashSet<(i64, NaiveDateTime)>,
    latest: HashMap<i64, NaiveDateTime>,
}

impl SiblingReadings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, reading: &NewMeterReading) {
        self.seen.insert((reading.account_ref, reading.reading_time));
        self.latest
            .entry(reading.account_ref)
            .and_modify(|t| *t = (*t).max(reading.reading_time))
            .or_insert(reading.reading_time);
    }

    pub fn contains(&self, account_ref: i64, reading_time: &NaiveDateTime) -> bool {
        self.seen.contains(&(account_ref, *reading_time))
    }

    pub fn latest(&self, account_ref: i64) -> Option<NaiveDateTime> {
        self.latest.get(&account_ref).copied()
    }
}

// ============================================================================
// CHECKS
// ============================================================================

/// A ledger failure while checking one row
fn fault(account_id: i64) -> impl FnOnce(anyhow::Error) -> Rejection {
    move |err| Rejection::Unexpected {
        account_id,
        cause: format!("{:#}", err),
    }
}

fn check_account_id(candidate: &CandidateRecord) -> Result<i64, Rejection> {
    if candidate.account_id <= 0 {
        return Err(Rejection::InvalidAccountId { account_id: candidate.account_id });
    }
    Ok(candidate.account_id)
}

/// Literal match of `^[0-9]{1,5}$`; no trimming, no sign
fn check_value_shape(candidate: &CandidateRecord) -> Result<&str, Rejection> {
    let account_id = candidate.account_id;
    let raw = candidate.raw_value.as_str();

    if raw.trim().is_empty() {
        return Err(Rejection::MissingValue { account_id });
    }

    let digits_only = raw.bytes().all(|b| b.is_ascii_digit());
    if !digits_only || raw.len() > MAX_VALUE_DIGITS {
        return Err(Rejection::ValueFormat { account_id });
    }

    Ok(raw)
}

fn check_account_exists<L: Ledger + ?Sized>(ledger: &L, account_id: i64) -> Result<Account, Rejection> {
    ledger
        .find_account_by_external_id(account_id)
        .map_err(fault(account_id))?
        .ok_or(Rejection::UnknownAccount { account_id })
}

fn check_reading_time(account_id: i64, raw: &str) -> Result<NaiveDateTime, Rejection> {
    match parse_reading_time(raw) {
        Some((layout, time)) => {
            log::debug!("account {}: '{}' matched layout {}", account_id, raw, layout.pattern());
            Ok(time)
        }
        None => Err(Rejection::InvalidDate { account_id }),
    }
}

fn check_reading_value(account_id: i64, raw: &str) -> Result<i64, Rejection> {
    raw.parse::<i64>()
        .map_err(|_| Rejection::InvalidValue { account_id })
}

fn check_not_duplicate<L: Ledger + ?Sized>(
    ledger: &L,
    siblings: Option<&SiblingReadings>,
    account: &Account,
    reading_time: NaiveDateTime,
) -> Result<(), Rejection> {
    let stored = ledger
        .reading_exists(account.id, &reading_time)
        .map_err(fault(account.account_id))?;
    let in_batch = siblings.map_or(false, |s| s.contains(account.id, &reading_time));

    if stored || in_batch {
        return Err(Rejection::DuplicateReading {
            account_id: account.account_id,
            reading_time,
        });
    }
    Ok(())
}

fn check_not_older<L: Ledger + ?Sized>(
    ledger: &L,
    siblings: Option<&SiblingReadings>,
    account: &Account,
    reading_time: NaiveDateTime,
) -> Result<(), Rejection> {
    let stored = ledger
        .most_recent_reading(account.id)
        .map_err(fault(account.account_id))?
        .map(|r| r.reading_time);
    let in_batch = siblings.and_then(|s| s.latest(account.id));

    let latest = match (stored, in_batch) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };

    match latest {
        Some(latest) if reading_time < latest => Err(Rejection::OutOfOrder {
            account_id: account.account_id,
            reading_time,
            latest,
        }),
        _ => Ok(()),
    }
}

fn run_checks<L: Ledger + ?Sized>(
    ledger: &L,
    siblings: Option<&SiblingReadings>,
    candidate: &CandidateRecord,
) -> Result<NewMeterReading, Rejection> {
    let account_id = check_account_id(candidate)?;
    let raw_value = check_value_shape(candidate)?;
    let account = check_account_exists(ledger, account_id)?;
    let reading_time = check_reading_time(account_id, &candidate.raw_date_time)?;
    let reading_value = check_reading_value(account_id, raw_value)?;
    check_not_duplicate(ledger, siblings, &account, reading_time)?;
    check_not_older(ledger, siblings, &account, reading_time)?;

    Ok(NewMeterReading {
        account_ref: account.id,
        reading_time,
        reading_value,
    })
}

/// Validate one candidate against the ledger.
///
/// A ledger failure on this row comes back as `Rejection::Unexpected`.
pub fn validate<L: Ledger + ?Sized>(
    ledger: &L,
    siblings: Option<&SiblingReadings>,
    candidate: &CandidateRecord,
) -> Verdict {
    match run_checks(ledger, siblings, candidate) {
        Ok(reading) => Verdict::Accepted(reading),
        Err(rejection) => Verdict::Rejected(rejection),
    }
}
