// 🏗️ Record Parser - uploaded CSV → candidate meter readings
// Streams rows in input order; columns are located by header name

use anyhow::{Context, Result};
use csv::{StringRecord, StringRecordsIntoIter};
use std::io::Read;

pub const ACCOUNT_ID_COLUMN: &str = "AccountId";
pub const DATE_TIME_COLUMN: &str = "MeterReadingDateTime";
pub const VALUE_COLUMN: &str = "MeterReadValue";

// ============================================================================
// CORE TYPES
// ============================================================================

/// CandidateRecord - one parsed but unvalidated row
///
/// Date and value stay raw; the validator owns their interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    /// 1-based data row (header excluded), for diagnostics
    pub row: usize,

    /// External account number; 0 when the cell is missing or not an integer
    pub account_id: i64,

    pub raw_date_time: String,
    pub raw_value: String,
}

/// Positions of the three known columns within a row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ColumnMap {
    account_id: Option<usize>,
    date_time: Option<usize>,
    value: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Self {
        let mut columns = ColumnMap::default();

        for (idx, header) in headers.iter().enumerate() {
            let name = header.trim_start_matches('\u{feff}').trim();

            if name.eq_ignore_ascii_case(ACCOUNT_ID_COLUMN) {
                columns.account_id.get_or_insert(idx);
            } else if name.eq_ignore_ascii_case(DATE_TIME_COLUMN) {
                columns.date_time.get_or_insert(idx);
            } else if name.eq_ignore_ascii_case(VALUE_COLUMN) {
                columns.value.get_or_insert(idx);
            }
        }

        columns
    }

    fn field<'r>(record: &'r StringRecord, idx: Option<usize>) -> &'r str {
        idx.and_then(|i| record.get(i)).unwrap_or("")
    }

    fn candidate(&self, row: usize, record: &StringRecord) -> CandidateRecord {
        let account_id = Self::field(record, self.account_id)
            .trim()
            .parse::<i64>()
            .unwrap_or(0);

        CandidateRecord {
            row,
            account_id,
            raw_date_time: Self::field(record, self.date_time).to_string(),
            raw_value: Self::field(record, self.value).to_string(),
        }
    }
}

// ============================================================================
// PARSER
// ============================================================================

/// RecordParser - lazy iterator of candidates over any byte stream
///
/// A header that cannot be read fails construction. A row that cannot be
/// read yields `Err`; callers treat both as fatal for the whole batch.
pub struct RecordParser<R: Read> {
    records: StringRecordsIntoIter<R>,
    columns: ColumnMap,
    row: usize,
}

impl<R: Read> RecordParser<R> {
    pub fn from_reader(input: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(input);

        let headers = reader.headers().context("Failed to read CSV header")?.clone();
        let columns = ColumnMap::from_headers(&headers);

        if columns.account_id.is_none() || columns.date_time.is_none() || columns.value.is_none() {
            log::warn!("CSV header {:?} is missing expected columns", headers);
        }

        Ok(RecordParser {
            records: reader.into_records(),
            columns,
            row: 0,
        })
    }
}

impl<R: Read> Iterator for RecordParser<R> {
    type Item = Result<CandidateRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        self.row += 1;

        let row = self.row;
        Some(
            record
                .with_context(|| format!("Failed to read CSV row {}", row))
                .map(|r| self.columns.candidate(row, &r)),
        )
    }
}
