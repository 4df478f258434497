// 📦 Batch Coordinator - parse → validate → flush once
//
// Rows are evaluated strictly in input order. Accepted readings are held
// back and written in a single bulk insert after the last row, so by
// default two rows of the same batch never see each other.

use crate::db::NewMeterReading;
use crate::ledger::Ledger;
use crate::parser::{CandidateRecord, RecordParser};
use crate::validator::{self, Rejection, SiblingReadings, Verdict};
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// Reject rows colliding with (or older than) rows accepted earlier in
    /// the same batch, instead of leaving it to the flush constraint
    pub reject_in_batch_duplicates: bool,
}

// ============================================================================
// OUTCOME
// ============================================================================

/// One rejected row, in structured form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRejection {
    /// 1-based data row
    pub row: usize,
    pub reason: Rejection,
}

/// Failure that aborts the whole submission
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchFailure {
    /// Input could not be read as CSV; nothing was written
    #[error("Error processing file: {0}")]
    Parse(String),

    /// The final bulk insert failed; nothing from this batch was written
    #[error("Error processing file: {0}")]
    Persist(String),
}

/// BatchOutcome - response of one upload
///
/// Serializes to the reporting contract (`successfulReadings`,
/// `failedReadings`, `errors`); structured details are kept alongside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub successful_readings: usize,
    pub failed_readings: usize,
    pub errors: Vec<String>,

    #[serde(skip)]
    pub rejections: Vec<RowRejection>,

    #[serde(skip)]
    pub failure: Option<BatchFailure>,
}

impl BatchOutcome {
    fn fatal(failure: BatchFailure) -> Self {
        BatchOutcome {
            errors: vec![failure.to_string()],
            failure: Some(failure),
            ..Default::default()
        }
    }

    fn accepted(mut self) -> Self {
        self.successful_readings += 1;
        self
    }

    fn rejected(mut self, row: usize, reason: Rejection) -> Self {
        self.failed_readings += 1;
        self.errors.push(reason.to_string());
        self.rejections.push(RowRejection { row, reason });
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.failure.is_some()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} accepted, {} rejected{}",
            self.successful_readings,
            self.failed_readings,
            if self.is_fatal() { " (batch failed)" } else { "" }
        )
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Accumulator threaded through every row of one batch
struct PendingBatch {
    outcome: BatchOutcome,
    writes: Vec<NewMeterReading>,
    siblings: Option<SiblingReadings>,
}

impl PendingBatch {
    fn new(options: BatchOptions) -> Self {
        PendingBatch {
            outcome: BatchOutcome::default(),
            writes: Vec::new(),
            siblings: options.reject_in_batch_duplicates.then(SiblingReadings::new),
        }
    }

    fn evaluate<L: Ledger + ?Sized>(mut self, ledger: &L, candidate: CandidateRecord) -> Self {
        match validator::validate(ledger, self.siblings.as_ref(), &candidate) {
            Verdict::Accepted(reading) => {
                debug!("row {}: accepted reading for account {}", candidate.row, candidate.account_id);
                if let Some(siblings) = self.siblings.as_mut() {
                    siblings.record(&reading);
                }
                self.writes.push(reading);
                self.outcome = self.outcome.accepted();
            }
            Verdict::Rejected(reason) => {
                if matches!(reason, Rejection::Unexpected { .. }) {
                    error!("row {}: {}", candidate.row, reason);
                } else {
                    warn!("row {}: {}", candidate.row, reason);
                }
                self.outcome = self.outcome.rejected(candidate.row, reason);
            }
        }

        self
    }

    fn flush<L: Ledger + ?Sized>(self, ledger: &L) -> BatchOutcome {
        let mut outcome = self.outcome;

        // Tallies are not revised when the flush fails
        if let Err(err) = ledger.bulk_insert(&self.writes) {
            error!("failed to persist {} readings: {}", self.writes.len(), err);
            let failure = BatchFailure::Persist(err.to_string());
            outcome.errors.push(failure.to_string());
            outcome.failure = Some(failure);
        } else {
            debug!("persisted {} readings", self.writes.len());
        }

        outcome
    }
}

/// Run one uploaded batch end to end against the ledger
pub fn process_batch<L, R>(ledger: &L, input: R, options: BatchOptions) -> BatchOutcome
where
    L: Ledger + ?Sized,
    R: Read,
{
    let evaluated = RecordParser::from_reader(input).and_then(|mut parser| {
        parser.try_fold(PendingBatch::new(options), |pending, candidate| {
            candidate.map(|c| pending.evaluate(ledger, c))
        })
    });

    let outcome = match evaluated {
        Ok(pending) => pending.flush(ledger),
        Err(err) => {
            error!("error processing meter readings file: {:#}", err);
            BatchOutcome::fatal(BatchFailure::Parse(format!("{:#}", err)))
        }
    };

    info!("meter reading batch processed: {}", outcome.summary());
    outcome
}

pub fn process_file<L: Ledger + ?Sized>(ledger: &L, path: &Path, options: BatchOptions) -> Result<BatchOutcome> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    Ok(process_batch(ledger, file, options))
}
