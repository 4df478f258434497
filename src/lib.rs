// Meter Readings - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod batch;
pub mod config;
pub mod db;
pub mod ledger;
pub mod parser;
pub mod seed;
pub mod validator;

#[cfg(feature = "server")]
pub mod server;

// Re-export commonly used types
pub use batch::{process_batch, process_file, BatchFailure, BatchOptions, BatchOutcome, RowRejection};
pub use config::StoreConfig;
#[cfg(feature = "server")]
pub use config::ServerConfig;
pub use db::{
    Account, MeterReading, NewMeterReading,
    setup_database, insert_account, find_account_by_external_id,
    get_readings_for_account, verify_count,
};
pub use ledger::{Ledger, LedgerError};
pub use parser::{CandidateRecord, RecordParser};
pub use seed::seed_accounts_from_csv;
pub use validator::{
    DateLayout, Rejection, SiblingReadings, Verdict,
    DATE_LAYOUT_PRIORITY, parse_reading_time, validate,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
