// ⚙️ Configuration - command-line flags with environment fallbacks

use crate::batch::BatchOptions;
use crate::db::setup_database;
use anyhow::{Context, Result};
use clap::Args;
use rusqlite::Connection;
use std::path::PathBuf;

/// Where readings live and how batches are admitted
#[derive(Debug, Clone, Args)]
pub struct StoreConfig {
    /// SQLite database file
    #[arg(long, env = "METER_DB_PATH", default_value = "meter_readings.db")]
    pub db_path: PathBuf,

    /// Accounts CSV loaded when the database has no accounts yet
    #[arg(long, env = "METER_SEED_FILE", default_value = "seed/Test_Accounts.csv")]
    pub seed_file: PathBuf,

    /// Reject rows that collide with earlier rows of the same upload
    #[arg(long, env = "METER_REJECT_IN_BATCH_DUPLICATES")]
    pub reject_in_batch_duplicates: bool,
}

impl StoreConfig {
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            reject_in_batch_duplicates: self.reject_in_batch_duplicates,
        }
    }

    /// Open (creating if needed) the database and ensure the schema exists
    pub fn open_database(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("Failed to open database {}", self.db_path.display()))?;
        setup_database(&conn)?;

        log::info!("database ready at {}", self.db_path.display());
        Ok(conn)
    }
}

/// Upload server settings
#[cfg(feature = "server")]
#[derive(Debug, Clone, clap::Parser)]
#[command(version, about = "Meter reading upload server")]
pub struct ServerConfig {
    #[command(flatten)]
    pub store: StoreConfig,

    /// Address the HTTP server binds to
    #[arg(long, env = "METER_BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: String,

    /// Browser origin allowed to call the API
    #[arg(long, env = "METER_CORS_ORIGIN", default_value = "http://localhost:8080")]
    pub cors_origin: String,

    /// Largest accepted upload body, in bytes
    #[arg(long, env = "METER_MAX_UPLOAD_BYTES", default_value_t = crate::server::DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        store: StoreConfig,
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "meter-readings",
            "--db-path",
            "/tmp/readings.db",
            "--reject-in-batch-duplicates",
        ])
        .unwrap();

        assert_eq!(cli.store.db_path, PathBuf::from("/tmp/readings.db"));
        assert!(cli.store.batch_options().reject_in_batch_duplicates);
    }

    #[test]
    fn test_open_database_creates_schema() {
        let path = std::env::temp_dir().join(format!("meter_config_{}.db", std::process::id()));
        let config = StoreConfig {
            db_path: path.clone(),
            seed_file: PathBuf::from("seed/Test_Accounts.csv"),
            reject_in_batch_duplicates: false,
        };

        let conn = config.open_database().unwrap();
        assert_eq!(crate::db::verify_count(&conn).unwrap(), 0);
        drop(conn);

        for suffix in ["", "-wal", "-shm"] {
            std::fs::remove_file(format!("{}{}", path.display(), suffix)).ok();
        }
    }

    #[cfg(feature = "server")]
    #[test]
    fn test_server_flags() {
        let config = ServerConfig::try_parse_from([
            "meter-server",
            "--bind-addr",
            "127.0.0.1:8088",
            "--cors-origin",
            "http://example.test",
            "--max-upload-bytes",
            "1048576",
        ])
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:8088");
        assert_eq!(config.cors_origin, "http://example.test");
        assert_eq!(config.max_upload_bytes, 1_048_576);
    }
}
