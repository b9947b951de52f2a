//! Persistent store preparation.
//!
//! The orchestrator never owns the schema. It only makes sure the SQLite file
//! exists and that the bootstrap stage has populated the prerequisite table.
//! Presence of that table, not of the file, decides whether bootstrap runs,
//! so a store left empty by a crash is bootstrapped again on restart.

use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Result;
use crate::executor::QuotaExecutor;
use crate::stage::{Stage, StageCommand};

/// What [`StoreInitializer::ensure_ready`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    /// File and prerequisite table were already present.
    Ready,
    /// The bootstrap stage ran to populate the prerequisite table.
    Bootstrapped,
}

/// Makes sure the SQLite store exists and has been bootstrapped.
pub struct StoreInitializer {
    db_path: PathBuf,
    table: String,
    bootstrap: StageCommand,
}

impl StoreInitializer {
    /// `table` is the prerequisite whose absence triggers `bootstrap`.
    pub fn new(db_path: impl Into<PathBuf>, table: impl Into<String>, bootstrap: StageCommand) -> Self {
        Self {
            db_path: db_path.into(),
            table: table.into(),
            bootstrap,
        }
    }

    /// Idempotent: on a ready store this performs no writes and runs no stage.
    #[tracing::instrument(name = "store_init", skip(self, executor), fields(db = %self.db_path.display(), table = %self.table))]
    pub async fn ensure_ready(&self, executor: &QuotaExecutor) -> Result<StoreStatus> {
        info!("Checking store");

        if !self.db_path.exists() {
            create_empty_store(&self.db_path)?;
            info!("Created empty store");
        }

        if table_exists(&self.db_path, &self.table)? {
            info!("Store ready");
            return Ok(StoreStatus::Ready);
        }

        info!("Prerequisite table missing, running bootstrap");
        executor.run_with_retry(Stage::Bootstrap, &self.bootstrap).await?;

        if !table_exists(&self.db_path, &self.table)? {
            warn!("Bootstrap succeeded but prerequisite table is still missing");
        }
        info!("Store bootstrapped");
        Ok(StoreStatus::Bootstrapped)
    }
}

fn create_empty_store(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().write(true).create(true).truncate(false).open(path)?;
    Ok(())
}

/// Looks the table up in `sqlite_master` through a read-only connection.
pub fn table_exists(path: &Path, table: &str) -> Result<bool> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}
