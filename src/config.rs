//! Process-level configuration.
//!
//! Every setting has a default and can be overridden either on the command
//! line or through a `PIPELINE_*` environment variable (a `.env` file is
//! loaded before parsing).

use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Settings shared by every subcommand.
#[derive(Debug, Clone, Args, Serialize)]
pub struct PipelineConfig {
    /// SQLite store shared by all stages
    #[arg(long, env = "PIPELINE_DB_PATH", default_value = "data/railway.db")]
    pub db_path: PathBuf,

    /// Directory receiving raw realtime CSV files
    #[arg(long, env = "PIPELINE_RAW_DIR", default_value = "data/raw")]
    pub raw_dir: PathBuf,

    /// .env file holding the transit API credentials
    #[arg(long, env = "PIPELINE_ENV_FILE", default_value = ".env")]
    pub env_file: PathBuf,

    /// Log level forwarded to every stage
    #[arg(
        long,
        env = "PIPELINE_LOG_LEVEL",
        default_value = "INFO",
        value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"]
    )]
    pub log_level: String,

    /// Seconds to sleep between two passes
    #[arg(long, env = "PIPELINE_INTERVAL_SECS", default_value_t = 3600)]
    pub interval_secs: u64,

    /// Seconds to wait after a rate-limited attempt
    #[arg(long, env = "PIPELINE_RETRY_DELAY_SECS", default_value_t = 60)]
    pub retry_delay_secs: u64,

    /// Rate-limited attempts before entering cooldown
    #[arg(long, env = "PIPELINE_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Seconds to wait once the quota is exhausted
    #[arg(long, env = "PIPELINE_COOLDOWN_SECS", default_value_t = 86400)]
    pub cooldown_secs: u64,

    /// Destination of the unified dataset export
    #[arg(
        long,
        env = "PIPELINE_EXPORT_PATH",
        default_value = "data/exports/unified_dataset.csv"
    )]
    pub export_path: PathBuf,

    /// Stop areas requested per page during bootstrap
    #[arg(long, env = "PIPELINE_PAGE_SIZE", default_value_t = 200)]
    pub page_size: u32,

    /// Seconds between bootstrap requests
    #[arg(long, env = "PIPELINE_REQUEST_SLEEP", default_value_t = 0.2)]
    pub request_sleep: f64,

    /// Rows per commit during aggregation
    #[arg(long, env = "PIPELINE_COMMIT_EVERY", default_value_t = 1000)]
    pub commit_every: u32,

    /// Interpreter used to launch stage scripts
    #[arg(long, env = "PIPELINE_INTERPRETER", default_value = "python3")]
    pub interpreter: String,

    /// Directory containing the stage scripts
    #[arg(long, env = "PIPELINE_SCRIPTS_DIR", default_value = "scripts")]
    pub scripts_dir: PathBuf,

    /// Table whose presence marks a bootstrapped store
    #[arg(long, env = "PIPELINE_PREREQUISITE_TABLE", default_value = "stations")]
    pub prerequisite_table: String,

    /// Optional CSV ledger receiving one row per completed pass
    #[arg(long, env = "PIPELINE_PASS_LOG")]
    pub pass_log: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/railway.db"),
            raw_dir: PathBuf::from("data/raw"),
            env_file: PathBuf::from(".env"),
            log_level: "INFO".to_string(),
            interval_secs: 3600,
            retry_delay_secs: 60,
            max_retries: 3,
            cooldown_secs: 86400,
            export_path: PathBuf::from("data/exports/unified_dataset.csv"),
            page_size: 200,
            request_sleep: 0.2,
            commit_every: 1000,
            interpreter: "python3".to_string(),
            scripts_dir: PathBuf::from("scripts"),
            prerequisite_table: "stations".to_string(),
            pass_log: None,
        }
    }
}

impl PipelineConfig {
    /// Rejects settings that would make the scheduler spin or never retry.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(PipelineError::Config(
                "max_retries must be at least 1".into(),
            ));
        }
        if self.interval_secs == 0 {
            return Err(PipelineError::Config(
                "interval_secs must be greater than zero".into(),
            ));
        }
        if self.prerequisite_table.is_empty() {
            return Err(PipelineError::Config(
                "prerequisite_table must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }
}

/// Pacing applied to rate-limited stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed before the quota is considered exhausted.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(60),
            cooldown: Duration::from_secs(86400),
        }
    }
}
