//! External stages: their identities, outcomes and invocation.

mod commands;
mod process;
mod runner;

pub use commands::{StageCommand, StageCommands};
pub use process::ProcessRunner;
pub use runner::StageRunner;

use serde::Serialize;
use std::fmt;

/// Exit code a quota-retryable stage uses to report upstream rate limiting.
pub const RATE_LIMITED_EXIT_CODE: i32 = 42;

/// Shell convention for a process ended by SIGINT (130) or SIGTERM (143).
pub const INTERRUPTED_EXIT_CODES: [i32; 2] = [130, 143];

/// One external unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Populates the stations table once per store.
    Bootstrap,
    RealtimeFetch,
    Aggregate,
    Enrich,
    Export,
}

impl Stage {
    /// Stable snake_case name used in logs and the pass ledger.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Bootstrap => "bootstrap",
            Stage::RealtimeFetch => "realtime_fetch",
            Stage::Aggregate => "aggregate",
            Stage::Enrich => "enrich",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a stage invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageOutcome {
    Success,
    RateLimited,
    /// Ended by an interrupt signal; carries the reported exit code.
    Interrupted(i32),
    Fatal(i32),
}

impl StageOutcome {
    /// Classifies a process exit code. `None` means the process was
    /// terminated by a signal and is reported as interrupted with code 1.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => StageOutcome::Success,
            Some(RATE_LIMITED_EXIT_CODE) => StageOutcome::RateLimited,
            Some(code) if INTERRUPTED_EXIT_CODES.contains(&code) => StageOutcome::Interrupted(code),
            Some(code) => StageOutcome::Fatal(code),
            None => StageOutcome::Interrupted(1),
        }
    }
}
