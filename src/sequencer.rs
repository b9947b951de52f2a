//! Fixed stage order for one pass.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::info;

use crate::clock::Clock;
use crate::error::Result;
use crate::executor::{QuotaExecutor, StageRun};
use crate::stage::{Stage, StageCommands};

/// A stage slot in the pass, with its retry class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedStage {
    pub stage: Stage,
    /// Only the stage talking to the rate-limited API gets quota handling.
    pub quota_retryable: bool,
}

/// One iteration of the full stage sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pass {
    pub number: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub pass: Pass,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageRun>,
}

impl PassReport {
    /// Total invocations of `stage` during the pass, across cooldowns.
    pub fn attempts_for(&self, stage: Stage) -> u32 {
        self.stages
            .iter()
            .filter(|r| r.stage == stage)
            .map(|r| r.attempts)
            .sum()
    }

    /// Whether the export stage ran in this pass.
    pub fn exported(&self) -> bool {
        self.stages.iter().any(|r| r.stage == Stage::Export)
    }
}

pub struct StageSequencer {
    plan: Vec<PlannedStage>,
    commands: StageCommands,
    workdirs: Vec<PathBuf>,
}

impl StageSequencer {
    /// Fetch, aggregate, enrich and, when `export` is set, export.
    pub fn new(commands: StageCommands, export: bool) -> Self {
        let mut plan = vec![
            PlannedStage {
                stage: Stage::RealtimeFetch,
                quota_retryable: true,
            },
            PlannedStage {
                stage: Stage::Aggregate,
                quota_retryable: false,
            },
            PlannedStage {
                stage: Stage::Enrich,
                quota_retryable: false,
            },
        ];
        if export {
            plan.push(PlannedStage {
                stage: Stage::Export,
                quota_retryable: false,
            });
        }

        Self {
            plan,
            commands,
            workdirs: Vec::new(),
        }
    }

    /// Directories created before every pass.
    pub fn with_workdirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.workdirs.extend(dirs);
        self
    }

    /// Stages of one pass, in execution order.
    pub fn plan(&self) -> &[PlannedStage] {
        &self.plan
    }

    /// Runs every planned stage in order. A stage starts only after the
    /// previous one succeeded; the first error ends the pass.
    #[tracing::instrument(name = "pass", skip(self, executor, pass), fields(pass = pass.number))]
    pub async fn run_pass(&self, executor: &QuotaExecutor, pass: Pass) -> Result<PassReport> {
        info!(started_at = %pass.started_at, stages = self.plan.len(), "Pass started");

        for dir in &self.workdirs {
            std::fs::create_dir_all(dir)?;
        }

        let mut stages = Vec::with_capacity(self.plan.len());
        for planned in &self.plan {
            let command = self.commands.get(planned.stage);
            let run = if planned.quota_retryable {
                executor.run_with_retry(planned.stage, command).await?
            } else {
                executor.run_once(planned.stage, command).await?
            };
            stages.push(run);
        }

        let finished_at = executor.clock().now();
        info!(
            finished_at = %finished_at,
            elapsed_secs = (finished_at - pass.started_at).num_seconds(),
            "Pass finished"
        );

        Ok(PassReport {
            pass,
            finished_at,
            stages,
        })
    }
}
