//! Long-running pass scheduler.
//!
//! ```text
//! Initializing --store ready--> RunningPass --pass done--> Sleeping
//!      |                          ^    |                      |
//!      |                          +----|------interval--------+
//!      +-----------cancel / fatal-----+-------> Terminated <--+
//! ```
//!
//! Cancellation is cooperative: it is observed at the top of the loop and
//! during sleeps, never while a stage is running.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, sleep_or_cancel};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::executor::QuotaExecutor;
use crate::ledger::PassLedger;
use crate::sequencer::{Pass, PassReport, StageSequencer};
use crate::stage::{Stage, StageCommands, StageRunner};
use crate::store::{StoreInitializer, StoreStatus};

/// Lifecycle of the scheduler; `Terminated` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Initializing,
    RunningPass,
    Sleeping,
    Terminated,
}

/// Outcome of a run that ended through cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub passes_completed: u64,
}

pub struct Scheduler {
    store: StoreInitializer,
    sequencer: StageSequencer,
    executor: QuotaExecutor,
    interval: Duration,
    ledger: Option<PassLedger>,
    state: SchedulerState,
    passes_completed: u64,
}

impl Scheduler {
    /// Assembles a scheduler from already-built components.
    pub fn new(
        store: StoreInitializer,
        sequencer: StageSequencer,
        executor: QuotaExecutor,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            sequencer,
            executor,
            interval,
            ledger: None,
            state: SchedulerState::Initializing,
            passes_completed: 0,
        }
    }

    /// Wires every component from configuration.
    pub fn from_config(
        config: &PipelineConfig,
        export: bool,
        runner: Arc<dyn StageRunner>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let commands = StageCommands::from_config(config);
        let store = StoreInitializer::new(
            &config.db_path,
            config.prerequisite_table.clone(),
            commands.get(Stage::Bootstrap).clone(),
        );

        let mut workdirs = vec![config.raw_dir.clone()];
        if export
            && let Some(parent) = config.export_path.parent().filter(|p| !p.as_os_str().is_empty())
        {
            workdirs.push(parent.to_path_buf());
        }
        let sequencer = StageSequencer::new(commands, export).with_workdirs(workdirs);
        let executor = QuotaExecutor::new(runner, clock, config.retry_policy(), cancel);

        let mut scheduler = Self::new(store, sequencer, executor, config.interval());
        if let Some(path) = &config.pass_log {
            scheduler = scheduler.with_ledger(PassLedger::new(path));
        }
        Ok(scheduler)
    }

    /// Appends a ledger row after every completed pass.
    pub fn with_ledger(mut self, ledger: PassLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Number of passes that ran every stage successfully.
    pub fn passes_completed(&self) -> u64 {
        self.passes_completed
    }

    /// Prepares the store without running any pass.
    pub async fn initialize(&mut self) -> Result<StoreStatus> {
        self.transition(SchedulerState::Initializing);
        let result = self.store.ensure_ready(&self.executor).await;
        if result.is_err() {
            self.transition(SchedulerState::Terminated);
        }
        result
    }

    /// Runs passes until cancelled or a stage fails fatally.
    ///
    /// There is no pass limit, so the only `Ok` outcome is cancellation;
    /// every other termination is an error.
    pub async fn run(&mut self) -> Result<RunSummary> {
        info!(interval_secs = self.interval.as_secs(), "Scheduler starting");
        let result = self.run_loop().await;
        self.transition(SchedulerState::Terminated);
        self.finish(result)
    }

    /// Initializes the store and runs exactly one pass, without sleeping.
    pub async fn run_single_pass(&mut self) -> Result<PassReport> {
        let result = match self.initialize().await {
            Ok(_) => self.next_pass().await,
            Err(e) => Err(e),
        };
        self.transition(SchedulerState::Terminated);
        result
    }

    async fn run_loop(&mut self) -> Result<Infallible> {
        if self.cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.initialize().await?;

        loop {
            if self.cancelled() {
                return Err(PipelineError::Cancelled);
            }
            self.next_pass().await?;

            self.transition(SchedulerState::Sleeping);
            info!(
                passes_completed = self.passes_completed,
                sleep_secs = self.interval.as_secs(),
                "Sleeping until next pass"
            );
            sleep_or_cancel(
                self.executor.clock(),
                self.interval,
                self.executor.cancel_token(),
            )
            .await?;
        }
    }

    async fn next_pass(&mut self) -> Result<PassReport> {
        self.transition(SchedulerState::RunningPass);
        let pass = Pass {
            number: self.passes_completed + 1,
            started_at: self.executor.clock().now(),
        };

        let report = self.sequencer.run_pass(&self.executor, pass).await?;
        self.passes_completed = pass.number;

        if let Some(ledger) = &self.ledger
            && let Err(e) = ledger.append(&report)
        {
            warn!(path = %ledger.path().display(), error = %e, "Failed to append pass record");
        }
        Ok(report)
    }

    fn finish(&self, result: Result<Infallible>) -> Result<RunSummary> {
        match result {
            Err(PipelineError::Cancelled) => {
                info!(passes_completed = self.passes_completed, "Scheduler cancelled");
                Ok(RunSummary {
                    passes_completed: self.passes_completed,
                })
            }
            Err(e) => {
                error!(error = %e, passes_completed = self.passes_completed, "Scheduler aborted");
                Err(e)
            }
            Ok(never) => match never {},
        }
    }

    fn cancelled(&self) -> bool {
        self.executor.cancel_token().is_cancelled()
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Scheduler state change");
            self.state = next;
        }
    }
}
