//! Quota-aware stage execution.
//!
//! A quota-retryable stage that reports rate limiting is retried after a
//! short delay. Once `max_retries` consecutive attempts have been rate
//! limited the executor sleeps through a long cooldown, resets its attempt
//! counter and starts again. It never gives up on rate limiting alone; only
//! a fatal outcome or cancellation ends the loop.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock::{Clock, sleep_or_cancel};
use crate::config::RetryPolicy;
use crate::error::{PipelineError, Result};
use crate::stage::{RATE_LIMITED_EXIT_CODE, Stage, StageCommand, StageOutcome, StageRunner};

/// Bookkeeping for one completed stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageRun {
    pub stage: Stage,
    /// Total invocations, across cooldowns.
    pub attempts: u32,
    pub cooldowns: u32,
}

pub struct QuotaExecutor {
    runner: Arc<dyn StageRunner>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl QuotaExecutor {
    /// Builds an executor sharing `cancel` with the scheduler.
    pub fn new(
        runner: Arc<dyn StageRunner>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runner,
            clock,
            policy,
            cancel,
        }
    }

    /// Time source used for every retry, cooldown and pass sleep.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Token observed during sleeps and when classifying interrupted stages.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs a quota-retryable stage until it succeeds.
    ///
    /// # Errors
    ///
    /// [`PipelineError::FatalStage`] on any non-zero, non-rate-limited exit,
    /// [`PipelineError::Cancelled`] if cancelled while sleeping.
    #[tracing::instrument(name = "stage", skip(self, command), fields(stage = %stage, retryable = true))]
    pub async fn run_with_retry(&self, stage: Stage, command: &StageCommand) -> Result<StageRun> {
        let mut attempt: u32 = 1;
        let mut run = StageRun {
            stage,
            attempts: 0,
            cooldowns: 0,
        };

        loop {
            run.attempts += 1;
            info!(attempt, max_retries = self.policy.max_retries, "Starting attempt");

            match self.runner.run(stage, command).await? {
                StageOutcome::Success => {
                    info!(attempt, total_attempts = run.attempts, "Stage succeeded");
                    return Ok(run);
                }
                StageOutcome::RateLimited if attempt >= self.policy.max_retries => {
                    warn!(
                        attempt,
                        cooldown_secs = self.policy.cooldown.as_secs(),
                        "Quota exhausted, entering cooldown"
                    );
                    sleep_or_cancel(self.clock(), self.policy.cooldown, &self.cancel).await?;
                    run.cooldowns += 1;
                    attempt = 1;
                    info!(cooldowns = run.cooldowns, "Cooldown finished, retrying from attempt 1");
                }
                StageOutcome::RateLimited => {
                    warn!(
                        attempt,
                        retry_delay_secs = self.policy.retry_delay.as_secs(),
                        "Rate limited, retrying"
                    );
                    sleep_or_cancel(self.clock(), self.policy.retry_delay, &self.cancel).await?;
                    attempt += 1;
                }
                StageOutcome::Interrupted(code) => return Err(self.interrupted(stage, code)),
                StageOutcome::Fatal(code) => return Err(self.fatal(stage, code)),
            }
        }
    }

    /// Runs a stage exactly once; any non-zero exit, including the
    /// rate-limit code, is fatal.
    #[tracing::instrument(name = "stage", skip(self, command), fields(stage = %stage, retryable = false))]
    pub async fn run_once(&self, stage: Stage, command: &StageCommand) -> Result<StageRun> {
        info!("Starting stage");
        match self.runner.run(stage, command).await? {
            StageOutcome::Success => {
                info!("Stage succeeded");
                Ok(StageRun {
                    stage,
                    attempts: 1,
                    cooldowns: 0,
                })
            }
            StageOutcome::RateLimited => Err(self.fatal(stage, RATE_LIMITED_EXIT_CODE)),
            StageOutcome::Interrupted(code) => Err(self.interrupted(stage, code)),
            StageOutcome::Fatal(code) => Err(self.fatal(stage, code)),
        }
    }

    /// An interrupted stage counts as cancellation only when the pipeline
    /// itself was cancelled; otherwise it is fatal like any other failure.
    fn interrupted(&self, stage: Stage, code: i32) -> PipelineError {
        if self.cancel.is_cancelled() {
            warn!(%stage, code, "Stage interrupted after cancellation was requested");
            return PipelineError::Cancelled;
        }
        self.fatal(stage, code)
    }

    fn fatal(&self, stage: Stage, code: i32) -> PipelineError {
        error!(%stage, code, "Stage failed, aborting pipeline");
        PipelineError::FatalStage { stage, code }
    }
}
