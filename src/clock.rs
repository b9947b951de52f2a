//! Time source for the orchestrator.
//!
//! Every suspension point goes through [`Clock`] so timing can be driven
//! deterministically in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the tokio timer.
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeps for `duration` unless `cancel` fires first.
///
/// Returns [`PipelineError::Cancelled`] if the token is cancelled before or
/// while sleeping, including when both complete together.
pub async fn sleep_or_cancel(
    clock: &dyn Clock,
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        _ = clock.sleep(duration) => {
            if cancel.is_cancelled() {
                Err(PipelineError::Cancelled)
            } else {
                Ok(())
            }
        }
    }
}
