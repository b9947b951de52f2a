use async_trait::async_trait;

use super::{Stage, StageCommand, StageOutcome};
use crate::error::Result;

/// Runs a stage to completion and reports its outcome.
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run(&self, stage: Stage, command: &StageCommand) -> Result<StageOutcome>;
}
