use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{Stage, StageCommand, StageOutcome, StageRunner};
use crate::error::{PipelineError, Result};

/// Runs stages as child processes, inheriting stdio.
///
/// The child is never killed: an interrupt reaching the process group is
/// left for the stage itself to handle.
pub struct ProcessRunner;

impl ProcessRunner {
    /// Creates a runner; stages are spawned on demand.
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageRunner for ProcessRunner {
    async fn run(&self, stage: Stage, command: &StageCommand) -> Result<StageOutcome> {
        debug!(%stage, program = %command.program, args = ?command.args, "Spawning stage");

        let status = Command::new(&command.program)
            .args(&command.args)
            .status()
            .await
            .map_err(|source| PipelineError::Spawn { stage, source })?;

        debug!(%stage, code = ?status.code(), "Stage exited");
        Ok(StageOutcome::from_exit_code(status.code()))
    }
}
