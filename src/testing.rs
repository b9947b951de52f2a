//! Deterministic doubles for the runner and the clock.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::Result;
use crate::stage::{Stage, StageCommand, StageOutcome, StageRunner};

/// Replays queued outcomes per stage; an empty queue means success.
#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<HashMap<Stage, VecDeque<StageOutcome>>>,
    calls: Mutex<Vec<Stage>>,
    cancel_after: Mutex<Option<(Stage, usize, CancellationToken)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(self, stage: Stage, outcomes: &[StageOutcome]) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(stage)
            .or_default()
            .extend(outcomes.iter().copied());
        self
    }

    /// Cancels `token` once `stage` has run `count` times.
    pub fn cancel_after(self, stage: Stage, count: usize, token: CancellationToken) -> Self {
        *self.cancel_after.lock().unwrap() = Some((stage, count, token));
        self
    }

    pub fn calls(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, stage: Stage) -> usize {
        self.calls().iter().filter(|s| **s == stage).count()
    }
}

#[async_trait]
impl StageRunner for ScriptedRunner {
    async fn run(&self, stage: Stage, _command: &StageCommand) -> Result<StageOutcome> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(stage);
            calls.iter().filter(|s| **s == stage).count()
        };

        if let Some((target, n, token)) = self.cancel_after.lock().unwrap().as_ref()
            && *target == stage
            && count >= *n
        {
            token.cancel();
        }

        let outcome = self
            .script
            .lock()
            .unwrap()
            .get_mut(&stage)
            .and_then(VecDeque::pop_front)
            .unwrap_or(StageOutcome::Success);
        Ok(outcome)
    }
}

/// Records requested sleeps and returns immediately; `now` advances by the
/// slept amount.
pub struct RecordingClock {
    start: DateTime<Utc>,
    sleeps: Mutex<Vec<Duration>>,
    cancel_on_sleep: Mutex<Option<(usize, CancellationToken)>>,
}

impl RecordingClock {
    pub fn new() -> Self {
        Self {
            start: Utc.with_ymd_and_hms(2026, 1, 5, 6, 0, 0).unwrap(),
            sleeps: Mutex::new(Vec::new()),
            cancel_on_sleep: Mutex::new(None),
        }
    }

    /// Cancels `token` during the `n`-th sleep (1-based).
    pub fn cancel_on_sleep(self, n: usize, token: CancellationToken) -> Self {
        *self.cancel_on_sleep.lock().unwrap() = Some((n, token));
        self
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn sleeps_secs(&self) -> Vec<u64> {
        self.sleeps().iter().map(Duration::as_secs).collect()
    }
}

impl Default for RecordingClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    fn now(&self) -> DateTime<Utc> {
        let slept: Duration = self.sleeps.lock().unwrap().iter().sum();
        self.start + chrono::Duration::from_std(slept).unwrap_or(chrono::Duration::zero())
    }

    async fn sleep(&self, duration: Duration) {
        let n = {
            let mut sleeps = self.sleeps.lock().unwrap();
            sleeps.push(duration);
            sleeps.len()
        };
        if let Some((target, token)) = self.cancel_on_sleep.lock().unwrap().as_ref()
            && n >= *target
        {
            token.cancel();
        }
    }
}
