#![cfg(unix)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use railway_pipeline::clock::Clock;
use railway_pipeline::config::PipelineConfig;
use railway_pipeline::error::PipelineError;
use railway_pipeline::scheduler::{Scheduler, SchedulerState};
use railway_pipeline::stage::ProcessRunner;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Returns immediately from every sleep and cancels the token once the
/// scheduler starts its inter-pass sleep.
struct InstantClock {
    sleeps: Mutex<Vec<u64>>,
    interval: Duration,
    cancel: CancellationToken,
}

#[async_trait]
impl Clock for InstantClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration.as_secs());
        if duration == self.interval {
            self.cancel.cancel();
        }
    }
}

fn workspace(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "railway_pipeline_it_{}_{}",
        name,
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(dir.join("scripts")).unwrap();
    dir
}

/// Writes a stage script that records its name in `trace` before running `body`.
fn stage_script(dir: &Path, file: &str, label: &str, body: &str) {
    let script = format!(
        "echo {label} >> \"{trace}\"\n{body}\n",
        trace = dir.join("trace").display()
    );
    fs::write(dir.join("scripts").join(file), script).unwrap();
}

fn all_stages_succeed(dir: &Path) {
    stage_script(dir, "fetch_stop_areas.py", "bootstrap", "exit 0");
    stage_script(dir, "scrape_departure_delays.py", "fetch", "exit 0");
    stage_script(dir, "aggregate_realtime_logs.py", "aggregate", "exit 0");
    stage_script(dir, "enrich_with_weather_calendar.py", "enrich", "exit 0");
    stage_script(dir, "export_unified_dataset.py", "export", "exit 0");
}

fn config(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        db_path: dir.join("data").join("railway.db"),
        raw_dir: dir.join("data").join("raw"),
        export_path: dir.join("exports").join("unified.csv"),
        interpreter: "sh".into(),
        scripts_dir: dir.join("scripts"),
        ..PipelineConfig::default()
    }
}

fn seed_stations(db: &Path) {
    fs::create_dir_all(db.parent().unwrap()).unwrap();
    Connection::open(db)
        .unwrap()
        .execute_batch("CREATE TABLE stations (stop_area_id TEXT PRIMARY KEY)")
        .unwrap();
}

fn trace(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("trace"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn scheduler(config: &PipelineConfig, export: bool) -> (Scheduler, Arc<InstantClock>) {
    let cancel = CancellationToken::new();
    let clock = Arc::new(InstantClock {
        sleeps: Mutex::new(Vec::new()),
        interval: config.interval(),
        cancel: cancel.clone(),
    });
    let scheduler = Scheduler::from_config(
        config,
        export,
        Arc::new(ProcessRunner::new()),
        clock.clone(),
        cancel,
    )
    .unwrap();
    (scheduler, clock)
}

#[tokio::test]
async fn test_quota_scenario_then_cancel() {
    let dir = workspace("quota");
    all_stages_succeed(&dir);
    let counter = dir.join("fetch_count");
    stage_script(
        &dir,
        "scrape_departure_delays.py",
        "fetch",
        &format!(
            "n=$(cat \"{c}\" 2>/dev/null || echo 0)\nn=$((n+1))\necho $n > \"{c}\"\nif [ $n -le 3 ]; then exit 42; fi\nexit 0",
            c = counter.display()
        ),
    );
    let config = config(&dir);
    seed_stations(&config.db_path);

    let (mut scheduler, clock) = scheduler(&config, false);
    let summary = scheduler.run().await.unwrap();

    assert_eq!(summary.passes_completed, 1);
    assert_eq!(*clock.sleeps.lock().unwrap(), vec![60, 60, 86400, 3600]);
    assert_eq!(
        trace(&dir),
        vec!["fetch", "fetch", "fetch", "fetch", "aggregate", "enrich"]
    );
    assert_eq!(scheduler.state(), SchedulerState::Terminated);
}

#[tokio::test]
async fn test_fatal_aggregation_stops_everything() {
    let dir = workspace("fatal");
    all_stages_succeed(&dir);
    stage_script(&dir, "aggregate_realtime_logs.py", "aggregate", "exit 3");
    let config = config(&dir);
    seed_stations(&config.db_path);

    let (mut scheduler, clock) = scheduler(&config, true);
    let err = scheduler.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::FatalStage { code: 3, .. }));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(trace(&dir), vec!["fetch", "aggregate"]);
    assert!(clock.sleeps.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_fresh_store_is_bootstrapped_once() {
    let dir = workspace("bootstrap");
    all_stages_succeed(&dir);
    let config = config(&dir);

    let (mut scheduler, _clock) = scheduler(&config, true);
    let report = scheduler.run_single_pass().await.unwrap();

    assert!(config.db_path.exists());
    assert!(report.exported());
    assert_eq!(
        trace(&dir),
        vec!["bootstrap", "fetch", "aggregate", "enrich", "export"]
    );
}

#[tokio::test]
async fn test_init_on_ready_store_runs_nothing() {
    let dir = workspace("ready");
    all_stages_succeed(&dir);
    let config = config(&dir);
    seed_stations(&config.db_path);
    let before = fs::read(&config.db_path).unwrap();

    let (mut scheduler, _clock) = scheduler(&config, false);
    scheduler.initialize().await.unwrap();
    scheduler.initialize().await.unwrap();

    assert!(trace(&dir).is_empty());
    assert_eq!(fs::read(&config.db_path).unwrap(), before);
}
