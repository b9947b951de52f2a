use std::path::Path;

use super::Stage;
use crate::config::PipelineConfig;

/// A program and its argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl StageCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Command lines for every stage, resolved once from configuration.
#[derive(Debug, Clone)]
pub struct StageCommands {
    bootstrap: StageCommand,
    realtime_fetch: StageCommand,
    aggregate: StageCommand,
    enrich: StageCommand,
    export: StageCommand,
}

impl StageCommands {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let db = path_arg(&config.db_path);
        let env = path_arg(&config.env_file);
        let raw = path_arg(&config.raw_dir);
        let level = config.log_level.clone();

        let script = |name: &str| -> Vec<String> {
            vec![path_arg(&config.scripts_dir.join(name))]
        };
        let command = |name: &str, flags: Vec<String>| {
            let mut args = script(name);
            args.extend(flags);
            StageCommand::new(config.interpreter.clone(), args)
        };

        Self {
            bootstrap: command(
                "fetch_stop_areas.py",
                vec![
                    "--env".into(),
                    env.clone(),
                    "--db".into(),
                    db.clone(),
                    "--page-size".into(),
                    config.page_size.to_string(),
                    "--sleep".into(),
                    config.request_sleep.to_string(),
                    "--log-level".into(),
                    level.clone(),
                ],
            ),
            realtime_fetch: command(
                "scrape_departure_delays.py",
                vec![
                    "--db".into(),
                    db.clone(),
                    "--env".into(),
                    env,
                    "--output-dir".into(),
                    raw.clone(),
                    "--log-level".into(),
                    level.clone(),
                ],
            ),
            aggregate: command(
                "aggregate_realtime_logs.py",
                vec![
                    "--raw-dir".into(),
                    raw,
                    "--db".into(),
                    db.clone(),
                    "--commit-every".into(),
                    config.commit_every.to_string(),
                    "--log-level".into(),
                    level.clone(),
                ],
            ),
            enrich: command(
                "enrich_with_weather_calendar.py",
                vec![
                    "--db".into(),
                    db.clone(),
                    "--log-level".into(),
                    level.clone(),
                ],
            ),
            export: command(
                "export_unified_dataset.py",
                vec![
                    "--db".into(),
                    db,
                    "--output".into(),
                    path_arg(&config.export_path),
                    "--log-level".into(),
                    level,
                ],
            ),
        }
    }

    pub fn get(&self, stage: Stage) -> &StageCommand {
        match stage {
            Stage::Bootstrap => &self.bootstrap,
            Stage::RealtimeFetch => &self.realtime_fetch,
            Stage::Aggregate => &self.aggregate,
            Stage::Enrich => &self.enrich,
            Stage::Export => &self.export,
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
