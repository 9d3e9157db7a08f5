use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::datetime::format_due_date;
use crate::task::Task;
use crate::timeline::Bucket;

/// Fields the dashboard endpoints compute per task. They are derived again on
/// every classification, so stale copies are dropped on load.
const PLACEMENT_KEYS: [&str; 6] = [
    "timeline_status",
    "days_until_due",
    "days_overdue",
    "is_overdue",
    "is_upcoming",
    "visual_status",
];

/// Task snapshot as the dashboard endpoints return it, kept in one JSON file.
#[derive(Debug)]
pub struct DataStore {
    pub path: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(path))]
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let path = path.to_path_buf();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        if !path.exists() {
            fs::write(&path, "[]\n")
                .with_context(|| format!("failed to create {}", path.display()))?;
        }

        info!(snapshot = %path.display(), "opened task snapshot");
        Ok(Self { path })
    }

    #[tracing::instrument(skip(self))]
    pub fn load(&self) -> anyhow::Result<Vec<Task>> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading {}", self.path.display()))?;
        parse_tasks(&raw).with_context(|| format!("failed to load {}", self.path.display()))
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn save(&self, tasks: &[Task]) -> anyhow::Result<()> {
        save_json_atomic(&self.path, tasks)
            .with_context(|| format!("failed to save {}", self.path.display()))
    }

    /// Writes a new due day (or clears it) and returns the stored task.
    #[tracing::instrument(skip(self))]
    pub fn update_due_date(&self, task_id: &str, due: Option<NaiveDate>) -> anyhow::Result<Task> {
        let mut tasks = self.load()?;
        let task = tasks
            .iter_mut()
            .find(|task| task.task_id == task_id)
            .ok_or_else(|| anyhow!("task not found: {task_id}"))?;

        task.due_date = due.map(format_due_date);
        let updated = task.clone();
        self.save(&tasks)?;

        info!(task_id, due_date = ?updated.due_date, "updated due date");
        Ok(updated)
    }
}

/// Reads a task list from any reader, e.g. stdin.
pub fn read_tasks_from<R: Read>(mut reader: R) -> anyhow::Result<Vec<Task>> {
    let mut raw = String::new();
    reader
        .read_to_string(&mut raw)
        .context("failed reading task input")?;
    parse_tasks(&raw)
}

/// Accepts a bare array, or an object carrying the list under `tasks`,
/// `team_tasks`, or as a bucketed `timeline`.
pub fn parse_tasks(raw: &str) -> anyhow::Result<Vec<Task>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(vec![]);
    }

    let value: Value = serde_json::from_str(trimmed).context("task input is not valid JSON")?;
    let tasks: Vec<Task> = match value {
        Value::Array(_) => serde_json::from_value(value)?,
        Value::Object(mut map) => {
            if let Some(list) = map.remove("tasks").or_else(|| map.remove("team_tasks")) {
                serde_json::from_value(list)?
            } else if let Some(Value::Object(mut buckets)) = map.remove("timeline") {
                let mut tasks = Vec::new();
                for bucket in Bucket::ALL {
                    if let Some(list) = buckets.remove(bucket.as_str()) {
                        let part: Vec<Task> = serde_json::from_value(list)
                            .with_context(|| format!("failed parsing timeline.{bucket}"))?;
                        tasks.extend(part);
                    }
                }
                tasks
            } else {
                return Err(anyhow!(
                    "expected a task array or an object with tasks, team_tasks or timeline"
                ));
            }
        }
        other => {
            return Err(anyhow!("expected a task array, got {}", json_kind(&other)));
        }
    };

    let tasks: Vec<Task> = tasks.into_iter().map(strip_placement).collect();
    debug!(count = tasks.len(), "parsed tasks");
    Ok(tasks)
}

/// Drops the placement fields a backend response carries for each task.
fn strip_placement(mut task: Task) -> Task {
    for key in PLACEMENT_KEYS {
        task.extra.remove(key);
    }
    task
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[tracing::instrument(skip(path, tasks))]
fn save_json_atomic(path: &Path, tasks: &[Task]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = tasks.len(), "saving snapshot atomically");

    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, tasks)?;
    writeln!(temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
