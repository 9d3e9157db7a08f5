use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::datetime::due_date_portion;

/// Workflow status as the backend spells it. Only `Completed` changes how a
/// task is placed on the timeline; unknown spellings round-trip untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    #[default]
    ToDo,
    InProgress,
    Completed,
    Blocked,
    Review,
    Other(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ToDo => "To Do",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Blocked => "Blocked",
            Self::Review => "Review",
            Self::Other(raw) => raw.as_str(),
        }
    }
}

impl From<String> for TaskStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "To Do" => Self::ToDo,
            "In Progress" => Self::InProgress,
            "Completed" => Self::Completed,
            "Blocked" => Self::Blocked,
            "Review" => Self::Review,
            _ => Self::Other(raw),
        }
    }
}

impl From<&str> for TaskStatus {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub status: TaskStatus,

    #[serde(default, deserialize_with = "due_date_text")]
    pub due_date: Option<String>,

    #[serde(default)]
    pub priority: Option<Value>,

    #[serde(default)]
    pub project_id: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,

    #[serde(default)]
    pub assigned_to: Option<Value>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            status: TaskStatus::default(),
            due_date: None,
            priority: None,
            project_id: None,
            labels: vec![],
            assigned_to: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Calendar day of `due_date`, or `None` when it is absent or unreadable.
    pub fn due_day(&self) -> Option<NaiveDate> {
        self.due_date.as_deref().and_then(due_date_portion)
    }

    /// User ids in `assigned_to`, which the backend sends as a bare id, a
    /// `{user_id, ..}` object, or a list of either.
    pub fn assignee_ids(&self) -> Vec<&str> {
        fn collect<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
            match value {
                Value::String(id) => out.push(id),
                Value::Object(map) => {
                    if let Some(Value::String(id)) = map.get("user_id") {
                        out.push(id);
                    }
                }
                Value::Array(items) => items.iter().for_each(|item| collect(item, out)),
                _ => {}
            }
        }

        let mut ids = vec![];
        if let Some(value) = &self.assigned_to {
            collect(value, &mut ids);
        }
        ids
    }
}

/// Explicit `null` reads as the field's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Keeps a non-string due date as its JSON text so it degrades to undated
/// instead of failing the whole snapshot.
fn due_date_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(raw) => Some(raw),
        other => Some(other.to_string()),
    })
}
