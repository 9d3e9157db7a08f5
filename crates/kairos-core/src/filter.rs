use std::collections::BTreeSet;

use anyhow::anyhow;
use serde::Serialize;
use tracing::trace;

use crate::task::{
  Task,
  TaskStatus
};

/// Project, label, status and team member criteria applied before a
/// timeline is built. Unset criteria match everything; set ones must all
/// match.
#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub struct TimelineFilter {
  pub project: Option<String>,
  pub label:   Option<String>,
  pub status:  Option<TaskStatus>,
  pub member:  Option<String>
}

impl TimelineFilter {
  #[tracing::instrument(skip(terms))]
  pub fn parse(
    terms: &[String]
  ) -> anyhow::Result<Self> {
    let mut filter = Self::default();

    for term in terms {
      let (key, value) = term
        .split_once(':')
        .ok_or_else(|| {
          anyhow!(
            "unrecognized filter term: \
             {term} (expected \
             project:, label:, \
             status: or member:)"
          )
        })?;
      let value = value.trim();
      let value = (!value.is_empty())
        .then(|| value.to_string());

      match key
        .trim()
        .to_ascii_lowercase()
        .as_str()
      {
        | "project" | "pro" => {
          filter.project = value;
        }
        | "label" | "category" => {
          filter.label = value;
        }
        | "status" => {
          filter.status =
            value.map(TaskStatus::from);
        }
        | "member" | "assignee" => {
          filter.member = value;
        }
        | other => {
          return Err(anyhow!(
            "unknown filter key: \
             {other}"
          ));
        }
      }
    }

    trace!(?filter, "parsed timeline filter");
    Ok(filter)
  }

  pub fn is_empty(&self) -> bool {
    self.project.is_none()
      && self.label.is_none()
      && self.status.is_none()
      && self.member.is_none()
  }

  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    if let Some(project) = &self.project
      && task.project_id.as_deref()
        != Some(project.as_str())
    {
      return false;
    }

    if let Some(label) = &self.label
      && !task
        .labels
        .iter()
        .any(|l| l == label)
    {
      return false;
    }

    if let Some(status) = &self.status
      && &task.status != status
    {
      return false;
    }

    if let Some(member) = &self.member
      && !task
        .assignee_ids()
        .contains(&member.as_str())
    {
      return false;
    }

    true
  }

  pub fn apply(
    &self,
    tasks: &[Task]
  ) -> Vec<Task> {
    tasks
      .iter()
      .filter(|task| self.matches(task))
      .cloned()
      .collect()
  }
}

/// Distinct values available as filter choices.
#[derive(
  Debug,
  Clone,
  Default,
  Serialize,
  PartialEq,
  Eq,
)]
pub struct Facets {
  pub projects: Vec<String>,
  pub labels:   Vec<String>,
  pub statuses: Vec<String>,
  pub members:  Vec<String>
}

impl Facets {
  pub fn collect(
    tasks: &[Task]
  ) -> Self {
    let mut projects = BTreeSet::new();
    let mut labels = BTreeSet::new();
    let mut statuses = BTreeSet::new();
    let mut members = BTreeSet::new();

    for task in tasks {
      if let Some(project) =
        &task.project_id
        && !project.is_empty()
      {
        projects.insert(project.clone());
      }
      for label in &task.labels {
        labels.insert(label.clone());
      }
      statuses.insert(
        task.status.as_str().to_string()
      );
      for id in task.assignee_ids() {
        members.insert(id.to_string());
      }
    }

    Self {
      projects: projects
        .into_iter()
        .collect(),
      labels:   labels
        .into_iter()
        .collect(),
      statuses: statuses
        .into_iter()
        .collect(),
      members:  members
        .into_iter()
        .collect()
    }
  }
}
