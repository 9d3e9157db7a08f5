//! Places tasks on the timeline relative to the viewer's calendar day and
//! finds days that carry more than one task.
//!
//! Everything here is a pure function of the task list and the reference
//! date. Callers re-run it on every load, refresh and reschedule.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::datetime::days_between;
use crate::task::Task;

/// Last day offset that still counts as "this week".
pub const THIS_WEEK_HORIZON_DAYS: i64 = 7;

/// Last day offset flagged as due soon.
pub const UPCOMING_HORIZON_DAYS: i64 = 3;

/// Days past due after which an overdue task is critical.
pub const CRITICAL_OVERDUE_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Overdue,
    Today,
    ThisWeek,
    Future,
    NoDueDate,
}

impl Bucket {
    /// Display order.
    pub const ALL: [Bucket; 5] = [
        Bucket::Overdue,
        Bucket::Today,
        Bucket::ThisWeek,
        Bucket::Future,
        Bucket::NoDueDate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overdue => "overdue",
            Self::Today => "today",
            Self::ThisWeek => "this_week",
            Self::Future => "future",
            Self::NoDueDate => "no_due_date",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Overdue => "Overdue",
            Self::Today => "Today",
            Self::ThisWeek => "This week",
            Self::Future => "Future",
            Self::NoDueDate => "No due date",
        }
    }

    /// Bucket for a task due `days_until_due` calendar days from the reference date.
    pub fn from_days(days_until_due: i64) -> Self {
        if days_until_due < 0 {
            Self::Overdue
        } else if days_until_due == 0 {
            Self::Today
        } else if days_until_due <= THIS_WEEK_HORIZON_DAYS {
            Self::ThisWeek
        } else {
            Self::Future
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency flag shown next to a task, independent of its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualStatus {
    CriticalOverdue,
    Overdue,
    Upcoming,
    OnTrack,
    NoDueDate,
    InvalidDate,
}

impl VisualStatus {
    /// `days_until_due` is `None` when the task has no readable due day;
    /// `has_due_text` tells an unreadable date apart from a missing one.
    pub fn from_days(days_until_due: Option<i64>, has_due_text: bool) -> Self {
        match days_until_due {
            None if has_due_text => Self::InvalidDate,
            None => Self::NoDueDate,
            Some(days) if days < -CRITICAL_OVERDUE_DAYS => Self::CriticalOverdue,
            Some(days) if days < 0 => Self::Overdue,
            Some(days) if days <= UPCOMING_HORIZON_DAYS => Self::Upcoming,
            Some(_) => Self::OnTrack,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CriticalOverdue => "critical_overdue",
            Self::Overdue => "overdue",
            Self::Upcoming => "upcoming",
            Self::OnTrack => "on_track",
            Self::NoDueDate => "no_due_date",
            Self::InvalidDate => "invalid_date",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineStatus {
    Completed,
    Bucket(Bucket),
}

impl TimelineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Bucket(bucket) => bucket.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub status: TimelineStatus,
    pub days_until_due: Option<i64>,
}

/// Where a single task lands relative to `reference`.
pub fn timeline_status(task: &Task, reference: NaiveDate) -> Placement {
    if task.is_completed() {
        return Placement {
            status: TimelineStatus::Completed,
            days_until_due: None,
        };
    }

    let Some(raw) = task.due_date.as_deref() else {
        return Placement {
            status: TimelineStatus::Bucket(Bucket::NoDueDate),
            days_until_due: None,
        };
    };

    let Some(due) = task.due_day() else {
        warn!(task_id = %task.task_id, due_date = %raw, "unreadable due date; treating as undated");
        return Placement {
            status: TimelineStatus::Bucket(Bucket::NoDueDate),
            days_until_due: None,
        };
    };

    let days = days_between(reference, due);
    Placement {
        status: TimelineStatus::Bucket(Bucket::from_days(days)),
        days_until_due: Some(days),
    }
}

/// A task together with its timeline placement. Serializes as the task's own
/// fields plus the placement fields.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClassifiedTask {
    #[serde(flatten)]
    pub task: Task,
    #[serde(rename = "timeline_status")]
    pub bucket: Bucket,
    pub days_until_due: Option<i64>,
    pub days_overdue: Option<i64>,
    pub is_overdue: bool,
    pub is_upcoming: bool,
    pub visual_status: VisualStatus,
}

impl ClassifiedTask {
    fn new(task: Task, bucket: Bucket, days_until_due: Option<i64>) -> Self {
        let days_overdue = match bucket {
            Bucket::Overdue => days_until_due.map(i64::abs),
            _ => None,
        };
        let has_due_text = task.due_date.as_deref().is_some_and(|raw| !raw.is_empty());
        Self {
            visual_status: VisualStatus::from_days(days_until_due, has_due_text),
            task,
            bucket,
            days_until_due,
            days_overdue,
            is_overdue: bucket == Bucket::Overdue,
            is_upcoming: days_until_due
                .is_some_and(|days| (0..=UPCOMING_HORIZON_DAYS).contains(&days)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TimelineBuckets {
    pub overdue: Vec<ClassifiedTask>,
    pub today: Vec<ClassifiedTask>,
    pub this_week: Vec<ClassifiedTask>,
    pub future: Vec<ClassifiedTask>,
    pub no_due_date: Vec<ClassifiedTask>,
}

impl TimelineBuckets {
    pub fn get(&self, bucket: Bucket) -> &[ClassifiedTask] {
        match bucket {
            Bucket::Overdue => &self.overdue,
            Bucket::Today => &self.today,
            Bucket::ThisWeek => &self.this_week,
            Bucket::Future => &self.future,
            Bucket::NoDueDate => &self.no_due_date,
        }
    }

    fn get_mut(&mut self, bucket: Bucket) -> &mut Vec<ClassifiedTask> {
        match bucket {
            Bucket::Overdue => &mut self.overdue,
            Bucket::Today => &mut self.today,
            Bucket::ThisWeek => &mut self.this_week,
            Bucket::Future => &mut self.future,
            Bucket::NoDueDate => &mut self.no_due_date,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Bucket, &[ClassifiedTask])> {
        Bucket::ALL.into_iter().map(move |bucket| (bucket, self.get(bucket)))
    }

    pub fn tasks(&self) -> impl Iterator<Item = &ClassifiedTask> {
        self.iter().flat_map(|(_, tasks)| tasks.iter())
    }

    pub fn find(&self, task_id: &str) -> Option<&ClassifiedTask> {
        self.tasks().find(|entry| entry.task.task_id == task_id)
    }

    pub fn len(&self) -> usize {
        self.iter().map(|(_, tasks)| tasks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splits the non-completed tasks into the five timeline buckets. Each bucket
/// keeps the input order.
#[tracing::instrument(skip(tasks), fields(count = tasks.len()))]
pub fn classify(tasks: &[Task], reference: NaiveDate) -> TimelineBuckets {
    let mut buckets = TimelineBuckets::default();
    let mut completed = 0_usize;

    for task in tasks {
        let placement = timeline_status(task, reference);
        trace!(
            task_id = %task.task_id,
            status = placement.status.as_str(),
            days = ?placement.days_until_due,
            "placed task"
        );
        match placement.status {
            TimelineStatus::Completed => completed += 1,
            TimelineStatus::Bucket(bucket) => buckets
                .get_mut(bucket)
                .push(ClassifiedTask::new(task.clone(), bucket, placement.days_until_due)),
        }
    }

    debug!(
        placed = buckets.len(),
        completed,
        overdue = buckets.overdue.len(),
        today = buckets.today.len(),
        this_week = buckets.this_week.len(),
        future = buckets.future.len(),
        no_due_date = buckets.no_due_date.len(),
        "classified timeline"
    );
    buckets
}

/// Two or more open tasks due on the same calendar day.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Conflict {
    pub date: NaiveDate,
    pub tasks: Vec<Task>,
    pub count: usize,
}

/// Groups open, dated tasks by due day and reports every day holding at least
/// two of them, earliest day first.
#[tracing::instrument(skip(tasks), fields(count = tasks.len()))]
pub fn detect_conflicts(tasks: &[Task]) -> Vec<Conflict> {
    let mut by_day: BTreeMap<NaiveDate, Vec<Task>> = BTreeMap::new();
    for task in tasks.iter().filter(|task| !task.is_completed()) {
        if let Some(day) = task.due_day() {
            by_day.entry(day).or_default().push(task.clone());
        }
    }

    let conflicts: Vec<Conflict> = by_day
        .into_iter()
        .filter(|(_, tasks)| tasks.len() > 1)
        .map(|(date, tasks)| Conflict {
            date,
            count: tasks.len(),
            tasks,
        })
        .collect();

    debug!(conflicts = conflicts.len(), "detected conflicts");
    conflicts
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineStatistics {
    pub total_tasks: usize,
    pub overdue_count: usize,
    pub today_count: usize,
    pub this_week_count: usize,
    pub future_count: usize,
    pub no_due_date_count: usize,
    pub conflict_count: usize,
}

impl TimelineStatistics {
    pub fn from_parts(buckets: &TimelineBuckets, conflicts: &[Conflict]) -> Self {
        Self {
            total_tasks: buckets.len(),
            overdue_count: buckets.overdue.len(),
            today_count: buckets.today.len(),
            this_week_count: buckets.this_week.len(),
            future_count: buckets.future.len(),
            no_due_date_count: buckets.no_due_date.len(),
            conflict_count: conflicts.len(),
        }
    }
}

/// Everything a timeline view renders for one task list.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Timeline {
    pub reference_date: NaiveDate,
    pub timeline: TimelineBuckets,
    pub conflicts: Vec<Conflict>,
    pub timeline_statistics: TimelineStatistics,
}

impl Timeline {
    pub fn build(tasks: &[Task], reference: NaiveDate) -> Self {
        let timeline = classify(tasks, reference);
        let conflicts = detect_conflicts(tasks);
        let timeline_statistics = TimelineStatistics::from_parts(&timeline, &conflicts);
        Self {
            reference_date: reference,
            timeline,
            conflicts,
            timeline_statistics,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{
        Bucket, Timeline, TimelineStatus, VisualStatus, classify, detect_conflicts,
        timeline_status,
    };
    use crate::task::{Task, TaskStatus};

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 10).expect("valid date")
    }

    fn task(id: &str, due: Option<&str>, status: &str) -> Task {
        let mut task = Task::new(id, format!("task {id}"));
        task.due_date = due.map(str::to_string);
        task.status = TaskStatus::from(status);
        task
    }

    fn ids(entries: &[super::ClassifiedTask]) -> Vec<&str> {
        entries.iter().map(|e| e.task.task_id.as_str()).collect()
    }

    #[test]
    fn one_day_late_is_overdue() {
        let buckets = classify(&[task("a", Some("2024-06-09"), "To Do")], reference());
        assert_eq!(ids(&buckets.overdue), vec!["a"]);
        assert_eq!(buckets.overdue[0].days_overdue, Some(1));
        assert!(buckets.overdue[0].is_overdue);
        assert_eq!(buckets.len(), 1);
    }

    #[test]
    fn late_evening_today_is_still_today() {
        let buckets = classify(
            &[task("b", Some("2024-06-10T23:00:00Z"), "In Progress")],
            reference(),
        );
        assert_eq!(ids(&buckets.today), vec!["b"]);
        assert!(buckets.overdue.is_empty());
        assert_eq!(buckets.today[0].days_overdue, None);
    }

    #[test]
    fn seven_days_out_is_this_week() {
        let buckets = classify(&[task("c", Some("2024-06-17"), "Blocked")], reference());
        assert_eq!(ids(&buckets.this_week), vec!["c"]);
        assert_eq!(buckets.this_week[0].days_until_due, Some(7));
        assert!(!buckets.this_week[0].is_upcoming);
        assert_eq!(buckets.this_week[0].visual_status, VisualStatus::OnTrack);
    }

    #[test]
    fn tomorrow_is_this_week() {
        let buckets = classify(&[task("c1", Some("2024-06-11"), "Review")], reference());
        assert_eq!(ids(&buckets.this_week), vec!["c1"]);
        assert_eq!(buckets.this_week[0].days_until_due, Some(1));
    }

    #[test]
    fn eight_days_out_is_future() {
        let buckets = classify(&[task("d", Some("2024-06-18"), "Blocked")], reference());
        assert_eq!(ids(&buckets.future), vec!["d"]);
        assert!(!buckets.future[0].is_upcoming);
    }

    #[test]
    fn completed_tasks_are_dropped_everywhere() {
        let tasks = vec![
            task("e", Some("2024-06-09"), "Completed"),
            task("e2", Some("2024-06-09"), "Completed"),
            task("e3", None, "Completed"),
        ];
        let buckets = classify(&tasks, reference());
        assert!(buckets.is_empty());
        assert!(detect_conflicts(&tasks).is_empty());
        assert_eq!(
            timeline_status(&tasks[0], reference()).status,
            TimelineStatus::Completed
        );
    }

    #[test]
    fn same_day_tasks_conflict() {
        let tasks = vec![
            task("f1", Some("2024-06-09"), "To Do"),
            task("f2", Some("2024-06-09T15:00:00Z"), "In Progress"),
        ];
        let conflicts = detect_conflicts(&tasks);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].date.to_string(), "2024-06-09");
        assert_eq!(conflicts[0].count, 2);
        assert_eq!(conflicts[0].tasks, tasks);
    }

    #[test]
    fn completed_task_does_not_complete_a_conflict() {
        let tasks = vec![
            task("g1", Some("2024-06-12"), "To Do"),
            task("g2", Some("2024-06-12"), "Completed"),
            task("g3", Some("2024-06-13"), "To Do"),
        ];
        assert!(detect_conflicts(&tasks).is_empty());
    }

    #[test]
    fn undated_and_unreadable_are_no_due_date() {
        let tasks = vec![
            task("h1", None, "To Do"),
            task("h2", Some("whenever"), "Blocked"),
            task("h3", Some(""), "Review"),
        ];
        let buckets = classify(&tasks, reference());
        assert_eq!(ids(&buckets.no_due_date), vec!["h1", "h2", "h3"]);
        assert_eq!(buckets.len(), 3);
        assert!(detect_conflicts(&tasks).is_empty());
    }

    #[test]
    fn buckets_partition_open_tasks_in_input_order() {
        let tasks = vec![
            task("1", Some("2024-06-20"), "To Do"),
            task("2", Some("2024-06-01"), "To Do"),
            task("3", None, "To Do"),
            task("4", Some("2024-06-10"), "Review"),
            task("5", Some("2024-06-05"), "Completed"),
            task("6", Some("2024-06-02"), "Blocked"),
            task("7", Some("2024-06-12"), "In Progress"),
            task("8", Some("2030-01-01"), "To Do"),
        ];
        let buckets = classify(&tasks, reference());

        assert_eq!(ids(&buckets.overdue), vec!["2", "6"]);
        assert_eq!(ids(&buckets.today), vec!["4"]);
        assert_eq!(ids(&buckets.this_week), vec!["7"]);
        assert_eq!(ids(&buckets.future), vec!["1", "8"]);
        assert_eq!(ids(&buckets.no_due_date), vec!["3"]);

        let open = tasks.iter().filter(|t| !t.is_completed()).count();
        assert_eq!(buckets.len(), open);
        for t in tasks.iter().filter(|t| !t.is_completed()) {
            let hits = buckets
                .iter()
                .filter(|(_, entries)| entries.iter().any(|e| e.task.task_id == t.task_id))
                .count();
            assert_eq!(hits, 1, "task {} placed {hits} times", t.task_id);
        }
        assert!(buckets.find("5").is_none());
    }

    #[test]
    fn classify_is_idempotent() {
        let tasks = vec![
            task("i1", Some("2024-06-09"), "To Do"),
            task("i2", None, "To Do"),
            task("i3", Some("2024-07-09"), "To Do"),
        ];
        assert_eq!(classify(&tasks, reference()), classify(&tasks, reference()));
    }

    #[test]
    fn conflict_holds_exactly_the_open_tasks_of_that_day() {
        let tasks = vec![
            task("j1", Some("2024-06-15"), "To Do"),
            task("j2", Some("2024-06-16"), "To Do"),
            task("j3", Some("2024-06-15T08:00:00"), "Blocked"),
            task("j4", Some("2024-06-15"), "Completed"),
            task("j5", Some("2024-06-16"), "Review"),
            task("j6", Some("2024-06-15"), "In Progress"),
        ];
        let conflicts = detect_conflicts(&tasks);
        assert_eq!(conflicts.len(), 2);

        let by_date = |date: &str| {
            conflicts
                .iter()
                .find(|c| c.date.to_string() == date)
                .map(|c| c.tasks.iter().map(|t| t.task_id.clone()).collect::<Vec<_>>())
        };
        assert_eq!(by_date("2024-06-15"), Some(vec!["j1".into(), "j3".into(), "j6".into()]));
        assert_eq!(by_date("2024-06-16"), Some(vec!["j2".into(), "j5".into()]));
    }

    #[test]
    fn empty_input_is_empty_timeline() {
        let built = Timeline::build(&[], reference());
        assert!(built.timeline.is_empty());
        assert!(built.conflicts.is_empty());
        assert_eq!(built.timeline_statistics.total_tasks, 0);
    }

    #[test]
    fn bucket_boundaries() {
        assert_eq!(Bucket::from_days(-1), Bucket::Overdue);
        assert_eq!(Bucket::from_days(0), Bucket::Today);
        assert_eq!(Bucket::from_days(1), Bucket::ThisWeek);
        assert_eq!(Bucket::from_days(7), Bucket::ThisWeek);
        assert_eq!(Bucket::from_days(8), Bucket::Future);
    }

    #[test]
    fn urgency_flags_at_their_boundaries() {
        let tasks = vec![
            task("m8", Some("2024-06-02"), "To Do"),
            task("m7", Some("2024-06-03"), "To Do"),
            task("m0", Some("2024-06-10"), "To Do"),
            task("m3", Some("2024-06-13"), "To Do"),
            task("m4", Some("2024-06-14"), "To Do"),
            task("mx", Some("not a date"), "To Do"),
            task("mn", None, "To Do"),
        ];
        let buckets = classify(&tasks, reference());
        let flags = |id: &str| {
            let entry = buckets.find(id).expect("task placed");
            (entry.visual_status, entry.is_upcoming)
        };

        assert_eq!(flags("m8"), (VisualStatus::CriticalOverdue, false));
        assert_eq!(flags("m7"), (VisualStatus::Overdue, false));
        assert_eq!(flags("m0"), (VisualStatus::Upcoming, true));
        assert_eq!(flags("m3"), (VisualStatus::Upcoming, true));
        assert_eq!(flags("m4"), (VisualStatus::OnTrack, false));
        assert_eq!(flags("mx"), (VisualStatus::InvalidDate, false));
        assert_eq!(flags("mn"), (VisualStatus::NoDueDate, false));
        assert_eq!(buckets.find("m8").and_then(|e| e.days_overdue), Some(8));
    }

    #[test]
    fn serialized_timeline_matches_dashboard_shape() {
        let tasks = vec![
            task("k1", Some("2024-06-08"), "To Do"),
            task("k2", Some("2024-06-08"), "To Do"),
        ];
        let value = serde_json::to_value(Timeline::build(&tasks, reference()))
            .expect("serialize timeline");

        assert_eq!(value["timeline"]["overdue"][0]["task_id"], "k1");
        assert_eq!(value["timeline"]["overdue"][0]["timeline_status"], "overdue");
        assert_eq!(value["timeline"]["overdue"][0]["days_overdue"], 2);
        assert_eq!(value["timeline"]["overdue"][0]["visual_status"], "overdue");
        assert_eq!(value["timeline"]["this_week"].as_array().map(Vec::len), Some(0));
        assert_eq!(value["conflicts"][0]["date"], "2024-06-08");
        assert_eq!(value["conflicts"][0]["count"], 2);
        assert_eq!(value["timeline_statistics"]["overdue_count"], 2);
        assert_eq!(value["timeline_statistics"]["conflict_count"], 1);
        assert_eq!(value["reference_date"], "2024-06-10");
    }
}
