use std::collections::BTreeMap;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::datetime::{ViewerZone, format_due_date};
use crate::filter::TimelineFilter;
use crate::task::Task;
use crate::timeline::Timeline;

/// Handed out by [`TimelineView::begin_fetch`]; only the most recent ticket
/// may replace the view's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    Discarded { ticket: u64, latest: u64 },
}

/// An in-flight due-date change. The task stays locked until the ticket is
/// finished or reverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RescheduleTicket {
    pub task_id: String,
    pub requested: Option<NaiveDate>,
}

/// State behind one rendered timeline: the last task list the backend
/// returned, the active filter, and any reschedules still waiting on a write.
#[derive(Debug, Clone)]
pub struct TimelineView {
    zone: ViewerZone,
    filter: TimelineFilter,
    last_good: Vec<Task>,
    moves: BTreeMap<String, Option<NaiveDate>>,
    timeline: Timeline,
    issued: u64,
}

impl TimelineView {
    pub fn new(zone: ViewerZone, now: DateTime<Utc>) -> Self {
        Self {
            zone,
            filter: TimelineFilter::default(),
            last_good: vec![],
            moves: BTreeMap::new(),
            timeline: Timeline::build(&[], zone.today(now)),
            issued: 0,
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn tasks(&self) -> &[Task] {
        &self.last_good
    }

    pub fn filter(&self) -> &TimelineFilter {
        &self.filter
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.timeline.reference_date
    }

    pub fn is_locked(&self, task_id: &str) -> bool {
        self.moves.contains_key(task_id)
    }

    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.issued += 1;
        debug!(ticket = self.issued, "fetch started");
        FetchTicket { seq: self.issued }
    }

    /// Replaces the data with `tasks` unless a newer fetch has been started
    /// since `ticket` was issued.
    #[tracing::instrument(skip(self, ticket, tasks, now), fields(seq = ticket.seq, count = tasks.len()))]
    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        tasks: Vec<Task>,
        now: DateTime<Utc>,
    ) -> FetchOutcome {
        if ticket.seq != self.issued {
            warn!(latest = self.issued, "discarding stale fetch result");
            return FetchOutcome::Discarded {
                ticket: ticket.seq,
                latest: self.issued,
            };
        }

        self.last_good = tasks;
        self.rebuild(now);
        FetchOutcome::Applied
    }

    /// A failed fetch leaves the last good data on screen.
    pub fn fail_fetch(&mut self, ticket: FetchTicket) {
        warn!(
            ticket = ticket.seq,
            tasks = self.last_good.len(),
            "fetch failed; keeping last good timeline"
        );
    }

    pub fn set_filter(&mut self, filter: TimelineFilter, now: DateTime<Utc>) {
        debug!(?filter, "timeline filter changed");
        self.filter = filter;
        self.rebuild(now);
    }

    /// Locks `task_id` and shows it on `requested` until the write settles.
    #[tracing::instrument(skip(self, now))]
    pub fn begin_reschedule(
        &mut self,
        task_id: &str,
        requested: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<RescheduleTicket> {
        if !self.last_good.iter().any(|task| task.task_id == task_id) {
            return Err(anyhow!("task not on the timeline: {task_id}"));
        }
        if self.is_locked(task_id) {
            return Err(anyhow!("task {task_id} is already being rescheduled"));
        }

        self.moves.insert(task_id.to_string(), requested);
        self.rebuild(now);
        info!(task_id, requested = ?requested, "reschedule started");
        Ok(RescheduleTicket {
            task_id: task_id.to_string(),
            requested,
        })
    }

    /// Unlocks after a successful write. The caller refetches to pick up the
    /// stored value.
    pub fn finish_reschedule(&mut self, ticket: RescheduleTicket) {
        self.moves.remove(&ticket.task_id);
        info!(task_id = %ticket.task_id, "reschedule finished");
    }

    /// Unlocks after a failed write and puts the task back where the last
    /// good data had it.
    pub fn revert_reschedule(&mut self, ticket: RescheduleTicket, now: DateTime<Utc>) {
        self.moves.remove(&ticket.task_id);
        self.rebuild(now);
        warn!(task_id = %ticket.task_id, "reschedule reverted");
    }

    fn rebuild(&mut self, now: DateTime<Utc>) {
        let shown: Vec<Task> = self
            .last_good
            .iter()
            .filter(|task| self.filter.matches(task))
            .map(|task| match self.moves.get(&task.task_id) {
                Some(requested) => {
                    let mut moved = task.clone();
                    moved.due_date = requested.map(format_due_date);
                    moved
                }
                None => task.clone(),
            })
            .collect();

        self.timeline = Timeline::build(&shown, self.zone.today(now));
    }
}
