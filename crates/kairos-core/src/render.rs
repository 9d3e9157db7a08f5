use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::filter::Facets;
use crate::timeline::{Bucket, ClassifiedTask, Conflict, TimelineStatistics, VisualStatus};
use crate::view::TimelineView;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    /// One section per bucket in display order; tasks with a reschedule in
    /// flight are marked with `*`.
    #[tracing::instrument(skip(self, out, view))]
    pub fn write_timeline<W: Write>(&self, mut out: W, view: &TimelineView) -> anyhow::Result<()> {
        let timeline = view.timeline();
        writeln!(out, "Timeline for {}", timeline.reference_date.format("%Y-%m-%d"))?;

        for (bucket, tasks) in timeline.timeline.iter() {
            writeln!(out)?;
            writeln!(
                out,
                "{} ({})",
                self.paint(bucket.label(), bucket_color(bucket)),
                tasks.len()
            )?;
            if tasks.is_empty() {
                continue;
            }

            let headers = ["ID", "Due", "Days", "Flag", "Status", "Project", "Title"]
                .iter()
                .map(|h| h.to_string())
                .collect();
            let rows = tasks
                .iter()
                .map(|entry| self.task_row(entry, view.is_locked(&entry.task.task_id)))
                .collect();
            write_table(&mut out, headers, rows)?;
        }

        Ok(())
    }

    pub fn write_conflicts<W: Write>(&self, mut out: W, conflicts: &[Conflict]) -> anyhow::Result<()> {
        if conflicts.is_empty() {
            writeln!(out, "No scheduling conflicts.")?;
            return Ok(());
        }

        writeln!(out, "Conflicts ({})", conflicts.len())?;
        for conflict in conflicts {
            writeln!(
                out,
                "{}: {} tasks scheduled",
                self.paint(&conflict.date.format("%Y-%m-%d").to_string(), "33"),
                conflict.count
            )?;
            for task in &conflict.tasks {
                writeln!(out, "  - {} [{}] {}", task.task_id, task.status, task.title)?;
            }
        }

        Ok(())
    }

    pub fn write_statistics<W: Write>(&self, out: W, stats: &TimelineStatistics) -> anyhow::Result<()> {
        let rows = vec![
            vec!["Total".to_string(), stats.total_tasks.to_string()],
            vec![Bucket::Overdue.label().to_string(), stats.overdue_count.to_string()],
            vec![Bucket::Today.label().to_string(), stats.today_count.to_string()],
            vec![Bucket::ThisWeek.label().to_string(), stats.this_week_count.to_string()],
            vec![Bucket::Future.label().to_string(), stats.future_count.to_string()],
            vec![Bucket::NoDueDate.label().to_string(), stats.no_due_date_count.to_string()],
            vec!["Conflicts".to_string(), stats.conflict_count.to_string()],
        ];
        write_table(out, vec!["Bucket".to_string(), "Tasks".to_string()], rows)
    }

    pub fn write_facets<W: Write>(&self, mut out: W, facets: &Facets) -> anyhow::Result<()> {
        writeln!(out, "projects  {}", facets.projects.join(", "))?;
        writeln!(out, "labels    {}", facets.labels.join(", "))?;
        writeln!(out, "statuses  {}", facets.statuses.join(", "))?;
        writeln!(out, "members   {}", facets.members.join(", "))?;
        Ok(())
    }

    fn task_row(&self, entry: &ClassifiedTask, locked: bool) -> Vec<String> {
        let task = &entry.task;
        let id = if locked {
            format!("{}*", task.task_id)
        } else {
            task.task_id.clone()
        };
        let due = task
            .due_day()
            .map(|day| day.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let days = entry
            .days_until_due
            .map(|days| format!("{days:+}d"))
            .unwrap_or_default();

        vec![
            self.paint(&id, "33"),
            self.paint(&due, bucket_color(entry.bucket)),
            days,
            self.paint(&flag_text(entry), flag_color(entry.visual_status)),
            task.status.to_string(),
            task.project_id.clone().unwrap_or_default(),
            task.title.clone(),
        ]
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if code.is_empty() || !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn flag_text(entry: &ClassifiedTask) -> String {
    let days = |value: Option<i64>| value.unwrap_or_default();
    match entry.visual_status {
        VisualStatus::CriticalOverdue => format!("Critical ({}d)", days(entry.days_overdue)),
        VisualStatus::Overdue => format!("Overdue ({}d)", days(entry.days_overdue)),
        VisualStatus::Upcoming => format!("Due soon ({}d)", days(entry.days_until_due)),
        VisualStatus::OnTrack => "On track".to_string(),
        VisualStatus::NoDueDate => "No due date".to_string(),
        VisualStatus::InvalidDate => "Invalid date".to_string(),
    }
}

fn flag_color(status: VisualStatus) -> &'static str {
    match status {
        VisualStatus::CriticalOverdue => "35",
        VisualStatus::Overdue => "31",
        VisualStatus::Upcoming => "33",
        VisualStatus::OnTrack => "32",
        VisualStatus::NoDueDate | VisualStatus::InvalidDate => "",
    }
}

fn bucket_color(bucket: Bucket) -> &'static str {
    match bucket {
        Bucket::Overdue => "31",
        Bucket::Today => "33",
        Bucket::ThisWeek => "36",
        Bucket::Future | Bucket::NoDueDate => "",
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
