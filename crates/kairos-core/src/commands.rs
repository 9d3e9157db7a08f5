use std::io::{self, Write};
use std::num::NonZeroU64;
use std::thread;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::config::{Config, TaskSource};
use crate::datastore::{DataStore, read_tasks_from};
use crate::datetime::{ViewerZone, parse_day_expr};
use crate::filter::{Facets, TimelineFilter};
use crate::render::Renderer;
use crate::task::Task;
use crate::view::{FetchOutcome, TimelineView};

const DEFAULT_REFRESH_SECS: u64 = 30;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "timeline",
        "conflicts",
        "stats",
        "facets",
        "export",
        "reschedule",
        "watch",
        "_commands",
        "_show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Table,
    Json,
}

/// Everything a command needs besides its own arguments.
#[derive(Debug)]
pub struct Session<'a> {
    pub source: &'a TaskSource,
    pub cfg: &'a Config,
    pub renderer: &'a Renderer,
    pub zone: ViewerZone,
    pub output: Output,
}

/// Runs one command against stdout.
pub fn dispatch(session: &Session<'_>, inv: Invocation) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    dispatch_to(session, inv, &mut out)
}

#[instrument(skip(session, inv, out))]
pub fn dispatch_to(
    session: &Session<'_>,
    inv: Invocation,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let command = inv.command.as_str();
    let filter = TimelineFilter::parse(&inv.filter_terms)?;

    debug!(
        command,
        filter = ?inv.filter_terms,
        args = ?inv.command_args,
        "dispatching command"
    );

    match command {
        "timeline" => cmd_timeline(session, filter, out),
        "conflicts" => cmd_conflicts(session, filter, out),
        "stats" => cmd_stats(session, filter, out),
        "facets" => cmd_facets(session, out),
        "export" => cmd_export(session, filter, out),
        "reschedule" => cmd_reschedule(session, filter, &inv.command_args, out),
        "watch" => cmd_watch(session, filter, &inv.command_args, out),
        "_commands" => cmd_commands(out),
        "_show" => cmd_show(session.cfg, out),
        "help" => cmd_help(out),
        "version" => {
            writeln!(out, "{}", env!("CARGO_PKG_VERSION"))?;
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

/// Reads the current task list from wherever the session points.
#[instrument(skip(source))]
pub fn load_tasks(source: &TaskSource) -> anyhow::Result<Vec<Task>> {
    match source {
        TaskSource::Stdin => read_tasks_from(io::stdin().lock()),
        TaskSource::Snapshot(path) => DataStore::open(path)?.load(),
    }
}

/// Runs one fetch through the view so stale or failed loads never replace
/// newer data.
fn refresh(view: &mut TimelineView, source: &TaskSource) -> anyhow::Result<()> {
    let ticket = view.begin_fetch();
    match load_tasks(source) {
        Ok(tasks) => {
            if let FetchOutcome::Discarded { ticket, latest } =
                view.complete_fetch(ticket, tasks, Utc::now())
            {
                debug!(ticket, latest, "fetch superseded");
            }
            Ok(())
        }
        Err(err) => {
            view.fail_fetch(ticket);
            Err(err)
        }
    }
}

fn open_view(session: &Session<'_>, filter: TimelineFilter) -> anyhow::Result<TimelineView> {
    let now = Utc::now();
    let mut view = TimelineView::new(session.zone, now);
    view.set_filter(filter, now);
    refresh(&mut view, session.source)?;
    Ok(view)
}

fn write_json<T: Serialize>(out: &mut dyn Write, value: &T) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn write_full_timeline(
    session: &Session<'_>,
    view: &TimelineView,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    match session.output {
        Output::Json => write_json(out, view.timeline()),
        Output::Table => {
            session.renderer.write_timeline(&mut *out, view)?;
            writeln!(out)?;
            session
                .renderer
                .write_conflicts(&mut *out, &view.timeline().conflicts)
        }
    }
}

#[instrument(skip(session, filter, out))]
fn cmd_timeline(
    session: &Session<'_>,
    filter: TimelineFilter,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    info!("command timeline");
    let view = open_view(session, filter)?;
    write_full_timeline(session, &view, out)
}

#[instrument(skip(session, filter, out))]
fn cmd_conflicts(
    session: &Session<'_>,
    filter: TimelineFilter,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    info!("command conflicts");
    let view = open_view(session, filter)?;

    match session.output {
        Output::Json => write_json(out, &view.timeline().conflicts),
        Output::Table => session
            .renderer
            .write_conflicts(out, &view.timeline().conflicts),
    }
}

#[instrument(skip(session, filter, out))]
fn cmd_stats(
    session: &Session<'_>,
    filter: TimelineFilter,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    info!("command stats");
    let view = open_view(session, filter)?;

    match session.output {
        Output::Json => write_json(out, &view.timeline().timeline_statistics),
        Output::Table => session
            .renderer
            .write_statistics(out, &view.timeline().timeline_statistics),
    }
}

#[instrument(skip(session, out))]
fn cmd_facets(session: &Session<'_>, out: &mut dyn Write) -> anyhow::Result<()> {
    info!("command facets");
    let view = open_view(session, TimelineFilter::default())?;
    let open: Vec<Task> = view
        .tasks()
        .iter()
        .filter(|task| !task.is_completed())
        .cloned()
        .collect();
    let facets = Facets::collect(&open);

    match session.output {
        Output::Json => write_json(out, &facets),
        Output::Table => session.renderer.write_facets(out, &facets),
    }
}

#[instrument(skip(session, filter, out))]
fn cmd_export(
    session: &Session<'_>,
    filter: TimelineFilter,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    info!("command export");
    let view = open_view(session, filter)?;
    write_json(out, view.timeline())
}

/// Moves one task to a new day: lock it, write the snapshot, then reload.
/// A failed write restores the previous placement.
#[instrument(skip(session, filter, args, out))]
fn cmd_reschedule(
    session: &Session<'_>,
    filter: TimelineFilter,
    args: &[String],
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    info!("command reschedule");

    let [task_id, target] = args else {
        return Err(anyhow!(
            "usage: reschedule <task_id> <day> (day: YYYY-MM-DD, today, tomorrow, +Nd, monday, none)"
        ));
    };
    let TaskSource::Snapshot(path) = session.source else {
        return Err(anyhow!("reschedule needs a snapshot file; stdin is read-only"));
    };

    let mut view = open_view(session, filter)?;
    let requested = parse_day_expr(target, view.reference_date())?;
    let ticket = view.begin_reschedule(task_id, requested, Utc::now())?;

    let store = DataStore::open(path)?;
    match store.update_due_date(task_id, requested) {
        Ok(updated) => {
            view.finish_reschedule(ticket);
            refresh(&mut view, session.source)?;
            let bucket = view
                .timeline()
                .timeline
                .find(task_id)
                .map(|entry| entry.bucket.label())
                .unwrap_or("hidden by filter");
            writeln!(
                out,
                "Rescheduled {} to {} ({bucket}).",
                updated.task_id,
                updated.due_date.as_deref().unwrap_or("no due date"),
            )?;
            Ok(())
        }
        Err(err) => {
            view.revert_reschedule(ticket, Utc::now());
            warn!(task_id = %task_id, error = %err, "reschedule failed");
            Err(err).with_context(|| format!("failed to reschedule {task_id}"))
        }
    }
}

/// Re-reads and re-renders every `refresh.interval` seconds. With a tick
/// count the loop stops after that many renders.
#[instrument(skip(session, filter, args, out))]
fn cmd_watch(
    session: &Session<'_>,
    filter: TimelineFilter,
    args: &[String],
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    info!("command watch");

    let ticks = match args.first() {
        Some(raw) => Some(
            raw.parse::<NonZeroU64>()
                .with_context(|| format!("watch tick count must be at least 1, got {raw}"))?,
        ),
        None => None,
    };
    let interval = session
        .cfg
        .get_u64("refresh.interval")?
        .unwrap_or(DEFAULT_REFRESH_SECS)
        .max(1);

    let now = Utc::now();
    let mut view = TimelineView::new(session.zone, now);
    view.set_filter(filter, now);

    let mut rendered = 0_u64;
    loop {
        if let Err(err) = refresh(&mut view, session.source) {
            warn!(error = %format!("{err:#}"), "refresh failed; showing last good timeline");
        }

        write_full_timeline(session, &view, out)?;
        out.flush()?;

        rendered += 1;
        if ticks.is_some_and(|limit| rendered >= limit.get()) {
            break;
        }
        debug!(interval, "waiting for next refresh");
        thread::sleep(Duration::from_secs(interval));
    }

    Ok(())
}

fn cmd_commands(out: &mut dyn Write) -> anyhow::Result<()> {
    for command in known_command_names() {
        writeln!(out, "{command}")?;
    }
    Ok(())
}

fn cmd_show(cfg: &Config, out: &mut dyn Write) -> anyhow::Result<()> {
    for file in &cfg.loaded_files {
        writeln!(out, "# {}", file.display())?;
    }
    let mut entries: Vec<(&String, &String)> = cfg.iter().collect();
    entries.sort();
    for (k, v) in entries {
        writeln!(out, "{k}={v}")?;
    }
    Ok(())
}

fn cmd_help(out: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(
        out,
        "usage: kairos [filter...] <command> [args]\n\
         \n\
         commands:\n  \
         timeline               tasks grouped by due day, then conflicts\n  \
         conflicts              days with two or more open tasks\n  \
         stats                  task counts per bucket\n  \
         facets                 projects, labels and statuses present\n  \
         export                 timeline as JSON\n  \
         reschedule <id> <day>  move a task to another day\n  \
         watch [ticks]          refresh every refresh.interval seconds\n\
         \n\
         filters: project:<id> label:<name> status:<status> member:<user_id>"
    )?;
    Ok(())
}
