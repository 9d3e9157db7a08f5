use std::fs;
use std::path::Path;

use chrono::{Duration, NaiveDate, Utc};
use kairos_core::cli::Invocation;
use kairos_core::commands::{Output, Session, dispatch_to};
use kairos_core::config::{Config, TaskSource};
use kairos_core::datastore::DataStore;
use kairos_core::datetime::ViewerZone;
use kairos_core::render::Renderer;
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};

const ZONE: ViewerZone = ViewerZone::Named(chrono_tz::UTC);

struct Fixture {
    _temp: TempDir,
    cfg: Config,
    renderer: Renderer,
    source: TaskSource,
    today: NaiveDate,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempdir().expect("tempdir");
        let rc = temp.path().join("kairosrc");
        fs::write(&rc, "color = off\nrefresh.interval = 1\n").expect("write rc");
        let cfg = Config::load(Some(rc.as_path())).expect("load config");
        let renderer = Renderer::new(&cfg).expect("renderer");

        let today = ZONE.today(Utc::now());
        let snapshot = temp.path().join("tasks.json");
        write_snapshot(&snapshot, today);

        Self {
            source: TaskSource::Snapshot(snapshot),
            _temp: temp,
            cfg,
            renderer,
            today,
        }
    }

    fn session(&self, output: Output) -> Session<'_> {
        Session {
            source: &self.source,
            cfg: &self.cfg,
            renderer: &self.renderer,
            zone: ZONE,
            output,
        }
    }

    fn run(&self, output: Output, inv: Invocation) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        dispatch_to(&self.session(output), inv, &mut buf)?;
        Ok(String::from_utf8(buf).expect("utf8"))
    }

    fn store(&self) -> DataStore {
        let TaskSource::Snapshot(path) = &self.source else {
            panic!("fixture always uses a snapshot");
        };
        DataStore::open(path).expect("open snapshot")
    }
}

fn write_snapshot(path: &Path, today: NaiveDate) {
    let day = |offset: i64| (today + Duration::days(offset)).format("%Y-%m-%d").to_string();
    let snapshot = json!({
        "team_tasks": [
            {"task_id": "a", "title": "Audit", "status": "To Do", "due_date": day(-3), "project_id": "p1",
             "assigned_to": {"user_id": "u1"}},
            {"task_id": "b", "title": "Build", "status": "In Progress", "due_date": day(-3), "project_id": "p2"},
            {"task_id": "c", "title": null, "status": "Blocked", "due_date": null, "labels": null},
            {"task_id": "d", "title": "Done", "status": "Completed", "due_date": day(-3)}
        ]
    });
    fs::write(path, snapshot.to_string()).expect("write snapshot");
}

fn inv(filters: &[&str], command: &str, args: &[&str]) -> Invocation {
    Invocation {
        filter_terms: filters.iter().map(|s| s.to_string()).collect(),
        command: command.to_string(),
        command_args: args.iter().map(|s| s.to_string()).collect(),
    }
}

#[test]
fn reschedule_writes_snapshot_and_reports_new_bucket() {
    let fx = Fixture::new();
    let text = fx
        .run(Output::Table, inv(&[], "reschedule", &["a", "+2d"]))
        .expect("reschedule");

    let expected = (fx.today + Duration::days(2)).format("%Y-%m-%d").to_string();
    assert_eq!(text, format!("Rescheduled a to {expected} (This week).\n"));

    let tasks = fx.store().load().expect("reload");
    let a = tasks.iter().find(|t| t.task_id == "a").expect("task a");
    assert_eq!(a.due_date.as_deref(), Some(expected.as_str()));
}

#[test]
fn reschedule_outside_the_filter_says_so() {
    let fx = Fixture::new();
    let text = fx
        .run(Output::Table, inv(&["project:p2"], "reschedule", &["a", "none"]))
        .expect("reschedule");
    assert_eq!(text, "Rescheduled a to no due date (hidden by filter).\n");

    let tasks = fx.store().load().expect("reload");
    assert!(tasks.iter().any(|t| t.task_id == "a" && t.due_date.is_none()));
}

#[test]
fn reschedule_rejects_bad_usage_and_unknown_tasks() {
    let fx = Fixture::new();
    let before = fx.store().load().expect("load");

    let err = fx
        .run(Output::Table, inv(&[], "reschedule", &["a"]))
        .expect_err("missing day");
    assert!(err.to_string().starts_with("usage: reschedule"));

    let err = fx
        .run(Output::Table, inv(&[], "reschedule", &["zzz", "today"]))
        .expect_err("unknown task");
    assert!(format!("{err:#}").contains("zzz"));

    let err = fx
        .run(Output::Table, inv(&[], "reschedule", &["a", "+200000000000000d"]))
        .expect_err("huge offset");
    assert!(format!("{err:#}").contains("out of range"));

    assert_eq!(fx.store().load().expect("reload"), before);
}

#[test]
fn reschedule_refuses_stdin_source() {
    let fx = Fixture::new();
    let stdin = TaskSource::Stdin;
    let session = Session {
        source: &stdin,
        ..fx.session(Output::Table)
    };

    let mut buf = Vec::new();
    let err = dispatch_to(&session, inv(&[], "reschedule", &["a", "today"]), &mut buf)
        .expect_err("stdin is read-only");
    assert!(err.to_string().contains("stdin"));
    assert!(buf.is_empty());
}

#[test]
fn watch_with_one_tick_renders_once() {
    let fx = Fixture::new();
    let text = fx
        .run(Output::Table, inv(&[], "watch", &["1"]))
        .expect("watch");
    assert_eq!(text.matches("Timeline for").count(), 1);
    assert!(text.contains("Overdue (2)"));
    assert!(text.contains("Conflicts (1)"));

    assert!(fx.run(Output::Table, inv(&[], "watch", &["0"])).is_err());
    assert!(fx.run(Output::Table, inv(&[], "watch", &["soon"])).is_err());
}

#[test]
fn json_timeline_has_one_copy_of_each_placement_field() {
    let fx = Fixture::new();
    let text = fx
        .run(Output::Json, inv(&["member:u1"], "timeline", &[]))
        .expect("timeline");
    let value: Value = serde_json::from_str(&text).expect("json output");

    assert_eq!(value["timeline_statistics"]["total_tasks"], 1);
    let entry = &value["timeline"]["overdue"][0];
    assert_eq!(entry["task_id"], "a");
    assert_eq!(entry["days_until_due"], -3);
    assert_eq!(entry["visual_status"], "overdue");
    assert_eq!(text.matches("\"days_until_due\"").count(), 1);
}

#[test]
fn table_views_render_from_the_snapshot() {
    let fx = Fixture::new();

    let stats = fx.run(Output::Table, inv(&[], "stats", &[])).expect("stats");
    assert!(stats.lines().any(|line| line.starts_with("Total") && line.contains('3')));

    let conflicts = fx
        .run(Output::Table, inv(&[], "conflicts", &[]))
        .expect("conflicts");
    assert!(conflicts.contains("2 tasks scheduled"));
    assert!(!conflicts.contains("Done"));

    let facets = fx.run(Output::Table, inv(&[], "facets", &[])).expect("facets");
    assert!(facets.contains("projects  p1, p2"));
    assert!(facets.contains("members   u1"));

    let version = fx.run(Output::Table, inv(&[], "version", &[])).expect("version");
    assert_eq!(version.trim(), env!("CARGO_PKG_VERSION"));
}
