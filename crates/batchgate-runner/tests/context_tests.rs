use std::sync::{Arc, Mutex};

use batchgate_audit::LogStatus;
use batchgate_core::{parse_timestamp, Admission, Popped, QueueError, RunGateRecord, RunStatus, StateDocument, Task};
use batchgate_notify::{Notifier, NotifierConfig};
use batchgate_runner::{BatchContext, BatchError, Config, Fatal, Iteration, Opened, Settings, FINISH_BANNER, START_BANNER};
use batchgate_storage::{with_document, Commit, InMemoryStore, JsonFileStore, StateStore};
use serde_json::json;
use tempfile::tempdir;

#[derive(Clone, Default)]
struct Recording(Arc<Mutex<Vec<String>>>);

impl Notifier for Recording {
    fn deliver(&self, _config: &NotifierConfig, body: &str) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(body.to_string());
        Ok(())
    }
}

struct Failing;

impl Notifier for Failing {
    fn deliver(&self, _config: &NotifierConfig, _body: &str) -> anyhow::Result<()> {
        anyhow::bail!("smtp unreachable")
    }
}

fn settings(root: &std::path::Path, today: &str) -> Settings {
    let mut cfg = Config::default_for(root);
    cfg.today = Some(today.to_string());
    cfg.validate().unwrap()
}

fn finished_at(date: &str) -> StateDocument {
    let mut doc = StateDocument::default();
    doc.set_gate_record(&RunGateRecord { run_date: parse_timestamp(date).unwrap(), run_status: RunStatus::Finished });
    doc
}

fn admitted(opened: Result<Opened, Fatal>) -> BatchContext {
    match opened.unwrap() {
        Opened::Admitted(ctx) => ctx,
        Opened::Refused(r) => panic!("unexpected refusal: {}", r.message),
    }
}

fn open(s: Settings, store: &Arc<InMemoryStore>) -> Result<Opened, Fatal> {
    BatchContext::open_with(s, Box::new(store.clone()), Box::new(Recording::default()))
}

#[test]
fn test_full_batch_over_two_invocations() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryStore::with_document(&finished_at("2026-04-09 05:00:00")).unwrap());

    let mut s = settings(dir.path(), "2026-04-10 06:00:00");
    s.flags.iteration_custom_headers.insert("X-Batch".into(), "nightly".into());
    let mut ctx = admitted(open(s.clone(), &store));
    assert_eq!(ctx.admission(), Admission::Fresh);
    assert!(ctx.is_new_batch());
    ctx.add_tasks(Task::list(["t1", "t2"])).unwrap();
    assert_eq!(ctx.pop_task(None, 1).unwrap(), Popped::One(Task::from("t2")));
    let Iteration::Resume(signal) = ctx.iterate_or_finish().unwrap() else { panic!("expected resume") };
    assert_eq!(signal.headers.get("X-Batch").map(String::as_str), Some("nightly"));

    let stored = store.read().unwrap().unwrap();
    assert_eq!(stored.gate_record().unwrap().run_status, RunStatus::Running);
    assert_eq!(stored.gate_record().unwrap().run_date, parse_timestamp("2026-04-10 06:00:00").unwrap());

    s.now = parse_timestamp("2026-04-10 06:00:05").unwrap();
    let mut ctx = admitted(open(s.clone(), &store));
    assert_eq!(ctx.admission(), Admission::Resume);
    assert!(!ctx.is_new_batch());
    assert_eq!(ctx.pop_task(None, 1).unwrap(), Popped::One(Task::from("t1")));
    let Iteration::Finished(report) = ctx.iterate_or_finish().unwrap() else { panic!("expected finish") };
    assert!(report.text.contains(START_BANNER));
    assert!(report.text.contains(FINISH_BANNER));

    let stored = store.read().unwrap().unwrap();
    assert_eq!(stored.gate_record().unwrap().run_status, RunStatus::Finished);
    assert!(stored.tasks.is_empty());

    s.now = parse_timestamp("2026-04-10 07:00:00").unwrap();
    assert!(matches!(open(s, &store).unwrap(), Opened::Refused(_)));
}

#[test]
fn test_refusal_leaves_store_untouched() {
    let dir = tempdir().unwrap();
    let mut doc = finished_at("2026-04-10 01:00:00");
    doc.extra.insert("owner".into(), json!("ops"));
    let store = Arc::new(InMemoryStore::with_document(&doc).unwrap());
    let before = store.bytes();

    let opened = open(settings(dir.path(), "2026-04-10 12:00:00"), &store).unwrap();
    let Opened::Refused(refusal) = opened else { panic!("expected refusal") };
    assert!(refusal.message.starts_with("Batch already ran for current interval"));
    assert_eq!(store.bytes(), before);
}

#[test]
fn test_interval_boundary_refuses() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryStore::with_document(&finished_at("2026-04-09 06:00:00")).unwrap());
    assert!(matches!(open(settings(dir.path(), "2026-04-10 06:00:00"), &store).unwrap(), Opened::Refused(_)));
}

#[test]
fn test_new_store_bootstraps_running() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let ctx = admitted(open(settings(dir.path(), "2026-04-10"), &store));
    assert_eq!(ctx.admission(), Admission::Resume);
    assert!(ctx.is_new_batch());
    let stored = store.read().unwrap().unwrap();
    assert_eq!(stored.gate_record().unwrap(), RunGateRecord::bootstrap(parse_timestamp("2026-04-10 00:00:00").unwrap()));
    let logs = ctx.get_logs(None, false, None).unwrap();
    assert_eq!(logs[0].message, START_BANNER);
}

#[test]
fn test_missing_gate_keys_are_fatal_and_logged() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryStore::with_bytes(r#"{"cron_run_log": {"run-status": "finished"}}"#));
    let s = settings(dir.path(), "2026-04-10");
    let audit = batchgate_audit::FsAuditLog::new(s.logs_dir.clone());
    assert!(matches!(open(s.clone(), &store), Err(Fatal::MissingKeys)));

    let text = batchgate_audit::AuditSink::read_text(&audit, s.today).unwrap();
    assert!(text.contains("Configuration is missing important keys"));
    assert!(text.starts_with("Error"));
}

#[test]
fn test_unknown_run_status_is_fatal() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryStore::with_bytes(
        r#"{"cron_run_log": {"run-date": "2026-04-01 00:00:00", "run-status": "paused"}}"#,
    ));
    assert!(matches!(open(settings(dir.path(), "2026-04-10"), &store), Err(Fatal::InvalidRecord(_))));
}

#[test]
fn test_dynamic_add_policy() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let mut ctx = admitted(open(settings(dir.path(), "2026-04-10"), &store));
    ctx.add_tasks(Task::list(["a"])).unwrap();
    let err = ctx.add_tasks("b").unwrap_err();
    assert!(matches!(err, BatchError::Queue(QueueError::DynamicTasksForbidden)));
    assert_eq!(store.read().unwrap().unwrap().tasks.root().len(), 1);

    let mut s = settings(dir.path(), "2026-04-10");
    s.flags.allow_dynamic_tasks = true;
    let mut ctx = admitted(open(s, &store));
    ctx.add_tasks("b").unwrap();
    assert_eq!(ctx.get_tasks(Some("1")), Some(Task::from("b")));
}

#[test]
fn test_remove_and_pop_edge_cases() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let mut ctx = admitted(open(settings(dir.path(), "2026-04-10"), &store));
    ctx.add_tasks(Task::from(json!({"emails": ["e1", "e2", "e3"], "misc": "m"}))).unwrap();

    assert_eq!(ctx.pop_task(Some("nope"), 1).unwrap(), Popped::Nothing);
    assert_eq!(ctx.pop_task(Some("misc"), 1).unwrap(), Popped::Nothing);
    assert_eq!(ctx.pop_task(Some("emails"), 2).unwrap(), Popped::Many(vec![Task::from("e3"), Task::from("e2")]));
    assert_eq!(ctx.pop_task(Some("emails"), 5).unwrap(), Popped::Many(vec![Task::from("e1")]));

    assert_eq!(ctx.remove_task("misc", true).unwrap(), Some(Task::from("m")));
    assert_eq!(ctx.remove_task("misc", false).unwrap(), None);
    assert!(matches!(ctx.remove_task("misc", true), Err(BatchError::Queue(QueueError::KeyNotFound(_)))));

    // only the emptied "emails" group is left
    assert!(!ctx.has_remaining_work());
}

#[test]
fn test_log_action_and_queries() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let ctx = admitted(open(settings(dir.path(), "2026-04-10 08:00:00"), &store));
    ctx.log_action("plain", None::<LogStatus>).unwrap();
    ctx.log_action("careful", LogStatus::Error).unwrap();
    ctx.log_action("multi\nline", LogStatus::Info).unwrap();

    let newest = ctx.get_logs(None, true, Some(2)).unwrap();
    assert_eq!(newest.len(), 2);
    assert_eq!(newest[0].message, "multi\\nline");
    assert_eq!(newest[1].status, LogStatus::Error);
    assert!(ctx.get_logs(Some(chrono::NaiveDate::from_ymd_opt(2026, 4, 9).unwrap()), false, None).unwrap().is_empty());
}

#[test]
fn test_notifier_gets_report_and_failure_is_not_fatal() {
    let dir = tempdir().unwrap();
    let mut s = settings(dir.path(), "2026-04-10");
    s.notifier = serde_json::from_value(json!({"sender": "batch@x", "recipients": ["ops@x"]})).unwrap();

    let recording = Recording::default();
    let store = Arc::new(InMemoryStore::new());
    let ctx = admitted(BatchContext::open_with(s.clone(), Box::new(store.clone()), Box::new(recording.clone())));
    assert!(matches!(ctx.iterate_or_finish().unwrap(), Iteration::Finished(_)));
    let sent = recording.0.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains(FINISH_BANNER));

    let other = tempdir().unwrap();
    let mut s = settings(other.path(), "2026-04-10");
    s.notifier = serde_json::from_value(json!({"sender": "batch@x", "recipients": ["ops@x"]})).unwrap();
    let store = Arc::new(InMemoryStore::new());
    let ctx = admitted(BatchContext::open_with(s, Box::new(store.clone()), Box::new(Failing)));
    let Iteration::Finished(report) = ctx.iterate_or_finish().unwrap() else { panic!("expected finish") };
    assert!(report.text.contains("Report delivery failed: smtp unreachable"));
    assert_eq!(store.read().unwrap().unwrap().gate_record().unwrap().run_status, RunStatus::Finished);
}

#[test]
fn test_queue_survives_between_json_store_invocations() {
    let dir = tempdir().unwrap();
    let s = settings(dir.path(), "2026-04-10");
    let json = || Box::new(JsonFileStore::new(&s.config_dir, "cron_config")) as Box<dyn StateStore>;

    let mut ctx = admitted(BatchContext::open_with(s.clone(), json(), Box::new(Recording::default())));
    ctx.add_tasks(Task::list(["a", "b"])).unwrap();
    drop(ctx);

    let mut ctx = admitted(BatchContext::open_with(s.clone(), json(), Box::new(Recording::default())));
    assert!(!ctx.is_new_batch());
    assert_eq!(ctx.pop_task(None, 1).unwrap(), Popped::One(Task::from("b")));
    assert!(matches!(ctx.iterate_or_finish().unwrap(), Iteration::Resume(_)));

    let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(s.config_dir.join("cron_config.json")).unwrap()).unwrap();
    assert_eq!(raw["tasks"], json!({"0": "a"}));
    assert_eq!(raw["cron_run_log"]["run-status"], json!("running"));
}

#[test]
fn test_sqlite_backend_through_config() {
    let dir = tempdir().unwrap();
    let mut cfg = Config::default_for(dir.path());
    cfg.today = Some("2026-04-10".into());
    cfg.storage.backend = batchgate_runner::StorageBackend::Sqlite;

    let mut ctx = admitted(BatchContext::open(&cfg));
    ctx.add_tasks(Task::list(["only"])).unwrap();
    drop(ctx);
    let mut ctx = admitted(BatchContext::open(&cfg));
    assert_eq!(ctx.pop_task(None, 1).unwrap(), Popped::One(Task::from("only")));
    assert!(matches!(ctx.iterate_or_finish().unwrap(), Iteration::Finished(_)));
    assert!(dir.path().join("state").join("cron_config.db").exists());
    assert!(matches!(BatchContext::open(&cfg).unwrap(), Opened::Refused(_)));
}

/// Lets a test commit a write from "another invocation" just before the
/// next transaction on this store takes the lock.
struct Interleaved {
    inner: Arc<InMemoryStore>,
    pending: Mutex<Option<Task>>,
}

impl StateStore for Interleaved {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    fn read(&self) -> anyhow::Result<Option<StateDocument>> {
        self.inner.read()
    }

    fn transact(&self, f: &mut dyn FnMut(&mut Option<StateDocument>) -> Commit) -> anyhow::Result<()> {
        if let Some(task) = self.pending.lock().unwrap().take() {
            with_document(self.inner.as_ref(), |doc| {
                doc.as_mut().unwrap().tasks.add_tasks(task.clone(), true).unwrap();
                (Commit::Write, ())
            })?;
        }
        self.inner.transact(f)
    }
}

#[test]
fn test_task_added_while_closing_keeps_batch_open() {
    let dir = tempdir().unwrap();
    let inner = Arc::new(InMemoryStore::new());
    let store = Arc::new(Interleaved { inner: inner.clone(), pending: Mutex::new(None) });

    let mut ctx = admitted(BatchContext::open_with(
        settings(dir.path(), "2026-04-10"),
        Box::new(store.clone()),
        Box::new(Recording::default()),
    ));
    ctx.add_tasks(Task::list(["t1"])).unwrap();
    assert_eq!(ctx.pop_task(None, 1).unwrap(), Popped::One(Task::from("t1")));

    *store.pending.lock().unwrap() = Some(Task::from("late"));
    assert!(matches!(ctx.iterate_or_finish().unwrap(), Iteration::Resume(_)));

    let stored = inner.read().unwrap().unwrap();
    assert_eq!(stored.gate_record().unwrap().run_status, RunStatus::Running);
    assert_eq!(serde_json::to_value(&stored.tasks).unwrap(), json!({"0": "late"}));
}

#[test]
fn test_overlapping_invocations_finish_once() {
    let dir = tempdir().unwrap();
    let mut s = settings(dir.path(), "2026-04-10");
    s.notifier = serde_json::from_value(json!({"sender": "batch@x", "recipients": ["ops@x"]})).unwrap();
    let store = Arc::new(InMemoryStore::new());
    let recording = Recording::default();
    let open_one = || admitted(BatchContext::open_with(s.clone(), Box::new(store.clone()), Box::new(recording.clone())));

    let mut seeder = open_one();
    seeder.add_tasks(Task::list(["t1"])).unwrap();
    drop(seeder);

    let mut a = open_one();
    let mut b = open_one();
    assert_eq!(a.pop_task(None, 1).unwrap(), Popped::One(Task::from("t1")));
    assert_eq!(b.pop_task(None, 1).unwrap(), Popped::Nothing);
    assert!(matches!(b.iterate_or_finish().unwrap(), Iteration::Finished(_)));
    let Iteration::Finished(report) = a.iterate_or_finish().unwrap() else { panic!("expected finish") };

    assert_eq!(recording.0.lock().unwrap().len(), 1);
    assert_eq!(report.text.matches(FINISH_BANNER).count(), 1);
    assert!(report.text.contains("already finalized"));
}

#[test]
fn test_finalize_drops_leftover_work() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let mut ctx = admitted(open(settings(dir.path(), "2026-04-10"), &store));
    ctx.add_tasks(Task::list(["a", "b"])).unwrap();
    let report = ctx.finalize().unwrap();
    assert!(report.text.contains(FINISH_BANNER));

    let stored = store.read().unwrap().unwrap();
    assert_eq!(stored.gate_record().unwrap().run_status, RunStatus::Finished);
    assert!(stored.tasks.is_empty());
}
