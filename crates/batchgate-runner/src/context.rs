use std::collections::BTreeMap;

use anyhow::anyhow;
use batchgate_audit::{AuditSink, FsAuditLog, LogEntry, LogQuery, LogStatus};
use batchgate_core::{
    format_timestamp, Admission, CoreError, InvocationId, Popped, QueueError, RunStatus, StateDocument, Task,
};
use batchgate_notify::{Notifier, SendmailNotifier};
use batchgate_storage::{with_document, Commit, StateStore};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, info, info_span, warn};

use crate::config::{Config, Settings};
use crate::error::{BatchError, Fatal, Refusal};

pub const START_BANNER: &str = "=================== BATCH INITIATED ===================";
pub const FINISH_BANNER: &str = "=================== BATCH COMPLETED ===================";
pub const REFUSED_MESSAGE: &str = "Batch already ran for current interval";

/// Result of constructing a batch for this invocation.
pub enum Opened {
    Admitted(BatchContext),
    Refused(Refusal),
}

/// What the hosting environment should do once this invocation returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Iteration {
    /// Work remains: trigger another invocation of the same entry point.
    Resume(ResumeSignal),
    /// The batch is finalized.
    Finished(FinalReport),
}

/// Redirect-equivalent emitted when tasks remain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResumeSignal {
    pub headers: BTreeMap<String, String>,
}

/// The day's full audit text, shown as the response of the final invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalReport {
    pub text: String,
}

impl FinalReport {
    /// HTML-escaped text for hosts that put the report in a response body.
    pub fn escaped(&self) -> String {
        let mut out = String::with_capacity(self.text.len());
        for c in self.text.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                c => out.push(c),
            }
        }
        out
    }
}

/// One invocation's view of a batch: settings, the gate decision, and the
/// persisted queue. Every queue mutation goes through the store's locked
/// read-modify-write, so the cached document is only a convenience copy.
pub struct BatchContext {
    settings: Settings,
    invocation: InvocationId,
    store: Box<dyn StateStore>,
    audit: FsAuditLog,
    notifier: Box<dyn Notifier>,
    admission: Admission,
    new_batch: bool,
    document: StateDocument,
}

impl BatchContext {
    /// Validates `config`, opens the configured store and runs the gate.
    pub fn open(config: &Config) -> Result<Opened, Fatal> {
        let settings = match config.validate() {
            Ok(s) => s,
            Err(fatal) => {
                let now = chrono::Local::now().naive_local();
                return Err(match config.logs_dir_hint() {
                    Some(dir) => record_fatal(&FsAuditLog::new(dir), now.date(), now, fatal),
                    None => {
                        tracing::error!(error = %fatal, "invalid configuration");
                        fatal
                    }
                });
            }
        };
        let store = match settings.open_store() {
            Ok(store) => store,
            Err(fatal) => {
                let audit = FsAuditLog::new(settings.logs_dir.clone());
                return Err(record_fatal(&audit, settings.today, settings.stamp(), fatal));
            }
        };
        Self::open_with(settings, store, Box::new(SendmailNotifier))
    }

    /// Like [`BatchContext::open`], but refusal and fatal errors end the process.
    pub fn open_or_exit(config: &Config) -> BatchContext {
        match Self::open(config) {
            Ok(Opened::Admitted(ctx)) => ctx,
            Ok(Opened::Refused(refusal)) => refusal.exit(),
            Err(fatal) => fatal.exit(),
        }
    }

    /// Gate evaluation against an explicit store and notifier.
    pub fn open_with(
        settings: Settings,
        store: Box<dyn StateStore>,
        notifier: Box<dyn Notifier>,
    ) -> Result<Opened, Fatal> {
        let invocation = InvocationId::new();
        let span = info_span!("invocation", id = %invocation.short(), store = %store.describe());
        let _enter = span.enter();

        let audit = FsAuditLog::new(settings.logs_dir.clone());
        let now = settings.now;
        let interval = settings.run_interval;

        let evaluated = with_document(store.as_ref(), |doc| {
            let bootstrapped = doc.is_none();
            let current = doc.get_or_insert_with(|| StateDocument::bootstrap(now));
            match current.gate_record() {
                Err(err) => (Commit::Discard, Err(err)),
                Ok(mut record) => {
                    let admission = record.admit(now, &interval);
                    if admission == Admission::Fresh {
                        current.set_gate_record(&record);
                    }
                    let commit = if bootstrapped || admission == Admission::Fresh { Commit::Write } else { Commit::Discard };
                    (commit, Ok((admission, record, bootstrapped, current.clone())))
                }
            }
        });

        let (today, stamp) = (settings.today, settings.stamp());
        let (admission, record, bootstrapped, document) = match evaluated {
            Err(cause) => {
                return Err(record_fatal(&audit, today, stamp, Fatal::Store { store: store.describe(), cause }));
            }
            Ok(Err(err)) => return Err(record_fatal(&audit, today, stamp, Fatal::from_record(err))),
            Ok(Ok(found)) => found,
        };
        info!(?admission, bootstrapped, run_date = %format_timestamp(&record.run_date), "gate evaluated");

        let ctx = BatchContext {
            settings,
            invocation,
            store,
            audit,
            notifier,
            admission,
            new_batch: bootstrapped || admission == Admission::Fresh,
            document,
        };

        match admission {
            Admission::Refused => {
                let message = format!("{REFUSED_MESSAGE} (last run {})", format_timestamp(&record.run_date));
                ctx.note(LogStatus::Info, &message);
                Ok(Opened::Refused(Refusal { message }))
            }
            Admission::Fresh => {
                ctx.note(LogStatus::Success, START_BANNER);
                Ok(Opened::Admitted(ctx))
            }
            Admission::Resume if bootstrapped => {
                ctx.note(LogStatus::Success, START_BANNER);
                ctx.note(LogStatus::Info, &format!("Created state document {}", ctx.store.describe()));
                Ok(Opened::Admitted(ctx))
            }
            Admission::Resume => {
                ctx.note(
                    LogStatus::Info,
                    &format!("Resuming batch started at {}", format_timestamp(&record.run_date)),
                );
                Ok(Opened::Admitted(ctx))
            }
        }
    }

    pub fn admission(&self) -> Admission {
        self.admission
    }

    /// True when this invocation started the batch (fresh admission or a
    /// brand-new store), i.e. the queue should be seeded now.
    pub fn is_new_batch(&self) -> bool {
        self.new_batch
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Copy of the whole queue (`None`) or of the entry at `key`.
    pub fn get_tasks(&self, key: Option<&str>) -> Option<Task> {
        match key {
            None => Some(Task::Group(self.document.tasks.root().clone())),
            Some(k) => self.document.tasks.get(k).cloned(),
        }
    }

    pub fn has_remaining_work(&self) -> bool {
        self.document.tasks.has_remaining_work()
    }

    /// Adds tasks (group merged by key, scalar appended). Fails with
    /// [`QueueError::DynamicTasksForbidden`] when the queue is already
    /// populated and `allow_dynamic_tasks` is off.
    pub fn add_tasks(&mut self, tasks: impl Into<Task>) -> Result<(), BatchError> {
        let tasks = tasks.into();
        let allow_dynamic = self.settings.flags.allow_dynamic_tasks;
        let result = self.mutate(|doc| match doc.tasks.add_tasks(tasks.clone(), allow_dynamic) {
            Ok(()) => (Commit::Write, Ok(())),
            Err(err) => (Commit::Discard, Err(err)),
        })?;
        match result {
            Ok(()) => {
                self.note(LogStatus::Info, &format!("Added tasks: {}", tasks.to_value()));
                Ok(())
            }
            Err(err) => {
                self.note(LogStatus::Error, &err.to_string());
                Err(err.into())
            }
        }
    }

    /// Pops up to `amount` tasks, newest first, from the root or the group at `key`.
    pub fn pop_task(&mut self, key: Option<&str>, amount: usize) -> Result<Popped, BatchError> {
        let popped = self.mutate(|doc| {
            let popped = doc.tasks.pop_task(key, amount);
            let commit = if popped.is_nothing() { Commit::Discard } else { Commit::Write };
            (commit, popped)
        })?;
        if popped.is_nothing() {
            let place = key.map(|k| format!(" under `{k}`")).unwrap_or_default();
            self.note(LogStatus::Info, &format!("No tasks to pop{place}"));
        } else {
            debug!(?popped, "popped");
        }
        Ok(popped)
    }

    /// Deletes the entry at `key`. A missing key is only logged unless
    /// `must_exist` is set, in which case it is an error.
    pub fn remove_task(&mut self, key: &str, must_exist: bool) -> Result<Option<Task>, BatchError> {
        let removed = self.mutate(|doc| match doc.tasks.remove_task(key) {
            Some(task) => (Commit::Write, Some(task)),
            None => (Commit::Discard, None),
        })?;
        match removed {
            Some(task) => {
                self.note(LogStatus::Info, &format!("Removed task `{key}`"));
                Ok(Some(task))
            }
            None if must_exist => {
                let err = QueueError::KeyNotFound(key.to_string());
                self.note(LogStatus::Error, &err.to_string());
                Err(err.into())
            }
            None => {
                self.note(LogStatus::Info, &format!("Task `{key}` not found, nothing removed"));
                Ok(None)
            }
        }
    }

    /// Records an action in the audit log.
    pub fn log_action(&self, message: &str, status: impl Into<Option<LogStatus>>) -> Result<LogEntry, BatchError> {
        let status = status.into().unwrap_or_default();
        self.audit
            .log(self.settings.today, status, self.settings.stamp(), message)
            .map_err(BatchError::Audit)
    }

    /// Entries for `date` (default: this batch's logical date).
    pub fn get_logs(&self, date: Option<NaiveDate>, reverse: bool, limit: Option<usize>) -> Result<Vec<LogEntry>, BatchError> {
        let query = LogQuery { reverse, limit, ..LogQuery::for_date(date.unwrap_or(self.settings.today)) };
        self.query_logs(&query)
    }

    pub fn query_logs(&self, query: &LogQuery) -> Result<Vec<LogEntry>, BatchError> {
        self.audit.read(query).map_err(BatchError::Audit)
    }

    /// Ends this invocation: emits a resume signal while work remains,
    /// otherwise finalizes the batch. The check and the transition happen
    /// under one store lock.
    pub fn iterate_or_finish(mut self) -> Result<Iteration, BatchError> {
        let closing = self.mutate(|doc| close_out(doc, false))?;
        match closing.map_err(|err| BatchError::Store(anyhow!("cannot finalize: {err}")))? {
            Closing::WorkRemains => {
                self.note(LogStatus::Info, "Tasks remain, requesting another iteration");
                let signal = ResumeSignal { headers: self.settings.flags.iteration_custom_headers.clone() };
                info!(invocation = %self.invocation, "resume");
                Ok(Iteration::Resume(signal))
            }
            closed => self.report(closed).map(Iteration::Finished),
        }
    }

    /// Marks the run finished and drops whatever is still queued, sends the
    /// report if a notifier is configured, and returns the day's audit text.
    /// A batch another invocation already finished is left alone.
    pub fn finalize(mut self) -> Result<FinalReport, BatchError> {
        let closing = self.mutate(|doc| close_out(doc, true))?;
        let closed = closing.map_err(|err| BatchError::Store(anyhow!("cannot finalize: {err}")))?;
        self.report(closed)
    }

    fn report(self, closed: Closing) -> Result<FinalReport, BatchError> {
        if closed == Closing::AlreadyFinished {
            self.note(LogStatus::Info, "Batch was already finalized by an overlapping invocation");
        } else {
            self.note(LogStatus::Success, FINISH_BANNER);
            info!(invocation = %self.invocation, "batch finished");

            if !self.settings.notifier.is_empty() {
                let text = self.audit.read_text(self.settings.today).map_err(BatchError::Audit)?;
                match self.notifier.deliver(&self.settings.notifier, &text) {
                    Ok(()) => self.note(LogStatus::Success, "Report delivered"),
                    Err(err) => self.note(LogStatus::Error, &format!("Report delivery failed: {err:#}")),
                }
            }
        }

        let text = self.audit.read_text(self.settings.today).map_err(BatchError::Audit)?;
        Ok(FinalReport { text })
    }

    /// Locked read-modify-write on the stored document; refreshes the cache.
    fn mutate<T>(&mut self, mut f: impl FnMut(&mut StateDocument) -> (Commit, T)) -> Result<T, BatchError> {
        let (value, latest) = with_document(self.store.as_ref(), |doc| match doc.as_mut() {
            Some(current) => {
                let (commit, value) = f(current);
                (commit, Some((value, current.clone())))
            }
            None => (Commit::Discard, None),
        })
        .map_err(BatchError::Store)?
        .ok_or_else(|| BatchError::Store(anyhow!("state document {} disappeared", self.store.describe())))?;
        self.document = latest;
        Ok(value)
    }

    /// Internal audit line; a failing log write must not break queue work.
    fn note(&self, status: LogStatus, message: &str) {
        if let Err(err) = self.audit.log(self.settings.today, status, self.settings.stamp(), message) {
            warn!(%err, message, "audit write failed");
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Closing {
    WorkRemains,
    Finished,
    AlreadyFinished,
}

/// Runs inside the store lock. Without `force`, remaining work keeps the
/// batch open; a record that is already FINISHED is never finished twice.
fn close_out(doc: &mut StateDocument, force: bool) -> (Commit, Result<Closing, CoreError>) {
    let mut record = match doc.gate_record() {
        Ok(record) => record,
        Err(err) => return (Commit::Discard, Err(err)),
    };
    if !force && doc.tasks.has_remaining_work() {
        return (Commit::Discard, Ok(Closing::WorkRemains));
    }
    if record.run_status == RunStatus::Finished {
        return (Commit::Discard, Ok(Closing::AlreadyFinished));
    }
    record.finish();
    doc.set_gate_record(&record);
    doc.tasks.clear();
    (Commit::Write, Ok(Closing::Finished))
}

/// Fatal errors are written to the audit log (when it is reachable) before
/// they are handed back.
fn record_fatal(audit: &FsAuditLog, today: NaiveDate, at: NaiveDateTime, fatal: Fatal) -> Fatal {
    if let Err(err) = audit.log(today, LogStatus::Error, at, &fatal.to_string()) {
        warn!(%err, "could not record fatal error in audit log");
    }
    tracing::error!(error = %fatal, "cannot start invocation");
    fatal
}
