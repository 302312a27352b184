use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use batchgate_core::DATE_FORMAT;
use chrono::{NaiveDate, NaiveDateTime};

use crate::entry::{LogEntry, LogStatus};

/// Which entries to return from one day's log.
#[derive(Clone, Debug)]
pub struct LogQuery {
    pub date: NaiveDate,
    pub status: Option<LogStatus>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl LogQuery {
    pub fn for_date(date: NaiveDate) -> Self {
        Self { date, status: None, reverse: false, limit: None }
    }
}

/// Append-only audit trail, one file per logical date.
pub trait AuditSink: Send + Sync {
    fn append(&self, date: NaiveDate, entry: &LogEntry) -> Result<()>;
    fn read(&self, query: &LogQuery) -> Result<Vec<LogEntry>>;
    /// The day's log verbatim; empty when nothing was written.
    fn read_text(&self, date: NaiveDate) -> Result<String>;
}

#[derive(Clone, Debug)]
pub struct FsAuditLog {
    pub root: PathBuf,
}

impl FsAuditLog {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.root.join(format!("{}.log", date.format(DATE_FORMAT)))
    }

    /// Convenience used by the driver: stamp, append and mirror to tracing.
    pub fn log(&self, date: NaiveDate, status: LogStatus, at: NaiveDateTime, message: &str) -> Result<LogEntry> {
        let entry = LogEntry::new(status, at, message);
        self.append(date, &entry)?;
        Ok(entry)
    }
}

impl AuditSink for FsAuditLog {
    fn append(&self, date: NaiveDate, entry: &LogEntry) -> Result<()> {
        let path = self.path_for(date);
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open audit log {}", path.display()))?;
        f.write_all(entry.to_line().as_bytes())
            .with_context(|| format!("append audit log {}", path.display()))?;
        tracing::debug!(status = %entry.status, message = %entry.message, "audit");
        Ok(())
    }

    fn read(&self, query: &LogQuery) -> Result<Vec<LogEntry>> {
        let text = self.read_text(query.date)?;
        let mut entries: Vec<LogEntry> = text
            .lines()
            .filter_map(|line| {
                let parsed = LogEntry::parse_line(line);
                if parsed.is_none() && !line.trim().is_empty() {
                    tracing::debug!(line, "skipping unparseable audit line");
                }
                parsed
            })
            .filter(|e| query.status.as_ref().map_or(true, |s| &e.status == s))
            .collect();
        if query.reverse {
            entries.reverse();
        }
        if let Some(limit) = query.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    fn read_text(&self, date: NaiveDate) -> Result<String> {
        read_if_exists(&self.path_for(date))
    }
}

fn read_if_exists(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("read audit log {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchgate_core::parse_timestamp;
    use tempfile::tempdir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 4).unwrap()
    }

    fn seeded() -> (tempfile::TempDir, FsAuditLog) {
        let dir = tempdir().unwrap();
        let log = FsAuditLog::new(dir.path().to_path_buf());
        let at = parse_timestamp("2026-07-04 10:00:00").unwrap();
        log.log(date(), LogStatus::Info, at, "one").unwrap();
        log.log(date(), LogStatus::Error, at, "two").unwrap();
        log.log(date(), LogStatus::Success, at, "three").unwrap();
        log.log(date(), LogStatus::Error, at, "four").unwrap();
        (dir, log)
    }

    #[test]
    fn writes_one_file_per_day() {
        let (dir, log) = seeded();
        assert!(dir.path().join("2026-07-04.log").exists());
        assert_eq!(log.read_text(date()).unwrap().lines().count(), 4);
        let other = NaiveDate::from_ymd_opt(2026, 7, 5).unwrap();
        assert_eq!(log.read_text(other).unwrap(), "");
        assert!(log.read(&LogQuery::for_date(other)).unwrap().is_empty());
    }

    #[test]
    fn reverse_then_limit() {
        let (_dir, log) = seeded();
        let q = LogQuery { reverse: true, limit: Some(2), ..LogQuery::for_date(date()) };
        let msgs: Vec<_> = log.read(&q).unwrap().into_iter().map(|e| e.message).collect();
        assert_eq!(msgs, vec!["four", "three"]);
    }

    #[test]
    fn filter_by_status() {
        let (_dir, log) = seeded();
        let q = LogQuery { status: Some(LogStatus::Error), ..LogQuery::for_date(date()) };
        let msgs: Vec<_> = log.read(&q).unwrap().into_iter().map(|e| e.message).collect();
        assert_eq!(msgs, vec!["two", "four"]);
    }
}
