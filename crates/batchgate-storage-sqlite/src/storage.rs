use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use batchgate_core::StateDocument;
use batchgate_storage::{Commit, StateStore};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

/// State document kept in one SQLite row. Each transaction is `BEGIN
/// IMMEDIATE`, so the database write lock covers the whole read-modify-write.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    name: String,
    label: String,
}

impl SqliteStore {
    pub fn open(db_path: &Path, name: &str) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path).with_context(|| format!("open sqlite db {}", db_path.display()))?;
        // other invocations may hold the write lock for a moment
        conn.busy_timeout(Duration::from_secs(30))?;
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql)?;
        Ok(Self {
            conn: Mutex::new(conn),
            name: name.to_string(),
            label: format!("{}#{}", db_path.display(), name),
        })
    }

    fn decode(body: Option<String>) -> Result<Option<StateDocument>> {
        body.map(|b| StateDocument::from_slice(b.as_bytes()))
            .transpose()
            .context("parse stored state document")
    }
}

impl StateStore for SqliteStore {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn read(&self) -> Result<Option<StateDocument>> {
        let conn = self.conn.lock().unwrap();
        let body: Option<String> = conn
            .query_row("SELECT body FROM state_documents WHERE name=?1", params![self.name], |r| r.get(0))
            .optional()?;
        Self::decode(body)
    }

    fn transact(&self, f: &mut dyn FnMut(&mut Option<StateDocument>) -> Commit) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let body: Option<String> = tx
            .query_row("SELECT body FROM state_documents WHERE name=?1", params![self.name], |r| r.get(0))
            .optional()?;
        let mut doc = Self::decode(body)?;

        match (f(&mut doc), doc) {
            (Commit::Write, Some(doc)) => {
                let body = String::from_utf8(doc.to_vec()?)?;
                tx.execute(
                    "INSERT INTO state_documents(name, body, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE SET body=excluded.body, updated_at=excluded.updated_at",
                    params![self.name, body, now_unix()],
                )?;
                tx.commit()?;
            }
            (Commit::Write, None) => {
                tx.execute("DELETE FROM state_documents WHERE name=?1", params![self.name])?;
                tx.commit()?;
            }
            (Commit::Discard, _) => {
                tx.rollback()?;
            }
        }
        tracing::trace!(store = %self.label, "state transaction complete");
        Ok(())
    }
}

fn now_unix() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or_default()
}
