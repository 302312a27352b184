use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use batchgate_core::StateDocument;

use crate::lock::FileLock;
use crate::traits::{Commit, StateStore};

/// The state document as a JSON file, `<dir>/<name>.json`, guarded by
/// `<dir>/<name>.json.lock`.
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileStore {
    /// `dir` must already exist.
    pub fn new(dir: &Path, name: &str) -> Self {
        let path = dir.join(format!("{name}.json"));
        let lock_path = dir.join(format!("{name}.json.lock"));
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Option<StateDocument>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path).with_context(|| format!("read {}", self.path.display()))?;
        let doc = StateDocument::from_slice(&bytes).with_context(|| format!("parse {}", self.path.display()))?;
        Ok(Some(doc))
    }

    fn save(&self, doc: &StateDocument) -> Result<()> {
        let bytes = doc.to_vec()?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path).with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self) -> Result<Option<StateDocument>> {
        let _guard = FileLock::acquire(&self.lock_path)?;
        self.load()
    }

    fn transact(&self, f: &mut dyn FnMut(&mut Option<StateDocument>) -> Commit) -> Result<()> {
        let guard = FileLock::acquire(&self.lock_path)?;
        let mut doc = self.load()?;
        match (f(&mut doc), doc) {
            (Commit::Write, Some(doc)) => self.save(&doc)?,
            (Commit::Write, None) => {
                if self.path.exists() {
                    fs::remove_file(&self.path).with_context(|| format!("remove {}", self.path.display()))?;
                }
            }
            (Commit::Discard, _) => {}
        }
        tracing::trace!(lock = %guard.path().display(), "state transaction complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::with_document;
    use batchgate_core::{parse_timestamp, Popped, Task};
    use tempfile::tempdir;

    fn seeded(dir: &Path, tasks: usize) -> JsonFileStore {
        let store = JsonFileStore::new(dir, "cron_config");
        let mut doc = StateDocument::bootstrap(parse_timestamp("2026-02-01 00:00:00").unwrap());
        doc.tasks.add_tasks(Task::list((0..tasks).map(|i| format!("t{i}"))), false).unwrap();
        store
            .transact(&mut |d| {
                *d = Some(doc.clone());
                Commit::Write
            })
            .unwrap();
        store
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path(), "cron_config");
        assert!(store.read().unwrap().is_none());
    }

    #[test]
    fn write_is_visible_to_a_new_handle() {
        let dir = tempdir().unwrap();
        seeded(dir.path(), 2);
        let other = JsonFileStore::new(dir.path(), "cron_config");
        let doc = other.read().unwrap().unwrap();
        assert_eq!(doc.tasks.root().len(), 2);
        assert!(!dir.path().join("cron_config.json.tmp").exists());
    }

    #[test]
    fn discard_leaves_file_bytes_alone() {
        let dir = tempdir().unwrap();
        let store = seeded(dir.path(), 1);
        let before = fs::read(store.path()).unwrap();
        store
            .transact(&mut |d| {
                d.as_mut().unwrap().tasks.clear();
                Commit::Discard
            })
            .unwrap();
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("cron_config.json"), b"{ nope").unwrap();
        let store = JsonFileStore::new(dir.path(), "cron_config");
        assert!(store.read().is_err());
    }

    #[test]
    fn concurrent_pops_never_lose_or_duplicate() {
        let dir = tempdir().unwrap();
        seeded(dir.path(), 40);
        let path = dir.path().to_path_buf();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    // separate handle per thread, like separate invocations
                    let store = JsonFileStore::new(&path, "cron_config");
                    let mut mine = vec![];
                    loop {
                        let popped = with_document(&store, |d| match d.as_mut() {
                            Some(doc) => (Commit::Write, doc.tasks.pop_task(None, 1)),
                            None => (Commit::Discard, Popped::Nothing),
                        })
                        .unwrap();
                        match popped {
                            Popped::One(t) => mine.push(t.to_string()),
                            _ => break,
                        }
                    }
                    mine
                })
            })
            .collect();

        let mut all: Vec<String> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort();
        let mut expected: Vec<String> = (0..40).map(|i| format!("t{i}")).collect();
        expected.sort();
        assert_eq!(all, expected);
    }
}
