use std::sync::Mutex;

use anyhow::{Context, Result};
use batchgate_core::StateDocument;

use crate::traits::{Commit, StateStore};

/// In-memory store for tests. Keeps the serialized bytes so tests can check
/// that a refused invocation left the document untouched.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Option<Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(doc: &StateDocument) -> Result<Self> {
        Ok(Self::with_bytes(doc.to_vec()?))
    }

    /// Seeds raw bytes, valid or not.
    pub fn with_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self { inner: Mutex::new(Some(bytes.into())) }
    }

    pub fn bytes(&self) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().clone()
    }
}

impl StateStore for InMemoryStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn read(&self) -> Result<Option<StateDocument>> {
        let inner = self.inner.lock().unwrap();
        inner.as_deref().map(StateDocument::from_slice).transpose().context("decode in-memory state document")
    }

    fn transact(&self, f: &mut dyn FnMut(&mut Option<StateDocument>) -> Commit) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut doc = inner
            .as_deref()
            .map(StateDocument::from_slice)
            .transpose()
            .context("decode in-memory state document")?;
        if f(&mut doc) == Commit::Write {
            *inner = doc.map(|d| d.to_vec()).transpose()?;
        }
        Ok(())
    }
}
