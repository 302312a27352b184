use std::sync::Arc;

use anyhow::Result;
use batchgate_core::StateDocument;

/// What a read-modify-write step wants done with the document it was handed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Commit {
    Write,
    Discard,
}

/// Durable home of one batch's [`StateDocument`].
///
/// `transact` holds an exclusive lock scoped to this document for the whole
/// load → mutate → persist span, so two invocations cannot both observe the
/// same state and both act on it.
pub trait StateStore: Send + Sync {
    /// Human readable location, used in logs.
    fn describe(&self) -> String;

    /// Snapshot read; `None` when nothing has been written yet.
    fn read(&self) -> Result<Option<StateDocument>>;

    /// Runs `f` under the store lock. `f` gets the current document (or `None`)
    /// and may replace it; it is persisted only on [`Commit::Write`].
    fn transact(&self, f: &mut dyn FnMut(&mut Option<StateDocument>) -> Commit) -> Result<()>;
}

impl<S: StateStore + ?Sized> StateStore for Arc<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn read(&self) -> Result<Option<StateDocument>> {
        (**self).read()
    }

    fn transact(&self, f: &mut dyn FnMut(&mut Option<StateDocument>) -> Commit) -> Result<()> {
        (**self).transact(f)
    }
}

/// Typed convenience over [`StateStore::transact`] for closures that return a value.
pub fn with_document<T>(
    store: &dyn StateStore,
    mut f: impl FnMut(&mut Option<StateDocument>) -> (Commit, T),
) -> Result<T> {
    let mut out = None;
    store.transact(&mut |doc| {
        let (commit, value) = f(doc);
        out = Some(value);
        commit
    })?;
    out.ok_or_else(|| anyhow::anyhow!("store {} did not run the transaction", store.describe()))
}
