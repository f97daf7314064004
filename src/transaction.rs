//! Transactions over the statement store.
//!
//! A [`Transaction`] is the unit of work every mutation runs in. In-memory
//! state is updated eagerly, so readers of the same engine observe
//! uncommitted work. The transaction journals the first-touch prior value of
//! every record it mutates; [`Transaction::abort`] puts those back, and
//! [`Transaction::commit`] writes the touched records through to the durable
//! tier in one redb transaction.
//!
//! Hooks registered with [`Transaction::run_on_commit`] and
//! [`Transaction::run_on_close`] fire at most once, in registration order.
//! Commit hooks only fire on commit; close hooks fire on commit and abort.
//!
//! Record locks are advisory and held until the transaction closes.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::authority::StatementAuthority;
use crate::error::{ProofResult, StoreError};
use crate::id::StatementId;
use crate::statement::Statement;
use crate::store::StatementStore;
use crate::undelete::{DeletionBatch, UndoLog};

type Hook = Box<dyn FnOnce() + Send>;

enum HookKind {
    Commit,
    Close,
}

#[derive(Default)]
struct TxnState {
    closed: bool,
    statements: HashMap<StatementId, Option<Statement>>,
    authorities: HashMap<StatementId, Option<StatementAuthority>>,
    hooks: Vec<(HookKind, Hook)>,
    held: BTreeSet<StatementId>,
    deletions: Vec<DeletionBatch>,
    popped: Vec<DeletionBatch>,
}

/// Advisory per-statement record locks shared by every transaction of an
/// engine.
#[derive(Debug, Default)]
pub struct LockTable {
    owners: Mutex<HashMap<StatementId, u64>>,
    released: Condvar,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `id` for transaction `owner`, waiting up to `timeout`.
    /// Re-acquiring a lock already held by `owner` succeeds immediately.
    pub fn acquire(&self, id: StatementId, owner: u64, timeout: Duration) -> Result<(), StoreError> {
        let deadline = Instant::now() + timeout;
        let mut owners = self.owners.lock().expect("lock table poisoned");
        loop {
            match owners.get(&id) {
                None => {
                    owners.insert(id, owner);
                    return Ok(());
                }
                Some(&current) if current == owner => return Ok(()),
                Some(_) => {}
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(statement = %id, txn = owner, "record lock timed out");
                return Err(StoreError::LockTimeout { id: id.get() });
            }
            owners = self
                .released
                .wait_timeout(owners, deadline - now)
                .expect("lock table poisoned")
                .0;
        }
    }

    /// Release every lock in `ids` held by `owner`.
    pub fn release_all(&self, owner: u64, ids: &BTreeSet<StatementId>) {
        if ids.is_empty() {
            return;
        }
        let mut owners = self.owners.lock().expect("lock table poisoned");
        for id in ids {
            if owners.get(id) == Some(&owner) {
                owners.remove(id);
            }
        }
        drop(owners);
        self.released.notify_all();
    }

    /// Current owner of `id`, if locked.
    pub fn owner(&self, id: StatementId) -> Option<u64> {
        self.owners
            .lock()
            .expect("lock table poisoned")
            .get(&id)
            .copied()
    }
}

/// A unit of work against an engine's store.
pub struct Transaction {
    id: u64,
    store: Arc<StatementStore>,
    locks: Arc<LockTable>,
    undo: Arc<UndoLog>,
    lock_timeout: Duration,
    state: Mutex<TxnState>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn new(
        id: u64,
        store: Arc<StatementStore>,
        locks: Arc<LockTable>,
        undo: Arc<UndoLog>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            id,
            store,
            locks,
            undo,
            lock_timeout,
            state: Mutex::new(TxnState::default()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("transaction state poisoned").closed
    }

    /// Fail with `TransactionClosed` once committed or aborted.
    pub fn ensure_open(&self) -> ProofResult<()> {
        if self.is_closed() {
            return Err(StoreError::TransactionClosed { id: self.id }.into());
        }
        Ok(())
    }

    /// Acquire the record lock on `id` until this transaction closes.
    pub fn lock(&self, id: StatementId) -> ProofResult<()> {
        self.ensure_open()?;
        self.locks.acquire(id, self.id, self.lock_timeout)?;
        self.state
            .lock()
            .expect("transaction state poisoned")
            .held
            .insert(id);
        Ok(())
    }

    /// Run `hook` after a successful commit.
    pub fn run_on_commit(&self, hook: impl FnOnce() + Send + 'static) {
        self.push_hook(HookKind::Commit, Box::new(hook));
    }

    /// Run `hook` when the transaction closes, by commit or abort.
    pub fn run_on_close(&self, hook: impl FnOnce() + Send + 'static) {
        self.push_hook(HookKind::Close, Box::new(hook));
    }

    fn push_hook(&self, kind: HookKind, hook: Hook) {
        let mut state = self.state.lock().expect("transaction state poisoned");
        if state.closed {
            return;
        }
        state.hooks.push((kind, hook));
    }

    /// Record the prior value of a statement the first time it is touched.
    pub(crate) fn journal_statement(
        &self,
        id: StatementId,
        prior: impl FnOnce() -> Option<Statement>,
    ) {
        let mut state = self.state.lock().expect("transaction state poisoned");
        state.statements.entry(id).or_insert_with(prior);
    }

    pub(crate) fn journal_authority(
        &self,
        id: StatementId,
        prior: impl FnOnce() -> Option<StatementAuthority>,
    ) {
        let mut state = self.state.lock().expect("transaction state poisoned");
        state.authorities.entry(id).or_insert_with(prior);
    }

    /// Queue a deletion batch for the undo log; it is pushed on commit.
    pub(crate) fn record_deletions(&self, batch: DeletionBatch) {
        if batch.is_empty() {
            return;
        }
        self.state
            .lock()
            .expect("transaction state poisoned")
            .deletions
            .push(batch);
    }

    /// Remember a batch taken off the undo log, to put back on abort.
    pub(crate) fn record_undelete(&self, batch: DeletionBatch) {
        self.state
            .lock()
            .expect("transaction state poisoned")
            .popped
            .push(batch);
    }

    /// Number of records touched so far.
    pub fn touched(&self) -> usize {
        let state = self.state.lock().expect("transaction state poisoned");
        state.statements.len() + state.authorities.len()
    }

    fn take_state(&self) -> Option<TxnState> {
        let mut state = self.state.lock().expect("transaction state poisoned");
        if state.closed {
            return None;
        }
        let taken = std::mem::take(&mut *state);
        state.closed = true;
        Some(taken)
    }

    fn rollback(&self, state: &mut TxnState) {
        for (id, prior) in state.statements.drain() {
            self.store.restore_statement(id, prior);
        }
        for (id, prior) in state.authorities.drain() {
            self.store.restore_authority(id, prior);
        }
        // Undone batches go back in their original order.
        for batch in state.popped.drain(..).rev() {
            self.undo.push(batch);
        }
    }

    fn finish(&self, state: TxnState, committed: bool) {
        self.locks.release_all(self.id, &state.held);
        for (kind, hook) in state.hooks {
            if committed || matches!(kind, HookKind::Close) {
                hook();
            }
        }
    }

    /// Write touched records through, enter deletion batches into the undo
    /// log, then run every hook in registration order.
    ///
    /// If the durable write fails the transaction is rolled back and only
    /// close hooks run.
    pub fn commit(&self) -> ProofResult<()> {
        let Some(mut state) = self.take_state() else {
            return Err(StoreError::TransactionClosed { id: self.id }.into());
        };

        let statements: Vec<_> = state.statements.keys().copied().collect();
        let authorities: Vec<_> = state.authorities.keys().copied().collect();
        if let Err(e) = self.store.flush(&statements, &authorities) {
            tracing::warn!(txn = self.id, error = %e, "durable write failed, rolling back");
            self.rollback(&mut state);
            self.finish(state, false);
            return Err(e.into());
        }

        for batch in state.deletions.drain(..) {
            self.undo.push(batch);
        }
        tracing::debug!(
            txn = self.id,
            statements = statements.len(),
            authorities = authorities.len(),
            "transaction committed"
        );
        self.finish(state, true);
        Ok(())
    }

    /// Restore every touched record and run close hooks. Idempotent.
    pub fn abort(&self) {
        let Some(mut state) = self.take_state() else {
            return;
        };
        let touched = state.statements.len();
        self.rollback(&mut state);
        tracing::debug!(txn = self.id, statements = touched, "transaction aborted");
        self.finish(state, false);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sid(raw: u64) -> StatementId {
        StatementId::new(raw).unwrap()
    }

    fn txn(id: u64, locks: &Arc<LockTable>) -> Transaction {
        Transaction::new(
            id,
            Arc::new(StatementStore::memory_only()),
            Arc::clone(locks),
            Arc::new(UndoLog::new(4)),
            Duration::from_millis(20),
        )
    }

    #[test]
    fn hooks_run_in_order_on_commit() {
        let locks = Arc::new(LockTable::new());
        let t = txn(1, &locks);
        let log = Arc::new(Mutex::new(Vec::new()));
        for (i, commit) in [(1, true), (2, false), (3, true)] {
            let log = Arc::clone(&log);
            if commit {
                t.run_on_commit(move || log.lock().unwrap().push(i));
            } else {
                t.run_on_close(move || log.lock().unwrap().push(i));
            }
        }
        t.commit().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn abort_runs_close_hooks_only() {
        let locks = Arc::new(LockTable::new());
        let t = txn(1, &locks);
        let commits = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let commits = Arc::clone(&commits);
            t.run_on_commit(move || {
                commits.fetch_add(1, Ordering::SeqCst);
            });
            let closes = Arc::clone(&closes);
            t.run_on_close(move || {
                closes.fetch_add(1, Ordering::SeqCst);
            });
        }
        t.abort();
        t.abort();
        assert_eq!(commits.load(Ordering::SeqCst), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(t.commit().is_err());
    }

    #[test]
    fn locks_block_other_transactions_until_close() {
        let locks = Arc::new(LockTable::new());
        let a = txn(1, &locks);
        let b = txn(2, &locks);
        a.lock(sid(5)).unwrap();
        a.lock(sid(5)).unwrap();
        assert!(matches!(
            b.lock(sid(5)),
            Err(crate::error::ProofError::Store(StoreError::LockTimeout { id: 5 }))
        ));
        a.commit().unwrap();
        assert_eq!(locks.owner(sid(5)), None);
        b.lock(sid(5)).unwrap();
        assert_eq!(locks.owner(sid(5)), Some(2));
    }

    #[test]
    fn drop_aborts_open_transaction() {
        let locks = Arc::new(LockTable::new());
        let closed = Arc::new(AtomicUsize::new(0));
        {
            let t = txn(1, &locks);
            t.lock(sid(9)).unwrap();
            let closed = Arc::clone(&closed);
            t.run_on_close(move || {
                closed.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(locks.owner(sid(9)), None);
    }
}
