//! Change notifications.
//!
//! Collaborators (replication, UIs, caches) implement [`ChangeListener`] and
//! register it either globally or keyed by a statement id. Every callback
//! receives the active [`Transaction`] so a subscriber can defer its own side
//! effects with [`Transaction::run_on_commit`].
//!
//! Dispatch works from a snapshot of the registered handles, so a callback
//! may add or remove listeners without deadlocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::authority::StatementAuthority;
use crate::id::StatementId;
use crate::identifier::Identifier;
use crate::statement::Statement;
use crate::transaction::Transaction;

/// Observer of statement graph changes. Every method defaults to a no-op.
#[allow(unused_variables)]
pub trait ChangeListener: Send + Sync {
    fn proved_state_changed(&self, txn: &Transaction, statement: &Statement, proved: bool) {}

    fn statement_added(&self, txn: &Transaction, context: Option<StatementId>, statement: &Statement) {
    }

    fn statement_deleted(
        &self,
        txn: &Transaction,
        context: Option<StatementId>,
        statement: &Statement,
        former_identifier: Option<&Identifier>,
    ) {
    }

    fn authority_created(&self, txn: &Transaction, authority: &StatementAuthority) {}

    fn authority_deleted(&self, txn: &Transaction, authority: &StatementAuthority) {}
}

/// Handle returned on registration, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Entry = (ListenerId, Arc<dyn ChangeListener>);

/// Registry of listeners for one engine session. Cleared on
/// [`Engine::close`](crate::engine::Engine::close).
#[derive(Default)]
pub struct ListenerRegistry {
    next: AtomicU64,
    global: RwLock<Vec<Entry>>,
    keyed: RwLock<HashMap<StatementId, Vec<Entry>>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> ListenerId {
        ListenerId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Listen to every change in the session.
    pub fn add_global(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        let id = self.allocate();
        self.global
            .write()
            .expect("listener registry lock poisoned")
            .push((id, listener));
        id
    }

    /// Listen to changes of one statement, and to additions and deletions
    /// inside it when it is a context.
    pub fn add_for(&self, statement: StatementId, listener: Arc<dyn ChangeListener>) -> ListenerId {
        let id = self.allocate();
        self.keyed
            .write()
            .expect("listener registry lock poisoned")
            .entry(statement)
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut global = self.global.write().expect("listener registry lock poisoned");
        let before = global.len();
        global.retain(|(lid, _)| *lid != id);
        if global.len() != before {
            return true;
        }
        drop(global);

        let mut keyed = self.keyed.write().expect("listener registry lock poisoned");
        let mut found = false;
        keyed.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|(lid, _)| *lid != id);
            found |= entries.len() != before;
            !entries.is_empty()
        });
        found
    }

    /// Drop every listener keyed by `statement`.
    pub fn remove_for(&self, statement: StatementId) {
        self.keyed
            .write()
            .expect("listener registry lock poisoned")
            .remove(&statement);
    }

    pub fn clear(&self) {
        self.global
            .write()
            .expect("listener registry lock poisoned")
            .clear();
        self.keyed
            .write()
            .expect("listener registry lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        let global = self.global.read().expect("listener registry lock poisoned").len();
        let keyed: usize = self
            .keyed
            .read()
            .expect("listener registry lock poisoned")
            .values()
            .map(Vec::len)
            .sum();
        global + keyed
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self, keys: &[StatementId]) -> Vec<Arc<dyn ChangeListener>> {
        let mut out = Vec::new();
        {
            let keyed = self.keyed.read().expect("listener registry lock poisoned");
            for key in keys {
                if let Some(entries) = keyed.get(key) {
                    out.extend(entries.iter().map(|(_, l)| Arc::clone(l)));
                }
            }
        }
        let global = self.global.read().expect("listener registry lock poisoned");
        out.extend(global.iter().map(|(_, l)| Arc::clone(l)));
        out
    }

    pub(crate) fn proved_state_changed(&self, txn: &Transaction, statement: &Statement, proved: bool) {
        for listener in self.snapshot(&[statement.id]) {
            listener.proved_state_changed(txn, statement, proved);
        }
    }

    pub(crate) fn statement_added(&self, txn: &Transaction, statement: &Statement) {
        let keys: Vec<_> = statement.context_id.into_iter().collect();
        for listener in self.snapshot(&keys) {
            listener.statement_added(txn, statement.context_id, statement);
        }
    }

    pub(crate) fn statement_deleted(
        &self,
        txn: &Transaction,
        statement: &Statement,
        former_identifier: Option<&Identifier>,
    ) {
        let mut keys = vec![statement.id];
        keys.extend(statement.context_id);
        for listener in self.snapshot(&keys) {
            listener.statement_deleted(txn, statement.context_id, statement, former_identifier);
        }
    }

    pub(crate) fn authority_created(&self, txn: &Transaction, authority: &StatementAuthority) {
        for listener in self.snapshot(&[authority.statement_id]) {
            listener.authority_created(txn, authority);
        }
    }

    pub(crate) fn authority_deleted(&self, txn: &Transaction, authority: &StatementAuthority) {
        for listener in self.snapshot(&[authority.statement_id]) {
            listener.authority_deleted(txn, authority);
        }
    }
}
