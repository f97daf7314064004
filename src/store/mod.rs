//! Persistence collaborator for the statement graph.
//!
//! Two tiers serve different needs:
//!
//! - the hot tier: statement and authority records in concurrent hashmaps
//!   (DashMap) plus the secondary indexes of [`index::StatementIndex`];
//! - [`DurableStore`](durable::DurableStore): optional redb tier the hot
//!   tier is written through to at commit and restored from on open.
//!
//! Every mutation takes the active [`Transaction`] and journals the record's
//! prior value there before changing it, so an abort can put it back.
//! Enumerations return short-lived snapshots; the scoped views in
//! [`crate::context`] re-query on every call and so stay live.

pub mod durable;
pub mod index;

use std::path::Path;

use dashmap::DashMap;

use crate::authority::StatementAuthority;
use crate::error::{ProofResult, StoreError};
use crate::id::{AtomicIdAllocator, StatementId};
use crate::identifier::Identifier;
use crate::statement::Statement;
use crate::term::{ParamId, Term};
use crate::transaction::Transaction;

use durable::{DurableBatch, DurableStore};
use index::{Scope, StatementIndex};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization {
        message: e.to_string(),
    })
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization {
        message: e.to_string(),
    })
}

/// Indexed statement store with an optional durable tier.
#[derive(Debug)]
pub struct StatementStore {
    statements: DashMap<StatementId, Statement>,
    authorities: DashMap<StatementId, StatementAuthority>,
    index: StatementIndex,
    allocator: AtomicIdAllocator,
    durable: Option<DurableStore>,
}

impl StatementStore {
    /// A store with no persistence.
    pub fn memory_only() -> Self {
        Self {
            statements: DashMap::new(),
            authorities: DashMap::new(),
            index: StatementIndex::new(),
            allocator: AtomicIdAllocator::new(),
            durable: None,
        }
    }

    /// Open the durable tier in `data_dir` and restore every record from it.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        let durable = DurableStore::open(data_dir)?;
        let store = Self {
            durable: Some(durable),
            ..Self::memory_only()
        };
        store.restore()?;
        Ok(store)
    }

    fn restore(&self) -> StoreResult<()> {
        let Some(durable) = &self.durable else {
            return Ok(());
        };
        for (_, bytes) in durable.load_statements()? {
            let st: Statement = decode(&bytes)?;
            self.allocator.reserve_through(st.id);
            if let Some(max) = st.kind_terms_max_param() {
                ParamId::reserve_through(max);
            }
            self.write(st);
        }
        for (_, bytes) in durable.load_authorities()? {
            let authority: StatementAuthority = decode(&bytes)?;
            self.authorities.insert(authority.statement_id, authority);
        }
        Ok(())
    }

    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }

    /// Allocate a fresh statement id.
    pub fn allocate(&self) -> ProofResult<StatementId> {
        self.allocator.next_id()
    }

    /// Keep future allocations above an id being re-used (undelete).
    pub fn reserve(&self, id: StatementId) {
        self.allocator.reserve_through(id);
    }

    // -- records ----------------------------------------------------------

    pub fn get(&self, id: StatementId) -> Option<Statement> {
        self.statements.get(&id).map(|r| r.value().clone())
    }

    pub fn contains(&self, id: StatementId) -> bool {
        self.statements.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// All statement ids, sorted.
    pub fn ids(&self) -> Vec<StatementId> {
        let mut ids: Vec<_> = self.statements.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    /// Insert or replace a record.
    pub fn put(&self, txn: &Transaction, st: Statement) {
        txn.journal_statement(st.id, || self.get(st.id));
        self.write(st);
    }

    /// Remove a record, returning it.
    pub fn remove(&self, txn: &Transaction, id: StatementId) -> Option<Statement> {
        txn.journal_statement(id, || self.get(id));
        self.erase(id)
    }

    /// Update the cached proved flag. Returns the updated record.
    pub fn set_proved(&self, txn: &Transaction, id: StatementId, proved: bool) -> Option<Statement> {
        txn.journal_statement(id, || self.get(id));
        let mut entry = self.statements.get_mut(&id)?;
        entry.proved = proved;
        Some(entry.value().clone())
    }

    fn write(&self, st: Statement) {
        let indexed = st.clone();
        if let Some(old) = self.statements.insert(st.id, st) {
            self.index.remove(&old);
        }
        self.index.insert(&indexed);
    }

    fn erase(&self, id: StatementId) -> Option<Statement> {
        let (_, old) = self.statements.remove(&id)?;
        self.index.remove(&old);
        Some(old)
    }

    /// Put back a journaled prior value (abort path).
    pub(crate) fn restore_statement(&self, id: StatementId, prior: Option<Statement>) {
        match prior {
            Some(st) => self.write(st),
            None => {
                self.erase(id);
            }
        }
    }

    // -- authorities ------------------------------------------------------

    pub fn authority(&self, id: StatementId) -> Option<StatementAuthority> {
        self.authorities.get(&id).map(|r| r.value().clone())
    }

    pub fn put_authority(&self, txn: &Transaction, authority: StatementAuthority) {
        let id = authority.statement_id;
        txn.journal_authority(id, || self.authority(id));
        self.authorities.insert(id, authority);
    }

    pub fn remove_authority(&self, txn: &Transaction, id: StatementId) -> Option<StatementAuthority> {
        txn.journal_authority(id, || self.authority(id));
        self.authorities.remove(&id).map(|(_, a)| a)
    }

    pub(crate) fn restore_authority(&self, id: StatementId, prior: Option<StatementAuthority>) {
        match prior {
            Some(authority) => {
                self.authorities.insert(id, authority);
            }
            None => {
                self.authorities.remove(&id);
            }
        }
    }

    // -- indexed enumerations ---------------------------------------------

    /// Statements directly owned by `context`, assumptions included.
    pub fn local_statements_of(&self, context: StatementId) -> Vec<StatementId> {
        self.index.local_statements_of(context)
    }

    pub fn dependents_of(&self, id: StatementId) -> Vec<StatementId> {
        self.index.dependents_of(id)
    }

    pub fn local_by_term(&self, context: StatementId, term: &Term) -> Vec<StatementId> {
        self.index.local_by_term(context, term)
    }

    pub fn contexts_by_consequent(&self, consequent: &Term) -> Vec<StatementId> {
        self.index.contexts_by_consequent(consequent)
    }

    /// Contexts at or below `context` whose consequent equals `term`.
    pub fn descendant_contexts_by_consequent(
        &self,
        context: StatementId,
        term: &Term,
    ) -> Vec<StatementId> {
        self.index
            .contexts_by_consequent(term)
            .into_iter()
            .filter(|&candidate| crate::graph::is_descendant_or_self(self, candidate, context))
            .collect()
    }

    pub fn specializations_by_general(&self, general: StatementId) -> Vec<StatementId> {
        self.index.specializations_by_general(general)
    }

    pub fn lookup_name(&self, scope: Scope, name: &Identifier) -> Option<StatementId> {
        self.index.lookup_name(scope, name)
    }

    pub fn names_in(&self, scope: Scope) -> Vec<(Identifier, StatementId)> {
        self.index.names_in(scope)
    }

    pub fn roots(&self) -> Vec<StatementId> {
        self.index.roots()
    }

    // -- durable tier -----------------------------------------------------

    /// Write the current state of the given records through to the durable
    /// tier in one redb transaction. Records that no longer exist are deleted.
    pub fn flush(&self, statements: &[StatementId], authorities: &[StatementId]) -> StoreResult<()> {
        let Some(durable) = &self.durable else {
            return Ok(());
        };
        let mut batch = DurableBatch::default();
        for &id in statements {
            let bytes = match self.get(id) {
                Some(st) => Some(encode(&st)?),
                None => None,
            };
            batch.statements.push((id.get(), bytes));
        }
        for &id in authorities {
            let bytes = match self.authority(id) {
                Some(a) => Some(encode(&a)?),
                None => None,
            };
            batch.authorities.push((id.get(), bytes));
        }
        durable.apply(&batch)
    }
}

impl Statement {
    /// Largest bound-parameter id in any term this record holds.
    fn kind_terms_max_param(&self) -> Option<u64> {
        use crate::statement::StatementKind;
        let extra = match &self.kind {
            StatementKind::Declaration { value } => value.max_param_id(),
            StatementKind::Specialization { instance, .. } => instance.max_param_id(),
            StatementKind::Context(data) => data.consequent.max_param_id(),
            StatementKind::Assumption { .. } => None,
        };
        self.term.max_param_id().max(extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::StatementKind;
    use crate::transaction::LockTable;
    use std::sync::Arc;
    use std::time::Duration;

    fn declaration(store: &StatementStore, ctx: StatementId) -> Statement {
        Statement {
            id: store.allocate().unwrap(),
            context_id: Some(ctx),
            term: Term::Tau,
            proved: false,
            dependencies: Default::default(),
            identifier: None,
            kind: StatementKind::Declaration {
                value: Term::atom("P"),
            },
        }
    }

    fn txn(store: &Arc<StatementStore>) -> Transaction {
        Transaction::new(
            1,
            Arc::clone(store),
            Arc::new(LockTable::new()),
            Arc::new(crate::undelete::UndoLog::new(4)),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn abort_restores_prior_state() {
        let store = Arc::new(StatementStore::memory_only());
        let ctx = StatementId::new(100).unwrap();
        let st = declaration(&store, ctx);
        let id = st.id;

        let t = txn(&store);
        store.put(&t, st);
        t.commit().unwrap();

        let t = txn(&store);
        store.set_proved(&t, id, true);
        assert!(store.get(id).unwrap().proved);
        t.abort();
        assert!(!store.get(id).unwrap().proved);
        assert_eq!(store.local_statements_of(ctx), vec![id]);
    }

    #[test]
    fn remove_updates_indexes() {
        let store = Arc::new(StatementStore::memory_only());
        let ctx = StatementId::new(100).unwrap();
        let st = declaration(&store, ctx);
        let id = st.id;
        let t = txn(&store);
        store.put(&t, st);
        assert_eq!(store.local_by_term(ctx, &Term::Tau), vec![id]);
        store.remove(&t, id);
        assert!(store.local_by_term(ctx, &Term::Tau).is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn durable_round_trip_restores_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StatementId::new(100).unwrap();
        let id = {
            let store = Arc::new(StatementStore::open(dir.path()).unwrap());
            let st = declaration(&store, ctx);
            let id = st.id;
            let t = txn(&store);
            store.put(&t, st);
            t.commit().unwrap();
            id
        };
        let store = StatementStore::open(dir.path()).unwrap();
        assert_eq!(store.get(id).unwrap().id, id);
        assert_eq!(store.local_statements_of(ctx), vec![id]);
        assert!(store.allocate().unwrap() > id);
    }
}
