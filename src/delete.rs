//! Deleting statements.
//!
//! Deleting a context removes its whole sub-tree (local statements and
//! assumptions). A delete is refused while a statement outside the removed
//! sub-tree still depends on something in it; the cascading variant removes
//! those dependents first.
//!
//! Every record a delete will remove is locked before the first removal, so
//! a lock timeout leaves the graph as it was. Every delete operation forms
//! one deletion batch, entered into the undo log when the transaction
//! commits. After the records are gone, contexts
//! that a removed proved statement may have been solving are re-checked.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::engine::Engine;
use crate::error::{ProofResult, StructureError};
use crate::graph::order::dependency_sorted;
use crate::graph::{descendants, subtree};
use crate::id::StatementId;
use crate::statement::Statement;
use crate::transaction::Transaction;
use crate::undelete::{DeletedStatement, DeletionBatch};

/// Result of a delete operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Removed statements in removal order, assumptions included.
    pub removed: Vec<StatementId>,
}

impl Engine {
    /// The statements removed together with `id`.
    fn removal_set(&self, st: &Statement) -> BTreeSet<StatementId> {
        if st.is_context() {
            subtree(self.store(), st.id)
        } else {
            BTreeSet::from([st.id])
        }
    }

    /// Dependents of `members` that are not members themselves.
    fn external_dependents(&self, members: &BTreeSet<StatementId>) -> BTreeSet<StatementId> {
        members
            .iter()
            .flat_map(|&m| self.store().dependents_of(m))
            .filter(|d| !members.contains(d))
            .collect()
    }

    fn check_deletable(&self, context: StatementId, statement: StatementId) -> ProofResult<Statement> {
        let st = self.require(statement)?;
        if st.is_assumption() {
            return Err(StructureError::CannotDeleteAssumption {
                id: statement.get(),
            }
            .into());
        }
        if st.context_id != Some(context) {
            return Err(StructureError::NotInContext {
                id: statement.get(),
                context: context.get(),
            }
            .into());
        }
        Ok(st)
    }

    /// Delete one statement local to `context`.
    pub fn delete_statement(
        &self,
        txn: &Transaction,
        context: StatementId,
        statement: StatementId,
    ) -> ProofResult<DeleteReport> {
        self.delete_statements(txn, context, &[statement])
    }

    /// Delete several statements local to `context` as one batch. Members may
    /// depend on one another; nothing outside the batch may depend on them.
    pub fn delete_statements(
        &self,
        txn: &Transaction,
        context: StatementId,
        statements: &[StatementId],
    ) -> ProofResult<DeleteReport> {
        txn.ensure_open()?;
        self.require_context(context)?;

        let mut removal = BTreeSet::new();
        for &id in statements {
            let st = self.check_deletable(context, id)?;
            removal.extend(self.removal_set(&st));
        }
        let blocking = self.external_dependents(&removal);
        if !blocking.is_empty() {
            let blocked = statements
                .iter()
                .copied()
                .find(|&id| {
                    self.store().get(id).is_some_and(|st| {
                        !self
                            .external_dependents(&self.removal_set(&st))
                            .is_disjoint(&blocking)
                    })
                })
                .unwrap_or(context);
            return Err(StructureError::HasDependents {
                id: blocked.get(),
                count: blocking.len(),
            }
            .into());
        }
        self.lock_all(txn, &removal)?;

        let order = dependency_sorted(self.store(), statements, false);
        let mut batch = DeletionBatch::default();
        let mut report = DeleteReport::default();
        let mut touched = Vec::new();
        for &id in order.iter().rev() {
            self.remove_tree(txn, id, &mut batch, &mut report, &mut touched);
        }
        self.recheck_solved(txn, &touched);
        txn.record_deletions(batch);
        tracing::debug!(context = %context, removed = report.removed.len(), "deleted statements");
        Ok(report)
    }

    /// Delete a root context and its sub-tree.
    pub fn delete_root_context(&self, txn: &Transaction, root: StatementId) -> ProofResult<DeleteReport> {
        txn.ensure_open()?;
        let st = self.require_context(root)?;
        if let Some(owner) = st.context_id {
            return Err(StructureError::NotInContext {
                id: root.get(),
                context: owner.get(),
            }
            .into());
        }
        let removal = self.removal_set(&st);
        let blocking = self.external_dependents(&removal);
        if !blocking.is_empty() {
            return Err(StructureError::HasDependents {
                id: root.get(),
                count: blocking.len(),
            }
            .into());
        }
        self.lock_all(txn, &removal)?;
        let mut batch = DeletionBatch::default();
        let mut report = DeleteReport::default();
        let mut touched = Vec::new();
        self.remove_tree(txn, root, &mut batch, &mut report, &mut touched);
        txn.record_deletions(batch);
        Ok(report)
    }

    /// Delete `statement` after first deleting everything depending on it.
    /// An assumption stands for its owning context.
    ///
    /// Walks dependents with an explicit stack: the top is deleted once no
    /// dependent remains, except dependents already on the stack (a
    /// dependency cycle), which are deleted when the walk returns to them.
    pub fn delete_statement_cascade(
        &self,
        txn: &Transaction,
        context: StatementId,
        statement: StatementId,
    ) -> ProofResult<DeleteReport> {
        txn.ensure_open()?;
        self.require_context(context)?;
        let st = self.require(statement)?;
        if st.context_id != Some(context) {
            return Err(StructureError::NotInContext {
                id: statement.get(),
                context: context.get(),
            }
            .into());
        }
        let target = if st.is_assumption() { context } else { statement };
        self.cascade_from(txn, target)
    }

    fn cascade_from(&self, txn: &Transaction, target: StatementId) -> ProofResult<DeleteReport> {
        let store = self.store();
        let mut planned = BTreeSet::new();
        for unit in self.cascade_units(target) {
            if let Some(st) = store.get(unit) {
                planned.extend(self.removal_set(&st));
            }
        }
        self.lock_all(txn, &planned)?;

        let mut batch = DeletionBatch::default();
        let mut report = DeleteReport::default();
        let mut touched = Vec::new();
        let mut visited = HashSet::from([target]);
        let mut stack = vec![target];

        while let Some(&top) = stack.last() {
            let Some(st) = store.get(top) else {
                stack.pop();
                continue;
            };
            let members = self.removal_set(&st);
            let next = self
                .external_dependents(&members)
                .into_iter()
                .filter_map(|d| self.cascade_unit(d))
                .find(|unit| !visited.contains(unit));
            match next {
                Some(unit) => {
                    visited.insert(unit);
                    stack.push(unit);
                }
                None => {
                    self.remove_tree(txn, top, &mut batch, &mut report, &mut touched);
                    stack.pop();
                }
            }
        }

        self.recheck_solved(txn, &touched);
        txn.record_deletions(batch);
        tracing::debug!(target = %target, removed = report.removed.len(), "cascading delete finished");
        Ok(report)
    }

    /// Every unit a cascade from `target` reaches, `target` included.
    fn cascade_units(&self, target: StatementId) -> BTreeSet<StatementId> {
        let mut units = BTreeSet::from([target]);
        let mut queue = VecDeque::from([target]);
        while let Some(unit) = queue.pop_front() {
            let Some(st) = self.store().get(unit) else { continue };
            for dependent in self.external_dependents(&self.removal_set(&st)) {
                if let Some(next) = self.cascade_unit(dependent) {
                    if units.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }
        units
    }

    fn lock_all(&self, txn: &Transaction, ids: &BTreeSet<StatementId>) -> ProofResult<()> {
        for &id in ids {
            txn.lock(id)?;
        }
        Ok(())
    }

    /// What must be deleted to get rid of `id`: itself, or its owning
    /// context for an assumption.
    fn cascade_unit(&self, id: StatementId) -> Option<StatementId> {
        let st = self.store().get(id)?;
        if st.is_assumption() { st.context_id } else { Some(id) }
    }

    /// Remove `top` and, for a context, everything below it, contents before
    /// their contexts.
    fn remove_tree(
        &self,
        txn: &Transaction,
        top: StatementId,
        batch: &mut DeletionBatch,
        report: &mut DeleteReport,
        touched: &mut Vec<Statement>,
    ) {
        let store = self.store();
        let mut members: Vec<StatementId> = descendants(store, top)
            .into_iter()
            .filter(|&id| store.get(id).is_some_and(|st| !st.is_assumption()))
            .collect();
        members.push(top);
        let order = dependency_sorted(store, &members, true);

        for id in order.into_iter().rev() {
            let Some(st) = store.get(id) else { continue };
            let authority = store.authority(id);
            let mut assumptions = Vec::new();
            for &aid in st.assumptions() {
                if let Some(assumption) = self.erase(txn, aid) {
                    report.removed.push(aid);
                    assumptions.push(assumption.clone());
                    touched.push(assumption);
                }
            }
            if self.erase(txn, id).is_some() {
                report.removed.push(id);
                batch.push(DeletedStatement {
                    statement: st.clone(),
                    assumptions,
                    authority,
                });
                touched.push(st);
            }
        }
    }

    /// Remove one record with its authority and keyed listeners.
    fn erase(&self, txn: &Transaction, id: StatementId) -> Option<Statement> {
        let st = self.store().remove(txn, id)?;
        self.drop_authority(txn, id);
        self.listeners().statement_deleted(txn, &st, st.identifier.as_ref());
        let registry = self.listener_registry();
        txn.run_on_commit(move || registry.remove_for(id));
        Some(st)
    }

    /// Re-derive contexts a removed proved statement may have been solving.
    fn recheck_solved(&self, txn: &Transaction, removed: &[Statement]) {
        let store = self.store();
        let mut seeds = BTreeSet::new();
        for st in removed.iter().filter(|st| st.proved) {
            let Some(owner) = st.context_id else { continue };
            if !store.contains(owner) {
                continue;
            }
            seeds.extend(store.descendant_contexts_by_consequent(owner, &st.term));
        }
        if !seeds.is_empty() {
            self.rederive(txn, seeds);
        }
    }
}
