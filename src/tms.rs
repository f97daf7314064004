//! Truth maintenance: keeping every cached `proved` flag equal to its proof
//! rule.
//!
//! The rule is pure over the current graph ([`Engine::calc_proved`]). After
//! a mutation, [`Engine::propagate`] runs a breadth-first fixpoint from the
//! changed statements:
//!
//! 1. pop an id, skip it if the statement no longer exists;
//! 2. recompute the rule; if it differs from the cached flag, store the new
//!    flag and notify listeners;
//! 3. enqueue its dependents;
//! 4. when context checking is on, enqueue every context at or below the
//!    statement's owning context whose consequent equals the statement's
//!    term, since the statement may have started or stopped solving it.
//!
//! A pending set keeps each id queued at most once at a time. A statement is
//! only re-queued after something it depends on actually flipped, so the run
//! reaches quiescence.
//!
//! Propagation is infallible: a dangling reference means a concurrent delete
//! and is skipped.
//!
//! A flag only turns false when a statement is removed. Re-running the rule
//! from the affected contexts is not enough then: two contexts with the same
//! consequent may each be the other's only remaining solver. Removal and
//! [`Engine::rebuild`] therefore both go through [`Engine::rederive`], which
//! clears the region a statement may support (sub-tree, dependents and the
//! contexts it may solve, transitively) and re-derives it from all-false.
//! Mutual support with no outside proof stays unproved.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::engine::Engine;
use crate::error::ProofResult;
use crate::graph::order::dependency_sorted;
use crate::id::StatementId;
use crate::statement::{ContextData, ContextKind, Statement, StatementKind};
use crate::transaction::Transaction;

/// Outcome of a propagation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationReport {
    /// Worklist pops, including skipped ids.
    pub checked: usize,
    /// Flag changes in pop order.
    pub flipped: Vec<(StatementId, bool)>,
}

impl PropagationReport {
    pub fn flips(&self) -> usize {
        self.flipped.len()
    }

    fn absorb(&mut self, other: PropagationReport) {
        self.checked += other.checked;
        self.flipped.extend(other.flipped);
    }
}

impl Engine {
    fn is_proved(&self, id: StatementId) -> bool {
        self.store().get(id).is_some_and(|st| st.proved)
    }

    fn all_proved(&self, ids: impl IntoIterator<Item = StatementId>) -> bool {
        ids.into_iter().all(|id| self.is_proved(id))
    }

    /// Evaluate the proof rule of `st` against the current graph.
    pub fn calc_proved(&self, st: &Statement) -> bool {
        if !self.all_proved(st.term.free_variables()) {
            return false;
        }
        match &st.kind {
            StatementKind::Assumption { .. } => true,
            StatementKind::Declaration { value } => self.all_proved(value.free_variables()),
            StatementKind::Specialization { general, instance } => {
                self.is_proved(*general) && self.all_proved(instance.free_variables())
            }
            StatementKind::Context(data) => {
                let unfolded = match data.kind {
                    ContextKind::Unfolding { declaration } => self.is_proved(declaration),
                    ContextKind::Nested | ContextKind::Root => true,
                };
                unfolded && self.has_proved_solver(st.id, data)
            }
        }
    }

    fn has_proved_solver(&self, context: StatementId, data: &ContextData) -> bool {
        self.solver_candidates(context, &data.consequent)
            .into_iter()
            .any(|id| self.is_proved(id))
    }

    /// Recompute flags starting from `seeds` until nothing changes.
    ///
    /// `check_contexts` is off only while a context is being built, so the
    /// context is not re-checked against its incomplete assumption list.
    pub fn propagate(
        &self,
        txn: &Transaction,
        seeds: impl IntoIterator<Item = StatementId>,
        check_contexts: bool,
    ) -> PropagationReport {
        self.propagate_inner(txn, seeds, check_contexts, true)
    }

    fn propagate_inner(
        &self,
        txn: &Transaction,
        seeds: impl IntoIterator<Item = StatementId>,
        check_contexts: bool,
        notify: bool,
    ) -> PropagationReport {
        let store = self.store();
        let mut report = PropagationReport::default();
        let mut queue = VecDeque::new();
        let mut pending = HashSet::new();
        for seed in seeds {
            if pending.insert(seed) {
                queue.push_back(seed);
            }
        }

        while let Some(id) = queue.pop_front() {
            pending.remove(&id);
            report.checked += 1;

            let Some(st) = store.get(id) else {
                continue;
            };
            let proved = self.calc_proved(&st);
            if proved == st.proved {
                continue;
            }
            let Some(updated) = store.set_proved(txn, id, proved) else {
                continue;
            };
            tracing::trace!(statement = %id, proved, "proved state changed");
            report.flipped.push((id, proved));
            if notify {
                self.listeners().proved_state_changed(txn, &updated, proved);
            }

            for dependent in store.dependents_of(id) {
                if pending.insert(dependent) {
                    queue.push_back(dependent);
                }
            }
            if check_contexts {
                if let Some(owner) = st.context_id {
                    for ctx in store.descendant_contexts_by_consequent(owner, &st.term) {
                        if ctx != id && pending.insert(ctx) {
                            queue.push_back(ctx);
                        }
                    }
                }
            }
        }

        tracing::debug!(
            checked = report.checked,
            flips = report.flipped.len(),
            "propagation settled"
        );
        report
    }

    /// Clear and re-derive the flags of `id`, its sub-tree and everything
    /// transitively depending on them.
    ///
    /// Used after bulk import or suspected corruption. Listeners only hear
    /// about statements whose flag ends up different from before.
    pub fn rebuild(&self, txn: &Transaction, id: StatementId) -> ProofResult<PropagationReport> {
        txn.ensure_open()?;
        self.require(id)?;
        Ok(self.rederive(txn, [id]))
    }

    /// Clear every flag `seeds` may support and re-derive them as a least
    /// fixpoint. Listeners hear net changes only.
    pub(crate) fn rederive(
        &self,
        txn: &Transaction,
        seeds: impl IntoIterator<Item = StatementId>,
    ) -> PropagationReport {
        let store = self.store();

        let mut cleared = BTreeSet::new();
        let mut stack: Vec<StatementId> = seeds.into_iter().collect();
        while let Some(current) = stack.pop() {
            if !cleared.insert(current) {
                continue;
            }
            stack.extend(store.local_statements_of(current));
            stack.extend(store.dependents_of(current));
            if let Some(st) = store.get(current) {
                if let Some(owner) = st.context_id {
                    stack.extend(store.descendant_contexts_by_consequent(owner, &st.term));
                }
            }
        }

        let mut prior = HashMap::with_capacity(cleared.len());
        for &member in &cleared {
            if let Some(st) = store.get(member) {
                prior.insert(member, st.proved);
                if st.proved {
                    store.set_proved(txn, member, false);
                }
            }
        }

        let ids: Vec<_> = cleared.iter().copied().collect();
        let order = dependency_sorted(store, &ids, true);
        let mut report = PropagationReport::default();
        report.absorb(self.propagate_inner(txn, order, true, false));

        for (&member, &was) in &prior {
            if let Some(st) = store.get(member) {
                if st.proved != was {
                    self.listeners().proved_state_changed(txn, &st, st.proved);
                }
            }
        }
        tracing::debug!(cleared = cleared.len(), flips = report.flips(), "re-derived flags");
        report
    }

    /// Statements whose cached flag disagrees with the rule. Empty whenever
    /// propagation has settled.
    pub fn inconsistent_statements(&self) -> Vec<StatementId> {
        self.store()
            .ids()
            .into_iter()
            .filter(|&id| {
                self.store()
                    .get(id)
                    .is_some_and(|st| st.proved != self.calc_proved(&st))
            })
            .collect()
    }
}
