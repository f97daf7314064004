//! Proof dependencies and traces.
//!
//! The proof of a statement rests on what it and its sub-tree reference from
//! outside, plus, for a context, the solver chosen to discharge its
//! consequent. When several solvers are proved the one with the smallest
//! serialized defining payload is preferred, the earliest found winning ties.
//! Disjunctive contexts can make these relations cyclic, so the results are
//! advisory and every walk is visited-set guarded.

use std::collections::BTreeSet;

use crate::engine::Engine;
use crate::error::ProofResult;
use crate::graph::order::dependency_sorted;
use crate::graph::subtree;
use crate::id::StatementId;
use crate::statement::{Statement, StatementKind};

impl Engine {
    /// Dependencies of `statement` and its sub-tree lying outside the
    /// sub-tree, plus the preferred solver of every context in it.
    pub fn proof_dependencies(&self, statement: StatementId) -> ProofResult<BTreeSet<StatementId>> {
        let st = self.require(statement)?;
        let store = self.store();
        let members = if st.is_context() {
            subtree(store, statement)
        } else {
            BTreeSet::from([statement])
        };

        let mut out = BTreeSet::new();
        for &member in &members {
            let Some(m) = store.get(member) else { continue };
            out.extend(m.dependencies.iter().filter(|d| !members.contains(d)));
            if m.is_context() {
                if let Some(solver) = self.preferred_solver(member)? {
                    if !members.contains(&solver) {
                        out.insert(solver);
                    }
                }
            }
        }
        Ok(out)
    }

    /// The proved solver of `context` with the smallest defining payload.
    pub fn preferred_solver(&self, context: StatementId) -> ProofResult<Option<StatementId>> {
        let mut best: Option<(u64, StatementId)> = None;
        for candidate in self.solvers(context)? {
            let Some(st) = self.store().get(candidate) else { continue };
            if !st.proved {
                continue;
            }
            let size = payload_size(&st);
            if best.is_none_or(|(smallest, _)| size < smallest) {
                best = Some((size, candidate));
            }
        }
        Ok(best.map(|(_, id)| id))
    }

    /// The transitive closure of proof dependencies of `statement`, in
    /// dependency order and ending with `statement` itself.
    pub fn trace(&self, statement: StatementId) -> ProofResult<Vec<StatementId>> {
        self.require(statement)?;
        let mut closure = BTreeSet::from([statement]);
        let mut stack = vec![statement];
        while let Some(id) = stack.pop() {
            if self.store().get(id).is_none() {
                continue;
            }
            for dep in self.proof_dependencies(id)? {
                if closure.insert(dep) {
                    stack.push(dep);
                }
            }
        }

        let ids: Vec<StatementId> = closure.into_iter().collect();
        let mut ordered = dependency_sorted(self.store(), &ids, false);
        ordered.retain(|&id| id != statement);
        ordered.push(statement);
        tracing::trace!(statement = %statement, steps = ordered.len(), "traced proof");
        Ok(ordered)
    }
}

/// Serialized size of what a statement would contribute to a proof term.
fn payload_size(st: &Statement) -> u64 {
    let size = match &st.kind {
        StatementKind::Declaration { value } => bincode::serialized_size(value),
        StatementKind::Specialization { general, instance } => bincode::serialized_size(&(general, instance)),
        StatementKind::Assumption { .. } | StatementKind::Context(_) => bincode::serialized_size(&st.term),
    };
    size.unwrap_or(u64::MAX)
}
