//! Containment walks over the statement tree.
//!
//! The containment relation (statement → owning context) is a forest rooted
//! at root contexts. Walks use explicit stacks and visited sets: nesting
//! depth is unbounded, and a damaged store must not hang a traversal.

pub mod order;

use std::collections::{BTreeSet, HashSet};

use crate::id::StatementId;
use crate::store::StatementStore;

/// Owning contexts of `id`, nearest first, up to and including its root.
pub fn ancestors(store: &StatementStore, id: StatementId) -> Vec<StatementId> {
    let mut out = Vec::new();
    let mut seen = HashSet::from([id]);
    let mut current = store.get(id).and_then(|st| st.context_id);
    while let Some(ctx) = current {
        if !seen.insert(ctx) {
            tracing::warn!(statement = %id, context = %ctx, "containment cycle detected");
            break;
        }
        out.push(ctx);
        current = store.get(ctx).and_then(|st| st.context_id);
    }
    out
}

/// `context` followed by its ancestors.
pub fn context_path(store: &StatementStore, context: StatementId) -> Vec<StatementId> {
    let mut path = vec![context];
    path.extend(ancestors(store, context));
    path
}

/// Whether `ancestor` is a proper ancestor context of `id`.
pub fn is_descendant(store: &StatementStore, id: StatementId, ancestor: StatementId) -> bool {
    id != ancestor && ancestors(store, id).contains(&ancestor)
}

pub fn is_descendant_or_self(store: &StatementStore, id: StatementId, ancestor: StatementId) -> bool {
    id == ancestor || is_descendant(store, id, ancestor)
}

/// The root context `id` belongs to (itself when it is a root).
pub fn root_of(store: &StatementStore, id: StatementId) -> StatementId {
    ancestors(store, id).last().copied().unwrap_or(id)
}

/// Every statement below `context`, parents before children, excluding
/// `context` itself.
pub fn descendants(store: &StatementStore, context: StatementId) -> Vec<StatementId> {
    let mut out = Vec::new();
    let mut seen = HashSet::from([context]);
    let mut stack = vec![context];
    while let Some(ctx) = stack.pop() {
        // Reverse so the lowest id is expanded first.
        for child in store.local_statements_of(ctx).into_iter().rev() {
            if seen.insert(child) {
                out.push(child);
                stack.push(child);
            }
        }
    }
    out
}

/// `context` and everything below it.
pub fn subtree(store: &StatementStore, context: StatementId) -> BTreeSet<StatementId> {
    let mut set: BTreeSet<_> = descendants(store, context).into_iter().collect();
    set.insert(context);
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineConfig};
    use crate::term::Term;

    #[test]
    fn ancestry_of_nested_contexts() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let txn = engine.begin();
        let root = engine
            .create_root_context(&txn, Term::arrow(Term::atom("A"), Term::atom("B")))
            .unwrap();
        let inner = engine
            .open_sub_context(&txn, root, Term::arrow(Term::atom("C"), Term::atom("B")))
            .unwrap();
        let assumption = engine.statement(inner).unwrap().assumptions()[0];

        let store = engine.store();
        assert_eq!(ancestors(store, assumption), vec![inner, root]);
        assert!(is_descendant(store, assumption, root));
        assert!(!is_descendant(store, root, assumption));
        assert!(!is_descendant(store, inner, inner));
        assert!(is_descendant_or_self(store, inner, inner));
        assert_eq!(root_of(store, assumption), root);

        let below = descendants(store, root);
        assert!(below.contains(&inner));
        assert!(below.contains(&assumption));
        let inner_pos = below.iter().position(|&id| id == inner).unwrap();
        let assumption_pos = below.iter().position(|&id| id == assumption).unwrap();
        assert!(inner_pos < assumption_pos);
        assert_eq!(subtree(store, inner).len(), 2);
        txn.commit().unwrap();
    }
}
