//! Dependency-ordered enumeration of statement sets.
//!
//! Produces a sequence in which every statement follows its dependencies
//! that are members of the same set. Dependencies outside the set are
//! ignored. In local mode the owning contexts of a statement that are
//! members also count as predecessors, so no statement is listed before its
//! own context.
//!
//! The walk is a depth-first expansion driven by an explicit frame stack:
//! an `Expand` frame schedules a statement's `Emit` frame below the frames of
//! its predecessors. A statement reached again while still being expanded
//! closes a dependency cycle; that edge is skipped, so every member is
//! emitted exactly once.

use std::collections::HashSet;

use crate::graph::ancestors;
use crate::id::StatementId;
use crate::store::StatementStore;

enum Frame {
    Expand(StatementId),
    Emit(StatementId),
}

/// Sort `ids` so that members come after the members they depend on.
///
/// Input order breaks ties. Ids that no longer resolve are kept and treated
/// as having no dependencies.
pub fn dependency_sorted(store: &StatementStore, ids: &[StatementId], local_mode: bool) -> Vec<StatementId> {
    let members: HashSet<StatementId> = ids.iter().copied().collect();
    let mut emitted: HashSet<StatementId> = HashSet::with_capacity(ids.len());
    let mut expanding: HashSet<StatementId> = HashSet::new();
    let mut out = Vec::with_capacity(members.len());
    let mut stack = Vec::new();

    for &seed in ids {
        if emitted.contains(&seed) {
            continue;
        }
        stack.push(Frame::Expand(seed));
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Emit(id) => {
                    if emitted.insert(id) {
                        out.push(id);
                    }
                }
                Frame::Expand(id) => {
                    if emitted.contains(&id) || !expanding.insert(id) {
                        continue;
                    }
                    stack.push(Frame::Emit(id));
                    let mut preds = predecessors(store, id, &members, local_mode);
                    preds.retain(|p| !emitted.contains(p));
                    // Pushed in reverse so the first predecessor is expanded first.
                    for pred in preds.into_iter().rev() {
                        stack.push(Frame::Expand(pred));
                    }
                }
            }
        }
    }
    out
}

fn predecessors(
    store: &StatementStore,
    id: StatementId,
    members: &HashSet<StatementId>,
    local_mode: bool,
) -> Vec<StatementId> {
    let Some(st) = store.get(id) else {
        return Vec::new();
    };
    let mut preds: Vec<StatementId> = st
        .dependencies
        .iter()
        .copied()
        .filter(|dep| *dep != id && members.contains(dep))
        .collect();
    if local_mode {
        for ctx in ancestors(store, id) {
            if members.contains(&ctx) && !preds.contains(&ctx) {
                preds.push(ctx);
            }
        }
    }
    preds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineConfig};
    use crate::term::Term;

    fn position(order: &[StatementId], id: StatementId) -> usize {
        order.iter().position(|&x| x == id).unwrap()
    }

    #[test]
    fn dependencies_come_first() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let txn = engine.begin();
        let a = Term::atom("A");
        let c = Term::atom("C");
        let root = engine
            .create_root_context(&txn, Term::arrow(a.clone(), Term::arrow(Term::arrow(a.clone(), c.clone()), c.clone())))
            .unwrap();
        let assumptions = engine.statement(root).unwrap().assumptions().to_vec();
        let x = engine.statement(assumptions[0]).unwrap();
        let g = engine.statement(assumptions[1]).unwrap();
        let spec = engine.specialize(&txn, root, g.id, x.variable()).unwrap();
        let decl = engine
            .declare(&txn, root, engine.statement(spec).unwrap().variable())
            .unwrap();

        let order = dependency_sorted(engine.store(), &[decl, spec, g.id, x.id], false);
        assert_eq!(order.len(), 4);
        assert!(position(&order, spec) < position(&order, decl));
        assert!(position(&order, g.id) < position(&order, spec));
        assert!(position(&order, x.id) < position(&order, spec));
        txn.commit().unwrap();
    }

    #[test]
    fn local_mode_puts_contexts_before_their_contents() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let txn = engine.begin();
        let root = engine.create_root_context(&txn, Term::atom("B")).unwrap();
        let inner = engine
            .open_sub_context(&txn, root, Term::arrow(Term::atom("A"), Term::atom("B")))
            .unwrap();
        let assumption = engine.statement(inner).unwrap().assumptions()[0];

        let unordered = dependency_sorted(engine.store(), &[assumption, inner], false);
        assert_eq!(unordered, vec![assumption, inner]);
        let ordered = dependency_sorted(engine.store(), &[assumption, inner], true);
        assert_eq!(ordered, vec![inner, assumption]);
        txn.commit().unwrap();
    }

    #[test]
    fn unknown_ids_are_kept() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let ghost = StatementId::new(999).unwrap();
        assert_eq!(dependency_sorted(engine.store(), &[ghost, ghost], true), vec![ghost]);
    }
}
