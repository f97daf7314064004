//! Secondary indexes over the statement table.
//!
//! Every index is derived from statement records alone, so it can be rebuilt
//! from scratch on restore and is kept current by [`StatementIndex::insert`] /
//! [`StatementIndex::remove`] around every record write.

use std::collections::BTreeSet;

use dashmap::DashMap;

use crate::id::StatementId;
use crate::identifier::Identifier;
use crate::statement::{Statement, StatementKind};
use crate::term::Term;

/// Naming scope key: the owning context, or `None` for the scope shared by
/// root contexts.
pub type Scope = Option<StatementId>;

/// Concurrent secondary indexes.
#[derive(Debug, Default)]
pub struct StatementIndex {
    /// Context → statements it directly owns (assumptions included).
    local: DashMap<StatementId, BTreeSet<StatementId>>,
    /// Statement → statements listing it as a dependency.
    dependents: DashMap<StatementId, BTreeSet<StatementId>>,
    /// (context, term) → local statements asserting that term.
    by_term: DashMap<(StatementId, Term), BTreeSet<StatementId>>,
    /// Consequent → contexts with that consequent.
    by_consequent: DashMap<Term, BTreeSet<StatementId>>,
    /// General statement → specializations of it.
    by_general: DashMap<StatementId, BTreeSet<StatementId>>,
    /// (scope, identifier) → statement.
    names: DashMap<(Scope, Identifier), StatementId>,
    /// Root contexts.
    roots: DashMap<StatementId, ()>,
}

fn add<K: std::hash::Hash + Eq>(map: &DashMap<K, BTreeSet<StatementId>>, key: K, id: StatementId) {
    map.entry(key).or_default().insert(id);
}

fn drop_from<K: std::hash::Hash + Eq>(
    map: &DashMap<K, BTreeSet<StatementId>>,
    key: &K,
    id: StatementId,
) {
    let now_empty = match map.get_mut(key) {
        Some(mut set) => {
            set.remove(&id);
            set.is_empty()
        }
        None => false,
    };
    if now_empty {
        map.remove_if(key, |_, set| set.is_empty());
    }
}

fn snapshot<K: std::hash::Hash + Eq>(
    map: &DashMap<K, BTreeSet<StatementId>>,
    key: &K,
) -> Vec<StatementId> {
    map.get(key)
        .map(|set| set.iter().copied().collect())
        .unwrap_or_default()
}

impl StatementIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a record that has just been written.
    pub fn insert(&self, st: &Statement) {
        match st.context_id {
            Some(ctx) => {
                add(&self.local, ctx, st.id);
                add(&self.by_term, (ctx, st.term.clone()), st.id);
            }
            None => {
                self.roots.insert(st.id, ());
            }
        }
        for &dep in &st.dependencies {
            add(&self.dependents, dep, st.id);
        }
        match &st.kind {
            StatementKind::Context(data) => {
                add(&self.by_consequent, data.consequent.clone(), st.id);
            }
            StatementKind::Specialization { general, .. } => {
                add(&self.by_general, *general, st.id);
            }
            StatementKind::Assumption { .. } | StatementKind::Declaration { .. } => {}
        }
        if let Some(name) = &st.identifier {
            self.names.insert((st.context_id, name.clone()), st.id);
        }
    }

    /// Remove a record's entries before it is overwritten or deleted.
    pub fn remove(&self, st: &Statement) {
        match st.context_id {
            Some(ctx) => {
                drop_from(&self.local, &ctx, st.id);
                drop_from(&self.by_term, &(ctx, st.term.clone()), st.id);
            }
            None => {
                self.roots.remove(&st.id);
            }
        }
        for dep in &st.dependencies {
            drop_from(&self.dependents, dep, st.id);
        }
        match &st.kind {
            StatementKind::Context(data) => drop_from(&self.by_consequent, &data.consequent, st.id),
            StatementKind::Specialization { general, .. } => {
                drop_from(&self.by_general, general, st.id)
            }
            StatementKind::Assumption { .. } | StatementKind::Declaration { .. } => {}
        }
        if let Some(name) = &st.identifier {
            self.names
                .remove_if(&(st.context_id, name.clone()), |_, owner| *owner == st.id);
        }
    }

    pub fn local_statements_of(&self, context: StatementId) -> Vec<StatementId> {
        snapshot(&self.local, &context)
    }

    pub fn dependents_of(&self, id: StatementId) -> Vec<StatementId> {
        snapshot(&self.dependents, &id)
    }

    pub fn local_by_term(&self, context: StatementId, term: &Term) -> Vec<StatementId> {
        snapshot(&self.by_term, &(context, term.clone()))
    }

    pub fn contexts_by_consequent(&self, consequent: &Term) -> Vec<StatementId> {
        snapshot(&self.by_consequent, consequent)
    }

    pub fn specializations_by_general(&self, general: StatementId) -> Vec<StatementId> {
        snapshot(&self.by_general, &general)
    }

    pub fn lookup_name(&self, scope: Scope, name: &Identifier) -> Option<StatementId> {
        self.names.get(&(scope, name.clone())).map(|r| *r.value())
    }

    /// All `(identifier, statement)` pairs of one naming scope, sorted.
    pub fn names_in(&self, scope: Scope) -> Vec<(Identifier, StatementId)> {
        let mut out: Vec<_> = self
            .names
            .iter()
            .filter(|entry| entry.key().0 == scope)
            .map(|entry| (entry.key().1.clone(), *entry.value()))
            .collect();
        out.sort();
        out
    }

    pub fn roots(&self) -> Vec<StatementId> {
        let mut out: Vec<_> = self.roots.iter().map(|entry| *entry.key()).collect();
        out.sort();
        out
    }

    pub fn clear(&self) {
        self.local.clear();
        self.dependents.clear();
        self.by_term.clear();
        self.by_consequent.clear();
        self.by_general.clear();
        self.names.clear();
        self.roots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{ContextData, ContextKind};

    fn sid(raw: u64) -> StatementId {
        StatementId::new(raw).unwrap()
    }

    fn declaration(id: u64, ctx: u64, deps: &[u64]) -> Statement {
        Statement {
            id: sid(id),
            context_id: Some(sid(ctx)),
            term: Term::atom("A"),
            proved: false,
            dependencies: deps.iter().map(|&d| sid(d)).collect(),
            identifier: None,
            kind: StatementKind::Declaration {
                value: Term::atom("a"),
            },
        }
    }

    #[test]
    fn insert_and_remove_keep_indexes_symmetric() {
        let index = StatementIndex::new();
        let st = declaration(5, 1, &[2, 3]);
        index.insert(&st);

        assert_eq!(index.local_statements_of(sid(1)), vec![sid(5)]);
        assert_eq!(index.dependents_of(sid(2)), vec![sid(5)]);
        assert_eq!(index.local_by_term(sid(1), &Term::atom("A")), vec![sid(5)]);

        index.remove(&st);
        assert!(index.local_statements_of(sid(1)).is_empty());
        assert!(index.dependents_of(sid(3)).is_empty());
        assert!(index.local_by_term(sid(1), &Term::atom("A")).is_empty());
    }

    #[test]
    fn roots_and_consequents() {
        let index = StatementIndex::new();
        let root = Statement {
            id: sid(1),
            context_id: None,
            term: Term::arrow(Term::atom("A"), Term::atom("B")),
            proved: false,
            dependencies: Default::default(),
            identifier: Some(Identifier::new("main").unwrap()),
            kind: StatementKind::Context(ContextData {
                kind: ContextKind::Root,
                assumptions: vec![sid(2)],
                consequent: Term::atom("B"),
            }),
        };
        index.insert(&root);
        assert_eq!(index.roots(), vec![sid(1)]);
        assert_eq!(index.contexts_by_consequent(&Term::atom("B")), vec![sid(1)]);
        assert_eq!(
            index.lookup_name(None, &Identifier::new("main").unwrap()),
            Some(sid(1))
        );

        index.remove(&root);
        assert!(index.roots().is_empty());
        assert!(index.names_in(None).is_empty());
    }
}
