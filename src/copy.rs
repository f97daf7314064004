//! Deep copy of statements between contexts.
//!
//! [`Engine::copy`] rebuilds a list of statements inside a target context,
//! translating every variable reference through a correspondence map from
//! original ids to copy ids. Contexts are re-created with their local
//! statements, expanded through an explicit frame stack. Assumptions are
//! never copied on their own: they resolve to the assumption at the same
//! position of the context their owner corresponds to. The top-level list
//! is copied in dependency order.
//!
//! A failure part way through leaves the statements copied so far in the
//! transaction; abort it to discard them.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::engine::Engine;
use crate::error::{ProofResult, StructureError};
use crate::graph::is_descendant_or_self;
use crate::graph::order::dependency_sorted;
use crate::id::StatementId;
use crate::statement::{ContextKind, StatementKind};
use crate::term::Term;
use crate::transaction::Transaction;

/// One level of the copy worklist: originals still to copy into `target`.
struct Frame {
    target: StatementId,
    pending: VecDeque<StatementId>,
    /// Original context whose contents this frame expands.
    expanding: Option<StatementId>,
}

impl Engine {
    /// Copy `statements` into `target`, returning the copies in input order.
    ///
    /// `correspondence` maps originals to copies; entries already present
    /// are reused, and every copy made is added. Names are copied into the
    /// target scope unless the original is in `exclude_from_identify` or the
    /// name is taken there.
    pub fn copy(
        &self,
        txn: &Transaction,
        target: StatementId,
        statements: &[StatementId],
        correspondence: &mut HashMap<StatementId, StatementId>,
        exclude_from_identify: &HashSet<StatementId>,
    ) -> ProofResult<Vec<StatementId>> {
        txn.ensure_open()?;
        self.require_context(target)?;

        let mut expanding: HashSet<StatementId> = HashSet::new();
        let mut stack = vec![Frame {
            target,
            pending: dependency_sorted(self.store(), statements, false).into(),
            expanding: None,
        }];
        let mut created = 0usize;

        while let Some(frame) = stack.last_mut() {
            let Some(original) = frame.pending.pop_front() else {
                if let Some(done) = frame.expanding {
                    expanding.remove(&done);
                }
                stack.pop();
                continue;
            };
            let into = frame.target;

            if let Some(copy) = self.counterpart(original, correspondence) {
                correspondence.insert(original, copy);
                continue;
            }

            let st = self.require(original)?;
            let copy = match &st.kind {
                StatementKind::Assumption { .. } => {
                    return Err(StructureError::MissingCounterpart { id: original.get() }.into());
                }
                StatementKind::Declaration { value } => {
                    let value = self.translate(value, correspondence);
                    let id = self.store().allocate()?;
                    self.insert_declaration(txn, into, value, id)?
                }
                StatementKind::Specialization { general, instance } => {
                    let general = self.counterpart(*general, correspondence).unwrap_or(*general);
                    let instance = self.translate(instance, correspondence);
                    let id = self.store().allocate()?;
                    self.insert_specialization(txn, into, general, instance, id)?
                }
                StatementKind::Context(data) => {
                    if expanding.contains(&original) || is_descendant_or_self(self.store(), into, original) {
                        return Err(StructureError::CopyCycle { id: original.get() }.into());
                    }
                    let term = self.translate(&st.term, correspondence);
                    let kind = match data.kind {
                        ContextKind::Unfolding { declaration } => ContextKind::Unfolding {
                            declaration: self.counterpart(declaration, correspondence).unwrap_or(declaration),
                        },
                        ContextKind::Nested | ContextKind::Root => ContextKind::Nested,
                    };
                    self.validate_term(Some(into), &term)?;
                    let id = self.store().allocate()?;
                    self.insert_context(txn, Some(into), term, kind, id, None)?;

                    let copied = self.require(id)?;
                    for (from, to) in data.assumptions.iter().zip(copied.assumptions()) {
                        correspondence.insert(*from, *to);
                        self.copy_identifier(txn, *from, *to, exclude_from_identify);
                    }
                    let contents: VecDeque<StatementId> = self
                        .local_statements(original)?
                        .into_iter()
                        .filter(|id| !data.assumptions.contains(id))
                        .collect();
                    correspondence.insert(original, id);
                    self.copy_identifier(txn, original, id, exclude_from_identify);
                    created += 1;
                    expanding.insert(original);
                    stack.push(Frame {
                        target: id,
                        pending: contents,
                        expanding: Some(original),
                    });
                    continue;
                }
            };

            correspondence.insert(original, copy);
            self.copy_identifier(txn, original, copy, exclude_from_identify);
            created += 1;
        }

        let mut copies = Vec::with_capacity(statements.len());
        for &original in statements {
            let copy = correspondence
                .get(&original)
                .copied()
                .ok_or(StructureError::MissingCounterpart { id: original.get() })?;
            copies.push(copy);
        }

        tracing::debug!(
            target_context = %target,
            requested = statements.len(),
            created,
            "copied statements"
        );
        Ok(copies)
    }

    /// The copy of `original`: its mapped entry, or for an assumption the
    /// assumption at the same position of the context its owner maps to.
    fn counterpart(
        &self,
        original: StatementId,
        correspondence: &HashMap<StatementId, StatementId>,
    ) -> Option<StatementId> {
        if let Some(&copy) = correspondence.get(&original) {
            return Some(copy);
        }
        let st = self.store().get(original)?;
        let StatementKind::Assumption { order } = st.kind else {
            return None;
        };
        let owner = correspondence.get(&st.context_id?)?;
        self.store().get(*owner)?.assumptions().get(order).copied()
    }

    /// Rewrite the variables of `term` that have a copy.
    fn translate(&self, term: &Term, correspondence: &HashMap<StatementId, StatementId>) -> Term {
        let substitution: HashMap<StatementId, Term> = term
            .free_variables()
            .into_iter()
            .filter_map(|original| {
                let copy = self.counterpart(original, correspondence)?;
                self.store().get(copy).map(|st| (original, st.variable()))
            })
            .collect();
        if substitution.is_empty() {
            term.clone()
        } else {
            term.replace_vars(&substitution)
        }
    }

    fn copy_identifier(
        &self,
        txn: &Transaction,
        original: StatementId,
        copy: StatementId,
        exclude: &HashSet<StatementId>,
    ) {
        if exclude.contains(&original) {
            return;
        }
        let Some(name) = self.store().get(original).and_then(|st| st.identifier) else {
            return;
        };
        let Some(mut st) = self.store().get(copy) else {
            return;
        };
        if self.store().lookup_name(st.context_id, &name).is_some() {
            tracing::debug!(statement = %copy, identifier = %name, "name taken in target, copy left unnamed");
            return;
        }
        st.identifier = Some(name);
        self.store().put(txn, st);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::error::ProofError;
    use crate::identifier::Identifier;
    use crate::statement::Statement;

    fn a() -> Term {
        Term::atom("A")
    }

    fn b() -> Term {
        Term::atom("B")
    }

    /// Root `(f: A -> B) -> (x: A) -> B` with two empty sibling contexts.
    fn fixture(engine: &Engine, txn: &Transaction) -> (StatementId, StatementId, StatementId, Statement, Statement) {
        let root = engine
            .create_root_context(txn, Term::arrow(Term::arrow(a(), b()), Term::arrow(a(), b())))
            .unwrap();
        let assumptions = engine.statement(root).unwrap().assumptions().to_vec();
        let f = engine.statement(assumptions[0]).unwrap();
        let x = engine.statement(assumptions[1]).unwrap();
        let left = engine.open_sub_context(txn, root, a()).unwrap();
        let right = engine.open_sub_context(txn, root, a()).unwrap();
        (root, left, right, f, x)
    }

    #[test]
    fn copy_chain_resolves_to_copies() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let txn = engine.begin();
        let (_, left, right, f, x) = fixture(&engine, &txn);

        let decl = engine.declare(&txn, left, f.variable()).unwrap();
        let decl_var = engine.statement(decl).unwrap().variable();
        let spec = engine.specialize(&txn, left, decl, x.variable()).unwrap();
        let spec_var = engine.statement(spec).unwrap().variable();
        let nested = engine
            .open_sub_context(&txn, left, Term::arrow(Term::apply(decl_var, spec_var), b()))
            .unwrap();
        engine
            .identify(&txn, decl, Identifier::new("g").unwrap(), false)
            .unwrap();

        let mut map = HashMap::new();
        let copies = engine
            .copy(&txn, right, &[decl, spec, nested], &mut map, &HashSet::new())
            .unwrap();
        assert_eq!(copies.len(), 3);
        let originals: std::collections::BTreeSet<StatementId> = [decl, spec, nested].into_iter().collect();
        for copy in &copies {
            let st = engine.statement(*copy).unwrap();
            assert_eq!(st.context_id, Some(right));
            assert!(st.dependencies.is_disjoint(&originals));
        }
        assert_eq!(engine.statement(copies[1]).unwrap().term, b());
        assert!(engine.statement(copies[1]).unwrap().proved);
        assert_eq!(engine.lookup(right, &Identifier::new("g").unwrap()), Some(copies[0]));
        assert_eq!(map[&decl], copies[0]);
        txn.commit().unwrap();
    }

    #[test]
    fn nested_contents_and_assumptions_are_mapped() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let txn = engine.begin();
        let (_, left, right, f, _) = fixture(&engine, &txn);

        let inner = engine.open_sub_context(&txn, left, Term::arrow(a(), b())).unwrap();
        let hypothesis = engine.statement(inner).unwrap().assumptions()[0];
        let hyp_var = engine.statement(hypothesis).unwrap().variable();
        let step = engine.specialize(&txn, inner, f.id, hyp_var).unwrap();
        assert!(engine.statement(inner).unwrap().proved);

        let mut map = HashMap::new();
        let copies = engine
            .copy(&txn, right, &[inner], &mut map, &HashSet::new())
            .unwrap();
        let copied = engine.statement(copies[0]).unwrap();
        assert_eq!(map[&hypothesis], copied.assumptions()[0]);
        let copied_step = engine.statement(map[&step]).unwrap();
        assert_eq!(copied_step.context_id, Some(copied.id));
        assert!(copied_step.dependencies.contains(&copied.assumptions()[0]));
        assert!(copied.proved);
    }

    #[test]
    fn copied_terms_translate_back_to_originals() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let txn = engine.begin();
        let (_, left, right, f, x) = fixture(&engine, &txn);
        let decl = engine.declare(&txn, left, Term::apply(f.variable(), x.variable())).unwrap();
        let spec_src = engine.declare(&txn, left, f.variable()).unwrap();
        let spec = engine.specialize(&txn, left, spec_src, x.variable()).unwrap();

        let mut map = HashMap::new();
        engine
            .copy(&txn, right, &[decl, spec_src, spec], &mut map, &HashSet::new())
            .unwrap();
        let back: HashMap<StatementId, Term> = map
            .iter()
            .filter_map(|(orig, copy)| engine.statement(*orig).map(|st| (*copy, st.variable())))
            .collect();
        for (orig, copy) in &map {
            let original = engine.statement(*orig).unwrap();
            let copied = engine.statement(*copy).unwrap();
            assert_eq!(copied.term.replace_vars(&back), original.term);
            if let (StatementKind::Declaration { value: copied }, StatementKind::Declaration { value: original }) =
                (&copied.kind, &original.kind)
            {
                assert_eq!(copied.replace_vars(&back), *original);
            }
        }
    }

    #[test]
    fn copying_into_own_subtree_is_a_cycle() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let txn = engine.begin();
        let (_, left, _, _, _) = fixture(&engine, &txn);
        let inner = engine.open_sub_context(&txn, left, a()).unwrap();
        assert!(matches!(
            engine.copy(&txn, inner, &[left], &mut HashMap::new(), &HashSet::new()),
            Err(ProofError::Structure(StructureError::CopyCycle { .. }))
        ));
    }

    #[test]
    fn lone_assumption_has_no_counterpart() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let txn = engine.begin();
        let (_, _, right, f, _) = fixture(&engine, &txn);
        assert!(matches!(
            engine.copy(&txn, right, &[f.id], &mut HashMap::new(), &HashSet::new()),
            Err(ProofError::Structure(StructureError::MissingCounterpart { .. }))
        ));
    }

    #[test]
    fn excluded_and_taken_names_are_skipped() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let txn = engine.begin();
        let (_, left, right, f, _) = fixture(&engine, &txn);
        let first = engine.declare(&txn, left, f.variable()).unwrap();
        let second = engine.declare(&txn, left, f.variable()).unwrap();
        let taken = engine.declare(&txn, right, f.variable()).unwrap();
        engine.identify(&txn, first, Identifier::new("p").unwrap(), false).unwrap();
        engine.identify(&txn, second, Identifier::new("q").unwrap(), false).unwrap();
        engine.identify(&txn, taken, Identifier::new("q").unwrap(), false).unwrap();

        let exclude = HashSet::from([first]);
        let copies = engine
            .copy(&txn, right, &[first, second], &mut HashMap::new(), &exclude)
            .unwrap();
        assert!(engine.statement(copies[0]).unwrap().identifier.is_none());
        assert!(engine.statement(copies[1]).unwrap().identifier.is_none());
        assert_eq!(engine.lookup(right, &Identifier::new("q").unwrap()), Some(taken));
    }

    #[test]
    fn mapped_originals_are_reused() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let txn = engine.begin();
        let (_, left, right, f, _) = fixture(&engine, &txn);
        let decl = engine.declare(&txn, left, f.variable()).unwrap();
        let mut map = HashMap::new();
        let once = engine.copy(&txn, right, &[decl], &mut map, &HashSet::new()).unwrap();
        let twice = engine.copy(&txn, right, &[decl], &mut map, &HashSet::new()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(engine.local_statements(right).unwrap().len(), 1);
    }

    #[test]
    fn assumptions_resolve_through_a_mapped_context() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let txn = engine.begin();
        let (root, _, _, _, _) = fixture(&engine, &txn);
        let source = engine.open_sub_context(&txn, root, Term::arrow(a(), b())).unwrap();
        let destination = engine.open_sub_context(&txn, root, Term::arrow(a(), b())).unwrap();
        let hypothesis = engine.statement(source).unwrap().assumptions()[0];
        let counterpart = engine.statement(destination).unwrap().assumptions()[0];
        let decl = engine
            .declare(&txn, source, engine.statement(hypothesis).unwrap().variable())
            .unwrap();

        let mut map = HashMap::from([(source, destination)]);
        let copies = engine
            .copy(&txn, destination, &[decl], &mut map, &HashSet::new())
            .unwrap();
        let copied = engine.statement(copies[0]).unwrap();
        assert_eq!(copied.term, a());
        assert!(copied.dependencies.contains(&counterpart));
        assert!(!copied.dependencies.contains(&hypothesis));

        let resolved = engine
            .copy(&txn, destination, &[hypothesis], &mut map, &HashSet::new())
            .unwrap();
        assert_eq!(resolved, vec![counterpart]);
        assert_eq!(engine.local_statements(destination).unwrap().len(), 2);
    }

    #[test]
    fn reversed_input_is_copied_in_dependency_order() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let txn = engine.begin();
        let (_, left, right, f, x) = fixture(&engine, &txn);
        let decl = engine.declare(&txn, left, f.variable()).unwrap();
        let spec = engine.specialize(&txn, left, decl, x.variable()).unwrap();

        let mut map = HashMap::new();
        let copies = engine
            .copy(&txn, right, &[spec, decl], &mut map, &HashSet::new())
            .unwrap();
        assert_eq!(copies, vec![map[&spec], map[&decl]]);
        let copied_spec = engine.statement(copies[0]).unwrap();
        assert!(matches!(
            copied_spec.kind,
            StatementKind::Specialization { general, .. } if general == copies[1]
        ));
        assert!(!copied_spec.dependencies.contains(&decl));
        assert!(copied_spec.proved);
    }
}
