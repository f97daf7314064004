//! Contexts: factory operations, scoping and solver search.
//!
//! Statements are only ever created through a context. Each factory
//! validates the new term against the context's scope, writes the record,
//! notifies listeners and runs propagation.
//!
//! A statement is visible from context `C` when its owning context is `C` or
//! an ancestor of `C`. [`ContextScope`] exposes that ancestor-inclusive view
//! as a chain of per-context lookups rather than a flattened copy, so it
//! always reflects the current store.

use std::collections::BTreeSet;

use crate::engine::Engine;
use crate::error::{EngineError, ProofResult, StructureError};
use crate::graph::{context_path, is_descendant_or_self, subtree};
use crate::id::StatementId;
use crate::identifier::Identifier;
use crate::statement::{ContextData, ContextKind, Statement, StatementKind};
use crate::term::Term;
use crate::transaction::Transaction;

/// Live, ancestor-inclusive view of the statements visible from a context.
#[derive(Debug, Clone, Copy)]
pub struct ContextScope<'e> {
    engine: &'e Engine,
    context: StatementId,
}

impl<'e> ContextScope<'e> {
    pub fn context(&self) -> StatementId {
        self.context
    }

    /// The enclosing context's scope, `None` at a root.
    pub fn parent(&self) -> Option<ContextScope<'e>> {
        self.engine
            .store()
            .get(self.context)
            .and_then(|st| st.context_id)
            .map(|parent| ContextScope {
                engine: self.engine,
                context: parent,
            })
    }

    /// Statements owned directly by this context.
    pub fn local(&self) -> Vec<StatementId> {
        self.engine.store().local_statements_of(self.context)
    }

    /// Every visible statement, this context's first, then each ancestor's.
    pub fn statements(&self) -> Vec<StatementId> {
        let mut out = Vec::new();
        let mut link = Some(*self);
        while let Some(scope) = link {
            out.extend(scope.local());
            link = scope.parent();
        }
        out
    }

    /// Visible statements whose term equals `term`, nearest context first.
    pub fn statements_by_term(&self, term: &Term) -> Vec<StatementId> {
        let store = self.engine.store();
        context_path(store, self.context)
            .into_iter()
            .flat_map(|ctx| store.local_by_term(ctx, term))
            .collect()
    }

    pub fn contains(&self, id: StatementId) -> bool {
        self.engine.is_visible(id, self.context)
    }

    /// Resolve an identifier, innermost scope first.
    pub fn lookup(&self, name: &Identifier) -> Option<StatementId> {
        self.engine.lookup(self.context, name)
    }
}

impl Engine {
    /// Whether `id` may be referenced from inside `context`.
    pub(crate) fn is_visible(&self, id: StatementId, context: StatementId) -> bool {
        match self.store().get(id).and_then(|st| st.context_id) {
            Some(owner) => is_descendant_or_self(self.store(), context, owner),
            None => false,
        }
    }

    /// The ancestor-inclusive scope of `context`.
    pub fn scope(&self, context: StatementId) -> ProofResult<ContextScope<'_>> {
        self.require_context(context)?;
        Ok(ContextScope {
            engine: self,
            context,
        })
    }

    /// Local statements of `context` in dependency order, contexts before
    /// their contents.
    pub fn local_statements(&self, context: StatementId) -> ProofResult<Vec<StatementId>> {
        self.require_context(context)?;
        let ids = self.store().local_statements_of(context);
        Ok(crate::graph::order::dependency_sorted(self.store(), &ids, true))
    }

    /// Visible statements (local or in an ancestor) whose term equals the
    /// context's consequent, nearest context first. Never the context itself.
    pub fn solvers(&self, context: StatementId) -> ProofResult<Vec<StatementId>> {
        let st = self.require_context(context)?;
        let consequent = st.consequent().cloned().unwrap_or(Term::Tau);
        Ok(self.solver_candidates(context, &consequent))
    }

    pub(crate) fn solver_candidates(&self, context: StatementId, consequent: &Term) -> Vec<StatementId> {
        let store = self.store();
        context_path(store, context)
            .into_iter()
            .flat_map(|ctx| store.local_by_term(ctx, consequent))
            .filter(|&id| id != context)
            .collect()
    }

    /// Whether nothing `statement` (or, for a context, its sub-tree) depends
    /// on is local to `context`; such a statement could move to an ancestor.
    pub fn independent(&self, context: StatementId, statement: StatementId) -> ProofResult<bool> {
        self.require_context(context)?;
        let st = self.require(statement)?;
        let store = self.store();
        let members: BTreeSet<StatementId> = if st.is_context() {
            subtree(store, statement)
        } else {
            BTreeSet::from([statement])
        };
        for &member in &members {
            let Some(m) = store.get(member) else { continue };
            for dep in &m.dependencies {
                if members.contains(dep) {
                    continue;
                }
                if store.get(*dep).and_then(|d| d.context_id) == Some(context) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    // -- validation -------------------------------------------------------

    /// Check that `term` is cast-free and every variable in it is visible
    /// from `context` and typed by its statement's term. Root contexts
    /// (`context == None`) accept closed terms only.
    pub(crate) fn validate_term(&self, context: Option<StatementId>, term: &Term) -> ProofResult<()> {
        if !term.cast_free() {
            return Err(StructureError::NotCastFree {
                term: term.to_string(),
            }
            .into());
        }
        let mut failure: Option<StructureError> = None;
        term.for_each_var(&mut |id, ty| {
            if failure.is_some() {
                return;
            }
            let unbound = || StructureError::UnboundVariable {
                variable: id.get(),
                context: context.map_or_else(|| "root".to_string(), |c| c.to_string()),
            };
            let Some(st) = self.store().get(id) else {
                failure = Some(unbound());
                return;
            };
            let visible = match context {
                Some(ctx) => self.is_visible(id, ctx),
                None => false,
            };
            if !visible {
                failure = Some(unbound());
            } else if *ty != st.term {
                failure = Some(StructureError::VariableTypeMismatch { variable: id.get() });
            }
        });
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    // -- factories --------------------------------------------------------

    /// Create the root context of a new proof. `term` must be closed.
    pub fn create_root_context(&self, txn: &Transaction, term: Term) -> ProofResult<StatementId> {
        txn.ensure_open()?;
        self.validate_term(None, &term)?;
        let id = self.store().allocate()?;
        self.insert_context(txn, None, term, ContextKind::Root, id, None)
    }

    /// Declare `value` in `context`; the declaration's term is the value's type.
    pub fn declare(&self, txn: &Transaction, context: StatementId, value: Term) -> ProofResult<StatementId> {
        txn.ensure_open()?;
        self.require_context(context)?;
        let id = self.store().allocate()?;
        self.insert_declaration(txn, context, value, id)
    }

    /// Compose the visible statement `general` with `instance`.
    pub fn specialize(
        &self,
        txn: &Transaction,
        context: StatementId,
        general: StatementId,
        instance: Term,
    ) -> ProofResult<StatementId> {
        txn.ensure_open()?;
        self.require_context(context)?;
        let id = self.store().allocate()?;
        self.insert_specialization(txn, context, general, instance, id)
    }

    /// Open a nested context whose assumptions and consequent come from `term`.
    pub fn open_sub_context(&self, txn: &Transaction, context: StatementId, term: Term) -> ProofResult<StatementId> {
        txn.ensure_open()?;
        self.require_context(context)?;
        self.validate_term(Some(context), &term)?;
        let id = self.store().allocate()?;
        self.insert_context(txn, Some(context), term, ContextKind::Nested, id, None)
    }

    /// Open a nested context that reads `term` with `declaration` unfolded to
    /// its value.
    pub fn open_unfolding_sub_context(
        &self,
        txn: &Transaction,
        context: StatementId,
        term: Term,
        declaration: StatementId,
    ) -> ProofResult<StatementId> {
        txn.ensure_open()?;
        self.require_context(context)?;
        self.validate_term(Some(context), &term)?;
        let id = self.store().allocate()?;
        self.insert_context(
            txn,
            Some(context),
            term,
            ContextKind::Unfolding { declaration },
            id,
            None,
        )
    }

    pub(crate) fn insert_declaration(
        &self,
        txn: &Transaction,
        context: StatementId,
        value: Term,
        id: StatementId,
    ) -> ProofResult<StatementId> {
        self.validate_term(Some(context), &value)?;
        let term = value
            .type_of()
            .map_err(|source| StructureError::UntypedDeclaration {
                value: value.to_string(),
                source,
            })?;
        let mut dependencies = term.free_variables();
        dependencies.extend(value.free_variables());

        let st = Statement {
            id,
            context_id: Some(context),
            term,
            proved: false,
            dependencies,
            identifier: None,
            kind: StatementKind::Declaration { value },
        };
        self.admit(txn, st);
        Ok(id)
    }

    pub(crate) fn insert_specialization(
        &self,
        txn: &Transaction,
        context: StatementId,
        general: StatementId,
        instance: Term,
        id: StatementId,
    ) -> ProofResult<StatementId> {
        let general_st = self.require(general)?;
        if !self.is_visible(general, context) {
            return Err(StructureError::UnboundVariable {
                variable: general.get(),
                context: context.to_string(),
            }
            .into());
        }
        self.validate_term(Some(context), &instance)?;
        let term = general_st.term.compose(&instance)?;

        let mut dependencies = term.free_variables();
        dependencies.insert(general);
        dependencies.extend(instance.free_variables());

        let st = Statement {
            id,
            context_id: Some(context),
            term,
            proved: false,
            dependencies,
            identifier: None,
            kind: StatementKind::Specialization { general, instance },
        };
        self.admit(txn, st);
        Ok(id)
    }

    /// Build a context and its assumptions. `assumption_ids` pins the ids of
    /// the assumptions (undelete); otherwise fresh ids are allocated.
    pub(crate) fn insert_context(
        &self,
        txn: &Transaction,
        owner: Option<StatementId>,
        term: Term,
        kind: ContextKind,
        id: StatementId,
        assumption_ids: Option<&[StatementId]>,
    ) -> ProofResult<StatementId> {
        let mut dependencies = term.free_variables();
        let inner = match kind {
            ContextKind::Unfolding { declaration } => {
                let decl = self.require(declaration)?;
                let StatementKind::Declaration { value } = &decl.kind else {
                    return Err(StructureError::NotADeclaration {
                        id: declaration.get(),
                    }
                    .into());
                };
                let visible = owner.is_some_and(|ctx| self.is_visible(declaration, ctx));
                if !visible {
                    return Err(StructureError::UnboundVariable {
                        variable: declaration.get(),
                        context: owner.map_or_else(|| "root".to_string(), |c| c.to_string()),
                    }
                    .into());
                }
                dependencies.insert(declaration);
                term.replace_var(declaration, value)
            }
            ContextKind::Nested | ContextKind::Root => term.clone(),
        };

        let mut assumptions: Vec<(StatementId, Term)> = Vec::new();
        let mut current = inner.unproject();
        let consequent = loop {
            match current {
                Term::Function {
                    param,
                    param_ty,
                    body,
                } => {
                    let order = assumptions.len();
                    let aid = match assumption_ids {
                        Some(ids) => ids.get(order).copied().ok_or_else(|| EngineError::Inconsistent {
                            message: format!("context {id} lost assumption {order} on restore"),
                        })?,
                        None => self.store().allocate()?,
                    };
                    let param_ty = *param_ty;
                    current = body.replace_param(param, &Term::variable(aid, param_ty.clone()));
                    assumptions.push((aid, param_ty));
                }
                other => break other,
            }
        };

        let context_st = Statement {
            id,
            context_id: owner,
            term,
            proved: false,
            dependencies,
            identifier: None,
            kind: StatementKind::Context(ContextData {
                kind,
                assumptions: assumptions.iter().map(|(aid, _)| *aid).collect(),
                consequent,
            }),
        };
        self.store().put(txn, context_st.clone());
        self.listeners().statement_added(txn, &context_st);

        let mut assumption_ids = Vec::with_capacity(assumptions.len());
        for (order, (aid, ty)) in assumptions.into_iter().enumerate() {
            let st = Statement {
                id: aid,
                context_id: Some(id),
                dependencies: ty.free_variables(),
                term: ty,
                proved: false,
                identifier: None,
                kind: StatementKind::Assumption { order },
            };
            self.store().put(txn, st.clone());
            self.listeners().statement_added(txn, &st);
            assumption_ids.push(aid);
        }

        self.propagate(txn, assumption_ids, false);
        self.propagate(txn, [id], true);
        Ok(id)
    }

    /// Write a new non-context statement, notify and propagate.
    fn admit(&self, txn: &Transaction, st: Statement) {
        let id = st.id;
        self.store().put(txn, st.clone());
        self.listeners().statement_added(txn, &st);
        self.propagate(txn, [id], true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::error::{ProofError, TermError};

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    fn a() -> Term {
        Term::atom("A")
    }

    fn b() -> Term {
        Term::atom("B")
    }

    #[test]
    fn root_context_splits_assumptions() {
        let engine = engine();
        let txn = engine.begin();
        let root = engine
            .create_root_context(&txn, Term::arrow(a(), Term::arrow(b(), b())))
            .unwrap();
        let st = engine.statement(root).unwrap();
        assert!(st.is_root());
        assert_eq!(st.consequent(), Some(&b()));
        let assumptions = st.assumptions().to_vec();
        assert_eq!(assumptions.len(), 2);
        for (order, id) in assumptions.iter().enumerate() {
            let assumption = engine.statement(*id).unwrap();
            assert_eq!(assumption.kind, StatementKind::Assumption { order });
            assert_eq!(assumption.context_id, Some(root));
        }
        assert_eq!(engine.solvers(root).unwrap(), vec![assumptions[1]]);
        assert!(st.proved);
        txn.commit().unwrap();
    }

    #[test]
    fn dependent_assumptions_reference_earlier_ones() {
        let engine = engine();
        let txn = engine.begin();
        // (x : Tau) -> x -> x
        let term = Term::function(Term::Tau, |x| Term::arrow(x.clone(), x));
        let root = engine.create_root_context(&txn, term).unwrap();
        let st = engine.statement(root).unwrap();
        let [x, hx] = st.assumptions() else {
            panic!("expected two assumptions");
        };
        let x_st = engine.statement(*x).unwrap();
        let hx_st = engine.statement(*hx).unwrap();
        assert_eq!(hx_st.term, x_st.variable());
        assert!(hx_st.dependencies.contains(x));
        assert_eq!(st.consequent(), Some(&x_st.variable()));
        assert!(st.proved);
        txn.commit().unwrap();
    }

    #[test]
    fn root_term_must_be_closed() {
        let engine = engine();
        let txn = engine.begin();
        let root = engine.create_root_context(&txn, Term::arrow(a(), a())).unwrap();
        let assumption = engine.statement(root).unwrap().assumptions()[0];
        let var = engine.statement(assumption).unwrap().variable();
        assert!(matches!(
            engine.create_root_context(&txn, var),
            Err(ProofError::Structure(StructureError::UnboundVariable { .. }))
        ));
    }

    #[test]
    fn variables_must_be_visible() {
        let engine = engine();
        let txn = engine.begin();
        let root = engine.create_root_context(&txn, b()).unwrap();
        let left = engine.open_sub_context(&txn, root, Term::arrow(a(), b())).unwrap();
        let right = engine.open_sub_context(&txn, root, b()).unwrap();
        let hidden = engine.statement(left).unwrap().assumptions()[0];
        let var = engine.statement(hidden).unwrap().variable();

        assert!(matches!(
            engine.declare(&txn, right, var.clone()),
            Err(ProofError::Structure(StructureError::UnboundVariable { .. }))
        ));
        engine.declare(&txn, left, var).unwrap();
    }

    #[test]
    fn variable_type_must_match_statement() {
        let engine = engine();
        let txn = engine.begin();
        let root = engine.create_root_context(&txn, Term::arrow(a(), a())).unwrap();
        let assumption = engine.statement(root).unwrap().assumptions()[0];
        let forged = Term::variable(assumption, b());
        assert!(matches!(
            engine.declare(&txn, root, forged),
            Err(ProofError::Structure(StructureError::VariableTypeMismatch { .. }))
        ));
    }

    #[test]
    fn casts_are_rejected() {
        let engine = engine();
        let txn = engine.begin();
        let root = engine.create_root_context(&txn, a()).unwrap();
        assert!(matches!(
            engine.declare(&txn, root, Term::type_cast(a())),
            Err(ProofError::Structure(StructureError::NotCastFree { .. }))
        ));
    }

    #[test]
    fn untyped_declaration_is_rejected() {
        let engine = engine();
        let txn = engine.begin();
        let root = engine.create_root_context(&txn, a()).unwrap();
        assert!(matches!(
            engine.declare(&txn, root, Term::Tau),
            Err(ProofError::Structure(StructureError::UntypedDeclaration { .. }))
        ));
        assert!(engine.store().local_statements_of(root).is_empty());
    }

    #[test]
    fn specialization_type_mismatch() {
        let engine = engine();
        let txn = engine.begin();
        let root = engine
            .create_root_context(&txn, Term::arrow(Term::arrow(a(), b()), Term::arrow(b(), b())))
            .unwrap();
        let assumptions = engine.statement(root).unwrap().assumptions().to_vec();
        let g = assumptions[0];
        let wrong = engine.statement(assumptions[1]).unwrap().variable();
        assert!(matches!(
            engine.specialize(&txn, root, g, wrong),
            Err(ProofError::Term(TermError::TypeMismatch { .. }))
        ));
    }

    #[test]
    fn unfolding_context_reads_declaration_value() {
        let engine = engine();
        let txn = engine.begin();
        let root = engine.create_root_context(&txn, Term::arrow(a(), b())).unwrap();
        let proposition = engine.declare(&txn, root, a()).unwrap();
        let decl = engine.statement(proposition).unwrap();
        assert_eq!(decl.term, Term::Tau);

        // Outward term mentions the declaration; inside, it reads as A.
        let term = Term::arrow(decl.variable(), b());
        let unfolding = engine
            .open_unfolding_sub_context(&txn, root, term, proposition)
            .unwrap();
        let st = engine.statement(unfolding).unwrap();
        assert!(st.dependencies.contains(&proposition));
        let inner_assumption = engine.statement(st.assumptions()[0]).unwrap();
        assert_eq!(inner_assumption.term, a());

        let not_a_decl = engine.statement(root).unwrap().assumptions()[0];
        assert!(matches!(
            engine.open_unfolding_sub_context(&txn, root, b(), not_a_decl),
            Err(ProofError::Structure(StructureError::NotADeclaration { .. }))
        ));
        txn.commit().unwrap();
    }

    #[test]
    fn scope_is_live_and_ancestor_inclusive() {
        let engine = engine();
        let txn = engine.begin();
        let root = engine.create_root_context(&txn, Term::arrow(a(), b())).unwrap();
        let inner = engine.open_sub_context(&txn, root, Term::arrow(b(), a())).unwrap();
        let scope = engine.scope(inner).unwrap();
        let before = scope.statements().len();

        let root_assumption = engine.statement(root).unwrap().assumptions()[0];
        let decl = engine
            .declare(&txn, root, engine.statement(root_assumption).unwrap().variable())
            .unwrap();
        assert_eq!(scope.statements().len(), before + 1);
        assert!(scope.contains(decl));
        assert_eq!(scope.statements_by_term(&a()), vec![root_assumption, decl]);
        assert_eq!(scope.parent().map(|p| p.context()), Some(root));
        txn.commit().unwrap();
    }

    #[test]
    fn independence() {
        let engine = engine();
        let txn = engine.begin();
        let root = engine.create_root_context(&txn, Term::arrow(a(), b())).unwrap();
        let root_assumption = engine.statement(root).unwrap().assumptions()[0];
        let inner = engine.open_sub_context(&txn, root, Term::arrow(b(), a())).unwrap();
        let inner_assumption = engine.statement(inner).unwrap().assumptions()[0];

        let uses_root = engine
            .declare(&txn, inner, engine.statement(root_assumption).unwrap().variable())
            .unwrap();
        let uses_inner = engine
            .declare(&txn, inner, engine.statement(inner_assumption).unwrap().variable())
            .unwrap();
        assert!(engine.independent(inner, uses_root).unwrap());
        assert!(!engine.independent(inner, uses_inner).unwrap());
        assert!(!engine.independent(root, inner).unwrap());
        txn.commit().unwrap();
    }
}
