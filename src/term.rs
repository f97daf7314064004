//! Term capability: immutable, structurally comparable typed terms.
//!
//! The statement graph only needs a handful of operations from its term
//! calculus: free variables, type inference, composition, replacement,
//! unprojection and a cast check. This module provides a small dependent
//! calculus implementing exactly those.
//!
//! Statement variables are referenced by [`StatementId`] and carry their type
//! (the referenced statement's term). Bound parameters are identified by a
//! process-unique [`ParamId`]; equality and hashing are taken up to renaming
//! of bound parameters, so two separately built copies of `A -> B -> B` are
//! the same term and land in the same index bucket.

use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::TermError;
use crate::id::StatementId;

static NEXT_PARAM: AtomicU64 = AtomicU64::new(1);

/// Identifier of a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ParamId(u64);

impl ParamId {
    /// Allocate a parameter id never handed out before in this process.
    pub fn fresh() -> Self {
        ParamId(NEXT_PARAM.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0
    }

    /// Keep fresh ids above parameters restored from the durable tier.
    pub(crate) fn reserve_through(raw: u64) {
        NEXT_PARAM.fetch_max(raw + 1, Ordering::Relaxed);
    }
}

/// A term of the calculus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Term {
    /// The type of propositions. Has no type itself.
    Tau,
    /// A closed primitive proposition of type [`Term::Tau`].
    Atom(String),
    /// The variable introduced by a statement, typed by that statement's term.
    Var { id: StatementId, ty: Box<Term> },
    /// An occurrence of a bound parameter.
    Param { id: ParamId, ty: Box<Term> },
    /// Abstraction over `param`. A function type when `body` is itself a type.
    Function {
        param: ParamId,
        param_ty: Box<Term>,
        body: Box<Term>,
    },
    /// Application of `head` to `arg`.
    Composition { head: Box<Term>, arg: Box<Term> },
    /// A projected function; [`Term::unproject`] strips the marker.
    Projection(Box<Term>),
    /// A pending cast standing for the type of the inner term.
    TypeCast(Box<Term>),
}

impl Term {
    /// A primitive proposition.
    pub fn atom(name: impl Into<String>) -> Self {
        Term::Atom(name.into())
    }

    /// Reference to statement `id`, whose term is `ty`.
    pub fn variable(id: StatementId, ty: Term) -> Self {
        Term::Var {
            id,
            ty: Box::new(ty),
        }
    }

    /// Non-dependent function type `domain -> codomain`.
    pub fn arrow(domain: Term, codomain: Term) -> Self {
        Term::Function {
            param: ParamId::fresh(),
            param_ty: Box::new(domain),
            body: Box::new(codomain),
        }
    }

    /// Dependent abstraction: `build` receives the bound parameter and
    /// returns the body.
    pub fn function(param_ty: Term, build: impl FnOnce(Term) -> Term) -> Self {
        let param = ParamId::fresh();
        let occurrence = Term::Param {
            id: param,
            ty: Box::new(param_ty.clone()),
        };
        Term::Function {
            param,
            param_ty: Box::new(param_ty),
            body: Box::new(build(occurrence)),
        }
    }

    /// Unchecked application. Use [`Term::compose`] for the checked form.
    pub fn apply(head: Term, arg: Term) -> Self {
        Term::Composition {
            head: Box::new(head),
            arg: Box::new(arg),
        }
    }

    pub fn projection(inner: Term) -> Self {
        Term::Projection(Box::new(inner))
    }

    pub fn type_cast(inner: Term) -> Self {
        Term::TypeCast(Box::new(inner))
    }

    /// Ids of all statement variables occurring in this term.
    ///
    /// The types carried by variables are not searched: they belong to the
    /// referenced statement, which accounts for its own dependencies.
    pub fn free_variables(&self) -> BTreeSet<StatementId> {
        let mut out = BTreeSet::new();
        self.for_each_var(&mut |id, _| {
            out.insert(id);
        });
        out
    }

    /// Visit every statement variable occurrence with its carried type.
    pub fn for_each_var(&self, f: &mut dyn FnMut(StatementId, &Term)) {
        match self {
            Term::Tau | Term::Atom(_) => {}
            Term::Var { id, ty } => f(*id, ty),
            Term::Param { ty, .. } => ty.for_each_var(f),
            Term::Function { param_ty, body, .. } => {
                param_ty.for_each_var(f);
                body.for_each_var(f);
            }
            Term::Composition { head, arg } => {
                head.for_each_var(f);
                arg.for_each_var(f);
            }
            Term::Projection(inner) | Term::TypeCast(inner) => inner.for_each_var(f),
        }
    }

    /// Infer the type of this term.
    pub fn type_of(&self) -> Result<Term, TermError> {
        match self {
            Term::Tau => Err(TermError::Untyped {
                term: self.to_string(),
            }),
            Term::Atom(_) => Ok(Term::Tau),
            Term::Var { ty, .. } | Term::Param { ty, .. } => Ok((**ty).clone()),
            Term::Function {
                param,
                param_ty,
                body,
            } => Ok(Term::Function {
                param: *param,
                param_ty: param_ty.clone(),
                body: Box::new(body.type_of()?),
            }),
            Term::Composition { head, arg } => match head.type_of()?.unproject() {
                Term::Function {
                    param,
                    param_ty,
                    body,
                } => {
                    let arg_ty = arg.type_of()?;
                    if arg_ty != *param_ty {
                        return Err(TermError::TypeMismatch {
                            expected: param_ty.to_string(),
                            found: arg_ty.to_string(),
                        });
                    }
                    Ok(body.replace_param(param, arg))
                }
                _ => Err(TermError::NotAFunction {
                    term: head.to_string(),
                }),
            },
            Term::Projection(inner) => inner.type_of(),
            Term::TypeCast(inner) => inner.type_of()?.type_of(),
        }
    }

    /// Apply this term to `arg`.
    ///
    /// An abstraction is instantiated directly (its parameter replaced by
    /// `arg`); any other term of function type yields a checked
    /// [`Term::Composition`].
    pub fn compose(&self, arg: &Term) -> Result<Term, TermError> {
        match self {
            Term::Function {
                param,
                param_ty,
                body,
            } => {
                let arg_ty = arg.type_of()?;
                if arg_ty != **param_ty {
                    return Err(TermError::TypeMismatch {
                        expected: param_ty.to_string(),
                        found: arg_ty.to_string(),
                    });
                }
                Ok(body.replace_param(*param, arg))
            }
            Term::Projection(inner) => inner.compose(arg),
            _ => {
                let composed = Term::apply(self.clone(), arg.clone());
                composed.type_of()?;
                Ok(composed)
            }
        }
    }

    /// Replace every occurrence of the variable or parameter `var` by `with`.
    pub fn replace(&self, var: &Term, with: &Term) -> Result<Term, TermError> {
        match var {
            Term::Var { id, .. } => Ok(self.replace_var(*id, with)),
            Term::Param { id, .. } => Ok(self.replace_param(*id, with)),
            _ => Err(TermError::NotAVariable {
                term: var.to_string(),
            }),
        }
    }

    /// Replace statement variable `id` by `with`.
    pub fn replace_var(&self, id: StatementId, with: &Term) -> Term {
        self.map_vars(&|v| (v == id).then(|| with.clone()))
    }

    /// Replace every statement variable found in `map`.
    pub fn replace_vars(&self, map: &HashMap<StatementId, Term>) -> Term {
        self.map_vars(&|v| map.get(&v).cloned())
    }

    fn map_vars(&self, f: &dyn Fn(StatementId) -> Option<Term>) -> Term {
        match self {
            Term::Tau | Term::Atom(_) => self.clone(),
            Term::Var { id, .. } => f(*id).unwrap_or_else(|| self.clone()),
            Term::Param { id, ty } => Term::Param {
                id: *id,
                ty: Box::new(ty.map_vars(f)),
            },
            Term::Function {
                param,
                param_ty,
                body,
            } => Term::Function {
                param: *param,
                param_ty: Box::new(param_ty.map_vars(f)),
                body: Box::new(body.map_vars(f)),
            },
            Term::Composition { head, arg } => Term::apply(head.map_vars(f), arg.map_vars(f)),
            Term::Projection(inner) => Term::projection(inner.map_vars(f)),
            Term::TypeCast(inner) => Term::type_cast(inner.map_vars(f)),
        }
    }

    /// Replace free occurrences of parameter `param` by `with`.
    pub fn replace_param(&self, param: ParamId, with: &Term) -> Term {
        match self {
            Term::Tau | Term::Atom(_) | Term::Var { .. } => self.clone(),
            Term::Param { id, ty } => {
                if *id == param {
                    with.clone()
                } else {
                    Term::Param {
                        id: *id,
                        ty: Box::new(ty.replace_param(param, with)),
                    }
                }
            }
            Term::Function {
                param: bound,
                param_ty,
                body,
            } => {
                let body = if *bound == param {
                    (**body).clone()
                } else {
                    body.replace_param(param, with)
                };
                Term::Function {
                    param: *bound,
                    param_ty: Box::new(param_ty.replace_param(param, with)),
                    body: Box::new(body),
                }
            }
            Term::Composition { head, arg } => Term::apply(
                head.replace_param(param, with),
                arg.replace_param(param, with),
            ),
            Term::Projection(inner) => Term::projection(inner.replace_param(param, with)),
            Term::TypeCast(inner) => Term::type_cast(inner.replace_param(param, with)),
        }
    }

    /// Strip every projection marker.
    pub fn unproject(&self) -> Term {
        match self {
            Term::Tau | Term::Atom(_) | Term::Var { .. } => self.clone(),
            Term::Param { id, ty } => Term::Param {
                id: *id,
                ty: Box::new(ty.unproject()),
            },
            Term::Function {
                param,
                param_ty,
                body,
            } => Term::Function {
                param: *param,
                param_ty: Box::new(param_ty.unproject()),
                body: Box::new(body.unproject()),
            },
            Term::Composition { head, arg } => Term::apply(head.unproject(), arg.unproject()),
            Term::Projection(inner) => inner.unproject(),
            Term::TypeCast(inner) => Term::type_cast(inner.unproject()),
        }
    }

    /// Whether the term contains no pending [`Term::TypeCast`].
    pub fn cast_free(&self) -> bool {
        match self {
            Term::Tau | Term::Atom(_) | Term::Var { .. } => true,
            Term::Param { ty, .. } => ty.cast_free(),
            Term::Function { param_ty, body, .. } => param_ty.cast_free() && body.cast_free(),
            Term::Composition { head, arg } => head.cast_free() && arg.cast_free(),
            Term::Projection(inner) => inner.cast_free(),
            Term::TypeCast(_) => false,
        }
    }

    /// Number of nodes, not counting the types carried by variables.
    pub fn size(&self) -> usize {
        match self {
            Term::Tau | Term::Atom(_) | Term::Var { .. } => 1,
            Term::Param { ty, .. } => 1 + ty.size(),
            Term::Function { param_ty, body, .. } => 1 + param_ty.size() + body.size(),
            Term::Composition { head, arg } => 1 + head.size() + arg.size(),
            Term::Projection(inner) | Term::TypeCast(inner) => 1 + inner.size(),
        }
    }

    /// Largest parameter id occurring anywhere, including inside variable types.
    pub(crate) fn max_param_id(&self) -> Option<u64> {
        match self {
            Term::Tau | Term::Atom(_) => None,
            Term::Var { ty, .. } => ty.max_param_id(),
            Term::Param { id, ty } => Some(id.get()).max(ty.max_param_id()),
            Term::Function {
                param,
                param_ty,
                body,
            } => Some(param.get())
                .max(param_ty.max_param_id())
                .max(body.max_param_id()),
            Term::Composition { head, arg } => head.max_param_id().max(arg.max_param_id()),
            Term::Projection(inner) | Term::TypeCast(inner) => inner.max_param_id(),
        }
    }

    fn mentions_param(&self, param: ParamId) -> bool {
        match self {
            Term::Tau | Term::Atom(_) | Term::Var { .. } => false,
            Term::Param { id, ty } => *id == param || ty.mentions_param(param),
            Term::Function {
                param: bound,
                param_ty,
                body,
            } => param_ty.mentions_param(param) || (*bound != param && body.mentions_param(param)),
            Term::Composition { head, arg } => {
                head.mentions_param(param) || arg.mentions_param(param)
            }
            Term::Projection(inner) | Term::TypeCast(inner) => inner.mentions_param(param),
        }
    }

    fn alpha_eq(&self, other: &Term, pairs: &mut Vec<(ParamId, ParamId)>) -> bool {
        match (self, other) {
            (Term::Tau, Term::Tau) => true,
            (Term::Atom(a), Term::Atom(b)) => a == b,
            (Term::Var { id: a, .. }, Term::Var { id: b, .. }) => a == b,
            (Term::Param { id: a, .. }, Term::Param { id: b, .. }) => {
                match pairs.iter().rev().find(|(l, r)| l == a || r == b) {
                    Some((l, r)) => l == a && r == b,
                    None => a == b,
                }
            }
            (
                Term::Function {
                    param: p,
                    param_ty: pt,
                    body: pb,
                },
                Term::Function {
                    param: q,
                    param_ty: qt,
                    body: qb,
                },
            ) => {
                if !pt.alpha_eq(qt, pairs) {
                    return false;
                }
                pairs.push((*p, *q));
                let eq = pb.alpha_eq(qb, pairs);
                pairs.pop();
                eq
            }
            (
                Term::Composition { head: h1, arg: a1 },
                Term::Composition { head: h2, arg: a2 },
            ) => h1.alpha_eq(h2, pairs) && a1.alpha_eq(a2, pairs),
            (Term::Projection(a), Term::Projection(b)) | (Term::TypeCast(a), Term::TypeCast(b)) => {
                a.alpha_eq(b, pairs)
            }
            _ => false,
        }
    }

    fn hash_with<H: Hasher>(&self, binders: &mut Vec<ParamId>, state: &mut H) {
        match self {
            Term::Tau => 0u8.hash(state),
            Term::Atom(name) => {
                1u8.hash(state);
                name.hash(state);
            }
            Term::Var { id, .. } => {
                2u8.hash(state);
                id.hash(state);
            }
            Term::Param { id, .. } => {
                3u8.hash(state);
                match binders.iter().rposition(|b| b == id) {
                    Some(pos) => {
                        0u8.hash(state);
                        (binders.len() - pos).hash(state);
                    }
                    None => {
                        1u8.hash(state);
                        id.hash(state);
                    }
                }
            }
            Term::Function {
                param,
                param_ty,
                body,
            } => {
                4u8.hash(state);
                param_ty.hash_with(binders, state);
                binders.push(*param);
                body.hash_with(binders, state);
                binders.pop();
            }
            Term::Composition { head, arg } => {
                5u8.hash(state);
                head.hash_with(binders, state);
                arg.hash_with(binders, state);
            }
            Term::Projection(inner) => {
                6u8.hash(state);
                inner.hash_with(binders, state);
            }
            Term::TypeCast(inner) => {
                7u8.hash(state);
                inner.hash_with(binders, state);
            }
        }
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.alpha_eq(other, &mut Vec::new())
    }
}

impl Eq for Term {}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_with(&mut Vec::new(), state);
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Tau => write!(f, "Tau"),
            Term::Atom(name) => write!(f, "{name}"),
            Term::Var { id, .. } => write!(f, "#{}", id.get()),
            Term::Param { id, .. } => write!(f, "p{}", id.get()),
            Term::Function {
                param,
                param_ty,
                body,
            } => {
                if body.mentions_param(*param) {
                    write!(f, "(p{} : {param_ty}) -> {body}", param.get())
                } else if matches!(**param_ty, Term::Function { .. }) {
                    write!(f, "({param_ty}) -> {body}")
                } else {
                    write!(f, "{param_ty} -> {body}")
                }
            }
            Term::Composition { head, arg } => write!(f, "({head} {arg})"),
            Term::Projection(inner) => write!(f, "proj({inner})"),
            Term::TypeCast(inner) => write!(f, "type({inner})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn sid(raw: u64) -> StatementId {
        StatementId::new(raw).unwrap()
    }

    fn a() -> Term {
        Term::atom("A")
    }

    fn b() -> Term {
        Term::atom("B")
    }

    #[test]
    fn separately_built_arrows_are_equal() {
        let t1 = Term::arrow(a(), Term::arrow(b(), b()));
        let t2 = Term::arrow(a(), Term::arrow(b(), b()));
        assert_eq!(t1, t2);

        let mut set = HashSet::new();
        set.insert(t1);
        assert!(set.contains(&t2));
    }

    #[test]
    fn dependent_functions_compare_up_to_renaming() {
        let x = sid(1);
        let family = Term::variable(x, Term::arrow(a(), Term::Tau));
        let t1 = Term::function(a(), |p| Term::apply(family.clone(), p));
        let t2 = Term::function(a(), |q| Term::apply(family.clone(), q));
        assert_eq!(t1, t2);

        // Binding structure matters: the inner parameter is not the outer one.
        let outer_used = Term::function(a(), |p| Term::function(a(), |_q| p));
        let inner_used = Term::function(a(), |_p| Term::function(a(), |q| q));
        assert_ne!(outer_used, inner_used);
    }

    #[test]
    fn free_variables_skip_carried_types() {
        let inner = Term::variable(sid(1), a());
        let outer = Term::variable(sid(2), Term::apply(inner.clone(), inner));
        let term = Term::arrow(outer, b());
        let fv = term.free_variables();
        assert_eq!(fv.into_iter().collect::<Vec<_>>(), vec![sid(2)]);
    }

    #[test]
    fn compose_instantiates_function_type() {
        let general = Term::arrow(a(), Term::atom("C"));
        let instance = Term::variable(sid(5), a());
        assert_eq!(general.compose(&instance).unwrap(), Term::atom("C"));
    }

    #[test]
    fn compose_rejects_mismatched_argument() {
        let general = Term::arrow(a(), Term::atom("C"));
        let wrong = Term::variable(sid(5), b());
        let err = general.compose(&wrong).unwrap_err();
        assert!(matches!(err, TermError::TypeMismatch { .. }));
    }

    #[test]
    fn compose_dependent_function_substitutes_argument() {
        let family = Term::variable(sid(1), Term::arrow(a(), Term::Tau));
        let general = Term::function(a(), |p| Term::apply(family.clone(), p));
        let witness = Term::variable(sid(2), a());
        let result = general.compose(&witness).unwrap();
        assert_eq!(result, Term::apply(family, witness));
    }

    #[test]
    fn compose_non_abstraction_builds_composition() {
        let f = Term::variable(sid(3), Term::arrow(a(), b()));
        let x = Term::variable(sid(4), a());
        let composed = f.compose(&x).unwrap();
        assert!(matches!(composed, Term::Composition { .. }));
        assert_eq!(composed.type_of().unwrap(), b());

        let not_fn = Term::variable(sid(6), a());
        assert!(matches!(
            not_fn.compose(&x),
            Err(TermError::NotAFunction { .. })
        ));
    }

    #[test]
    fn tau_has_no_type() {
        assert!(matches!(Term::Tau.type_of(), Err(TermError::Untyped { .. })));
        assert_eq!(a().type_of().unwrap(), Term::Tau);
    }

    #[test]
    fn replace_variable_and_reject_non_variable() {
        let x = Term::variable(sid(1), a());
        let y = Term::variable(sid(2), a());
        let term = Term::arrow(x.clone(), b());
        assert_eq!(term.replace(&x, &y).unwrap(), Term::arrow(y.clone(), b()));
        assert!(matches!(
            term.replace(&a(), &y),
            Err(TermError::NotAVariable { .. })
        ));
    }

    #[test]
    fn replace_vars_uses_whole_map() {
        let x = Term::variable(sid(1), a());
        let y = Term::variable(sid(2), b());
        let term = Term::arrow(x, y);
        let mut map = HashMap::new();
        map.insert(sid(1), Term::variable(sid(10), a()));
        map.insert(sid(2), Term::variable(sid(20), b()));
        let replaced = term.replace_vars(&map);
        let fv: Vec<_> = replaced.free_variables().into_iter().collect();
        assert_eq!(fv, vec![sid(10), sid(20)]);
    }

    #[test]
    fn unproject_and_cast_free() {
        let projected = Term::projection(Term::arrow(a(), b()));
        assert_eq!(projected.unproject(), Term::arrow(a(), b()));
        assert!(projected.cast_free());

        let cast = Term::arrow(a(), Term::type_cast(Term::variable(sid(1), b())));
        assert!(!cast.cast_free());
        assert_eq!(Term::type_cast(Term::variable(sid(1), b())).type_of().unwrap(), Term::Tau);
    }

    #[test]
    fn display_is_readable() {
        let t = Term::arrow(a(), Term::arrow(b(), b()));
        assert_eq!(t.to_string(), "A -> B -> B");
        let nested = Term::arrow(Term::arrow(a(), b()), b());
        assert_eq!(nested.to_string(), "(A -> B) -> B");
    }

    #[test]
    fn size_counts_nodes() {
        assert_eq!(a().size(), 1);
        assert_eq!(Term::arrow(a(), b()).size(), 3);
    }
}
