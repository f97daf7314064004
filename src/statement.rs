//! Statement records: the nodes of the proof graph.
//!
//! A [`Statement`] holds the fields every kind shares (identity, owning
//! context, term, cached proof flag, dependencies, identifier) and a
//! [`StatementKind`] carrying the per-kind fields. Cross references are plain
//! [`StatementId`]s resolved through the store, never owning pointers, so a
//! `Statement` value is a transient snapshot of one record.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::id::StatementId;
use crate::identifier::Identifier;
use crate::term::Term;

/// Which flavor of context a context statement is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextKind {
    /// A sub-proof nested inside another context.
    Nested,
    /// The top of a proof's statement tree; has no owning context.
    Root,
    /// A context whose assumptions come from its term with one declaration
    /// unfolded to its value.
    Unfolding { declaration: StatementId },
}

/// Context-specific data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextData {
    pub kind: ContextKind,
    /// Assumption ids in order.
    pub assumptions: Vec<StatementId>,
    /// The final non-function component of the (inner) term.
    pub consequent: Term,
}

/// The per-kind part of a statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatementKind {
    /// A hypothesis of its owning context, at position `order`.
    Assumption { order: usize },
    /// A named value; the statement's term is the value's type.
    Declaration { value: Term },
    /// `general` composed with `instance`.
    Specialization { general: StatementId, instance: Term },
    /// A nested scope with assumptions and a consequent.
    Context(ContextData),
}

impl StatementKind {
    pub fn label(&self) -> &'static str {
        match self {
            StatementKind::Assumption { .. } => "assumption",
            StatementKind::Declaration { .. } => "declaration",
            StatementKind::Specialization { .. } => "specialization",
            StatementKind::Context(data) => match data.kind {
                ContextKind::Nested => "context",
                ContextKind::Root => "root-context",
                ContextKind::Unfolding { .. } => "unfolding-context",
            },
        }
    }
}

/// A node of the proof graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub id: StatementId,
    /// Owning context; `None` only for root contexts.
    pub context_id: Option<StatementId>,
    pub term: Term,
    /// Cached result of the proof rule, maintained by propagation.
    pub proved: bool,
    /// Statements whose variables this one references, plus kind-specific
    /// structural dependencies.
    pub dependencies: BTreeSet<StatementId>,
    pub identifier: Option<Identifier>,
    pub kind: StatementKind,
}

impl Statement {
    /// The variable this statement introduces, typed by its term.
    pub fn variable(&self) -> Term {
        Term::variable(self.id, self.term.clone())
    }

    pub fn is_assumption(&self) -> bool {
        matches!(self.kind, StatementKind::Assumption { .. })
    }

    pub fn is_context(&self) -> bool {
        matches!(self.kind, StatementKind::Context(_))
    }

    pub fn is_root(&self) -> bool {
        matches!(
            self.kind,
            StatementKind::Context(ContextData {
                kind: ContextKind::Root,
                ..
            })
        )
    }

    /// Context data, if this is any flavor of context.
    pub fn context_data(&self) -> Option<&ContextData> {
        match &self.kind {
            StatementKind::Context(data) => Some(data),
            _ => None,
        }
    }

    /// The consequent, if this is a context.
    pub fn consequent(&self) -> Option<&Term> {
        self.context_data().map(|d| &d.consequent)
    }

    /// Ordered assumption ids, empty for non-contexts.
    pub fn assumptions(&self) -> &[StatementId] {
        self.context_data()
            .map(|d| d.assumptions.as_slice())
            .unwrap_or(&[])
    }

    /// Statement ids named by kind-specific fields (general, unfolded
    /// declaration). These are also part of `dependencies`.
    pub fn structural_dependencies(&self) -> Vec<StatementId> {
        match &self.kind {
            StatementKind::Specialization { general, .. } => vec![*general],
            StatementKind::Context(ContextData {
                kind: ContextKind::Unfolding { declaration },
                ..
            }) => vec![*declaration],
            _ => Vec::new(),
        }
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.identifier {
            Some(name) => write!(f, "{} {} [{}]: {}", self.kind.label(), name, self.id, self.term),
            None => write!(f, "{} [{}]: {}", self.kind.label(), self.id, self.term),
        }
    }
}
