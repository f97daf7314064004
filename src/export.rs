//! Export types for serializing a proof.
//!
//! These types provide human-readable, name-resolved representations of
//! statements suitable for JSON export, plus a Graphviz rendering of a
//! context's dependency graph.

use std::collections::HashMap;

use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::{ProofResult, StoreError};
use crate::graph::order::dependency_sorted;
use crate::graph::subtree;
use crate::id::StatementId;
use crate::statement::{Statement, StatementKind};

/// Exported statement with its term rendered as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementExport {
    /// Numeric statement ID.
    pub id: u64,
    /// Owning context ID, absent for a root context.
    pub context: Option<u64>,
    /// Statement kind (assumption, declaration, specialization, context, ...).
    pub kind: String,
    /// Identifier in the owning scope, if named.
    pub identifier: Option<String>,
    pub term: String,
    pub proved: bool,
    pub dependencies: Vec<u64>,
    /// Declaration value or specialization instance.
    pub value: Option<String>,
    /// Specialized statement or unfolded declaration.
    pub general: Option<u64>,
    /// Ordered assumption IDs of a context.
    pub assumptions: Vec<u64>,
    /// Consequent of a context.
    pub consequent: Option<String>,
}

impl From<&Statement> for StatementExport {
    fn from(st: &Statement) -> Self {
        let (value, general) = match &st.kind {
            StatementKind::Declaration { value } => (Some(value.to_string()), None),
            StatementKind::Specialization { general, instance } => (Some(instance.to_string()), Some(general.get())),
            StatementKind::Context(_) => (None, st.structural_dependencies().first().map(|id| id.get())),
            StatementKind::Assumption { .. } => (None, None),
        };
        Self {
            id: st.id.get(),
            context: st.context_id.map(StatementId::get),
            kind: st.kind.label().to_string(),
            identifier: st.identifier.as_ref().map(ToString::to_string),
            term: st.term.to_string(),
            proved: st.proved,
            dependencies: st.dependencies.iter().map(|id| id.get()).collect(),
            value,
            general,
            assumptions: st.assumptions().iter().map(|id| id.get()).collect(),
            consequent: st.consequent().map(ToString::to_string),
        }
    }
}

impl Engine {
    /// Export `context` and its whole sub-tree, contexts before their
    /// contents and every statement after its local dependencies.
    pub fn export_context(&self, context: StatementId) -> ProofResult<Vec<StatementExport>> {
        self.require_context(context)?;
        let ids: Vec<StatementId> = subtree(self.store(), context).into_iter().collect();
        Ok(dependency_sorted(self.store(), &ids, true)
            .into_iter()
            .filter_map(|id| self.store().get(id))
            .map(|st| StatementExport::from(&st))
            .collect())
    }

    /// [`Engine::export_context`] as pretty-printed JSON.
    pub fn export_json(&self, context: StatementId) -> ProofResult<String> {
        let records = self.export_context(context)?;
        serde_json::to_string_pretty(&records).map_err(|e| {
            StoreError::Serialization {
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Graphviz DOT of the sub-tree of `context`: `uses` edges run from a
    /// dependency to its dependent, `contains` edges from a context to its
    /// local statements.
    pub fn dependency_dot(&self, context: StatementId) -> ProofResult<String> {
        self.require_context(context)?;
        let store = self.store();
        let members = subtree(store, context);

        let mut graph: DiGraph<String, &'static str> = DiGraph::new();
        let mut nodes: HashMap<StatementId, NodeIndex> = HashMap::new();
        for &id in &members {
            let Some(st) = store.get(id) else { continue };
            let label = match &st.identifier {
                Some(name) => format!("{name} : {}", st.term),
                None => format!("{id} : {}", st.term),
            };
            nodes.insert(id, graph.add_node(label));
        }
        for &id in &members {
            let Some(st) = store.get(id) else { continue };
            let Some(&to) = nodes.get(&id) else { continue };
            for dep in &st.dependencies {
                if let Some(&from) = nodes.get(dep) {
                    graph.add_edge(from, to, "uses");
                }
            }
            if let Some(&owner) = st.context_id.as_ref().and_then(|c| nodes.get(c)) {
                graph.add_edge(owner, to, "contains");
            }
        }

        tracing::debug!(
            context = %context,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "rendered dependency graph"
        );
        Ok(format!("{}", Dot::new(&graph)))
    }
}
