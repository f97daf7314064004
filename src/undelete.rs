//! Undo log of committed deletions.
//!
//! Each delete operation produces one [`DeletionBatch`]; batches enter the
//! session's [`UndoLog`] when their transaction commits. [`Engine::undelete`]
//! takes the most recent batch and rebuilds its statements in reverse
//! deletion order with their original ids (contexts re-create their
//! assumptions with the original assumption ids), then restores identifiers
//! where the name is still free.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::authority::StatementAuthority;
use crate::engine::Engine;
use crate::error::{EngineError, ProofError, ProofResult, UndeleteError};
use crate::id::StatementId;
use crate::identifier::Identifier;
use crate::statement::{Statement, StatementKind};
use crate::transaction::Transaction;

/// A removed statement as it was just before removal.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedStatement {
    pub statement: Statement,
    /// Assumption records of a removed context.
    pub assumptions: Vec<Statement>,
    pub authority: Option<StatementAuthority>,
}

/// The statements removed by one delete operation, in removal order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletionBatch {
    pub statements: Vec<DeletedStatement>,
}

impl DeletionBatch {
    pub fn push(&mut self, deleted: DeletedStatement) {
        self.statements.push(deleted);
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Bounded stack of deletion batches for one session.
#[derive(Debug)]
pub struct UndoLog {
    depth: usize,
    batches: Mutex<VecDeque<DeletionBatch>>,
}

impl UndoLog {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            batches: Mutex::new(VecDeque::new()),
        }
    }

    /// Push a batch, dropping the oldest beyond the configured depth.
    pub fn push(&self, batch: DeletionBatch) {
        let mut batches = self.batches.lock().expect("undo log lock poisoned");
        batches.push_back(batch);
        while batches.len() > self.depth {
            batches.pop_front();
        }
    }

    pub fn pop(&self) -> Option<DeletionBatch> {
        self.batches.lock().expect("undo log lock poisoned").pop_back()
    }

    pub fn len(&self) -> usize {
        self.batches.lock().expect("undo log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.batches.lock().expect("undo log lock poisoned").clear();
    }
}

/// Outcome of one undelete.
#[derive(Debug, Default)]
pub struct UndeleteReport {
    /// Statements rebuilt, in rebuild order.
    pub restored: Vec<StatementId>,
    /// Statements that could not be rebuilt.
    pub failed: Vec<(StatementId, ProofError)>,
    /// Identifiers left off because the name was taken meanwhile.
    pub unnamed: Vec<(StatementId, Identifier)>,
}

impl UndeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Engine {
    /// Rebuild the most recently committed deletion batch.
    pub fn undelete(&self, txn: &Transaction) -> ProofResult<UndeleteReport> {
        txn.ensure_open()?;
        let batch = self.undo_log().pop().ok_or(UndeleteError::NothingToUndelete)?;

        let mut report = UndeleteReport::default();
        for deleted in batch.statements.iter().rev() {
            let id = deleted.statement.id;
            match self.rebuild_statement(txn, deleted) {
                Ok(()) => report.restored.push(id),
                Err(e) => {
                    tracing::warn!(statement = %id, error = %e, "statement not restored");
                    report.failed.push((id, e));
                }
            }
        }
        for deleted in batch.statements.iter().rev() {
            if !report.restored.contains(&deleted.statement.id) {
                continue;
            }
            let names = std::iter::once(&deleted.statement)
                .chain(deleted.assumptions.iter())
                .filter_map(|st| st.identifier.clone().map(|name| (st.id, name)));
            for (id, name) in names {
                if !self.restore_name(txn, id, &name) {
                    tracing::warn!(statement = %id, identifier = %name, "identifier taken, restored unnamed");
                    report.unnamed.push((id, name));
                }
            }
            if let Some(authority) = &deleted.authority {
                self.store().put_authority(txn, authority.clone());
                self.listeners().authority_created(txn, authority);
            }
        }

        txn.record_undelete(batch);
        tracing::info!(
            restored = report.restored.len(),
            failed = report.failed.len(),
            "undelete finished"
        );
        Ok(report)
    }

    fn rebuild_statement(&self, txn: &Transaction, deleted: &DeletedStatement) -> ProofResult<()> {
        let st = &deleted.statement;
        if let Some(context) = st.context_id {
            if !self.store().get(context).is_some_and(|c| c.is_context()) {
                return Err(UndeleteError::ContextMissing {
                    id: st.id.get(),
                    context: context.get(),
                }
                .into());
            }
        }
        self.store().reserve(st.id);

        match (&st.kind, st.context_id) {
            (StatementKind::Declaration { value }, Some(ctx)) => {
                self.insert_declaration(txn, ctx, value.clone(), st.id)?;
            }
            (StatementKind::Specialization { general, instance }, Some(ctx)) => {
                self.insert_specialization(txn, ctx, *general, instance.clone(), st.id)?;
            }
            (StatementKind::Context(data), owner) => {
                self.validate_term(owner, &st.term)?;
                for assumption in &data.assumptions {
                    self.store().reserve(*assumption);
                }
                self.insert_context(txn, owner, st.term.clone(), data.kind, st.id, Some(&data.assumptions))?;
            }
            (StatementKind::Assumption { .. }, _) | (_, None) => {
                return Err(EngineError::Inconsistent {
                    message: format!("{} cannot be rebuilt on its own", st.kind.label()),
                }
                .into());
            }
        }
        Ok(())
    }

    fn restore_name(&self, txn: &Transaction, id: StatementId, name: &Identifier) -> bool {
        let Some(mut st) = self.store().get(id) else {
            return false;
        };
        if self.store().lookup_name(st.context_id, name).is_some() {
            return false;
        }
        st.identifier = Some(name.clone());
        self.store().put(txn, st);
        true
    }
}
