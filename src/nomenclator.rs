//! Naming of statements.
//!
//! Each context owns a naming scope for its direct children; root contexts
//! share one top-level scope. An identifier is unique within its scope.
//! Lookup from a context tries its own scope, then each ancestor's, then
//! the top-level scope.
//!
//! Renaming a statement whose authority holds a valid signature would break
//! the signed commitment, so it is refused with a dedicated error unless the
//! caller forces it, which drops the signature.

use crate::engine::Engine;
use crate::error::{NamingError, ProofResult};
use crate::graph::context_path;
use crate::id::StatementId;
use crate::identifier::Identifier;
use crate::transaction::Transaction;

impl Engine {
    fn guard_signed(&self, txn: &Transaction, statement: StatementId, force: bool) -> ProofResult<()> {
        let signed = self
            .store()
            .authority(statement)
            .is_some_and(|a| a.signature_valid);
        if signed {
            if !force {
                return Err(NamingError::SignedStatement {
                    id: statement.get(),
                }
                .into());
            }
            self.invalidate_signature(txn, statement);
        }
        Ok(())
    }

    /// Give `statement` the name `identifier` in its owning context's scope,
    /// replacing any previous name.
    pub fn identify(
        &self,
        txn: &Transaction,
        statement: StatementId,
        identifier: Identifier,
        force: bool,
    ) -> ProofResult<()> {
        txn.ensure_open()?;
        let mut st = self.require(statement)?;
        txn.lock(statement)?;
        if st.identifier.as_ref() == Some(&identifier) {
            return Ok(());
        }
        if let Some(existing) = self.store().lookup_name(st.context_id, &identifier) {
            if existing != statement {
                return Err(NamingError::AlreadyInUse {
                    identifier: identifier.to_string(),
                    existing: existing.get(),
                }
                .into());
            }
        }
        self.guard_signed(txn, statement, force)?;

        tracing::debug!(statement = %statement, identifier = %identifier, "identified");
        st.identifier = Some(identifier);
        self.store().put(txn, st);
        Ok(())
    }

    /// Remove the name of `statement`, returning it.
    pub fn unidentify(&self, txn: &Transaction, statement: StatementId, force: bool) -> ProofResult<Identifier> {
        txn.ensure_open()?;
        let mut st = self.require(statement)?;
        txn.lock(statement)?;
        let Some(former) = st.identifier.clone() else {
            return Err(NamingError::NotIdentified {
                id: statement.get(),
            }
            .into());
        };
        self.guard_signed(txn, statement, force)?;

        st.identifier = None;
        self.store().put(txn, st);
        Ok(former)
    }

    /// Resolve `name` from inside `context`, innermost scope first.
    pub fn lookup(&self, context: StatementId, name: &Identifier) -> Option<StatementId> {
        let store = self.store();
        context_path(store, context)
            .into_iter()
            .find_map(|ctx| store.lookup_name(Some(ctx), name))
            .or_else(|| store.lookup_name(None, name))
    }

    /// Resolve a root context by name.
    pub fn lookup_root(&self, name: &Identifier) -> Option<StatementId> {
        self.store().lookup_name(None, name)
    }

    /// Names defined directly in `context`, sorted.
    pub fn identifiers(&self, context: StatementId) -> Vec<(Identifier, StatementId)> {
        self.store().names_in(Some(context))
    }

    /// Names of root contexts, sorted.
    pub fn root_identifiers(&self) -> Vec<(Identifier, StatementId)> {
        self.store().names_in(None)
    }
}
