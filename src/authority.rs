//! Statement authorities.
//!
//! An authority records who stands behind a statement and whether their
//! signature over it is still valid. The cryptography itself lives outside
//! this crate; here the signature is a validity flag the naming rules
//! consult, since renaming a signed statement would break the commitment.

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::{ProofResult, StructureError};
use crate::id::StatementId;
use crate::transaction::Transaction;

/// Authorship record for one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementAuthority {
    pub statement_id: StatementId,
    pub author: String,
    /// Creation time, seconds since the Unix epoch.
    pub created_at: u64,
    pub signature_valid: bool,
    pub signed_at: Option<u64>,
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Engine {
    pub fn authority(&self, statement: StatementId) -> Option<StatementAuthority> {
        self.store().authority(statement)
    }

    /// Attach an unsigned authority to `statement`.
    pub fn create_authority(
        &self,
        txn: &Transaction,
        statement: StatementId,
        author: impl Into<String>,
    ) -> ProofResult<StatementAuthority> {
        txn.ensure_open()?;
        self.require(statement)?;
        txn.lock(statement)?;
        if self.store().authority(statement).is_some() {
            return Err(StructureError::AuthorityExists {
                id: statement.get(),
            }
            .into());
        }
        let authority = StatementAuthority {
            statement_id: statement,
            author: author.into(),
            created_at: now_secs(),
            signature_valid: false,
            signed_at: None,
        };
        self.store().put_authority(txn, authority.clone());
        self.listeners().authority_created(txn, &authority);
        tracing::debug!(statement = %statement, author = %authority.author, "authority created");
        Ok(authority)
    }

    /// Mark the authority's signature as valid.
    pub fn sign_authority(&self, txn: &Transaction, statement: StatementId) -> ProofResult<StatementAuthority> {
        txn.ensure_open()?;
        txn.lock(statement)?;
        let mut authority = self
            .store()
            .authority(statement)
            .ok_or(StructureError::NoAuthority { id: statement.get() })?;
        authority.signature_valid = true;
        authority.signed_at = Some(now_secs());
        self.store().put_authority(txn, authority.clone());
        Ok(authority)
    }

    pub fn delete_authority(&self, txn: &Transaction, statement: StatementId) -> ProofResult<StatementAuthority> {
        txn.ensure_open()?;
        txn.lock(statement)?;
        let authority = self
            .store()
            .remove_authority(txn, statement)
            .ok_or(StructureError::NoAuthority { id: statement.get() })?;
        self.listeners().authority_deleted(txn, &authority);
        Ok(authority)
    }

    /// Drop the signature after a forced rename.
    pub(crate) fn invalidate_signature(&self, txn: &Transaction, statement: StatementId) {
        if let Some(mut authority) = self.store().authority(statement) {
            if authority.signature_valid {
                authority.signature_valid = false;
                self.store().put_authority(txn, authority);
                tracing::warn!(statement = %statement, "signature invalidated by forced rename");
            }
        }
    }

    /// Remove the authority of a statement being deleted, notifying listeners.
    pub(crate) fn drop_authority(&self, txn: &Transaction, statement: StatementId) {
        if let Some(authority) = self.store().remove_authority(txn, statement) {
            self.listeners().authority_deleted(txn, &authority);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::{Engine, EngineConfig};
    use crate::error::{ProofError, StructureError};
    use crate::term::Term;

    #[test]
    fn create_sign_delete() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let txn = engine.begin();
        let root = engine.create_root_context(&txn, Term::atom("P")).unwrap();

        let created = engine.create_authority(&txn, root, "alice").unwrap();
        assert!(!created.signature_valid);
        assert!(matches!(
            engine.create_authority(&txn, root, "bob"),
            Err(ProofError::Structure(StructureError::AuthorityExists { .. }))
        ));

        let signed = engine.sign_authority(&txn, root).unwrap();
        assert!(signed.signature_valid);
        assert!(signed.signed_at.is_some());

        engine.delete_authority(&txn, root).unwrap();
        assert!(engine.authority(root).is_none());
        assert!(matches!(
            engine.sign_authority(&txn, root),
            Err(ProofError::Structure(StructureError::NoAuthority { .. }))
        ));
        txn.commit().unwrap();
    }

    #[test]
    fn abort_discards_authority() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let txn = engine.begin();
        let root = engine.create_root_context(&txn, Term::atom("P")).unwrap();
        txn.commit().unwrap();

        let txn = engine.begin();
        engine.create_authority(&txn, root, "alice").unwrap();
        txn.abort();
        assert!(engine.authority(root).is_none());
    }
}
