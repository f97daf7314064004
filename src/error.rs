//! Rich diagnostic error types for the proofweb engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so callers know exactly which mutation
//! was rejected and why. Construction-time errors are raised before any state
//! changes; proof propagation never produces an error.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the proofweb engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum ProofError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Term(#[from] TermError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Structure(#[from] StructureError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Naming(#[from] NamingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Undelete(#[from] UndeleteError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

impl ProofError {
    /// Whether this error signals a broken internal invariant rather than a
    /// rejected request. Fatal errors should abort the surrounding transaction.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProofError::Engine(EngineError::Inconsistent { .. }))
    }
}

// ---------------------------------------------------------------------------
// Term errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TermError {
    #[error("term has no type: {term}")]
    #[diagnostic(
        code(pw::term::untyped),
        help("Tau is the type of propositions and has no type itself. Use it as a parameter type, not as a value.")
    )]
    Untyped { term: String },

    #[error("type mismatch: expected {expected}, found {found}")]
    #[diagnostic(
        code(pw::term::type_mismatch),
        help(
            "The argument's type must equal the function's parameter type \
             (up to renaming of bound parameters)."
        )
    )]
    TypeMismatch { expected: String, found: String },

    #[error("cannot compose: {term} is not a function")]
    #[diagnostic(
        code(pw::term::not_a_function),
        help("Only terms whose type is a function type can be applied to an argument.")
    )]
    NotAFunction { term: String },

    #[error("replacement target is not a variable: {term}")]
    #[diagnostic(
        code(pw::term::not_a_variable),
        help("`replace` substitutes statement variables or bound parameters only.")
    )]
    NotAVariable { term: String },
}

// ---------------------------------------------------------------------------
// Structural errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StructureError {
    #[error("variable {variable} is not visible from context {context}")]
    #[diagnostic(
        code(pw::structure::unbound_variable),
        help(
            "Every variable in a new term must denote a statement of this context \
             or one of its ancestors."
        )
    )]
    UnboundVariable { variable: u64, context: String },

    #[error("variable {variable} carries a type that differs from its statement's term")]
    #[diagnostic(
        code(pw::structure::variable_type),
        help("Build variable references with `Term::var(&statement)` so the type matches.")
    )]
    VariableTypeMismatch { variable: u64 },

    #[error("term is not cast-free: {term}")]
    #[diagnostic(
        code(pw::structure::not_cast_free),
        help("Resolve pending type casts before asserting the term.")
    )]
    NotCastFree { term: String },

    #[error("declared value has no well-formed type: {value}")]
    #[diagnostic(
        code(pw::structure::untyped_declaration),
        help("A declaration's term is the type of its value, so the value must type-check.")
    )]
    UntypedDeclaration {
        value: String,
        #[source]
        source: TermError,
    },

    #[error("statement {id} not found")]
    #[diagnostic(
        code(pw::structure::not_found),
        help("The statement does not exist. It may have been deleted by another transaction.")
    )]
    NotFound { id: u64 },

    #[error("statement {id} is not a context")]
    #[diagnostic(
        code(pw::structure::not_a_context),
        help("This operation needs a context (including root and unfolding contexts).")
    )]
    NotAContext { id: u64 },

    #[error("statement {id} is not a declaration")]
    #[diagnostic(
        code(pw::structure::not_a_declaration),
        help("Unfolding contexts unfold the value of a declaration.")
    )]
    NotADeclaration { id: u64 },

    #[error("statement {id} is not local to context {context}")]
    #[diagnostic(
        code(pw::structure::not_in_context),
        help("Delete statements through the context that directly owns them.")
    )]
    NotInContext { id: u64, context: u64 },

    #[error("statement {id} has {count} dependent statement(s)")]
    #[diagnostic(
        code(pw::structure::has_dependents),
        help(
            "Delete the dependents first, or use `delete_statement_cascade` to \
             remove them together with this statement."
        )
    )]
    HasDependents { id: u64, count: usize },

    #[error("assumption {id} cannot be deleted on its own")]
    #[diagnostic(
        code(pw::structure::assumption),
        help("Assumptions belong to their context. Delete the owning context instead.")
    )]
    CannotDeleteAssumption { id: u64 },

    #[error("cyclic copy detected at statement {id}")]
    #[diagnostic(
        code(pw::structure::copy_cycle),
        help("A context cannot be copied into itself or into one of its own descendants.")
    )]
    CopyCycle { id: u64 },

    #[error("no counterpart for statement {id} in the copy correspondence")]
    #[diagnostic(
        code(pw::structure::missing_counterpart),
        help(
            "Assumptions are never copied; they resolve through the copy of their \
             owning context, which must be part of the copy or the correspondence map."
        )
    )]
    MissingCounterpart { id: u64 },

    #[error("statement {id} already has an authority")]
    #[diagnostic(
        code(pw::structure::authority_exists),
        help("Delete the existing authority before creating a new one.")
    )]
    AuthorityExists { id: u64 },

    #[error("statement {id} has no authority")]
    #[diagnostic(
        code(pw::structure::no_authority),
        help("Create an authority for the statement first.")
    )]
    NoAuthority { id: u64 },
}

// ---------------------------------------------------------------------------
// Naming errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum NamingError {
    #[error("invalid identifier: {identifier:?}")]
    #[diagnostic(
        code(pw::naming::invalid),
        help("Identifiers are dot-separated names, each starting with a letter or underscore.")
    )]
    InvalidIdentifier { identifier: String },

    #[error("identifier {identifier} already in use by statement {existing}")]
    #[diagnostic(
        code(pw::naming::in_use),
        help("Pick another identifier or unidentify the existing statement first.")
    )]
    AlreadyInUse { identifier: String, existing: u64 },

    #[error("statement {id} has no identifier")]
    #[diagnostic(
        code(pw::naming::not_identified),
        help("Only identified statements can be unidentified.")
    )]
    NotIdentified { id: u64 },

    #[error("statement {id} has a signed authority")]
    #[diagnostic(
        code(pw::naming::signed),
        help(
            "Renaming would invalidate the authority's signature. Retry with \
             `force = true` to rename anyway and drop the signature."
        )
    )]
    SignedStatement { id: u64 },
}

// ---------------------------------------------------------------------------
// Undelete errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum UndeleteError {
    #[error("nothing to undelete")]
    #[diagnostic(
        code(pw::undelete::empty),
        help("The undo log is empty: no committed deletion is left in this session.")
    )]
    NothingToUndelete,

    #[error("context {context} of statement {id} no longer exists")]
    #[diagnostic(
        code(pw::undelete::context_missing),
        help("The statement's context was deleted after it. Undelete the context first.")
    )]
    ContextMissing { id: u64, context: u64 },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(pw::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(pw::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             This may indicate corruption; try running with a fresh data directory."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(pw::store::serde),
        help(
            "Failed to serialize or deserialize a statement record. \
             This usually means the stored format changed between versions."
        )
    )]
    Serialization { message: String },

    #[error("timed out waiting for the lock on statement {id}")]
    #[diagnostic(
        code(pw::store::lock_timeout),
        help(
            "Another transaction holds the record lock. Retry later or raise \
             `lock_timeout_ms` in the engine configuration."
        )
    )]
    LockTimeout { id: u64 },

    #[error("transaction {id} is already closed")]
    #[diagnostic(
        code(pw::store::closed),
        help("Begin a new transaction with `Engine::begin()`.")
    )]
    TransactionClosed { id: u64 },
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(pw::engine::invalid_config),
        help("Check the EngineConfig fields. {message}")
    )]
    InvalidConfig { message: String },

    #[error("failed to read engine config: {path}")]
    #[diagnostic(
        code(pw::engine::config_read),
        help("Ensure the config file exists and is readable.")
    )]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse engine config: {path}: {message}")]
    #[diagnostic(
        code(pw::engine::config_parse),
        help("Check the TOML syntax in the config file.")
    )]
    ConfigParse { path: String, message: String },

    #[error("failed to write engine config: {path}")]
    #[diagnostic(
        code(pw::engine::config_write),
        help("Check that the parent directory is writable.")
    )]
    ConfigWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("internal inconsistency: {message}")]
    #[diagnostic(
        code(pw::engine::inconsistent),
        help(
            "The statement graph violates one of its own invariants. This is a bug; \
             abort the transaction and file a report."
        )
    )]
    Inconsistent { message: String },
}

/// Convenience alias for functions returning proofweb results.
pub type ProofResult<T> = std::result::Result<T, ProofError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_error_converts_to_proof_error() {
        let err = StructureError::HasDependents { id: 3, count: 2 };
        let proof: ProofError = err.into();
        assert!(matches!(
            proof,
            ProofError::Structure(StructureError::HasDependents { id: 3, count: 2 })
        ));
    }

    #[test]
    fn signed_rename_is_a_distinct_naming_error() {
        let err: ProofError = NamingError::SignedStatement { id: 9 }.into();
        assert!(matches!(err, ProofError::Naming(NamingError::SignedStatement { .. })));
        assert!(!err.is_fatal());
    }

    #[test]
    fn inconsistency_is_fatal() {
        let err: ProofError = EngineError::Inconsistent {
            message: "assumption outside a context".into(),
        }
        .into();
        assert!(err.is_fatal());
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = StructureError::NotInContext { id: 12, context: 4 };
        let msg = format!("{err}");
        assert!(msg.contains("12"));
        assert!(msg.contains("4"));
    }
}
