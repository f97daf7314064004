// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # proofweb
//!
//! The statement graph and truth-maintenance core of an interactive proof
//! assistant: a persistent, mutable graph of typed statements (assumptions,
//! declarations, specializations and nested contexts) whose derived
//! `proved` flags are kept consistent under insertion, deletion, renaming,
//! copying and undelete.
//!
//! ## Architecture
//!
//! - **Terms** (`term`): reference term calculus with alpha-equivalence
//! - **Statements** (`statement`): one record per node, per-kind data in a sum type
//! - **Storage** (`store`): DashMap hot tier with secondary indexes, redb durable tier
//! - **Transactions** (`transaction`): record locks, first-touch journal, commit/close hooks
//! - **Truth maintenance** (`tms`): worklist propagation of the proof rule
//! - **Structure** (`context`, `delete`, `copy`, `undelete`): factories and mutations
//! - **Naming and authorship** (`nomenclator`, `authority`)
//! - **Proofs and export** (`proof`, `export`)
//!
//! ## Library usage
//!
//! ```no_run
//! use proofweb::engine::{Engine, EngineConfig};
//! use proofweb::term::Term;
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let a = Term::atom("A");
//! let txn = engine.begin();
//! // (x: A) -> A is proved by its own assumption.
//! let root = engine.create_root_context(&txn, Term::arrow(a.clone(), a)).unwrap();
//! txn.commit().unwrap();
//! assert!(engine.statement(root).unwrap().proved);
//! ```

pub mod authority;
pub mod context;
pub mod copy;
pub mod delete;
pub mod engine;
pub mod error;
pub mod export;
pub mod graph;
pub mod id;
pub mod identifier;
pub mod listener;
pub mod nomenclator;
pub mod proof;
pub mod statement;
pub mod store;
pub mod term;
pub mod tms;
pub mod transaction;
pub mod undelete;

pub use engine::{Engine, EngineConfig};
pub use error::{ProofError, ProofResult};
pub use id::StatementId;
pub use statement::{ContextKind, Statement, StatementKind};
pub use term::Term;
pub use transaction::Transaction;
