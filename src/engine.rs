//! Engine facade: top-level API for the proofweb statement graph.
//!
//! The `Engine` owns the store, the record lock table, the listener registry
//! and the undo log of one persistence session. Every mutation runs inside a
//! [`Transaction`] obtained from [`Engine::begin`]; the structural operations
//! themselves live in the subsystem modules as further `impl Engine` blocks.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ProofResult, StructureError};
use crate::id::StatementId;
use crate::listener::{ChangeListener, ListenerId, ListenerRegistry};
use crate::statement::Statement;
use crate::store::StatementStore;
use crate::transaction::{LockTable, Transaction};
use crate::undelete::UndoLog;

/// Configuration for the proofweb engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Data directory for persistence. `None` for memory-only mode.
    pub data_dir: Option<PathBuf>,
    /// Default record lock wait for new transactions, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Maximum number of deletion batches kept for undelete.
    pub undo_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            lock_timeout_ms: 5000,
            undo_depth: 32,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file. Missing fields take their defaults.
    pub fn load(path: &Path) -> ProofResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::ConfigRead {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| {
            EngineError::ConfigParse {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ProofResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| EngineError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::ConfigWrite {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| EngineError::ConfigWrite {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }

    fn validate(&self) -> ProofResult<()> {
        if self.undo_depth == 0 {
            return Err(EngineError::InvalidConfig {
                message: "undo_depth must be > 0".into(),
            }
            .into());
        }
        Ok(())
    }
}

/// One persistence session over a statement graph.
pub struct Engine {
    config: EngineConfig,
    store: Arc<StatementStore>,
    locks: Arc<LockTable>,
    listeners: Arc<ListenerRegistry>,
    undo: Arc<UndoLog>,
    next_txn: AtomicU64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("statements", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create a new engine, restoring the durable tier when `data_dir` is set.
    pub fn new(config: EngineConfig) -> ProofResult<Self> {
        config.validate()?;

        let store = match &config.data_dir {
            Some(dir) => StatementStore::open(dir)?,
            None => StatementStore::memory_only(),
        };
        tracing::info!(
            durable = store.is_durable(),
            statements = store.len(),
            roots = store.roots().len(),
            "opened proofweb engine"
        );

        Ok(Self {
            undo: Arc::new(UndoLog::new(config.undo_depth)),
            config,
            store: Arc::new(store),
            locks: Arc::new(LockTable::new()),
            listeners: Arc::new(ListenerRegistry::new()),
            next_txn: AtomicU64::new(1),
        })
    }

    /// Begin a transaction with the configured lock timeout.
    pub fn begin(&self) -> Transaction {
        self.begin_with_timeout(Duration::from_millis(self.config.lock_timeout_ms))
    }

    pub fn begin_with_timeout(&self, lock_timeout: Duration) -> Transaction {
        let id = self.next_txn.fetch_add(1, Ordering::Relaxed);
        Transaction::new(
            id,
            Arc::clone(&self.store),
            Arc::clone(&self.locks),
            Arc::clone(&self.undo),
            lock_timeout,
        )
    }

    /// Snapshot of a statement record.
    pub fn statement(&self, id: StatementId) -> Option<Statement> {
        self.store.get(id)
    }

    pub(crate) fn require(&self, id: StatementId) -> ProofResult<Statement> {
        self.store
            .get(id)
            .ok_or_else(|| StructureError::NotFound { id: id.get() }.into())
    }

    pub(crate) fn require_context(&self, id: StatementId) -> ProofResult<Statement> {
        let st = self.require(id)?;
        if !st.is_context() {
            return Err(StructureError::NotAContext { id: id.get() }.into());
        }
        Ok(st)
    }

    pub fn store(&self) -> &StatementStore {
        &self.store
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub(crate) fn listener_registry(&self) -> Arc<ListenerRegistry> {
        Arc::clone(&self.listeners)
    }

    pub fn undo_log(&self) -> &UndoLog {
        &self.undo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a listener for every change in this session.
    pub fn add_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        self.listeners.add_global(listener)
    }

    /// Register a listener for one statement (or the contents of a context).
    pub fn add_listener_for(&self, statement: StatementId, listener: Arc<dyn ChangeListener>) -> ListenerId {
        self.listeners.add_for(statement, listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Root contexts, sorted by id.
    pub fn roots(&self) -> Vec<StatementId> {
        self.store.roots()
    }

    /// End the session: listeners and the undo log are cleared. The store
    /// stays readable.
    pub fn close(&self) {
        self.listeners.clear();
        self.undo.clear();
        tracing::info!(statements = self.store.len(), "closed proofweb session");
    }

    pub fn info(&self) -> EngineInfo {
        let ids = self.store.ids();
        let proved = ids
            .iter()
            .filter(|&&id| self.store.get(id).is_some_and(|st| st.proved))
            .count();
        EngineInfo {
            statements: ids.len(),
            proved,
            roots: self.store.roots().len(),
            undo_batches: self.undo.len(),
            listeners: self.listeners.len(),
            data_dir: self.config.data_dir.clone(),
        }
    }
}

/// Summary information about the engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInfo {
    pub statements: usize,
    pub proved: usize,
    pub roots: usize,
    pub undo_batches: usize,
    pub listeners: usize,
    pub data_dir: Option<PathBuf>,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "proofweb engine")?;
        writeln!(f, "  statements:   {}", self.statements)?;
        writeln!(f, "  proved:       {}", self.proved)?;
        writeln!(f, "  roots:        {}", self.roots)?;
        writeln!(f, "  undo batches: {}", self.undo_batches)?;
        writeln!(f, "  listeners:    {}", self.listeners)?;
        match &self.data_dir {
            Some(dir) => write!(f, "  persistence:  {}", dir.display()),
            None => write!(f, "  persistence:  memory-only"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProofError;

    #[test]
    fn zero_undo_depth_is_rejected() {
        let config = EngineConfig {
            undo_depth: 0,
            ..Default::default()
        };
        assert!(matches!(
            Engine::new(config),
            Err(ProofError::Engine(EngineError::InvalidConfig { .. }))
        ));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("engine.toml");
        let config = EngineConfig {
            data_dir: Some(dir.path().join("data")),
            lock_timeout_ms: 250,
            undo_depth: 8,
        };
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_config_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "undo_depth = 4\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.undo_depth, 4);
        assert_eq!(config.lock_timeout_ms, 5000);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn malformed_config_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "undo_depth = \"many\"\n").unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(ProofError::Engine(EngineError::ConfigParse { .. }))
        ));
    }

    #[test]
    fn transactions_get_distinct_ids() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let a = engine.begin();
        let b = engine.begin();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn info_reports_memory_only() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let info = engine.info();
        assert_eq!(info.statements, 0);
        assert!(info.to_string().contains("memory-only"));
    }
}
