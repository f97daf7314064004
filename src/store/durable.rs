//! ACID-durable tier backed by redb.
//!
//! Statement and authority records are stored as bincode blobs keyed by the
//! raw statement id. A transaction's touched records are written in a single
//! redb write transaction at commit, so a crash never leaves half a commit on
//! disk.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;
use crate::store::StoreResult;

/// Statement records (statement id → bincode `Statement`).
const STATEMENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("statements");

/// Authority records (statement id → bincode `StatementAuthority`).
const AUTHORITIES: TableDefinition<u64, &[u8]> = TableDefinition::new("authorities");

/// File name of the database inside the data directory.
pub const DB_FILE: &str = "proofweb.redb";

fn redb_err<E: std::fmt::Display>(what: &'static str) -> impl FnOnce(E) -> StoreError {
    move |e| StoreError::Redb {
        message: format!("{what} failed: {e}"),
    }
}

/// One commit's worth of writes. `None` deletes the record.
#[derive(Debug, Default)]
pub struct DurableBatch {
    pub statements: Vec<(u64, Option<Vec<u8>>)>,
    pub authorities: Vec<(u64, Option<Vec<u8>>)>,
}

impl DurableBatch {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.authorities.is_empty()
    }
}

/// ACID-durable store using redb.
pub struct DurableStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore").finish_non_exhaustive()
    }
}

impl DurableStore {
    /// Open or create the database in `data_dir`, creating both tables.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join(DB_FILE);
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;

        let txn = db.begin_write().map_err(redb_err("begin_write"))?;
        {
            txn.open_table(STATEMENTS).map_err(redb_err("open_table"))?;
            txn.open_table(AUTHORITIES).map_err(redb_err("open_table"))?;
        }
        txn.commit().map_err(redb_err("commit"))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Apply a batch atomically.
    pub fn apply(&self, batch: &DurableBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        {
            let mut table = txn.open_table(STATEMENTS).map_err(redb_err("open_table"))?;
            for (key, value) in &batch.statements {
                match value {
                    Some(bytes) => {
                        table
                            .insert(*key, bytes.as_slice())
                            .map_err(redb_err("insert"))?;
                    }
                    None => {
                        table.remove(*key).map_err(redb_err("remove"))?;
                    }
                }
            }
        }
        {
            let mut table = txn.open_table(AUTHORITIES).map_err(redb_err("open_table"))?;
            for (key, value) in &batch.authorities {
                match value {
                    Some(bytes) => {
                        table
                            .insert(*key, bytes.as_slice())
                            .map_err(redb_err("insert"))?;
                    }
                    None => {
                        table.remove(*key).map_err(redb_err("remove"))?;
                    }
                }
            }
        }
        txn.commit().map_err(redb_err("commit"))?;
        Ok(())
    }

    /// All statement record blobs, in id order.
    pub fn load_statements(&self) -> StoreResult<Vec<(u64, Vec<u8>)>> {
        self.scan(STATEMENTS)
    }

    /// All authority record blobs, in id order.
    pub fn load_authorities(&self) -> StoreResult<Vec<(u64, Vec<u8>)>> {
        self.scan(AUTHORITIES)
    }

    fn scan(&self, def: TableDefinition<u64, &[u8]>) -> StoreResult<Vec<(u64, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let table = txn.open_table(def).map_err(redb_err("open_table"))?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(redb_err("iter"))? {
            let (key, value) = entry.map_err(redb_err("iter"))?;
            out.push((key.value(), value.value().to_vec()));
        }
        Ok(out)
    }
}
