//! Transaction batching: many row-level puts/deletes collapse into one
//! `batch_update` call and one commit (§4.D).

use crate::error::{Error, Result};
use crate::tree_engine::Change;

fn row_path(db: &str, table: &str, key: &str) -> String {
    format!("{db}/{table}/{key}")
}

#[derive(Debug, Clone)]
pub enum TxnOp {
    Put { db: String, table: String, key: String, bytes: Vec<u8> },
    Del { db: String, table: String, key: String },
}

/// An open, uncommitted transaction. Its ops accumulate in memory; nothing
/// touches the object store until [`Transaction::commit`].
#[derive(Debug, Default)]
pub struct Transaction {
    ops: Vec<TxnOp>,
    started: bool,
}

impl Transaction {
    pub fn begin() -> Self {
        Self {
            ops: Vec::new(),
            started: true,
        }
    }

    pub fn add_put(&mut self, db: impl Into<String>, table: impl Into<String>, key: impl Into<String>, bytes: Vec<u8>) -> Result<()> {
        self.require_started()?;
        self.ops.push(TxnOp::Put {
            db: db.into(),
            table: table.into(),
            key: key.into(),
            bytes,
        });
        Ok(())
    }

    pub fn add_del(&mut self, db: impl Into<String>, table: impl Into<String>, key: impl Into<String>) -> Result<()> {
        self.require_started()?;
        self.ops.push(TxnOp::Del {
            db: db.into(),
            table: table.into(),
            key: key.into(),
        });
        Ok(())
    }

    pub fn operation_count(&self) -> usize {
        self.ops.len()
    }

    pub fn rollback(&mut self) {
        self.ops.clear();
        self.started = false;
    }

    pub fn ops(&self) -> &[TxnOp] {
        &self.ops
    }

    fn require_started(&self) -> Result<()> {
        if self.started {
            Ok(())
        } else {
            Err(Error::NoTransaction)
        }
    }

    /// Consume the transaction's ops, writing any new blobs and returning
    /// the `Change` list `batch_update` expects. Errors with `Empty` if no
    /// operations were recorded.
    pub fn into_changes(self, store: &dyn crate::store::ObjectStore) -> Result<Vec<Change>> {
        if self.ops.is_empty() {
            return Err(Error::Empty("transaction has no operations".into()));
        }
        self.ops
            .into_iter()
            .map(|op| match op {
                TxnOp::Put { db, table, key, bytes } => {
                    let hash = store.put_blob(&bytes)?;
                    Ok(Change::Put {
                        path: row_path(&db, &table, &key),
                        blob_hash: hash,
                    })
                }
                TxnOp::Del { db, table, key } => Ok(Change::Delete {
                    path: row_path(&db, &table, &key),
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn empty_transaction_commit_is_rejected() {
        let store = MemoryStore::new();
        let txn = Transaction::begin();
        assert!(matches!(txn.into_changes(&store), Err(Error::Empty(_))));
    }

    #[test]
    fn ops_after_rollback_are_rejected() {
        let mut txn = Transaction::begin();
        txn.rollback();
        assert!(matches!(txn.add_put("d", "t", "k", vec![1]), Err(Error::NoTransaction)));
    }

    #[test]
    fn multiple_ops_produce_one_change_per_op() {
        let store = MemoryStore::new();
        let mut txn = Transaction::begin();
        txn.add_put("d", "t", "a", b"1".to_vec()).unwrap();
        txn.add_put("d", "t", "b", b"2".to_vec()).unwrap();
        txn.add_del("d", "t", "c").unwrap();
        assert_eq!(txn.operation_count(), 3);
        let changes = txn.into_changes(&store).unwrap();
        assert_eq!(changes.len(), 3);
    }
}
