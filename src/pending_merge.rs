//! The state of an in-progress manual merge (§4.E `PendingMerge`).

use crate::hash::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single `(db, table, key)` triple left unresolved by a `Manual` merge,
/// carrying the base/head/source blob hashes the operator must choose
/// between (any side may be `None` if the row didn't exist there).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub db: String,
    pub table: String,
    pub key: String,
    pub base: Option<ObjectId>,
    pub head: Option<ObjectId>,
    pub source: Option<ObjectId>,
}

/// Identifies a conflicted row for `resolveConflict`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictKey {
    pub db: String,
    pub table: String,
    pub key: String,
}

impl Conflict {
    pub fn key(&self) -> ConflictKey {
        ConflictKey {
            db: self.db.clone(),
            table: self.table.clone(),
            key: self.key.clone(),
        }
    }
}

/// A resolution an operator has recorded for one conflicted row: a specific
/// blob to keep, or a deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Keep(ObjectId),
    Delete,
}

/// In-flight state of a merge that hasn't yet produced a merge commit. While
/// this exists, a repository is in the `Pending` state of the §4.E state
/// machine and further merges are rejected with `MergeInProgress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMerge {
    pub merge_id: String,
    pub target_branch: String,
    pub head_commit: ObjectId,
    pub source_branch: String,
    pub source_commit: ObjectId,
    pub base_commit: Option<ObjectId>,
    /// Rows already resolved (by auto-merge or by the operator), applied to
    /// the working tree once `completeMerge` runs.
    pub merged: Vec<(String, String, String, Resolution)>,
    /// Rows still waiting on an explicit `resolveConflict` call.
    pub unresolved: Vec<Conflict>,
    pub created_at: DateTime<Utc>,
}

impl PendingMerge {
    pub fn is_fully_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }
}
