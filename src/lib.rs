//! CommitDB core: a content-addressed, version-controlled relational
//! storage engine. Rows live under `db/table/key` paths inside nested
//! copy-on-write trees, snapshotted by commits, and reconciled across
//! branches with three-way row-level merge (§3–§6).

pub mod bloom;
pub mod commits;
pub mod compaction;
pub mod compression;
pub mod engine;
pub mod error;
pub mod hash;
pub mod identity;
pub mod index;
pub mod merge;
pub mod object;
pub mod pending_merge;
pub mod refs;
pub mod store;
pub mod tree_engine;
pub mod txn;
pub mod wal;

pub use engine::{Backend, Engine, EngineConfig};
pub use error::{Error, Result};
pub use hash::ObjectId;
pub use identity::Identity;
pub use merge::{MergeOutcome, MergeStrategy};
pub use pending_merge::{Conflict, ConflictKey, PendingMerge, Resolution};
