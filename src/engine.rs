//! The top-level engine: the external interface (§6) wiring together the
//! object store, ref/commit manager, transaction layer, and merge engine
//! behind a single reader-writer lock over mutable repository state.
//!
//! Per §5, the lock only guards `refs` and any pending merge — the object
//! store handles are independently thread-safe and can be shared across
//! tasks without going through this lock at all.

use crate::bloom::BloomFilter;
use crate::commits::{self, Outcome};
use crate::compaction::{self, CompactionPolicy, CompactionResult};
use crate::error::{Error, Result};
use crate::hash::ObjectId;
use crate::identity::Identity;
use crate::index::IndexManager;
use crate::merge::{self, MergeOutcome, MergeStrategy};
use crate::object::{Commit, Signature};
use crate::pending_merge::{ConflictKey, PendingMerge, Resolution};
use crate::refs::{Head, RefsState};
use crate::store::{FileStore, MemoryStore, ObjectStore};
use crate::tree_engine;
use crate::txn::Transaction;
use crate::wal::Wal;
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, instrument};

/// Where an engine's objects and refs live.
pub enum Backend {
    Memory,
    File { base_dir: PathBuf },
}

pub struct EngineConfig {
    pub backend: Backend,
    pub identity: Identity,
}

struct EngineState {
    refs: RefsState,
    pending: Option<PendingMerge>,
}

/// A handle to one repository. Cheap to clone (internally `Arc`-backed);
/// clones share the same lock and object store.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn ObjectStore>,
    state: Arc<RwLock<EngineState>>,
    identity: Identity,
    /// Fast negative-lookup cache over every row path reachable from any
    /// branch tip, across all branches; a cheap pre-filter ahead of the tree
    /// walk in `get_row`. Never produces false negatives: rebuilt from the
    /// current trees on `open` (see `build_bloom`) and kept current by
    /// every subsequent `commit_txn`, so stale entries from a now-deleted
    /// row only cost a wasted tree lookup, not correctness.
    bloom: Arc<Mutex<BloomFilter>>,
    indexes: Arc<Mutex<IndexManager>>,
    /// Present only for the file backend: a write-ahead log guarding each
    /// transaction commit, replayed (by discarding anything left
    /// uncommitted) the next time this repository is opened.
    wal: Option<Arc<Mutex<Wal>>>,
}

impl Engine {
    /// Create a brand-new, empty repository. Fails with `Exists` if the
    /// backend already holds ref state.
    #[instrument(skip(config))]
    pub fn init(config: EngineConfig) -> Result<Self> {
        let store = build_store(&config.backend)?;
        if store.load_refs().is_ok() {
            return Err(Error::Exists("repository already initialised".into()));
        }
        let refs = RefsState::fresh();
        store.save_refs(&refs)?;
        let wal = open_wal(&config.backend)?;
        let bloom = build_bloom(&*store, &refs)?;
        info!("initialised new repository");
        Ok(Self {
            store,
            state: Arc::new(RwLock::new(EngineState { refs, pending: None })),
            identity: config.identity,
            bloom: Arc::new(Mutex::new(bloom)),
            indexes: Arc::new(Mutex::new(IndexManager::new())),
            wal,
        })
    }

    /// Open an existing repository. Fails with `Uninitialised` if no ref
    /// state has ever been saved.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let store = build_store(&config.backend)?;
        let refs = store.load_refs()?;
        let pending = store.load_pending_merge()?;
        let wal = open_wal(&config.backend)?;
        if let Some(wal) = &wal {
            // Anything left uncommitted from a prior crash never touched
            // the object store, so recovery is a truncate, not a replay.
            let mut wal = wal.lock().unwrap();
            wal.recover()?;
            wal.truncate()?;
        }
        // Rebuild the bloom filter from every branch tip's tree so it
        // reflects the reopened repository's actual contents rather than
        // starting empty — an empty filter here would false-negative every
        // row written before this process started.
        let bloom = build_bloom(&*store, &refs)?;
        Ok(Self {
            store,
            state: Arc::new(RwLock::new(EngineState { refs, pending })),
            identity: config.identity,
            bloom: Arc::new(Mutex::new(bloom)),
            indexes: Arc::new(Mutex::new(IndexManager::new())),
            wal,
        })
    }

    fn persist_refs(&self, refs: &RefsState) -> Result<()> {
        self.store.save_refs(refs)?;
        let tree = self.head_tree(refs)?;
        self.store.reconcile_worktree(tree.as_deref())
    }

    fn persist_pending(&self, pending: Option<&PendingMerge>) -> Result<()> {
        self.store.save_pending_merge(pending)
    }

    fn head_tree(&self, refs: &RefsState) -> Result<Option<String>> {
        match commits::resolve_head(refs) {
            Ok(id) => Ok(Some(commits::get_commit(&*self.store, &id)?.tree_hash)),
            Err(Error::Unborn(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ── Row reads ──────────────────────────────────────────────

    pub fn get_row(&self, db: &str, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = format!("{db}/{table}/{key}");
        {
            let bloom = self.bloom.lock().unwrap();
            if !bloom.may_contain(path.as_bytes()) {
                return Ok(None);
            }
        }
        let refs = self.state.read().unwrap().refs.clone();
        let root = self.head_tree(&refs)?;
        self.get_row_in_tree(root.as_deref(), db, table, key)
    }

    pub fn get_row_at(&self, commit: &str, db: &str, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let refs = self.state.read().unwrap().refs.clone();
        let resolved = commits::resolve(&*self.store, &refs, commit)?;
        let tree = commits::get_commit(&*self.store, &resolved)?.tree_hash;
        self.get_row_in_tree(Some(&tree), db, table, key)
    }

    fn get_row_in_tree(&self, root: Option<&str>, db: &str, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = format!("{db}/{table}/{key}");
        match tree_engine::read_path(&*self.store, root, &path)? {
            Some(hash) => {
                let blob = self.store.get_object(&hash)?;
                Ok(blob.as_blob().map(|b| b.data.clone()))
            }
            None => Ok(None),
        }
    }

    pub fn list_keys(&self, db: &str, table: &str) -> Result<Vec<String>> {
        let refs = self.state.read().unwrap().refs.clone();
        let root = self.head_tree(&refs)?;
        self.list_keys_in_tree(root.as_deref(), db, table)
    }

    pub fn list_keys_at(&self, commit: &str, db: &str, table: &str) -> Result<Vec<String>> {
        let refs = self.state.read().unwrap().refs.clone();
        let resolved = commits::resolve(&*self.store, &refs, commit)?;
        let tree = commits::get_commit(&*self.store, &resolved)?.tree_hash;
        self.list_keys_in_tree(Some(&tree), db, table)
    }

    fn list_keys_in_tree(&self, root: Option<&str>, db: &str, table: &str) -> Result<Vec<String>> {
        let path = format!("{db}/{table}");
        match tree_engine::list_dir(&*self.store, root, &path)? {
            Some(entries) => Ok(entries.into_iter().map(|e| e.name).collect()),
            None => Ok(Vec::new()),
        }
    }

    pub fn list_tables(&self, db: &str) -> Result<Vec<String>> {
        let refs = self.state.read().unwrap().refs.clone();
        let root = self.head_tree(&refs)?;
        match tree_engine::list_dir(&*self.store, root.as_deref(), db)? {
            Some(entries) => Ok(entries.into_iter().map(|e| e.name).collect()),
            None => Ok(Vec::new()),
        }
    }

    pub fn list_databases(&self) -> Result<Vec<String>> {
        let refs = self.state.read().unwrap().refs.clone();
        let root = self.head_tree(&refs)?;
        match tree_engine::list_dir(&*self.store, root.as_deref(), "")? {
            Some(entries) => Ok(entries.into_iter().map(|e| e.name).collect()),
            None => Ok(Vec::new()),
        }
    }

    /// Scan every `(key, value)` pair under a table's current tree.
    pub fn scan(&self, db: &str, table: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let refs = self.state.read().unwrap().refs.clone();
        let root = self.head_tree(&refs)?;
        let path = format!("{db}/{table}");
        let sub_root = match tree_engine::list_dir(&*self.store, root.as_deref(), &path)? {
            Some(_) => root.as_deref(),
            None => return Ok(Vec::new()),
        };
        let leaves = tree_engine::walk_leaves(&*self.store, sub_root)?;
        let prefix = format!("{path}/");
        let mut out = Vec::new();
        for (leaf_path, hash) in leaves {
            if let Some(key) = leaf_path.strip_prefix(&prefix) {
                let blob = self.store.get_object(&hash)?;
                if let Some(b) = blob.as_blob() {
                    out.push((key.to_string(), b.data.clone()));
                }
            }
        }
        Ok(out)
    }

    // ── Transactions ───────────────────────────────────────────

    pub fn begin(&self) -> Result<Transaction> {
        // Reading refs here only to confirm the repository is initialised;
        // the transaction itself touches no shared state until commit.
        let _ = self.state.read().unwrap();
        Ok(Transaction::begin())
    }

    #[instrument(skip(self, txn))]
    pub fn commit_txn(&self, txn: Transaction, message: impl Into<String>) -> Result<Outcome> {
        use crate::txn::TxnOp;

        let row_ops: Vec<TxnOp> = txn.ops().to_vec();
        let wal_tx = self.wal_begin(&row_ops)?;

        let changes = txn.into_changes(&*self.store)?;
        let mut guard = self.state.write().unwrap();
        if guard.pending.is_some() {
            return Err(Error::MergeInProgress(
                guard.pending.as_ref().unwrap().merge_id.clone(),
            ));
        }
        let branch = current_branch_name(&guard.refs)?;
        let parent = guard.refs.branches.get(&branch).cloned();
        let root = match &parent {
            Some(id) => Some(commits::get_commit(&*self.store, id)?.tree_hash),
            None => None,
        };
        let new_root = tree_engine::batch_update(&*self.store, root.as_deref(), &changes)?;
        let tree_hash = new_root.unwrap_or_else(|| crate::object::Tree::empty().hash());
        let sig = Signature::new(self.identity.clone(), Utc::now());
        let outcome = commits::create_commit(
            &*self.store,
            &tree_hash,
            parent.clone().into_iter().collect(),
            sig.clone(),
            sig,
            message.into(),
        )?;
        if let Outcome::Created(id) = &outcome {
            guard.refs.branches.insert(branch, id.clone());
            self.persist_refs(&guard.refs)?;
        }
        self.wal_commit(wal_tx, &outcome)?;
        self.update_bloom_and_indexes(&row_ops);
        debug!(?outcome, "transaction committed");
        Ok(outcome)
    }

    fn wal_begin(&self, ops: &[crate::txn::TxnOp]) -> Result<Option<u64>> {
        use crate::txn::TxnOp;
        let Some(wal) = &self.wal else { return Ok(None) };
        let mut wal = wal.lock().unwrap();
        let tx_id = wal.begin()?;
        for op in ops {
            match op {
                TxnOp::Put { db, table, key, bytes } => {
                    wal.log_write(tx_id, format!("{db}/{table}/{key}"), bytes.clone())?
                }
                TxnOp::Del { db, table, key } => wal.log_delete(tx_id, format!("{db}/{table}/{key}"))?,
            }
        }
        Ok(Some(tx_id))
    }

    fn wal_commit(&self, tx_id: Option<u64>, outcome: &Outcome) -> Result<()> {
        let (Some(wal), Some(tx_id)) = (&self.wal, tx_id) else { return Ok(()) };
        let commit_id = match outcome {
            Outcome::Created(id) => id.clone(),
            Outcome::Unchanged => "unchanged".to_string(),
        };
        wal.lock().unwrap().commit(tx_id, commit_id)
    }

    fn update_bloom_and_indexes(&self, ops: &[crate::txn::TxnOp]) {
        use crate::txn::TxnOp;
        let mut bloom = self.bloom.lock().unwrap();
        let mut indexes = self.indexes.lock().unwrap();
        for op in ops {
            match op {
                TxnOp::Put { db, table, key, bytes } => {
                    let path = format!("{db}/{table}/{key}");
                    bloom.insert(path.as_bytes());
                    indexes.on_put(&path, bytes);
                }
                TxnOp::Del { db, table, key } => {
                    indexes.on_delete(&format!("{db}/{table}/{key}"));
                }
            }
        }
    }

    // ── Branches ───────────────────────────────────────────────

    pub fn current_branch(&self) -> Result<String> {
        let guard = self.state.read().unwrap();
        current_branch_name(&guard.refs)
    }

    pub fn list_branches(&self) -> Vec<String> {
        self.state.read().unwrap().refs.known_branches.iter().cloned().collect()
    }

    pub fn create_branch(&self, name: &str) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        let head = commits::resolve_head(&guard.refs)?;
        commits::create_branch(&mut guard.refs, name, head)?;
        self.persist_refs(&guard.refs)
    }

    pub fn checkout(&self, name: &str) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        commits::checkout(&mut guard.refs, name)?;
        self.persist_refs(&guard.refs)
    }

    pub fn delete_branch(&self, name: &str) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        commits::delete_branch(&mut guard.refs, name)?;
        self.persist_refs(&guard.refs)
    }

    pub fn rename_branch(&self, from: &str, to: &str) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        commits::rename_branch(&mut guard.refs, from, to)?;
        self.persist_refs(&guard.refs)
    }

    pub fn tag(&self, name: &str, commit: Option<&str>, message: Option<String>) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        let target = match commit {
            Some(rev) => commits::resolve(&*self.store, &guard.refs, rev)?,
            None => commits::resolve_head(&guard.refs)?,
        };
        commits::create_tag(&mut guard.refs, name, target, message)?;
        self.persist_refs(&guard.refs)
    }

    pub fn log(&self, from: &str) -> Result<Vec<(ObjectId, Commit)>> {
        let guard = self.state.read().unwrap();
        let start = commits::resolve(&*self.store, &guard.refs, from)?;
        crate::commits::HistoryIter::new(&*self.store, start)?.collect()
    }

    pub fn resolve(&self, rev: &str) -> Result<ObjectId> {
        let guard = self.state.read().unwrap();
        commits::resolve(&*self.store, &guard.refs, rev)
    }

    /// Hard-reset the current branch to a tag's commit (§4.C `recover`).
    /// No new commit is written — the branch ref itself moves, so reads
    /// after this call see exactly the tagged tree, including the absence
    /// of any row added after the tag.
    #[instrument(skip(self))]
    pub fn recover(&self, tag: &str) -> Result<ObjectId> {
        let mut guard = self.state.write().unwrap();
        if let Some(pending) = &guard.pending {
            return Err(Error::MergeInProgress(pending.merge_id.clone()));
        }
        let target = guard
            .refs
            .tags
            .get(tag)
            .map(|t| t.commit_id.clone())
            .ok_or_else(|| Error::NotFound(tag.to_string()))?;
        let branch = current_branch_name(&guard.refs)?;
        guard.refs.branches.insert(branch, target.clone());
        self.persist_refs(&guard.refs)?;
        info!(tag, commit = %target, "recovered branch to tag");
        Ok(target)
    }

    /// Selectively hard-reset part of the tree to its state at a historical
    /// transaction (§6 `restore`): `db`/`table` narrow the scope to a single
    /// database or table; `(None, None)` restores everything. Writes one new
    /// commit grafting the historical subtree back into the current HEAD,
    /// via [`commits::create_commit`] so a no-op restore still elides.
    #[instrument(skip(self, message))]
    pub fn restore(
        &self,
        txn_id: &str,
        db: Option<&str>,
        table: Option<&str>,
        message: impl Into<String>,
    ) -> Result<Outcome> {
        let mut guard = self.state.write().unwrap();
        if let Some(pending) = &guard.pending {
            return Err(Error::MergeInProgress(pending.merge_id.clone()));
        }
        let branch = current_branch_name(&guard.refs)?;
        let target_commit = commits::resolve(&*self.store, &guard.refs, txn_id)?;
        let historical_tree = commits::get_commit(&*self.store, &target_commit)?.tree_hash;

        let scope = match (db, table) {
            (Some(d), Some(t)) => format!("{d}/{t}"),
            (Some(d), None) => d.to_string(),
            (None, None) => String::new(),
        };

        let historical_subtree = if scope.is_empty() {
            Some(historical_tree)
        } else {
            tree_engine::read_subtree_hash(&*self.store, Some(&historical_tree), &scope)?
        };

        let parent = guard.refs.branches.get(&branch).cloned();
        let current_root = match &parent {
            Some(id) => Some(commits::get_commit(&*self.store, id)?.tree_hash),
            None => None,
        };
        let new_root = if scope.is_empty() {
            historical_subtree
        } else {
            tree_engine::set_subtree(&*self.store, current_root.as_deref(), &scope, historical_subtree)?
        };
        let tree_hash = new_root.unwrap_or_else(|| crate::object::Tree::empty().hash());

        let sig = Signature::new(self.identity.clone(), Utc::now());
        let outcome = commits::create_commit(
            &*self.store,
            &tree_hash,
            parent.into_iter().collect(),
            sig.clone(),
            sig,
            message.into(),
        )?;
        if let Outcome::Created(id) = &outcome {
            guard.refs.branches.insert(branch, id.clone());
            self.persist_refs(&guard.refs)?;
        }
        debug!(?outcome, txn_id, scope, "restore completed");
        Ok(outcome)
    }

    // ── Merge ──────────────────────────────────────────────────

    #[instrument(skip(self))]
    pub fn merge(&self, source_branch: &str, strategy: MergeStrategy) -> Result<MergeOutcome> {
        let mut guard = self.state.write().unwrap();
        if let Some(pending) = &guard.pending {
            return Err(Error::MergeInProgress(pending.merge_id.clone()));
        }
        let target_branch = current_branch_name(&guard.refs)?;
        let head_commit = commits::resolve_head(&guard.refs)?;
        let source_commit = guard
            .refs
            .branches
            .get(source_branch)
            .cloned()
            .ok_or_else(|| Error::NotFound(source_branch.to_string()))?;

        let sig = Signature::new(self.identity.clone(), Utc::now());
        let outcome = merge::merge(
            &*self.store,
            strategy,
            &target_branch,
            &head_commit,
            source_branch,
            &source_commit,
            sig.clone(),
            sig,
        )?;

        match &outcome {
            MergeOutcome::Completed(id) => {
                guard.refs.branches.insert(target_branch, id.clone());
                self.persist_refs(&guard.refs)?;
            }
            MergeOutcome::Pending(pending) => {
                guard.pending = Some(pending.clone());
                self.persist_pending(Some(pending))?;
            }
            MergeOutcome::AlreadyUpToDate => {}
        }
        Ok(outcome)
    }

    pub fn resolve_conflict(&self, key: &ConflictKey, resolution: Resolution) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        let mut pending = guard.pending.take().ok_or(Error::NoPending)?;
        let result = merge::resolve_conflict(&mut pending, key, resolution);
        guard.pending = Some(pending.clone());
        self.persist_pending(Some(&pending))?;
        result
    }

    pub fn complete_merge(&self, message: impl Into<String>) -> Result<ObjectId> {
        let mut guard = self.state.write().unwrap();
        let pending = guard.pending.take().ok_or(Error::NoPending)?;
        let sig = Signature::new(self.identity.clone(), Utc::now());
        let commit_id = match merge::complete_merge(&*self.store, &pending, sig.clone(), sig, message.into()) {
            Ok(id) => id,
            Err(e) => {
                guard.pending = Some(pending);
                return Err(e);
            }
        };
        guard.refs.branches.insert(pending.target_branch.clone(), commit_id.clone());
        self.persist_refs(&guard.refs)?;
        self.persist_pending(None)?;
        Ok(commit_id)
    }

    pub fn abort_merge(&self) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        if guard.pending.take().is_none() {
            return Err(Error::NoPending);
        }
        self.persist_pending(None)?;
        // Nothing in a pending manual merge touches refs or the worktree
        // before `complete_merge`, so this just reaffirms the worktree
        // already matches current HEAD, per §4.E's "hard-reset" wording.
        let tree = self.head_tree(&guard.refs)?;
        self.store.reconcile_worktree(tree.as_deref())
    }

    pub fn pending_merge(&self) -> Option<PendingMerge> {
        self.state.read().unwrap().pending.clone()
    }

    // ── Secondary indexes ────────────────────────────────────────
    //
    // Indexed over row paths as they're written, independent of branch —
    // a convenience layer on top of the object model, not part of it.

    pub fn create_index(&self, name: &str, field_path: &str) -> Result<()> {
        self.indexes.lock().unwrap().create_index(name, field_path)
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.indexes.lock().unwrap().drop_index(name)
    }

    pub fn query_index(&self, name: &str, value: &str) -> Result<Vec<String>> {
        self.indexes.lock().unwrap().query(name, value)
    }

    pub fn list_indexes(&self) -> Vec<String> {
        self.indexes.lock().unwrap().list_indexes()
    }

    // ── Compaction ───────────────────────────────────────────────

    /// Identify commits on the current branch that `policy` marks
    /// removable and are not reachable from any other branch or tag.
    /// Commits still reachable elsewhere are reported as kept even if the
    /// policy would otherwise drop them.
    #[instrument(skip(self, policy))]
    pub fn compact(&self, policy: &CompactionPolicy) -> Result<CompactionResult> {
        let guard = self.state.read().unwrap();
        let branch = current_branch_name(&guard.refs)?;
        let head = match guard.refs.branches.get(&branch) {
            Some(h) => h.clone(),
            None => return Ok(CompactionResult::default()),
        };
        let log = crate::commits::HistoryIter::new(&*self.store, head)?.collect::<Result<Vec<_>>>()?;
        let with_ts: Vec<(String, chrono::DateTime<Utc>)> =
            log.iter().map(|(id, c)| (id.clone(), c.commit_time())).collect();
        let removable: std::collections::HashSet<String> =
            compaction::find_removable_commits(&with_ts, policy, Utc::now()).into_iter().collect();
        if removable.is_empty() {
            return Ok(CompactionResult::default());
        }

        let mut reachable_elsewhere = std::collections::HashSet::new();
        for (name, commit_id) in &guard.refs.branches {
            if name == &branch {
                continue;
            }
            for id in ancestor_ids(&*self.store, commit_id)? {
                reachable_elsewhere.insert(id);
            }
        }
        for tag in guard.refs.tags.values() {
            for id in ancestor_ids(&*self.store, &tag.commit_id)? {
                reachable_elsewhere.insert(id);
            }
        }

        let mut result = CompactionResult::default();
        for (id, _) in &log {
            if removable.contains(id) && !reachable_elsewhere.contains(id) {
                result.commits_removed += 1;
            }
        }
        // Objects themselves stay content-addressed and are not rewritten
        // here; this reports what a follow-up object-level GC could
        // reclaim without touching any other branch's view of history.
        Ok(result)
    }
}

fn ancestor_ids(store: &dyn ObjectStore, start: &str) -> Result<Vec<ObjectId>> {
    crate::commits::HistoryIter::new(store, start.to_string())?
        .map(|r| r.map(|(id, _)| id))
        .collect()
}

fn current_branch_name(refs: &RefsState) -> Result<String> {
    match &refs.head {
        Head::Symbolic(name) => Ok(name.clone()),
        Head::Detached(_) => Err(Error::Detached),
    }
}

/// Walk every branch tip's tree (deduped by tree hash) and insert every row
/// path found into a fresh bloom filter, so the filter reflects the
/// repository's actual contents from the moment an `Engine` exists — on a
/// brand-new repo this is just empty, on a reopened one it recovers what a
/// process restart would otherwise have dropped.
fn build_bloom(store: &dyn ObjectStore, refs: &RefsState) -> Result<BloomFilter> {
    let mut seen_trees: HashSet<String> = HashSet::new();
    let mut paths: Vec<String> = Vec::new();
    for commit_id in refs.branches.values() {
        let tree_hash = commits::get_commit(store, commit_id)?.tree_hash;
        if seen_trees.insert(tree_hash.clone()) {
            for (path, _blob_hash) in tree_engine::walk_leaves(store, Some(&tree_hash))? {
                paths.push(path);
            }
        }
    }
    let mut bloom = BloomFilter::new(paths.len().max(1), 0.01);
    for path in &paths {
        bloom.insert(path.as_bytes());
    }
    Ok(bloom)
}

fn build_store(backend: &Backend) -> Result<Arc<dyn ObjectStore>> {
    match backend {
        Backend::Memory => Ok(Arc::new(MemoryStore::new())),
        Backend::File { base_dir } => Ok(Arc::new(FileStore::open(base_dir)?)),
    }
}

fn open_wal(backend: &Backend) -> Result<Option<Arc<Mutex<Wal>>>> {
    match backend {
        Backend::Memory => Ok(None),
        Backend::File { base_dir } => {
            let wal_dir = base_dir.join(".commitdb").join("wal");
            Ok(Some(Arc::new(Mutex::new(Wal::open(&wal_dir)?))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_engine() -> Engine {
        Engine::init(EngineConfig {
            backend: Backend::Memory,
            identity: Identity::new("test", "test@example.com"),
        })
        .unwrap()
    }

    #[test]
    fn reopened_file_backend_still_finds_rows_committed_before_the_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let engine = Engine::init(EngineConfig {
                backend: Backend::File { base_dir: tmp.path().to_path_buf() },
                identity: Identity::new("a", "a@x.com"),
            })
            .unwrap();
            let mut txn = engine.begin().unwrap();
            txn.add_put("db", "t", "k1", b"v1".to_vec()).unwrap();
            engine.commit_txn(txn, "first").unwrap();
        }
        // Reopen as a fresh process would: a new bloom filter starts empty
        // and must be rebuilt from the tree, not just from what gets
        // written after this point.
        let engine = Engine::open(EngineConfig {
            backend: Backend::File { base_dir: tmp.path().to_path_buf() },
            identity: Identity::new("a", "a@x.com"),
        })
        .unwrap();
        let mut txn = engine.begin().unwrap();
        txn.add_put("db", "t", "k2", b"v2".to_vec()).unwrap();
        engine.commit_txn(txn, "second").unwrap();

        assert_eq!(engine.get_row("db", "t", "k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(engine.get_row("db", "t", "k2").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn open_before_init_fails() {
        let err = Engine::open(EngineConfig {
            backend: Backend::Memory,
            identity: Identity::new("a", "a@x.com"),
        })
        .unwrap_err();
        assert!(matches!(err, Error::Uninitialised));
    }

    #[test]
    fn put_and_get_round_trips() {
        let engine = memory_engine();
        let mut txn = engine.begin().unwrap();
        txn.add_put("shop", "orders", "o1", b"hello".to_vec()).unwrap();
        engine.commit_txn(txn, "add order").unwrap();
        assert_eq!(engine.get_row("shop", "orders", "o1").unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn unborn_head_has_no_rows() {
        let engine = memory_engine();
        assert_eq!(engine.get_row("shop", "orders", "o1").unwrap(), None);
    }

    #[test]
    fn branch_checkout_isolates_writes() {
        let engine = memory_engine();
        let mut txn = engine.begin().unwrap();
        txn.add_put("d", "t", "shared", b"1".to_vec()).unwrap();
        engine.commit_txn(txn, "base").unwrap();

        engine.create_branch("feature").unwrap();
        engine.checkout("feature").unwrap();
        let mut txn = engine.begin().unwrap();
        txn.add_put("d", "t", "only_feature", b"2".to_vec()).unwrap();
        engine.commit_txn(txn, "feature work").unwrap();

        engine.checkout("main").unwrap();
        assert_eq!(engine.get_row("d", "t", "only_feature").unwrap(), None);
        assert_eq!(engine.get_row("d", "t", "shared").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn row_level_merge_merges_cleanly() {
        let engine = memory_engine();
        let mut txn = engine.begin().unwrap();
        txn.add_put("d", "t", "base", b"0".to_vec()).unwrap();
        engine.commit_txn(txn, "base").unwrap();

        engine.create_branch("feature").unwrap();
        engine.checkout("feature").unwrap();
        let mut txn = engine.begin().unwrap();
        txn.add_put("d", "t", "feat", b"1".to_vec()).unwrap();
        engine.commit_txn(txn, "feat").unwrap();

        engine.checkout("main").unwrap();
        let outcome = engine.merge("feature", MergeStrategy::RowLevel).unwrap();
        assert!(matches!(outcome, MergeOutcome::Completed(_)));
        assert_eq!(engine.get_row("d", "t", "feat").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn manual_merge_requires_resolution_before_completion() {
        let engine = memory_engine();
        let mut txn = engine.begin().unwrap();
        txn.add_put("d", "t", "k", b"0".to_vec()).unwrap();
        engine.commit_txn(txn, "base").unwrap();

        engine.create_branch("feature").unwrap();
        engine.checkout("feature").unwrap();
        let mut txn = engine.begin().unwrap();
        txn.add_put("d", "t", "k", b"feature".to_vec()).unwrap();
        engine.commit_txn(txn, "feature change").unwrap();

        engine.checkout("main").unwrap();
        let mut txn = engine.begin().unwrap();
        txn.add_put("d", "t", "k", b"main".to_vec()).unwrap();
        engine.commit_txn(txn, "main change").unwrap();

        let outcome = engine.merge("feature", MergeStrategy::Manual).unwrap();
        assert!(matches!(outcome, MergeOutcome::Pending(_)));
        assert!(matches!(engine.complete_merge("merge"), Err(Error::Remaining(1))));

        let key = ConflictKey { db: "d".into(), table: "t".into(), key: "k".into() };
        let source_hash = engine.pending_merge().unwrap().unresolved[0].source.clone().unwrap();
        engine.resolve_conflict(&key, Resolution::Keep(source_hash)).unwrap();
        engine.complete_merge("merge resolved").unwrap();
        assert_eq!(engine.get_row("d", "t", "k").unwrap(), Some(b"feature".to_vec()));
    }

    #[test]
    fn recover_resets_branch_to_tag_and_hides_later_rows() {
        let engine = memory_engine();
        let mut txn = engine.begin().unwrap();
        txn.add_put("d", "t", "k1", b"v1".to_vec()).unwrap();
        engine.commit_txn(txn, "base").unwrap();
        engine.tag("v1", None, None).unwrap();

        let mut txn = engine.begin().unwrap();
        txn.add_put("d", "t", "k2", b"v2".to_vec()).unwrap();
        engine.commit_txn(txn, "after tag").unwrap();
        assert_eq!(engine.get_row("d", "t", "k2").unwrap(), Some(b"v2".to_vec()));

        let tag_commit = engine.resolve("v1").unwrap();
        let recovered = engine.recover("v1").unwrap();
        assert_eq!(recovered, tag_commit);
        assert_eq!(engine.get_row("d", "t", "k2").unwrap(), None);
        assert_eq!(engine.get_row("d", "t", "k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(engine.resolve("HEAD").unwrap(), tag_commit);
    }

    #[test]
    fn restore_scoped_to_table_only_reverts_that_table() {
        let engine = memory_engine();
        let mut txn = engine.begin().unwrap();
        txn.add_put("d", "t", "k", b"v1".to_vec()).unwrap();
        txn.add_put("d", "other", "k", b"o1".to_vec()).unwrap();
        engine.commit_txn(txn, "base").unwrap();
        let base_commit = engine.resolve("HEAD").unwrap();

        let mut txn = engine.begin().unwrap();
        txn.add_put("d", "t", "k", b"v2".to_vec()).unwrap();
        txn.add_put("d", "other", "k", b"o2".to_vec()).unwrap();
        engine.commit_txn(txn, "both changed").unwrap();

        engine.restore(&base_commit, Some("d"), Some("t"), "restore t").unwrap();
        assert_eq!(engine.get_row("d", "t", "k").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(engine.get_row("d", "other", "k").unwrap(), Some(b"o2".to_vec()));
    }

    #[test]
    fn second_merge_while_pending_is_rejected() {
        let engine = memory_engine();
        let mut txn = engine.begin().unwrap();
        txn.add_put("d", "t", "k", b"0".to_vec()).unwrap();
        engine.commit_txn(txn, "base").unwrap();
        engine.create_branch("feature").unwrap();
        engine.checkout("feature").unwrap();
        let mut txn = engine.begin().unwrap();
        txn.add_put("d", "t", "k", b"f".to_vec()).unwrap();
        engine.commit_txn(txn, "f").unwrap();
        engine.checkout("main").unwrap();
        let mut txn = engine.begin().unwrap();
        txn.add_put("d", "t", "k", b"m".to_vec()).unwrap();
        engine.commit_txn(txn, "m").unwrap();

        engine.merge("feature", MergeStrategy::Manual).unwrap();
        assert!(matches!(
            engine.merge("feature", MergeStrategy::Manual),
            Err(Error::MergeInProgress(_))
        ));
    }
}
