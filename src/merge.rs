//! Three-way merge across branches (§4.E).
//!
//! The scan walks every `(db, table, key)` triple that exists in the base,
//! head, or source tree and classifies it by comparing the three blob
//! hashes. Under `RowLevel`, rows that both sides changed differently are
//! resolved by last-writer-wins using each branch's HEAD commit time — one
//! comparison for the whole merge, not a per-row timestamp. Under `Manual`,
//! such rows become conflicts collected into a [`PendingMerge`] for the
//! caller to resolve one at a time.

use crate::commits::{find_merge_base, get_commit};
use crate::error::{Error, Result};
use crate::hash::ObjectId;
use crate::object::{Commit, Signature};
use crate::pending_merge::{Conflict, ConflictKey, PendingMerge, Resolution};
use crate::store::ObjectStore;
use crate::tree_engine::{self, Change};
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    FastForwardOnly,
    RowLevel,
    Manual,
}

/// Outcome of attempting a merge.
pub enum MergeOutcome {
    /// The merge completed immediately (fast-forward, or `RowLevel` with no
    /// unresolved conflicts) and produced a new HEAD.
    Completed(ObjectId),
    /// `Manual` merge started but left conflicts; the caller must
    /// `resolve_conflict` each one and then `complete_merge`.
    Pending(PendingMerge),
    /// Head already contains source; nothing to do.
    AlreadyUpToDate,
}

/// A classified per-row change relative to the merge base, before conflict
/// resolution.
enum RowChange {
    /// `head == source`: nothing to reconcile, whether or not either side
    /// moved away from `base`.
    Unchanged,
    OnlyHead(Option<ObjectId>),
    OnlySource(Option<ObjectId>),
    Conflicting {
        base: Option<ObjectId>,
        head: Option<ObjectId>,
        source: Option<ObjectId>,
    },
}

fn classify(base: Option<&ObjectId>, head: Option<&ObjectId>, source: Option<&ObjectId>) -> RowChange {
    match (base, head, source) {
        (_, h, s) if h == s => RowChange::Unchanged,
        (b, h, s) if b == h => RowChange::OnlySource(s.cloned()),
        (b, h, s) if b == s => RowChange::OnlyHead(h.cloned()),
        (b, h, s) => RowChange::Conflicting {
            base: b.cloned(),
            head: h.cloned(),
            source: s.cloned(),
        },
    }
}

fn split_row_path(path: &str) -> Option<(String, String, String)> {
    let mut parts = path.splitn(3, '/');
    let db = parts.next()?.to_string();
    let table = parts.next()?.to_string();
    let key = parts.next()?.to_string();
    Some((db, table, key))
}

/// Run the three-way scan over `head_tree`/`source_tree` against
/// `base_tree`, returning the set of changes to apply cleanly plus any
/// conflicts, without yet deciding how conflicts are handled.
fn scan(
    store: &dyn ObjectStore,
    base_tree: Option<&str>,
    head_tree: Option<&str>,
    source_tree: Option<&str>,
) -> Result<(Vec<Change>, Vec<Conflict>)> {
    let mut rows: BTreeMap<String, (Option<ObjectId>, Option<ObjectId>, Option<ObjectId>)> = BTreeMap::new();

    for (path, hash) in tree_engine::walk_leaves(store, base_tree)? {
        rows.entry(path).or_default().0 = Some(hash);
    }
    for (path, hash) in tree_engine::walk_leaves(store, head_tree)? {
        rows.entry(path).or_default().1 = Some(hash);
    }
    for (path, hash) in tree_engine::walk_leaves(store, source_tree)? {
        rows.entry(path).or_default().2 = Some(hash);
    }

    let mut changes = Vec::new();
    let mut conflicts = Vec::new();

    for (path, (base, head, source)) in rows {
        match classify(base.as_ref(), head.as_ref(), source.as_ref()) {
            RowChange::Unchanged | RowChange::OnlyHead(_) => {}
            RowChange::OnlySource(new_hash) => {
                changes.push(change_for(&path, new_hash));
            }
            RowChange::Conflicting { base, head, source } => {
                let (db, table, key) = split_row_path(&path)
                    .ok_or_else(|| Error::Invariant(format!("malformed row path '{path}'")))?;
                conflicts.push(Conflict { db, table, key, base, head, source });
            }
        }
    }

    Ok((changes, conflicts))
}

fn change_for(path: &str, hash: Option<ObjectId>) -> Change {
    match hash {
        Some(h) => Change::Put { path: path.to_string(), blob_hash: h },
        None => Change::Delete { path: path.to_string() },
    }
}

/// Attempt to merge `source_commit` into `head_commit` on `target_branch`
/// using `strategy`. `author`/`committer` are the identity and timestamp the
/// resulting merge commit is stamped with when the merge resolves cleanly
/// (fast-clean `RowLevel`/no-conflict case) — the caller's *current*
/// identity and time, not anything copied from either parent.
pub fn merge(
    store: &dyn ObjectStore,
    strategy: MergeStrategy,
    target_branch: &str,
    head_commit: &str,
    source_branch: &str,
    source_commit: &str,
    author: Signature,
    committer: Signature,
) -> Result<MergeOutcome> {
    if head_commit == source_commit {
        return Ok(MergeOutcome::AlreadyUpToDate);
    }

    let base = find_merge_base(store, head_commit, source_commit)?;
    let head = get_commit(store, head_commit)?;
    let source = get_commit(store, source_commit)?;

    if base.as_deref() == Some(source_commit) {
        // Source is already reachable from head: nothing to merge in.
        return Ok(MergeOutcome::AlreadyUpToDate);
    }
    if base.as_deref() == Some(head_commit) {
        // Head hasn't diverged: source is strictly ahead, fast-forward.
        return Ok(MergeOutcome::Completed(source_commit.to_string()));
    }

    if strategy == MergeStrategy::FastForwardOnly {
        return Err(Error::Diverged);
    }

    let base_tree = match &base {
        Some(id) => Some(get_commit(store, id)?.tree_hash),
        None => None,
    };
    let (mut changes, conflicts) = scan(
        store,
        base_tree.as_deref(),
        Some(&head.tree_hash),
        Some(&source.tree_hash),
    )?;

    if conflicts.is_empty() {
        return Ok(MergeOutcome::Completed(apply_merge_commit(
            store,
            &head,
            head_commit,
            source_commit,
            &mut changes,
            author,
            committer,
        )?));
    }

    match strategy {
        MergeStrategy::RowLevel => {
            // Global last-writer-wins: whichever branch's HEAD committed
            // later wins every remaining conflict.
            let source_wins = source.commit_time() > head.commit_time();
            for conflict in conflicts {
                let winner = if source_wins { conflict.source.clone() } else { conflict.head.clone() };
                changes.push(change_for(&row_path(&conflict), winner));
            }
            Ok(MergeOutcome::Completed(apply_merge_commit(
                store,
                &head,
                head_commit,
                source_commit,
                &mut changes,
                author,
                committer,
            )?))
        }
        MergeStrategy::Manual => {
            // Clean changes are staged into `merged`; conflicts wait.
            let merged = changes
                .iter()
                .filter_map(|c| match c {
                    Change::Put { path, blob_hash } => {
                        split_row_path(path).map(|(db, table, key)| (db, table, key, Resolution::Keep(blob_hash.clone())))
                    }
                    Change::Delete { path } => split_row_path(path).map(|(db, table, key)| (db, table, key, Resolution::Delete)),
                })
                .collect();
            Ok(MergeOutcome::Pending(PendingMerge {
                merge_id: Uuid::new_v4().to_string(),
                target_branch: target_branch.to_string(),
                head_commit: head_commit.to_string(),
                source_branch: source_branch.to_string(),
                source_commit: source_commit.to_string(),
                base_commit: base,
                merged,
                unresolved: conflicts,
                created_at: Utc::now(),
            }))
        }
        MergeStrategy::FastForwardOnly => unreachable!("handled above"),
    }
}

fn row_path(c: &Conflict) -> String {
    format!("{}/{}/{}", c.db, c.table, c.key)
}

fn apply_merge_commit(
    store: &dyn ObjectStore,
    head: &Commit,
    head_commit: &str,
    source_commit: &str,
    changes: &mut Vec<Change>,
    author: Signature,
    committer: Signature,
) -> Result<ObjectId> {
    let new_root = tree_engine::batch_update(store, Some(&head.tree_hash), changes)?;
    let tree_hash = new_root.unwrap_or_else(|| crate::object::Tree::empty().hash());
    let commit = Commit::new(
        tree_hash,
        vec![head_commit.to_string(), source_commit.to_string()],
        author,
        committer,
        format!("merge {source_commit} into {head_commit}"),
    );
    store.put_commit(&commit)
}

/// Record the operator's choice for one conflicted row, moving it from
/// `unresolved` to `merged`.
pub fn resolve_conflict(pending: &mut PendingMerge, key: &ConflictKey, resolution: Resolution) -> Result<()> {
    let idx = pending
        .unresolved
        .iter()
        .position(|c| &c.key() == key)
        .ok_or_else(|| Error::NotFound(format!("{}/{}/{}", key.db, key.table, key.key)))?;
    let conflict = pending.unresolved.remove(idx);
    pending
        .merged
        .push((conflict.db, conflict.table, conflict.key, resolution));
    Ok(())
}

/// Apply a fully-resolved pending merge, producing the merge commit.
pub fn complete_merge(
    store: &dyn ObjectStore,
    pending: &PendingMerge,
    author: crate::object::Signature,
    committer: crate::object::Signature,
    message: String,
) -> Result<ObjectId> {
    if !pending.is_fully_resolved() {
        return Err(Error::Remaining(pending.unresolved.len()));
    }
    let head = get_commit(store, &pending.head_commit)?;
    let changes: Vec<Change> = pending
        .merged
        .iter()
        .map(|(db, table, key, resolution)| {
            let path = format!("{db}/{table}/{key}");
            match resolution {
                Resolution::Keep(hash) => Change::Put { path, blob_hash: hash.clone() },
                Resolution::Delete => Change::Delete { path },
            }
        })
        .collect();
    let new_root = tree_engine::batch_update(store, Some(&head.tree_hash), &changes)?;
    let tree_hash = new_root.unwrap_or_else(|| crate::object::Tree::empty().hash());
    let commit = Commit::new(
        tree_hash,
        vec![pending.head_commit.clone(), pending.source_commit.clone()],
        author,
        committer,
        message,
    );
    store.put_commit(&commit)
}

/// Cross-check helper: is `maybe_ancestor` an ancestor of (or equal to)
/// `commit`? Used by callers validating fast-forward eligibility outside
/// the merge path itself (e.g. `branch --force-check`).
pub fn is_ancestor(store: &dyn ObjectStore, maybe_ancestor: &str, commit: &str) -> Result<bool> {
    if maybe_ancestor == commit {
        return Ok(true);
    }
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut frontier = vec![commit.to_string()];
    while let Some(id) = frontier.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if id == maybe_ancestor {
            return Ok(true);
        }
        let c = get_commit(store, &id)?;
        frontier.extend(c.parents);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commits::{create_commit, Outcome};
    use crate::identity::Identity;
    use crate::store::MemoryStore;

    fn sig() -> crate::object::Signature {
        crate::object::Signature::new(Identity::new("a", "a@x.com"), Utc::now())
    }

    fn commit_tree(store: &MemoryStore, parents: Vec<ObjectId>, path: &str, value: &[u8]) -> ObjectId {
        let parent_tree = parents
            .first()
            .map(|p| get_commit(store, p).unwrap().tree_hash);
        let blob = store.put_blob(value).unwrap();
        let tree = tree_engine::update_path(store, parent_tree.as_deref(), path, &blob).unwrap();
        match create_commit(store, &tree, parents, sig(), sig(), "c".into()).unwrap() {
            Outcome::Created(id) => id,
            Outcome::Unchanged => panic!("expected a new commit"),
        }
    }

    #[test]
    fn fast_forward_merge_just_moves_head() {
        let store = MemoryStore::new();
        let root = commit_tree(&store, vec![], "db/t/k1", b"1");
        let ahead = commit_tree(&store, vec![root.clone()], "db/t/k2", b"2");
        let outcome = merge(&store, MergeStrategy::FastForwardOnly, "main", &root, "feature", &ahead, sig(), sig()).unwrap();
        match outcome {
            MergeOutcome::Completed(id) => assert_eq!(id, ahead),
            _ => panic!("expected fast-forward"),
        }
    }

    #[test]
    fn merging_an_ancestor_source_reports_already_up_to_date() {
        let store = MemoryStore::new();
        let root = commit_tree(&store, vec![], "db/t/k1", b"1");
        let ahead = commit_tree(&store, vec![root.clone()], "db/t/k2", b"2");
        // `root` is already fully reflected in `ahead`; merging it in again
        // must not fabricate a merge commit.
        let outcome = merge(&store, MergeStrategy::RowLevel, "main", &ahead, "old", &root, sig(), sig()).unwrap();
        assert!(matches!(outcome, MergeOutcome::AlreadyUpToDate));
    }

    #[test]
    fn row_level_merge_takes_non_conflicting_changes_from_both_sides() {
        let store = MemoryStore::new();
        let root = commit_tree(&store, vec![], "db/t/base", b"0");
        let head = commit_tree(&store, vec![root.clone()], "db/t/head_only", b"h");
        let source = commit_tree(&store, vec![root.clone()], "db/t/source_only", b"s");
        let outcome = merge(&store, MergeStrategy::RowLevel, "main", &head, "feature", &source, sig(), sig()).unwrap();
        let merged_id = match outcome {
            MergeOutcome::Completed(id) => id,
            _ => panic!("expected a clean row-level merge"),
        };
        let merged = get_commit(&store, &merged_id).unwrap();
        assert!(tree_engine::read_path(&store, Some(&merged.tree_hash), "db/t/head_only")
            .unwrap()
            .is_some());
        assert!(tree_engine::read_path(&store, Some(&merged.tree_hash), "db/t/source_only")
            .unwrap()
            .is_some());
    }

    #[test]
    fn manual_merge_surfaces_conflicting_row() {
        let store = MemoryStore::new();
        let root = commit_tree(&store, vec![], "db/t/k", b"0");
        let head = commit_tree(&store, vec![root.clone()], "db/t/k", b"head");
        let source = commit_tree(&store, vec![root.clone()], "db/t/k", b"source");
        let outcome = merge(&store, MergeStrategy::Manual, "main", &head, "feature", &source, sig(), sig()).unwrap();
        match outcome {
            MergeOutcome::Pending(pending) => {
                assert_eq!(pending.unresolved.len(), 1);
                assert_eq!(pending.unresolved[0].key, "k");
            }
            _ => panic!("expected a pending manual merge"),
        }
    }

    #[test]
    fn row_level_merge_resolves_conflicts_by_later_head_time() {
        let store = MemoryStore::new();
        let root = commit_tree(&store, vec![], "db/t/k", b"0");
        let head = commit_tree(&store, vec![root.clone()], "db/t/k", b"head");
        let source = commit_tree(&store, vec![root.clone()], "db/t/k", b"source");
        // source_commit_time > head_commit_time in wall-clock terms since
        // it was created after; row-level LWW should prefer it.
        let outcome = merge(&store, MergeStrategy::RowLevel, "main", &head, "feature", &source, sig(), sig()).unwrap();
        let merged_id = match outcome {
            MergeOutcome::Completed(id) => id,
            _ => panic!("expected a resolved row-level merge"),
        };
        let merged = get_commit(&store, &merged_id).unwrap();
        let resolved_hash = tree_engine::read_path(&store, Some(&merged.tree_hash), "db/t/k")
            .unwrap()
            .unwrap();
        let blob = store.get_object(&resolved_hash).unwrap();
        assert_eq!(blob.as_blob().unwrap().data, b"source");
    }
}
