//! Commit creation and the ref/branch/tag surface built on top of the
//! object store (§4.C).

use crate::error::{Error, Result};
use crate::hash::{ObjectId, MIN_ABBREV_LEN};
use crate::object::{Commit, Object, Signature};
use crate::refs::{Head, RefsState, TagInfo};
use crate::store::ObjectStore;
use chrono::Utc;
use std::collections::{BinaryHeap, HashSet};

/// Result of [`create_commit`]: either a new commit hash, or notice that the
/// requested tree is identical to the sole parent's and nothing was written
/// (§3 invariant: never produce a commit whose tree equals its only
/// parent's tree).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created(ObjectId),
    Unchanged,
}

/// Build and store a commit pointing at `tree_hash` with the given
/// `parents`, then elide it if it would be a no-op (single parent whose
/// tree is identical).
pub fn create_commit(
    store: &dyn ObjectStore,
    tree_hash: &str,
    parents: Vec<ObjectId>,
    author: Signature,
    committer: Signature,
    message: String,
) -> Result<Outcome> {
    if let [only_parent] = parents.as_slice() {
        let parent_commit = get_commit(store, only_parent)?;
        if parent_commit.tree_hash == tree_hash {
            return Ok(Outcome::Unchanged);
        }
    }
    let commit = Commit::new(tree_hash.to_string(), parents, author, committer, message);
    let id = store.put_commit(&commit)?;
    Ok(Outcome::Created(id))
}

pub fn get_commit(store: &dyn ObjectStore, id: &str) -> Result<Commit> {
    store
        .get_object(&id.to_string())?
        .as_commit()
        .cloned()
        .ok_or_else(|| Error::Invariant(format!("object {id} is not a commit")))
}

/// Resolve the commit a branch, tag, or (possibly abbreviated) hash names.
/// An abbreviated hash shorter than [`MIN_ABBREV_LEN`] is rejected as
/// `NotFound`; one matching more than one known object is `Ambiguous`.
pub fn resolve(store: &dyn ObjectStore, refs: &RefsState, rev: &str) -> Result<ObjectId> {
    if let Some(id) = refs.branches.get(rev) {
        return Ok(id.clone());
    }
    if let Some(tag) = refs.tags.get(rev) {
        return Ok(tag.commit_id.clone());
    }
    if rev == "HEAD" {
        return resolve_head(refs);
    }
    resolve_abbreviated(store, refs, rev)
}

pub fn resolve_head(refs: &RefsState) -> Result<ObjectId> {
    match &refs.head {
        Head::Detached(id) => Ok(id.clone()),
        Head::Symbolic(branch) => refs
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| Error::Unborn(branch.clone())),
    }
}

fn resolve_abbreviated(store: &dyn ObjectStore, refs: &RefsState, rev: &str) -> Result<ObjectId> {
    if rev.len() < MIN_ABBREV_LEN || !rev.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::NotFound(rev.to_string()));
    }
    let mut candidates: HashSet<ObjectId> = HashSet::new();
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut frontier: Vec<ObjectId> = refs.branches.values().cloned().collect();
    frontier.extend(refs.tags.values().map(|t| t.commit_id.clone()));

    while let Some(id) = frontier.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if id.starts_with(rev) {
            candidates.insert(id.clone());
        }
        let commit = get_commit(store, &id)?;
        frontier.extend(commit.parents);
    }

    match candidates.len() {
        0 => Err(Error::NotFound(rev.to_string())),
        1 => Ok(candidates.into_iter().next().unwrap()),
        n => Err(Error::Ambiguous(rev.to_string(), n)),
    }
}

/// Walk a commit's ancestry newest-first (ties broken by hash for
/// determinism), lazily: each call to `next()` does at most one object
/// fetch per newly discovered parent, so callers can stop early without
/// paying for the full history.
pub struct HistoryIter<'s> {
    store: &'s dyn ObjectStore,
    heap: BinaryHeap<(chrono::DateTime<Utc>, ObjectId)>,
    seen: HashSet<ObjectId>,
}

impl<'s> HistoryIter<'s> {
    pub fn new(store: &'s dyn ObjectStore, start: ObjectId) -> Result<Self> {
        let commit = get_commit(store, &start)?;
        let mut heap = BinaryHeap::new();
        heap.push((commit.commit_time(), start.clone()));
        let mut seen = HashSet::new();
        seen.insert(start);
        Ok(Self { store, heap, seen })
    }
}

impl<'s> Iterator for HistoryIter<'s> {
    type Item = Result<(ObjectId, Commit)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (_, id) = self.heap.pop()?;
        let commit = match get_commit(self.store, &id) {
            Ok(c) => c,
            Err(e) => return Some(Err(e)),
        };
        for parent in &commit.parents {
            if self.seen.insert(parent.clone()) {
                match get_commit(self.store, parent) {
                    Ok(pc) => self.heap.push((pc.commit_time(), parent.clone())),
                    Err(e) => return Some(Err(e)),
                }
            }
        }
        Some(Ok((id, commit)))
    }
}

fn ancestors(store: &dyn ObjectStore, start: &str) -> Result<HashSet<ObjectId>> {
    let mut seen = HashSet::new();
    let mut frontier = vec![start.to_string()];
    while let Some(id) = frontier.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        let commit = get_commit(store, &id)?;
        frontier.extend(commit.parents);
    }
    Ok(seen)
}

/// Find the best common ancestor of two commits (lowest common ancestor by
/// topology), used as the merge base. Returns `None` if the histories share
/// no ancestor (disjoint roots).
pub fn find_merge_base(store: &dyn ObjectStore, a: &str, b: &str) -> Result<Option<ObjectId>> {
    let a_ancestors = ancestors(store, a)?;
    let b_ancestors = ancestors(store, b)?;
    let shared: Vec<ObjectId> = a_ancestors.intersection(&b_ancestors).cloned().collect();
    if shared.is_empty() {
        return Ok(None);
    }
    // Among shared ancestors, the merge base is the one with no other shared
    // ancestor as its descendant — equivalently, the newest by commit time
    // when ancestry is linear; for multi-parent DAGs we additionally reject
    // any candidate that is itself an ancestor of another candidate.
    let mut best: Option<(chrono::DateTime<Utc>, ObjectId)> = None;
    'candidates: for id in &shared {
        let commit = get_commit(store, id)?;
        for other in &shared {
            if other == id {
                continue;
            }
            if ancestors(store, other)?.contains(id) && !ancestors(store, id)?.contains(other) {
                continue 'candidates;
            }
        }
        let t = commit.commit_time();
        if best.as_ref().map(|(bt, _)| t > *bt).unwrap_or(true) {
            best = Some((t, id.clone()));
        }
    }
    Ok(best.map(|(_, id)| id).or_else(|| shared.into_iter().next()))
}

pub fn create_branch(refs: &mut RefsState, name: &str, at: ObjectId) -> Result<()> {
    if refs.known_branches.contains(name) {
        return Err(Error::Exists(name.to_string()));
    }
    refs.known_branches.insert(name.to_string());
    refs.branches.insert(name.to_string(), at);
    Ok(())
}

pub fn checkout(refs: &mut RefsState, name: &str) -> Result<()> {
    if !refs.known_branches.contains(name) {
        return Err(Error::NotFound(name.to_string()));
    }
    refs.head = Head::Symbolic(name.to_string());
    Ok(())
}

pub fn delete_branch(refs: &mut RefsState, name: &str) -> Result<()> {
    if let Head::Symbolic(current) = &refs.head {
        if current == name {
            return Err(Error::Invariant(format!("cannot delete checked-out branch '{name}'")));
        }
    }
    if !refs.known_branches.remove(name) {
        return Err(Error::NotFound(name.to_string()));
    }
    refs.branches.remove(name);
    Ok(())
}

pub fn rename_branch(refs: &mut RefsState, from: &str, to: &str) -> Result<()> {
    if !refs.known_branches.contains(from) {
        return Err(Error::NotFound(from.to_string()));
    }
    if refs.known_branches.contains(to) {
        return Err(Error::Exists(to.to_string()));
    }
    refs.known_branches.remove(from);
    refs.known_branches.insert(to.to_string());
    if let Some(id) = refs.branches.remove(from) {
        refs.branches.insert(to.to_string(), id);
    }
    if let Head::Symbolic(current) = &refs.head {
        if current == from {
            refs.head = Head::Symbolic(to.to_string());
        }
    }
    Ok(())
}

pub fn create_tag(refs: &mut RefsState, name: &str, commit_id: ObjectId, message: Option<String>) -> Result<()> {
    if refs.tags.contains_key(name) {
        return Err(Error::Exists(name.to_string()));
    }
    refs.tags.insert(
        name.to_string(),
        TagInfo {
            name: name.to_string(),
            commit_id,
            message,
            created_at: Utc::now(),
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::object::Tree;
    use crate::store::MemoryStore;

    fn sig() -> Signature {
        Signature::new(Identity::new("a", "a@x.com"), Utc::now())
    }

    #[test]
    fn create_commit_elides_noop_single_parent() {
        let store = MemoryStore::new();
        let tree = Tree::empty().hash();
        let root = match create_commit(&store, &tree, vec![], sig(), sig(), "init".into()).unwrap() {
            Outcome::Created(id) => id,
            Outcome::Unchanged => panic!("root commit should be created"),
        };
        let outcome = create_commit(&store, &tree, vec![root], sig(), sig(), "noop".into()).unwrap();
        assert_eq!(outcome, Outcome::Unchanged);
    }

    #[test]
    fn create_commit_allows_empty_merge_commit_even_if_tree_matches_one_parent() {
        let store = MemoryStore::new();
        let tree = Tree::empty().hash();
        let p1 = match create_commit(&store, &tree, vec![], sig(), sig(), "a".into()).unwrap() {
            Outcome::Created(id) => id,
            _ => unreachable!(),
        };
        let p2 = match create_commit(&store, &tree, vec![], sig(), sig(), "b".into()).unwrap() {
            Outcome::Created(id) => id,
            _ => unreachable!(),
        };
        // Two parents: elision only applies to the single-parent case.
        let outcome = create_commit(&store, &tree, vec![p1, p2], sig(), sig(), "merge".into()).unwrap();
        assert!(matches!(outcome, Outcome::Created(_)));
    }

    #[test]
    fn resolve_abbreviated_hash_unique_match() {
        let store = MemoryStore::new();
        let tree = Tree::empty().hash();
        let id = match create_commit(&store, &tree, vec![], sig(), sig(), "init".into()).unwrap() {
            Outcome::Created(id) => id,
            _ => unreachable!(),
        };
        let mut refs = RefsState::fresh();
        refs.branches.insert("main".into(), id.clone());
        let resolved = resolve(&store, &refs, &id[..6]).unwrap();
        assert_eq!(resolved, id);
    }

    #[test]
    fn resolve_short_abbreviation_rejected() {
        let store = MemoryStore::new();
        let refs = RefsState::fresh();
        assert!(matches!(resolve(&store, &refs, "ab"), Err(Error::NotFound(_))));
    }

    #[test]
    fn find_merge_base_is_common_ancestor() {
        let store = MemoryStore::new();
        let tree = Tree::empty().hash();
        let root = match create_commit(&store, &tree, vec![], sig(), sig(), "root".into()).unwrap() {
            Outcome::Created(id) => id,
            _ => unreachable!(),
        };
        let tree2_id = crate::tree_engine::update_path(&store, None, "x", &store.put_blob(b"1").unwrap()).unwrap();
        let a = match create_commit(&store, &tree2_id, vec![root.clone()], sig(), sig(), "a".into()).unwrap() {
            Outcome::Created(id) => id,
            _ => unreachable!(),
        };
        let tree3_id = crate::tree_engine::update_path(&store, None, "y", &store.put_blob(b"2").unwrap()).unwrap();
        let b = match create_commit(&store, &tree3_id, vec![root.clone()], sig(), sig(), "b".into()).unwrap() {
            Outcome::Created(id) => id,
            _ => unreachable!(),
        };
        let base = find_merge_base(&store, &a, &b).unwrap();
        assert_eq!(base, Some(root));
    }
}
