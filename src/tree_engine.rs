//! Path-addressed operations over a [`Tree`] snapshot (§4.B).
//!
//! A tree is addressed by splitting a `/`-separated path into components and
//! recursing one directory level at a time. Every mutation rebuilds and
//! re-canonicalises the tree nodes on the path from the touched leaf back to
//! the root, so the returned root hash is always a fresh, content-addressed
//! snapshot; nothing is mutated in place.

use crate::error::{Error, Result};
use crate::object::{Mode, Tree, TreeEntry};
use crate::store::ObjectStore;
use std::collections::HashMap;

/// A single row-level change to apply during a [`batch_update`]: either a
/// put of a blob at `path`, or a deletion of whatever sits at `path`.
#[derive(Debug, Clone)]
pub enum Change {
    Put { path: String, blob_hash: String },
    Delete { path: String },
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

fn load_tree(store: &dyn ObjectStore, hash: Option<&str>) -> Result<Tree> {
    match hash {
        None => Ok(Tree::empty()),
        Some(h) => Ok(store
            .get_object(&h.to_string())?
            .as_tree()
            .ok_or_else(|| Error::Invariant(format!("object {h} is not a tree")))?
            .clone()),
    }
}

/// Read the blob hash stored at `path` under `root`, or `None` if no such
/// path exists (or it names a directory, not a blob).
pub fn read_path(store: &dyn ObjectStore, root: Option<&str>, path: &str) -> Result<Option<String>> {
    let components = split(path);
    if components.is_empty() {
        return Ok(None);
    }
    let mut tree = load_tree(store, root)?;
    for (i, name) in components.iter().enumerate() {
        let entry = match tree.get(name) {
            Some(e) => e,
            None => return Ok(None),
        };
        let last = i == components.len() - 1;
        if last {
            return Ok(match entry.mode {
                Mode::Regular => Some(entry.hash.clone()),
                Mode::Dir => None,
            });
        }
        if entry.mode != Mode::Dir {
            return Ok(None);
        }
        tree = load_tree(store, Some(&entry.hash))?;
    }
    Ok(None)
}

/// List the direct children of the directory at `path` under `root`
/// (`path` == `""` lists the root). Returns `None` if `path` doesn't name a
/// directory.
pub fn list_dir(
    store: &dyn ObjectStore,
    root: Option<&str>,
    path: &str,
) -> Result<Option<Vec<TreeEntry>>> {
    let components = split(path);
    let mut tree = load_tree(store, root)?;
    for name in &components {
        let entry = match tree.get(name) {
            Some(e) if e.mode == Mode::Dir => e,
            _ => return Ok(None),
        };
        tree = load_tree(store, Some(&entry.hash))?;
    }
    Ok(Some(tree.entries))
}

/// Write `blob_hash` at `path`, creating intermediate directories as
/// needed, and return the new root hash.
pub fn update_path(
    store: &dyn ObjectStore,
    root: Option<&str>,
    path: &str,
    blob_hash: &str,
) -> Result<String> {
    let components = split(path);
    if components.is_empty() {
        return Err(Error::Invariant("empty path".into()));
    }
    let tree = load_tree(store, root)?;
    let new_tree = put_recursive(store, &tree, &components, blob_hash)?;
    store.put_tree(&new_tree)
}

fn put_recursive(
    store: &dyn ObjectStore,
    tree: &Tree,
    components: &[&str],
    blob_hash: &str,
) -> Result<Tree> {
    let (name, rest) = (components[0], &components[1..]);
    let mut entries: Vec<TreeEntry> = tree
        .entries
        .iter()
        .filter(|e| e.name != name)
        .cloned()
        .collect();

    let new_entry = if rest.is_empty() {
        TreeEntry {
            name: name.to_string(),
            mode: Mode::Regular,
            hash: blob_hash.to_string(),
        }
    } else {
        let child = match tree.get(name) {
            Some(e) if e.mode == Mode::Dir => load_tree(store, Some(&e.hash))?,
            _ => Tree::empty(),
        };
        let new_child = put_recursive(store, &child, rest, blob_hash)?;
        let child_hash = store.put_tree(&new_child)?;
        TreeEntry {
            name: name.to_string(),
            mode: Mode::Dir,
            hash: child_hash,
        }
    };
    entries.push(new_entry);
    Ok(Tree::canonical(entries))
}

/// Delete whatever sits at `path` and return the new root hash. A no-op
/// (returns the unchanged root) if `path` doesn't exist. Empty directories
/// left behind by the deletion are pruned from their parent.
pub fn delete_path(store: &dyn ObjectStore, root: Option<&str>, path: &str) -> Result<Option<String>> {
    let components = split(path);
    if components.is_empty() {
        return Ok(root.map(str::to_string));
    }
    let tree = load_tree(store, root)?;
    match delete_recursive(store, &tree, &components)? {
        None => Ok(root.map(str::to_string)),
        Some(new_tree) if new_tree.is_empty() => Ok(None),
        Some(new_tree) => Ok(Some(store.put_tree(&new_tree)?)),
    }
}

/// Returns `Ok(None)` if nothing changed (path absent), else the rebuilt
/// tree with the entry removed (possibly itself empty).
fn delete_recursive(
    store: &dyn ObjectStore,
    tree: &Tree,
    components: &[&str],
) -> Result<Option<Tree>> {
    let (name, rest) = (components[0], &components[1..]);
    let Some(entry) = tree.get(name) else {
        return Ok(None);
    };

    if rest.is_empty() {
        let entries: Vec<TreeEntry> = tree.entries.iter().filter(|e| e.name != name).cloned().collect();
        return Ok(Some(Tree::canonical(entries)));
    }

    if entry.mode != Mode::Dir {
        return Ok(None);
    }
    let child = load_tree(store, Some(&entry.hash))?;
    let Some(new_child) = delete_recursive(store, &child, rest)? else {
        return Ok(None);
    };

    let mut entries: Vec<TreeEntry> = tree.entries.iter().filter(|e| e.name != name).cloned().collect();
    if !new_child.is_empty() {
        let child_hash = store.put_tree(&new_child)?;
        entries.push(TreeEntry {
            name: name.to_string(),
            mode: Mode::Dir,
            hash: child_hash,
        });
    }
    Ok(Some(Tree::canonical(entries)))
}

/// Apply many changes in one pass, grouping by shared path prefix so each
/// subtree on the affected paths is rebuilt once regardless of how many
/// changes land under it — O(changed subtrees · depth) rather than
/// O(changes · depth) (§4.B performance contract).
pub fn batch_update(
    store: &dyn ObjectStore,
    root: Option<&str>,
    changes: &[Change],
) -> Result<Option<String>> {
    if changes.is_empty() {
        return Ok(root.map(str::to_string));
    }
    let tree = load_tree(store, root)?;
    let indexed: Vec<(Vec<&str>, &Change)> = changes
        .iter()
        .map(|c| {
            let path = match c {
                Change::Put { path, .. } => path,
                Change::Delete { path } => path,
            };
            (split(path), c)
        })
        .collect();
    let result = batch_recursive(store, &tree, &indexed)?;
    match result {
        Some(t) if !t.is_empty() => Ok(Some(store.put_tree(&t)?)),
        _ => Ok(None),
    }
}

/// `entries` pairs each change with the remaining path components below the
/// current tree level. Grouped by first component so every change destined
/// for the same child touches that child's subtree exactly once.
fn batch_recursive(
    store: &dyn ObjectStore,
    tree: &Tree,
    entries: &[(Vec<&str>, &Change)],
) -> Result<Option<Tree>> {
    let mut groups: HashMap<&str, Vec<(Vec<&str>, &Change)>> = HashMap::new();
    let mut leaf_changes: Vec<&Change> = Vec::new();

    for (components, change) in entries {
        if components.is_empty() {
            continue;
        }
        if components.len() == 1 {
            leaf_changes.push(change);
        } else {
            groups
                .entry(components[0])
                .or_default()
                .push((components[1..].to_vec(), change));
        }
    }

    let mut names_changed: Vec<&str> = Vec::new();
    for (components, _) in entries {
        if let Some(first) = components.first() {
            names_changed.push(first);
        }
    }

    let mut new_entries: Vec<TreeEntry> = tree
        .entries
        .iter()
        .filter(|e| !names_changed.contains(&e.name.as_str()))
        .cloned()
        .collect();

    // Leaf-level puts/deletes at this level (single path component left).
    // A path touched more than once within the same batch (e.g. put then
    // put again) must behave like applying each change in order — last one
    // wins — rather than leaving duplicate same-named entries in the tree.
    let mut leaf_puts: HashMap<&str, &str> = HashMap::new();
    for change in &leaf_changes {
        let name = match change {
            Change::Put { path, .. } => split(path),
            Change::Delete { path } => split(path),
        }
        .last()
        .copied()
        .unwrap();
        match change {
            Change::Put { blob_hash, .. } => {
                leaf_puts.insert(name, blob_hash.as_str());
            }
            Change::Delete { .. } => {
                leaf_puts.remove(name);
            }
        }
    }
    for (name, blob_hash) in leaf_puts {
        new_entries.push(TreeEntry {
            name: name.to_string(),
            mode: Mode::Regular,
            hash: blob_hash.to_string(),
        });
    }

    // Recurse once per distinct child touched by a deeper change.
    for (name, sub_entries) in groups {
        let child = match tree.get(name) {
            Some(e) if e.mode == Mode::Dir => load_tree(store, Some(&e.hash))?,
            _ => Tree::empty(),
        };
        if let Some(new_child) = batch_recursive(store, &child, &sub_entries)? {
            if !new_child.is_empty() {
                let child_hash = store.put_tree(&new_child)?;
                new_entries.push(TreeEntry {
                    name: name.to_string(),
                    mode: Mode::Dir,
                    hash: child_hash,
                });
            }
        }
    }

    Ok(Some(Tree::canonical(new_entries)))
}

/// Read the hash of the directory entry at `path` under `root` (`path` ==
/// `""` means the root itself). `None` if `path` doesn't exist or names a
/// blob rather than a directory. Used by selective restore to pull a
/// whole database/table subtree out of a historical commit's tree.
pub fn read_subtree_hash(store: &dyn ObjectStore, root: Option<&str>, path: &str) -> Result<Option<String>> {
    let components = split(path);
    if components.is_empty() {
        return Ok(root.map(str::to_string));
    }
    let mut tree = load_tree(store, root)?;
    for (i, name) in components.iter().enumerate() {
        let entry = match tree.get(name) {
            Some(e) => e,
            None => return Ok(None),
        };
        let last = i == components.len() - 1;
        if last {
            return Ok(match entry.mode {
                Mode::Dir => Some(entry.hash.clone()),
                Mode::Regular => None,
            });
        }
        if entry.mode != Mode::Dir {
            return Ok(None);
        }
        tree = load_tree(store, Some(&entry.hash))?;
    }
    Ok(None)
}

/// Graft `new_hash` in as the directory entry at `path` under `root`,
/// replacing whatever subtree was there (or removing the entry entirely if
/// `new_hash` is `None`), and return the new root hash. Unlike
/// [`update_path`]/[`delete_path`] this sets a precomputed subtree hash
/// directly rather than a blob, so a historical subtree can be spliced back
/// into the current tree without re-walking its contents.
pub fn set_subtree(
    store: &dyn ObjectStore,
    root: Option<&str>,
    path: &str,
    new_hash: Option<String>,
) -> Result<Option<String>> {
    let components = split(path);
    if components.is_empty() {
        return Ok(new_hash);
    }
    let tree = load_tree(store, root)?;
    let new_tree = set_subtree_recursive(store, &tree, &components, new_hash.as_deref())?;
    if new_tree.is_empty() {
        Ok(None)
    } else {
        Ok(Some(store.put_tree(&new_tree)?))
    }
}

fn set_subtree_recursive(
    store: &dyn ObjectStore,
    tree: &Tree,
    components: &[&str],
    new_hash: Option<&str>,
) -> Result<Tree> {
    let (name, rest) = (components[0], &components[1..]);
    let mut entries: Vec<TreeEntry> = tree.entries.iter().filter(|e| e.name != name).cloned().collect();

    if rest.is_empty() {
        if let Some(h) = new_hash {
            entries.push(TreeEntry {
                name: name.to_string(),
                mode: Mode::Dir,
                hash: h.to_string(),
            });
        }
    } else {
        let child = match tree.get(name) {
            Some(e) if e.mode == Mode::Dir => load_tree(store, Some(&e.hash))?,
            _ => Tree::empty(),
        };
        let new_child = set_subtree_recursive(store, &child, rest, new_hash)?;
        if !new_child.is_empty() {
            let child_hash = store.put_tree(&new_child)?;
            entries.push(TreeEntry {
                name: name.to_string(),
                mode: Mode::Dir,
                hash: child_hash,
            });
        }
    }
    Ok(Tree::canonical(entries))
}

/// Enumerate every blob under `root` as `(path, blob_hash)` pairs, depth
/// first. Used by the merge engine's three-way scan, which needs every row
/// that exists on either side rather than a single lookup.
pub fn walk_leaves(store: &dyn ObjectStore, root: Option<&str>) -> Result<Vec<(String, String)>> {
    let tree = load_tree(store, root)?;
    let mut out = Vec::new();
    walk_leaves_recursive(store, &tree, "", &mut out)?;
    Ok(out)
}

fn walk_leaves_recursive(
    store: &dyn ObjectStore,
    tree: &Tree,
    prefix: &str,
    out: &mut Vec<(String, String)>,
) -> Result<()> {
    for entry in &tree.entries {
        let path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{prefix}/{}", entry.name)
        };
        match entry.mode {
            Mode::Regular => out.push((path, entry.hash.clone())),
            Mode::Dir => {
                let child = load_tree(store, Some(&entry.hash))?;
                walk_leaves_recursive(store, &child, &path, out)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn update_then_read_round_trips() {
        let store = MemoryStore::new();
        let blob = store.put_blob(b"value").unwrap();
        let root = update_path(&store, None, "db/table/key1", &blob).unwrap();
        let got = read_path(&store, Some(&root), "db/table/key1").unwrap();
        assert_eq!(got, Some(blob));
    }

    #[test]
    fn delete_missing_path_is_noop() {
        let store = MemoryStore::new();
        let blob = store.put_blob(b"value").unwrap();
        let root = update_path(&store, None, "db/table/key1", &blob).unwrap();
        let after = delete_path(&store, Some(&root), "db/table/other").unwrap();
        assert_eq!(after, Some(root));
    }

    #[test]
    fn delete_last_key_collapses_empty_directories() {
        let store = MemoryStore::new();
        let blob = store.put_blob(b"value").unwrap();
        let root = update_path(&store, None, "db/table/key1", &blob).unwrap();
        let after = delete_path(&store, Some(&root), "db/table/key1").unwrap();
        assert_eq!(after, None);
    }

    #[test]
    fn batch_update_matches_sequential_updates() {
        let store = MemoryStore::new();
        let b1 = store.put_blob(b"one").unwrap();
        let b2 = store.put_blob(b"two").unwrap();
        let b3 = store.put_blob(b"three").unwrap();

        let sequential_root = {
            let r = update_path(&store, None, "d/t/a", &b1).unwrap();
            let r = update_path(&store, Some(&r), "d/t/b", &b2).unwrap();
            update_path(&store, Some(&r), "d/u/c", &b3).unwrap()
        };

        let batched_root = batch_update(
            &store,
            None,
            &[
                Change::Put {
                    path: "d/t/a".into(),
                    blob_hash: b1,
                },
                Change::Put {
                    path: "d/t/b".into(),
                    blob_hash: b2,
                },
                Change::Put {
                    path: "d/u/c".into(),
                    blob_hash: b3,
                },
            ],
        )
        .unwrap()
        .unwrap();

        assert_eq!(batched_root, sequential_root);
    }

    #[test]
    fn set_subtree_grafts_and_read_subtree_hash_reads_it_back() {
        let store = MemoryStore::new();
        let b1 = store.put_blob(b"old").unwrap();
        let old_root = update_path(&store, None, "d/t/k", &b1).unwrap();
        let old_table_hash = read_subtree_hash(&store, Some(&old_root), "d/t").unwrap().unwrap();

        let b2 = store.put_blob(b"new").unwrap();
        let current_root = update_path(&store, None, "d/t/k", &b2).unwrap();
        let restored_root = set_subtree(&store, Some(&current_root), "d/t", Some(old_table_hash))
            .unwrap()
            .unwrap();
        assert_eq!(read_path(&store, Some(&restored_root), "d/t/k").unwrap(), Some(b1));
    }

    #[test]
    fn set_subtree_none_removes_entry_and_collapses_empty_parent() {
        let store = MemoryStore::new();
        let b1 = store.put_blob(b"v").unwrap();
        let root = update_path(&store, None, "d/t/k", &b1).unwrap();
        let after = set_subtree(&store, Some(&root), "d/t", None).unwrap();
        assert_eq!(after, None);
    }

    #[test]
    fn batch_update_same_path_twice_keeps_last_write() {
        let store = MemoryStore::new();
        let b1 = store.put_blob(b"first").unwrap();
        let b2 = store.put_blob(b"second").unwrap();
        let root = batch_update(
            &store,
            None,
            &[
                Change::Put { path: "d/t/k".into(), blob_hash: b1 },
                Change::Put { path: "d/t/k".into(), blob_hash: b2.clone() },
            ],
        )
        .unwrap()
        .unwrap();
        assert_eq!(read_path(&store, Some(&root), "d/t/k").unwrap(), Some(b2));
        let entries = list_dir(&store, Some(&root), "d/t").unwrap().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn batch_update_empty_changes_is_noop() {
        let store = MemoryStore::new();
        let blob = store.put_blob(b"value").unwrap();
        let root = update_path(&store, None, "db/table/key1", &blob).unwrap();
        let after = batch_update(&store, Some(&root), &[]).unwrap();
        assert_eq!(after, Some(root));
    }
}
