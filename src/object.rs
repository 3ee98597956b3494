//! The three object kinds stored in the content-addressed object store
//! (§3 Data Model): blobs, trees, and commits.

use crate::hash::{hash_object, ObjectId, ObjectKind};
use crate::identity::Identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An opaque byte sequence — a row's encoded value, table/database metadata,
/// or any other small file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn hash(&self) -> ObjectId {
        hash_object(ObjectKind::Blob, &self.data)
    }
}

/// Whether a tree entry names a regular blob or a nested directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Regular,
    Dir,
}

/// One entry of a [`Tree`]: a single path component, its kind, and the hash
/// of the object it names. `name` never contains `/` and is unique within
/// its tree (§3 invariant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub mode: Mode,
    pub hash: ObjectId,
}

/// An ordered, canonicalised list of tree entries. Two trees with identical
/// semantic content always produce identical hashes: entries are sorted by
/// name with a trailing `/` appended for directories before comparison, so
/// `foo` (file) sorts before `foo/` (dir), which sorts before `foo0`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Build a canonical tree from entries in any order. This is the only
    /// sanctioned constructor for a non-empty tree; it enforces the sort
    /// rule that content addressing depends on.
    pub fn canonical(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn hash(&self) -> ObjectId {
        // Canonical JSON over the already-sorted entries: the sort order is
        // what makes this deterministic, not anything about the encoding.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hash_object(ObjectKind::Tree, &bytes)
    }
}

fn sort_key(e: &TreeEntry) -> String {
    match e.mode {
        Mode::Dir => format!("{}/", e.name),
        Mode::Regular => e.name.clone(),
    }
}

/// Author or committer identity plus the time the action was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub identity: Identity,
    pub when: DateTime<Utc>,
}

impl Signature {
    pub fn new(identity: Identity, when: DateTime<Utc>) -> Self {
        Self { identity, when }
    }
}

/// An immutable commit: a tree snapshot plus zero or more parents. A root
/// commit has no parents; a merge commit has two or more, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub tree_hash: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl Commit {
    pub fn new(
        tree_hash: ObjectId,
        parents: Vec<ObjectId>,
        author: Signature,
        committer: Signature,
        message: String,
    ) -> Self {
        Self {
            tree_hash,
            parents,
            author,
            committer,
            message,
        }
    }

    /// Author time, per the logical `(author, committer, ..., author_time,
    /// commit_time)` tuple in §3 — carried on the signature rather than
    /// duplicated as a sibling field.
    pub fn author_time(&self) -> DateTime<Utc> {
        self.author.when
    }

    /// Committer time — the timestamp LWW merge resolution is defined
    /// against (§9: "the core uses committer time for LWW... resistant to
    /// backdated authors").
    pub fn commit_time(&self) -> DateTime<Utc> {
        self.committer.when
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() >= 2
    }

    pub fn hash(&self) -> ObjectId {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hash_object(ObjectKind::Commit, &bytes)
    }
}

/// A tagged union over the three object kinds, as returned by
/// `ObjectStore::get_object`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
}

impl Object {
    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Object::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            Object::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_commit(&self) -> Option<&Commit> {
        match self {
            Object::Commit(c) => Some(c),
            _ => None,
        }
    }
}
