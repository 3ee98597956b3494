//! Reference state: branches, symbolic/detached HEAD, and immutable tags
//! (§3 Data Model — Reference).

use crate::hash::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// `HEAD` is either symbolic (pointing at a branch name, which may itself be
/// unborn — no commits yet) or detached (pointing directly at a commit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Head {
    Symbolic(String),
    Detached(ObjectId),
}

/// A named, immutable pointer to a commit, with an optional annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub name: String,
    pub commit_id: ObjectId,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The full set of mutable pointers an engine instance tracks: every branch
/// ever created (`known_branches`, including unborn ones with no commit
/// yet), the subset that have at least one commit (`branches`), immutable
/// tags, and the current `HEAD`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefsState {
    pub branches: HashMap<String, ObjectId>,
    pub known_branches: BTreeSet<String>,
    pub tags: HashMap<String, TagInfo>,
    pub head: Head,
}

impl RefsState {
    pub const DEFAULT_BRANCH: &'static str = "main";

    /// The state of a freshly initialised, empty repository: `HEAD` is
    /// symbolic and points at an unborn default branch.
    pub fn fresh() -> Self {
        let mut known_branches = BTreeSet::new();
        known_branches.insert(Self::DEFAULT_BRANCH.to_string());
        Self {
            branches: HashMap::new(),
            known_branches,
            tags: HashMap::new(),
            head: Head::Symbolic(Self::DEFAULT_BRANCH.to_string()),
        }
    }
}
