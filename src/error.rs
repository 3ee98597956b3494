use thiserror::Error;

/// Error kinds surfaced by the storage engine. Every fallible operation
/// returns one of these variants rather than an in-band sentinel; a
/// `createCommit` that would produce an empty commit is the one documented
/// exception — it returns the `Unchanged` case of [`crate::commits::Outcome`]
/// instead of an error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("repository is not initialised")]
    Uninitialised,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("empty: {0}")]
    Empty(String),

    #[error("HEAD is detached")]
    Detached,

    #[error("HEAD is unborn (no commits yet on branch '{0}')")]
    Unborn(String),

    #[error("branches have diverged")]
    Diverged,

    #[error("a merge is already in progress ({0})")]
    MergeInProgress(String),

    #[error("no merge is in progress")]
    NoPending,

    #[error("no transaction is in progress")]
    NoTransaction,

    #[error("{0} conflict(s) remain unresolved")]
    Remaining(usize),

    #[error("ambiguous short hash '{0}': matches {1} commits")]
    Ambiguous(String, usize),

    #[error("internal consistency failure: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, Error>;
