use sha2::{Digest, Sha256};

/// A content address: the SHA-256 hex digest of an object's type, length,
/// and bytes. Equal bytes of the same kind always hash equal, which is what
/// lets the object store dedupe (§3 invariant: equal bytes ⇒ equal hash).
///
/// The data model sketches a 20-byte/40-hex address as the prototypical
/// shape (matching a host VCS's SHA-1), but the spec only requires ≥128 bits
/// of collision resistance and explicitly does not require interop with any
/// particular VCS hash family, so this keeps the 32-byte/64-hex SHA-256
/// scheme already in use for blocks/commits/tags.
pub type ObjectId = String;

/// Which object kind is being hashed; folded into the digest so a blob and a
/// tree that happen to share byte-identical serialized contents never
/// collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl ObjectKind {
    fn tag(self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
        }
    }
}

/// Hash `bytes` as an object of the given `kind`. The type and length are
/// folded into the preimage so objects of different kinds never collide
/// even if their raw payloads are identical.
pub fn hash_object(kind: ObjectKind, bytes: &[u8]) -> ObjectId {
    let mut hasher = Sha256::new();
    hasher.update(kind.tag().as_bytes());
    hasher.update(b" ");
    hasher.update(bytes.len().to_le_bytes());
    hasher.update(b"\0");
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Minimum accepted length for an abbreviated hash passed to `resolveTxn`.
pub const MIN_ABBREV_LEN: usize = 4;
