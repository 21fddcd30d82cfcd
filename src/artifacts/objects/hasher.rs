//! Canonical object hashing
//!
//! Every object id is the SHA-1 of `<type> <length>\0` followed by the
//! content bytes, regardless of how the content was stored on disk.

use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use sha1::{Digest, Sha1};

/// Compute the canonical id over `(type, length, bytes)`.
pub fn compute(kind: ObjectType, data: &[u8]) -> ObjectId {
    let mut hasher = Sha1::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(data.len().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(data);

    ObjectId::from_bytes(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_blob_has_well_known_id() {
        // the empty blob id is fixed by the storage format
        assert_eq!(
            compute(ObjectType::Blob, b"").to_string(),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
    }

    #[test]
    fn hello_blob_matches_reference_value() {
        assert_eq!(
            compute(ObjectType::Blob, b"hello\n").to_string(),
            "ce013625030ba8dba906f756967f9e9ca394464a"
        );
    }

    #[test]
    fn kind_participates_in_the_hash() {
        assert_ne!(
            compute(ObjectType::Blob, b"x"),
            compute(ObjectType::Tree, b"x")
        );
    }
}
