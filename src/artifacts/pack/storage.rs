//! Object storage sinks
//!
//! A parser may be wired to a storage back-end so that every object is
//! persisted as soon as its content is known. The back-end doubles as a
//! base provider for streaming parses, where re-reading the pack is
//! impossible.

use crate::artifacts::objects::hasher;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::errors::{Error, Result};
use bytes::Bytes;
use std::collections::HashMap;

/// A fully materialized object: logical kind plus content bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    pub kind: ObjectType,
    pub data: Bytes,
}

impl RawObject {
    pub fn new(kind: ObjectType, data: Bytes) -> Self {
        RawObject { kind, data }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Canonical id over `(kind, length, bytes)`.
    pub fn id(&self) -> ObjectId {
        hasher::compute(self.kind, &self.data)
    }
}

/// Object store as the parser sees it.
pub trait Storage {
    /// Fetch a previously stored object by id.
    fn encoded_object(&self, oid: &ObjectId) -> Result<RawObject>;

    /// Persist an object, returning its computed id.
    fn set_encoded_object(&mut self, object: RawObject) -> Result<ObjectId>;
}

/// In-memory storage, keyed by object id.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: HashMap<ObjectId, RawObject>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.objects.contains_key(oid)
    }
}

impl Storage for MemoryStorage {
    fn encoded_object(&self, oid: &ObjectId) -> Result<RawObject> {
        self.objects.get(oid).cloned().ok_or(Error::ObjectNotFound)
    }

    fn set_encoded_object(&mut self, object: RawObject) -> Result<ObjectId> {
        let oid = object.id();
        self.objects.insert(oid, object);
        Ok(oid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_objects_are_fetched_by_computed_id() {
        let mut storage = MemoryStorage::new();
        let object = RawObject::new(ObjectType::Blob, Bytes::from_static(b"hello"));

        let oid = storage.set_encoded_object(object.clone()).unwrap();
        assert_eq!(oid, object.id());
        assert_eq!(storage.encoded_object(&oid).unwrap(), object);
    }

    #[test]
    fn missing_object_is_an_error() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.encoded_object(&ObjectId::zero()),
            Err(Error::ObjectNotFound)
        ));
    }
}
