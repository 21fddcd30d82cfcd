//! Packfile parser and delta resolver
//!
//! The parser drives a [`Scanner`] in two phases. Phase one indexes
//! every object record, wiring the delta dependency forest as it goes:
//! offset-deltas point backwards and find their base immediately,
//! reference-deltas either find their base by hash or wait in a pending
//! rendezvous map until the base's hash becomes known. Phase two walks
//! the records in scan order, materializes each object's full content,
//! and notifies the observers.
//!
//! The forest is held in an arena: nodes live in one `Vec` and refer to
//! each other by index in both directions, which keeps ownership flat.
//!
//! Materialized contents of nodes that serve as delta bases go through
//! an LRU cache keyed by offset; without it, every object of a long
//! delta chain would re-materialize its whole ancestry.

use crate::artifacts::objects::hasher;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::pack::delta;
use crate::artifacts::pack::observer::Observer;
use crate::artifacts::pack::scanner::Scanner;
use crate::artifacts::pack::source::PackSource;
use crate::artifacts::pack::storage::{RawObject, Storage};
use crate::errors::{Error, Result};
use bytes::Bytes;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use tracing::debug;

/// How many delta-base contents are kept materialized at once.
const BASE_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(512).unwrap();

/// One object record of the pack being parsed.
#[derive(Debug)]
struct ObjectInfo {
    offset: u64,
    /// Inflated length; for deltas, rewritten to the patched length
    length: u64,
    /// Logical kind; deltas inherit their base's kind on resolution
    kind: ObjectType,
    /// Kind as encoded on disk
    disk_kind: ObjectType,
    crc32: u32,
    /// Zero until the content is known
    oid: ObjectId,
    parent: Option<usize>,
    children: Vec<usize>,
}

impl ObjectInfo {
    fn base(offset: u64, length: u64, kind: ObjectType) -> Self {
        ObjectInfo {
            offset,
            length,
            kind,
            disk_kind: kind,
            crc32: 0,
            oid: ObjectId::zero(),
            parent: None,
            children: Vec::new(),
        }
    }
}

/// Two-phase pack parser.
///
/// One instance per pack. Construction fails with
/// [`Error::SourceNotSeekable`] when the source cannot seek and no
/// storage was provided, since delta bases would then be unreachable.
pub struct Parser<S> {
    scanner: Scanner<S>,
    storage: Option<Box<dyn Storage>>,
    observers: Vec<Box<dyn Observer>>,
    count: u32,
    nodes: Vec<ObjectInfo>,
    by_hash: HashMap<ObjectId, usize>,
    by_offset: HashMap<u64, usize>,
    /// Reference-deltas waiting for their base, keyed by the awaited hash
    pending_ref_deltas: HashMap<ObjectId, Vec<usize>>,
    /// Delta payloads by offset, retained only for streaming sources
    retained_deltas: Option<HashMap<u64, Bytes>>,
    cache: LruCache<u64, Bytes>,
}

impl<S: PackSource> Parser<S> {
    /// Build a parser with no storage sink. The scanner source must be
    /// seekable.
    pub fn new(scanner: Scanner<S>, observers: Vec<Box<dyn Observer>>) -> Result<Self> {
        Self::with_storage(scanner, None, observers)
    }

    /// Build a parser, optionally wired to a storage sink.
    pub fn with_storage(
        scanner: Scanner<S>,
        storage: Option<Box<dyn Storage>>,
        observers: Vec<Box<dyn Observer>>,
    ) -> Result<Self> {
        if !scanner.is_seekable() && storage.is_none() {
            return Err(Error::SourceNotSeekable);
        }

        let retained_deltas = (!scanner.is_seekable()).then(HashMap::new);

        Ok(Parser {
            scanner,
            storage,
            observers,
            count: 0,
            nodes: Vec::new(),
            by_hash: HashMap::new(),
            by_offset: HashMap::new(),
            pending_ref_deltas: HashMap::new(),
            retained_deltas,
            cache: LruCache::new(BASE_CACHE_CAPACITY),
        })
    }

    /// Decode the whole pack, notifying observers along the way.
    ///
    /// # Returns
    ///
    /// The trailing pack checksum. Observer events are emitted in strict
    /// scan order, not dependency order; no partial success is reported
    /// on error.
    pub fn parse(&mut self) -> Result<ObjectId> {
        self.init()?;
        self.index_objects()?;

        let checksum = match self.scanner.checksum() {
            Ok(checksum) => checksum,
            // a missing trailer leaves the checksum unset
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                ObjectId::zero()
            }
            Err(err) => return Err(err),
        };

        self.resolve_deltas()?;

        if !self.pending_ref_deltas.is_empty() {
            return Err(Error::ReferenceDeltaNotFound);
        }

        self.on_footer(&checksum)?;
        Ok(checksum)
    }

    fn init(&mut self) -> Result<()> {
        let (_, count) = self.scanner.header()?;
        self.on_header(count)?;

        self.count = count;
        self.nodes = Vec::with_capacity(count as usize);
        self.by_hash = HashMap::with_capacity(count as usize);
        self.by_offset = HashMap::with_capacity(count as usize);

        debug!(objects = count, "indexing pack objects");
        Ok(())
    }

    /// Phase one: decode every record, inflate it once, and wire the
    /// delta forest.
    fn index_objects(&mut self) -> Result<()> {
        let mut buf = Vec::new();

        for _ in 0..self.count {
            buf.clear();
            let header = self.scanner.next_object_header()?;
            let index = self.nodes.len();

            let mut node = ObjectInfo::base(header.offset, header.length, header.kind);
            let mut is_delta = false;

            match header.kind {
                ObjectType::OfsDelta => {
                    is_delta = true;

                    // offset references only ever point backwards, so
                    // the base must already be indexed
                    let base_offset = header.base_offset.ok_or(Error::ObjectNotFound)?;
                    let parent = *self
                        .by_offset
                        .get(&base_offset)
                        .ok_or(Error::ObjectNotFound)?;

                    node.parent = Some(parent);
                    self.nodes[parent].children.push(index);
                }
                ObjectType::RefDelta => {
                    is_delta = true;

                    let base_oid = header.base_oid.ok_or(Error::ObjectNotFound)?;
                    if let Some(&parent) = self.by_hash.get(&base_oid) {
                        node.parent = Some(parent);
                        self.nodes[parent].children.push(index);
                    } else {
                        // forward reference: park until the base resolves
                        self.pending_ref_deltas
                            .entry(base_oid)
                            .or_default()
                            .push(index);
                    }
                }
                _ => {}
            }

            let (_, crc32) = self.scanner.next_object(&mut buf)?;
            node.crc32 = crc32;

            if !is_delta {
                let oid = hasher::compute(header.kind, &buf);
                node.oid = oid;
                self.by_hash.insert(oid, index);

                // release forward reference-deltas that awaited this hash
                if let Some(pending) = self.pending_ref_deltas.remove(&oid) {
                    for waiting in pending {
                        self.nodes[waiting].parent = Some(index);
                        node.children.push(waiting);
                    }
                }

                if let Some(storage) = &mut self.storage {
                    storage
                        .set_encoded_object(RawObject::new(header.kind, Bytes::copy_from_slice(&buf)))?;
                }
            } else if let Some(retained) = &mut self.retained_deltas {
                retained.insert(header.offset, Bytes::copy_from_slice(&buf));
            }

            self.by_offset.insert(header.offset, index);
            self.nodes.push(node);
        }

        Ok(())
    }

    /// Phase two: walk scan order, materialize, notify, resolve
    /// children.
    fn resolve_deltas(&mut self) -> Result<()> {
        for index in 0..self.nodes.len() {
            let content = self.get(index)?;

            let (kind, length, offset, oid, crc32) = {
                let node = &self.nodes[index];
                (node.kind, node.length, node.offset, node.oid, node.crc32)
            };
            self.on_inflated_object_header(kind, length, offset)?;
            self.on_inflated_object_content(&oid, offset, crc32, &content)?;

            if !kind.is_delta() && !self.nodes[index].children.is_empty() {
                let children = self.nodes[index].children.clone();
                for child in children {
                    self.resolve_object(child, &content)?;
                }

                // the delta payload is dead once the subtree is resolved
                if self.nodes[index].disk_kind.is_delta()
                    && let Some(retained) = &mut self.retained_deltas
                {
                    retained.remove(&offset);
                }
            }
        }

        Ok(())
    }

    /// Materialize a node's full content.
    ///
    /// Cache first; then the storage back-end for already-resolved
    /// objects; then either patch against the recursively materialized
    /// parent or re-read from the scanner. Contents of nodes with
    /// children are cached.
    fn get(&mut self, index: usize) -> Result<Bytes> {
        let offset = self.nodes[index].offset;
        if let Some(content) = self.cache.get(&offset) {
            return Ok(content.clone());
        }

        let kind = self.nodes[index].kind;
        let oid = self.nodes[index].oid;
        let content = if !kind.is_delta()
            && !oid.is_zero()
            && let Some(storage) = &self.storage
        {
            storage.encoded_object(&oid)?.data
        } else if self.nodes[index].disk_kind.is_delta() {
            // a still-unattached reference-delta has no base to patch
            let parent = self.nodes[index]
                .parent
                .ok_or(Error::ReferenceDeltaNotFound)?;
            let base = self.get(parent)?;
            self.resolve_object(index, &base)?
        } else {
            self.read_data(index)?
        };

        if !self.nodes[index].children.is_empty() {
            self.cache.put(offset, content.clone());
        }

        Ok(content)
    }

    /// Patch one delta node against its base content.
    ///
    /// The first resolution fixes the node's logical kind, length and
    /// hash, and releases any reference-deltas that were waiting for
    /// that hash.
    fn resolve_object(&mut self, index: usize, base: &[u8]) -> Result<Bytes> {
        if !self.nodes[index].disk_kind.is_delta() {
            return Ok(Bytes::new());
        }

        let raw = self.read_data(index)?;
        let patched = Bytes::from(delta::patch(base, &raw)?);

        if self.nodes[index].oid.is_zero() {
            let parent = self.nodes[index].parent.ok_or(Error::ObjectNotFound)?;
            let kind = self.nodes[parent].kind;
            let oid = hasher::compute(kind, &patched);

            let node = &mut self.nodes[index];
            node.kind = kind;
            node.oid = oid;
            node.length = patched.len() as u64;
        }

        let oid = self.nodes[index].oid;
        if let Some(pending) = self.pending_ref_deltas.remove(&oid) {
            for waiting in pending {
                self.nodes[waiting].parent = Some(index);
                self.nodes[index].children.push(waiting);
            }
        }

        if let Some(storage) = &mut self.storage {
            storage.set_encoded_object(RawObject::new(self.nodes[index].kind, patched.clone()))?;
        }

        Ok(patched)
    }

    /// Raw inflated payload of a record: the retained map for streaming
    /// sources, a seek-and-rescan otherwise.
    fn read_data(&mut self, index: usize) -> Result<Bytes> {
        let offset = self.nodes[index].offset;

        if self.nodes[index].disk_kind.is_delta()
            && let Some(retained) = &self.retained_deltas
        {
            return retained.get(&offset).cloned().ok_or(Error::DeltaNotCached);
        }

        self.scanner.seek_from_start(offset)?;
        self.scanner.next_object_header()?;

        let mut buf = Vec::new();
        self.scanner.next_object(&mut buf)?;
        Ok(buf.into())
    }

    // ---- observer fan-out ----

    fn on_header(&mut self, count: u32) -> Result<()> {
        for observer in &mut self.observers {
            observer.on_header(count)?;
        }
        Ok(())
    }

    fn on_inflated_object_header(
        &mut self,
        kind: ObjectType,
        length: u64,
        offset: u64,
    ) -> Result<()> {
        for observer in &mut self.observers {
            observer.on_inflated_object_header(kind, length, offset)?;
        }
        Ok(())
    }

    fn on_inflated_object_content(
        &mut self,
        oid: &ObjectId,
        offset: u64,
        crc32: u32,
        content: &[u8],
    ) -> Result<()> {
        for observer in &mut self.observers {
            observer.on_inflated_object_content(oid, offset, crc32, content)?;
        }
        Ok(())
    }

    fn on_footer(&mut self, checksum: &ObjectId) -> Result<()> {
        for observer in &mut self.observers {
            observer.on_footer(checksum)?;
        }
        Ok(())
    }
}
