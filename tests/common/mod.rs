#![allow(dead_code)]

use coffer::{DotDir, ObjectId, ObjectType, Observer, Reference, RefName};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use sha1::{Digest, Sha1};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use tempfile::TempDir;

/// Scratch repository with the standard scaffolding in place.
pub fn scratch_repo() -> (TempDir, DotDir) {
    let dir = tempfile::tempdir().expect("failed to create scratch directory");
    let dot = DotDir::open(dir.path()).expect("failed to open scratch directory");
    dot.initialize().expect("failed to initialize scaffolding");
    (dir, dot)
}

pub fn oid(byte: u8) -> ObjectId {
    ObjectId::from_bytes([byte; 20])
}

pub fn direct(name: &str, byte: u8) -> Reference {
    Reference::direct(RefName::from(name), oid(byte))
}

// ---- pack fixtures ----

/// One entry of a synthetic pack.
pub enum PackEntry {
    Base {
        kind: ObjectType,
        data: Vec<u8>,
    },
    /// Offset-delta whose base is an earlier entry, by index.
    OfsDelta {
        base_index: usize,
        delta: Vec<u8>,
    },
    /// Offset-delta with an explicit (possibly bogus) back-distance.
    OfsDeltaRaw {
        distance: u64,
        delta: Vec<u8>,
    },
    /// Reference-delta addressing its base by hash.
    RefDelta {
        base_oid: ObjectId,
        delta: Vec<u8>,
    },
}

/// Assemble a complete pack: header, records, trailing checksum.
pub fn build_pack(entries: &[PackEntry]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"PACK");
    bytes.extend_from_slice(&2u32.to_be_bytes());
    bytes.extend_from_slice(&(entries.len() as u32).to_be_bytes());

    let mut offsets = Vec::with_capacity(entries.len());
    for entry in entries {
        let offset = bytes.len() as u64;
        offsets.push(offset);

        match entry {
            PackEntry::Base { kind, data } => {
                bytes.extend(record_header(kind.code(), data.len()));
                bytes.extend(zlib(data));
            }
            PackEntry::OfsDelta { base_index, delta } => {
                bytes.extend(record_header(ObjectType::OfsDelta.code(), delta.len()));
                bytes.extend(ofs_distance(offset - offsets[*base_index]));
                bytes.extend(zlib(delta));
            }
            PackEntry::OfsDeltaRaw { distance, delta } => {
                bytes.extend(record_header(ObjectType::OfsDelta.code(), delta.len()));
                bytes.extend(ofs_distance(*distance));
                bytes.extend(zlib(delta));
            }
            PackEntry::RefDelta { base_oid, delta } => {
                bytes.extend(record_header(ObjectType::RefDelta.code(), delta.len()));
                bytes.extend_from_slice(base_oid.as_bytes());
                bytes.extend(zlib(delta));
            }
        }
    }

    let checksum = Sha1::digest(&bytes);
    bytes.extend_from_slice(&checksum);
    bytes
}

/// Record header: 3-bit type and size varint, low nibble first.
fn record_header(type_code: u8, size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut remaining = size as u64;

    let mut first = ((type_code & 0x07) << 4) | ((remaining & 0x0f) as u8);
    remaining >>= 4;
    if remaining != 0 {
        first |= 0x80;
    }
    out.push(first);

    while remaining != 0 {
        let mut byte = (remaining & 0x7f) as u8;
        remaining >>= 7;
        if remaining != 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }

    out
}

/// Negative-relative distance of an offset-delta, most significant
/// group first with the +1 bias on continuation bytes.
fn ofs_distance(mut distance: u64) -> Vec<u8> {
    assert!(distance > 0, "a record cannot be its own base");

    let mut bytes = vec![(distance & 0x7f) as u8];
    distance >>= 7;
    while distance > 0 {
        distance -= 1;
        bytes.push(((distance & 0x7f) as u8) | 0x80);
        distance >>= 7;
    }

    bytes.reverse();
    bytes
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("zlib write failed");
    encoder.finish().expect("zlib finish failed")
}

/// Variable-length size as used at the head of a delta payload.
fn delta_size(mut value: usize) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            return out;
        }
    }
}

/// Delta that copies the whole base and appends a literal suffix.
pub fn append_delta(base: &[u8], suffix: &[u8]) -> Vec<u8> {
    assert!(!base.is_empty() && base.len() <= 0xffff);

    let mut delta = delta_size(base.len());
    delta.extend(delta_size(base.len() + suffix.len()));

    if base.len() <= 0xff {
        delta.push(0x90); // copy from offset 0, one length byte
        delta.push(base.len() as u8);
    } else {
        delta.push(0xb0); // copy from offset 0, two length bytes
        delta.push((base.len() & 0xff) as u8);
        delta.push((base.len() >> 8) as u8);
    }

    for chunk in suffix.chunks(0x7f) {
        delta.push(chunk.len() as u8);
        delta.extend_from_slice(chunk);
    }

    delta
}

/// Delta that replaces the base wholesale with literal bytes.
pub fn replace_delta(base_len: usize, target: &[u8]) -> Vec<u8> {
    let mut delta = delta_size(base_len);
    delta.extend(delta_size(target.len()));

    for chunk in target.chunks(0x7f) {
        delta.push(chunk.len() as u8);
        delta.extend_from_slice(chunk);
    }

    delta
}

// ---- parse event recording ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedObject {
    pub oid: ObjectId,
    pub kind: ObjectType,
    pub length: u64,
    pub offset: u64,
    pub crc32: u32,
    pub content: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct Events {
    pub header: Option<u32>,
    pub headers: Vec<(ObjectType, u64, u64)>,
    pub objects: Vec<EmittedObject>,
    pub footer: Option<ObjectId>,
}

/// Observer that records every callback for later assertions.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Rc<RefCell<Events>>,
}

impl RecordingObserver {
    pub fn new() -> (Self, Rc<RefCell<Events>>) {
        let events = Rc::new(RefCell::new(Events::default()));
        (
            RecordingObserver {
                events: events.clone(),
            },
            events,
        )
    }
}

impl Observer for RecordingObserver {
    fn on_header(&mut self, count: u32) -> coffer::Result<()> {
        self.events.borrow_mut().header = Some(count);
        Ok(())
    }

    fn on_inflated_object_header(
        &mut self,
        kind: ObjectType,
        length: u64,
        offset: u64,
    ) -> coffer::Result<()> {
        self.events.borrow_mut().headers.push((kind, length, offset));
        Ok(())
    }

    fn on_inflated_object_content(
        &mut self,
        oid: &ObjectId,
        offset: u64,
        crc32: u32,
        content: &[u8],
    ) -> coffer::Result<()> {
        let mut events = self.events.borrow_mut();
        let (kind, length, _) = *events
            .headers
            .last()
            .expect("content callback before header callback");
        events.objects.push(EmittedObject {
            oid: *oid,
            kind,
            length,
            offset,
            crc32,
            content: content.to_vec(),
        });
        Ok(())
    }

    fn on_footer(&mut self, checksum: &ObjectId) -> coffer::Result<()> {
        self.events.borrow_mut().footer = Some(*checksum);
        Ok(())
    }
}
