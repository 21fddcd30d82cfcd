//! Packfile stream decoder
//!
//! The scanner walks the on-disk pack format: a 12-byte header (`PACK`
//! magic, version, big-endian object count), a sequence of object
//! records (type-and-size varint header, delta base reference when
//! applicable, then one zlib stream), and a trailing 20-byte checksum
//! over everything prior.
//!
//! Inflation uses the raw [`flate2::Decompress`] state machine instead
//! of a reader wrapper: the compressed length of a record is unknown
//! until the zlib stream ends, and the byte after it belongs to the next
//! record.

use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::objects::OBJECT_ID_LENGTH;
use crate::artifacts::pack::source::PackSource;
use crate::errors::{Error, Result};
use byteorder::{BigEndian, ByteOrder};
use flate2::{Decompress, FlushDecompress, Status};
use std::io::Write;

/// Signature of every packfile.
pub const PACK_MAGIC: &[u8; 4] = b"PACK";

/// The only pack format version this scanner decodes.
pub const SUPPORTED_VERSION: u32 = 2;

const READ_BUFFER_LENGTH: usize = 8 * 1024;
const INFLATE_CHUNK_LENGTH: usize = 16 * 1024;

/// Decoded header of one pack object record.
///
/// Offsets are absolute positions within the pack stream. For an
/// offset-delta the on-wire negative-relative distance is already
/// folded into `base_offset`; a reference-delta carries `base_oid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub kind: ObjectType,
    pub offset: u64,
    pub length: u64,
    pub base_offset: Option<u64>,
    pub base_oid: Option<ObjectId>,
}

/// Stream decoder over a [`PackSource`].
pub struct Scanner<S> {
    source: S,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    /// Absolute offset of the next unconsumed byte
    offset: u64,
    /// Running CRC-32 of raw record bytes, reset at each record header
    crc: crc32fast::Hasher,
    header: Option<(u32, u32)>,
}

impl<S: PackSource> Scanner<S> {
    pub fn new(source: S) -> Self {
        Scanner {
            source,
            buf: vec![0; READ_BUFFER_LENGTH],
            start: 0,
            end: 0,
            offset: 0,
            crc: crc32fast::Hasher::new(),
            header: None,
        }
    }

    pub fn is_seekable(&self) -> bool {
        self.source.is_seekable()
    }

    /// Read and validate the pack header.
    ///
    /// # Returns
    ///
    /// `(version, object_count)`; the result is cached, later calls are
    /// free.
    pub fn header(&mut self) -> Result<(u32, u32)> {
        if let Some(header) = self.header {
            return Ok(header);
        }

        let mut raw = [0u8; 12];
        self.read_exact_buffered(&mut raw)?;

        if &raw[..4] != PACK_MAGIC {
            return Err(Error::BadPackMagic);
        }

        let version = BigEndian::read_u32(&raw[4..8]);
        if version != SUPPORTED_VERSION {
            return Err(Error::UnsupportedPackVersion(version));
        }

        let count = BigEndian::read_u32(&raw[8..12]);
        self.header = Some((version, count));

        Ok((version, count))
    }

    /// Decode the next object record header.
    pub fn next_object_header(&mut self) -> Result<ObjectHeader> {
        self.header()?;

        self.crc = crc32fast::Hasher::new();
        let offset = self.offset;

        // first byte: continuation bit, 3-bit type, low 4 size bits
        let mut byte = self.read_byte()?;
        let kind = ObjectType::from_code((byte >> 4) & 0x07)?;
        let mut length = (byte & 0x0f) as u64;
        let mut shift = 4u32;
        while byte & 0x80 != 0 {
            byte = self.read_byte()?;
            length |= ((byte & 0x7f) as u64) << shift;
            shift += 7;
        }

        let mut base_offset = None;
        let mut base_oid = None;
        match kind {
            ObjectType::OfsDelta => {
                // negative-relative distance back to the base record
                let mut byte = self.read_byte()?;
                let mut distance = (byte & 0x7f) as u64;
                while byte & 0x80 != 0 {
                    byte = self.read_byte()?;
                    distance = ((distance + 1) << 7) | ((byte & 0x7f) as u64);
                }

                base_offset = Some(
                    offset
                        .checked_sub(distance)
                        .ok_or(Error::BadDelta("base offset before start of pack"))?,
                );
            }
            ObjectType::RefDelta => {
                let mut raw = [0u8; OBJECT_ID_LENGTH];
                self.read_exact_buffered(&mut raw)?;
                base_oid = Some(ObjectId::from_bytes(raw));
            }
            _ => {}
        }

        Ok(ObjectHeader {
            kind,
            offset,
            length,
            base_offset,
            base_oid,
        })
    }

    /// Inflate the record payload that follows the last decoded header.
    ///
    /// # Returns
    ///
    /// Bytes written and the CRC-32 of the raw on-disk record, header
    /// included.
    pub fn next_object(&mut self, out: &mut dyn Write) -> Result<(u64, u32)> {
        let mut inflater = Decompress::new(true);
        let mut chunk = vec![0u8; INFLATE_CHUNK_LENGTH];

        loop {
            if self.start == self.end {
                self.fill()?;
            }

            let input = &self.buf[self.start..self.end];
            let consumed_before = inflater.total_in();
            let produced_before = inflater.total_out();

            let status = inflater
                .decompress(input, &mut chunk, FlushDecompress::None)
                .map_err(|err| Error::Inflate(err.to_string()))?;

            let consumed = (inflater.total_in() - consumed_before) as usize;
            let produced = (inflater.total_out() - produced_before) as usize;

            self.crc.update(&input[..consumed]);
            self.start += consumed;
            self.offset += consumed as u64;
            out.write_all(&chunk[..produced])?;

            match status {
                Status::StreamEnd => break,
                Status::Ok => {}
                Status::BufError => {
                    if consumed == 0 && produced == 0 && self.start != self.end {
                        return Err(Error::Inflate("zlib stream stalled".to_string()));
                    }
                }
            }
        }

        Ok((inflater.total_out(), self.crc.clone().finalize()))
    }

    /// Jump to an absolute offset. Seekable sources only.
    pub fn seek_from_start(&mut self, offset: u64) -> Result<()> {
        // the pack header must be consumed from the front exactly once
        self.header()?;

        self.source.seek_from_start(offset)?;
        self.start = 0;
        self.end = 0;
        self.offset = offset;

        Ok(())
    }

    /// Read the trailing pack checksum at the current position.
    ///
    /// A truncated trailer surfaces as an I/O error of kind
    /// `UnexpectedEof`, which callers may treat as a sentinel.
    pub fn checksum(&mut self) -> Result<ObjectId> {
        let mut raw = [0u8; OBJECT_ID_LENGTH];
        self.read_exact_buffered(&mut raw)?;

        Ok(ObjectId::from_bytes(raw))
    }

    fn fill(&mut self) -> Result<()> {
        let read = self.source.read(&mut self.buf)?;
        if read == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "unexpected end of pack stream",
            )));
        }

        self.start = 0;
        self.end = read;
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8> {
        if self.start == self.end {
            self.fill()?;
        }

        let byte = self.buf[self.start];
        self.start += 1;
        self.offset += 1;
        self.crc.update(&[byte]);

        Ok(byte)
    }

    fn read_exact_buffered(&mut self, out: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            if self.start == self.end {
                self.fill()?;
            }

            let available = (self.end - self.start).min(out.len() - filled);
            out[filled..filled + available]
                .copy_from_slice(&self.buf[self.start..self.start + available]);

            self.crc.update(&self.buf[self.start..self.start + available]);
            self.start += available;
            self.offset += available as u64;
            filled += available;
        }

        Ok(())
    }
}
