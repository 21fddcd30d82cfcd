//! Pack byte sources
//!
//! The scanner reads from a [`PackSource`], which is a plain reader plus
//! an explicit seek capability. Whether a source can seek is encoded in
//! the wrapper type, not in a runtime sentinel: wrap a file or cursor in
//! [`Seekable`], a network stream in [`Stream`].

use crate::errors::{Error, Result};
use std::io::{Read, Seek, SeekFrom};

/// Byte source for a pack scanner.
pub trait PackSource: Read {
    /// Whether [`PackSource::seek_from_start`] is available.
    fn is_seekable(&self) -> bool;

    /// Position the source at an absolute offset within the pack.
    fn seek_from_start(&mut self, offset: u64) -> Result<()>;
}

/// A source backed by random-access bytes (a file, a cursor).
#[derive(Debug)]
pub struct Seekable<R>(R);

impl<R: Read + Seek> Seekable<R> {
    pub fn new(inner: R) -> Self {
        Seekable(inner)
    }
}

impl<R: Read> Read for Seekable<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read + Seek> PackSource for Seekable<R> {
    fn is_seekable(&self) -> bool {
        true
    }

    fn seek_from_start(&mut self, offset: u64) -> Result<()> {
        self.0.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
}

/// A forward-only source (a network stream, a pipe).
///
/// Parsing a stream requires a storage sink; see the parser
/// construction rules.
#[derive(Debug)]
pub struct Stream<R>(R);

impl<R: Read> Stream<R> {
    pub fn new(inner: R) -> Self {
        Stream(inner)
    }
}

impl<R: Read> Read for Stream<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read> PackSource for Stream<R> {
    fn is_seekable(&self) -> bool {
        false
    }

    fn seek_from_start(&mut self, _offset: u64) -> Result<()> {
        Err(Error::SourceNotSeekable)
    }
}
