//! Parse observers
//!
//! Observers are the sink side of a pack parse: index writers, progress
//! reporters, storage back-ends. The parser invokes the four callbacks
//! in registration order and in strict scan order; an error from any
//! observer halts the parse.

use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::errors::Result;
use tracing::debug;

/// Callbacks fired during a pack parse.
///
/// All callbacks default to doing nothing, so implementations only
/// override what they consume.
pub trait Observer {
    /// A pack was opened; `count` objects will follow.
    fn on_header(&mut self, _count: u32) -> Result<()> {
        Ok(())
    }

    /// An object header was decoded and its content inflated.
    fn on_inflated_object_header(
        &mut self,
        _kind: ObjectType,
        _length: u64,
        _offset: u64,
    ) -> Result<()> {
        Ok(())
    }

    /// An object's full content is known.
    fn on_inflated_object_content(
        &mut self,
        _oid: &ObjectId,
        _offset: u64,
        _crc32: u32,
        _content: &[u8],
    ) -> Result<()> {
        Ok(())
    }

    /// The parse finished; `checksum` is the trailing pack hash.
    fn on_footer(&mut self, _checksum: &ObjectId) -> Result<()> {
        Ok(())
    }
}

/// Observer that reports parse progress through `tracing`.
#[derive(Debug, Default)]
pub struct LogObserver {
    total: u32,
    done: u32,
}

impl LogObserver {
    pub fn new() -> Self {
        LogObserver::default()
    }
}

impl Observer for LogObserver {
    fn on_header(&mut self, count: u32) -> Result<()> {
        self.total = count;
        debug!(objects = count, "pack parse started");
        Ok(())
    }

    fn on_inflated_object_content(
        &mut self,
        _oid: &ObjectId,
        _offset: u64,
        _crc32: u32,
        _content: &[u8],
    ) -> Result<()> {
        self.done += 1;
        Ok(())
    }

    fn on_footer(&mut self, checksum: &ObjectId) -> Result<()> {
        debug!(done = self.done, total = self.total, checksum = %checksum, "pack parse finished");
        Ok(())
    }
}
