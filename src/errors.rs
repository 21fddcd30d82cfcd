//! Crate-wide error taxonomy
//!
//! Every fallible operation in the crate returns [`Result`]. Callers are
//! expected to match on the variant: format errors abort the current
//! operation, and [`Error::ReferenceChangedConcurrently`] signals a lost
//! compare-and-set race that the caller decides how to retry. Missing
//! directories are already downgraded to empty results inside the
//! enumeration operations themselves.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The repository metadata directory does not exist.
    #[error("path not found")]
    PathNotFound,

    /// The requested packfile is not present under `objects/pack`.
    #[error("packfile not found")]
    PackfileNotFound,

    /// The pack index for the requested packfile is not present.
    #[error("idx file not found")]
    IdxNotFound,

    /// The repository has no config file.
    #[error("config file not found")]
    ConfigNotFound,

    /// The reference exists neither loose nor packed.
    #[error("reference not found")]
    ReferenceNotFound,

    /// A symbolic reference points at a name that does not resolve.
    #[error("symbolic reference target not found")]
    SymRefTargetNotFound,

    /// A packed-refs line did not match the `<hex40> <name>` grammar.
    #[error("malformed packed-refs line")]
    PackedRefsBadFormat,

    /// The same name appeared twice in the packed-refs file.
    #[error("duplicated ref found in packed-refs file")]
    PackedRefsDuplicatedRef,

    /// Bulk initialization was attempted on a non-empty packed-refs file.
    #[error("packed-refs file already initialized")]
    PackedRefsAlreadyInitialized,

    /// The stored reference no longer matches the expected value.
    #[error("reference has changed concurrently")]
    ReferenceChangedConcurrently,

    /// An object id could not be parsed as 40 hex digits.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    /// A delta object referenced a base that is not in the pack.
    #[error("object not found in pack")]
    ObjectNotFound,

    /// A reference delta was never matched with its base.
    #[error("reference delta not found")]
    ReferenceDeltaNotFound,

    /// A retained delta payload was already evicted.
    #[error("delta could not be found in cache")]
    DeltaNotCached,

    /// The parser source is a stream and no storage was provided.
    #[error("parser source is not seekable and storage was not provided")]
    SourceNotSeekable,

    /// The pack stream did not start with the `PACK` signature.
    #[error("malformed pack signature")]
    BadPackMagic,

    /// The pack version is not supported.
    #[error("unsupported pack version: {0}")]
    UnsupportedPackVersion(u32),

    /// The on-disk object type code is not a known kind.
    #[error("invalid object type code: {0}")]
    BadObjectType(u8),

    /// A delta payload violated the instruction-stream grammar.
    #[error("malformed delta: {0}")]
    BadDelta(&'static str),

    /// A zlib stream could not be inflated.
    #[error("zlib inflate failed: {0}")]
    Inflate(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
