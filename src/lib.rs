//! Storage-layer core for a content-addressed version control
//! repository.
//!
//! Two subsystems make up the crate:
//!
//! - [`DotDir`] manages the on-disk metadata directory: layout
//!   scaffolding, loose and packed references with compare-and-set
//!   updates, loose-object and packfile enumeration.
//! - [`Parser`] decodes packfiles: it builds the delta dependency
//!   forest, resolves every delta to full content, verifies identities,
//!   and dispatches decoded objects to pluggable [`Observer`]s and an
//!   optional [`Storage`] sink.
//!
//! Network transports, the working tree, the staging area, and command
//! dispatch live above this crate; they only consume the interfaces
//! exported here.

pub mod areas;
pub mod artifacts;
pub mod errors;

pub use areas::dot_dir::DotDir;
pub use artifacts::objects::hasher;
pub use artifacts::objects::object_id::ObjectId;
pub use artifacts::objects::object_type::ObjectType;
pub use artifacts::pack::observer::{LogObserver, Observer};
pub use artifacts::pack::parser::Parser;
pub use artifacts::pack::scanner::{ObjectHeader, Scanner};
pub use artifacts::pack::source::{PackSource, Seekable, Stream};
pub use artifacts::pack::storage::{MemoryStorage, RawObject, Storage};
pub use artifacts::refs::ref_name::RefName;
pub use artifacts::refs::reference::Reference;
pub use errors::{Error, Result};
