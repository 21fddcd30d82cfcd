//! Reference values
//!
//! A reference is a named pointer: either *direct* (carrying an object
//! id) or *symbolic* (carrying the name of another reference, e.g.
//! `HEAD -> refs/heads/main`).
//!
//! ## File format
//!
//! A loose reference file contains either:
//! - a 40-character hex hash followed by a newline (direct), or
//! - `ref: <target>\n` (symbolic)

use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::refs::ref_name::RefName;

/// Prefix that marks a symbolic reference in its textual form
pub const SYMREF_PREFIX: &str = "ref: ";

/// A named reference, direct or symbolic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Points straight at an object; the id is non-zero when valid.
    Direct { name: RefName, oid: ObjectId },
    /// Points at another reference by name.
    Symbolic { name: RefName, target: RefName },
}

impl Reference {
    pub fn direct(name: RefName, oid: ObjectId) -> Self {
        Reference::Direct { name, oid }
    }

    pub fn symbolic(name: RefName, target: RefName) -> Self {
        Reference::Symbolic { name, target }
    }

    /// Build a reference from the trimmed contents of a loose file.
    ///
    /// The `ref: ` prefix selects the symbolic variant; anything else is
    /// taken as a hash, falling back to the zero id when it does not
    /// parse. Callers that need strictness check `oid().is_zero()`.
    pub fn from_content(name: RefName, content: &str) -> Self {
        let content = content.trim();

        match content.strip_prefix(SYMREF_PREFIX) {
            Some(target) => Reference::Symbolic {
                name,
                target: RefName::from(target.trim()),
            },
            None => Reference::Direct {
                name,
                oid: ObjectId::try_parse(content).unwrap_or_default(),
            },
        }
    }

    pub fn name(&self) -> &RefName {
        match self {
            Reference::Direct { name, .. } => name,
            Reference::Symbolic { name, .. } => name,
        }
    }

    /// The object id for direct references, None for symbolic ones.
    pub fn oid(&self) -> Option<&ObjectId> {
        match self {
            Reference::Direct { oid, .. } => Some(oid),
            Reference::Symbolic { .. } => None,
        }
    }

    /// The target name for symbolic references, None for direct ones.
    pub fn target(&self) -> Option<&RefName> {
        match self {
            Reference::Direct { .. } => None,
            Reference::Symbolic { target, .. } => Some(target),
        }
    }

    /// Serialized contents of the loose file for this reference.
    pub fn to_file_content(&self) -> String {
        match self {
            Reference::Direct { oid, .. } => format!("{}\n", oid),
            Reference::Symbolic { target, .. } => format!("{}{}\n", SYMREF_PREFIX, target),
        }
    }

    /// One line of the packed-refs file: value then name.
    pub fn to_packed_line(&self) -> String {
        match self {
            Reference::Direct { name, oid } => format!("{} {}", oid, name),
            Reference::Symbolic { name, target } => {
                format!("{}{} {}", SYMREF_PREFIX, target, name)
            }
        }
    }
}
