use derive_new::new;
use std::path::{Path, PathBuf};

/// Name of the HEAD reference
pub const HEAD_REF_NAME: &str = "HEAD";

/// Prefix of every reference stored under the refs tree
pub const REFS_PREFIX: &str = "refs/";

const HEADS_PREFIX: &str = "refs/heads/";
const TAGS_PREFIX: &str = "refs/tags/";

/// Reference name
///
/// A path-like identifier composed of slash-separated segments, e.g.
/// `refs/heads/main` or `HEAD`. Segments map one-to-one onto filesystem
/// path components when the reference is stored loose.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord, new)]
pub struct RefName(String);

impl RefName {
    pub fn head() -> Self {
        RefName(HEAD_REF_NAME.to_string())
    }

    pub fn is_head(&self) -> bool {
        self.0 == HEAD_REF_NAME
    }

    pub fn is_branch(&self) -> bool {
        self.0.starts_with(HEADS_PREFIX)
    }

    pub fn is_tag(&self) -> bool {
        self.0.starts_with(TAGS_PREFIX)
    }

    /// Relative filesystem path of the loose file for this name.
    ///
    /// Built segment by segment so the separator is correct on every
    /// platform.
    pub fn to_path(&self) -> PathBuf {
        self.0.split('/').collect()
    }

    /// Reconstruct a name from a path relative to the metadata directory.
    pub fn from_path(path: &Path) -> Self {
        let segments = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>();
        RefName(segments.join("/"))
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RefName {
    fn from(name: &str) -> Self {
        RefName(name.to_string())
    }
}

impl std::fmt::Display for RefName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
