//! Dependency tables recording the inputs of a compiled artifact.
//!
//! A table lists every module that determined an artifact's content: the
//! script's own bitcode first, then any runtime library linked into it. The
//! table stored next to a cached artifact is compared against the table of
//! the live inputs to decide whether the artifact can be reused.

use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// One input of a build: a module name and the digest of its content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencyEntry {
    /// Name of the module (resource name or runtime library name).
    pub name: String,

    /// Digest of the module's bytes.
    pub digest: ContentHash,
}

/// Ordered list of `(name, digest)` pairs.
///
/// Entries are kept in insertion order so the serialized form is stable, but
/// equality ignores order: two tables are equal when they hold the same
/// multiset of entries. Duplicate names are kept as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyTable {
    entries: Vec<DependencyEntry>,
}

impl DependencyTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn push(&mut self, name: impl Into<String>, digest: ContentHash) {
        self.entries.push(DependencyEntry {
            name: name.into(),
            digest,
        });
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &DependencyEntry> {
        self.entries.iter()
    }

    /// Returns the digest recorded for `name`, if any.
    ///
    /// With duplicate names, the first entry wins.
    pub fn digest_of(&self, name: &str) -> Option<ContentHash> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.digest)
    }

    fn sorted(&self) -> Vec<&DependencyEntry> {
        let mut entries: Vec<&DependencyEntry> = self.entries.iter().collect();
        entries.sort();
        entries
    }
}

impl PartialEq for DependencyTable {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len() && self.sorted() == other.sorted()
    }
}

impl Eq for DependencyTable {}

impl<N: Into<String>> FromIterator<(N, ContentHash)> for DependencyTable {
    fn from_iter<I: IntoIterator<Item = (N, ContentHash)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (name, digest) in iter {
            table.push(name, digest);
        }
        table
    }
}
