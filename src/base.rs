use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an internal task or annotation.
pub type EntityId = i64;

/// Identifier of a storage configuration.
pub type StorageId = i64;

/// Identifier of the project a storage or annotation belongs to.
pub type ProjectId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Import,
    Export,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Import => "import",
            Direction::Export => "export",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag naming the storage family a link belongs to, e.g. `couchdb_import`.
///
/// Links of every backend and direction share one table; this tag keeps them
/// apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKind(String);

impl StorageKind {
    pub fn new(backend: &str, direction: Direction) -> Self {
        Self(format!("{backend}_{direction}"))
    }

    pub fn import(backend: &str) -> Self {
        Self::new(backend, Direction::Import)
    }

    pub fn export(backend: &str) -> Self {
        Self::new(backend, Direction::Export)
    }

    /// Rebuilds a kind from its stored tag.
    pub fn from_tag(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
