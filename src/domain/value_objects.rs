//! # Domain Value Objects
//!
//! Immutable value types that represent concepts in the extraction domain.
//! Value objects are defined by their attributes rather than identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Work item identifier with strong typing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new unique task ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical product identity derived from the detail URL slug.
///
/// Two observations with the same key are the same physical product,
/// whichever category listed them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Prefix marking keys that could not be derived from a URL
    pub const UNKEYED_PREFIX: &'static str = "unkeyed:";

    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the key came from product text rather than a URL slug
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.0.starts_with(Self::UNKEYED_PREFIX)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a configured category: its position in the configured
/// order and its name. Ordering follows the configured order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CategoryRef {
    pub rank: usize,
    pub name: String,
}

impl CategoryRef {
    #[must_use]
    pub fn new(rank: usize, name: impl Into<String>) -> Self {
        Self {
            rank,
            name: name.into(),
        }
    }
}

impl fmt::Display for CategoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.rank)
    }
}
