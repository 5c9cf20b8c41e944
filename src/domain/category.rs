//! Catalog categories as configured for a run.

use serde::{Deserialize, Serialize};

use super::value_objects::CategoryRef;

/// A named catalog section with a known or discovered page count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryRef,
    /// Filled in once a listing page reports an explicit page count
    pub total_pages: Option<u32>,
}

impl Category {
    #[must_use]
    pub fn new(rank: usize, name: impl Into<String>) -> Self {
        Self {
            id: CategoryRef::new(rank, name),
            total_pages: None,
        }
    }

    /// Builds categories in configured order; the position becomes the rank.
    #[must_use]
    pub fn from_names(names: &[String]) -> Vec<Self> {
        names
            .iter()
            .enumerate()
            .map(|(rank, name)| Self::new(rank, name.trim()))
            .collect()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.id.name
    }

    #[must_use]
    pub const fn rank(&self) -> usize {
        self.id.rank
    }

    /// URL path segment for the category (`Pre-Rolls` -> `pre-rolls`)
    #[must_use]
    pub fn slug(&self) -> String {
        self.id
            .name
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
            .to_lowercase()
    }
}
