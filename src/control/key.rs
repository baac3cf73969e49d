//! Composite key addressing control records by `(entity, batch)`
//!
//! Every store lookup, mutation and batch-scoped eviction goes through
//! `BatchKey`. The typed two-field form avoids the separator-collision
//! ambiguity of string-concatenated keys; the string encoding only exists
//! for log output and external addressing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator used by the string encoding of a [`BatchKey`].
///
/// Entity ids must not contain this sequence; [`BatchKey::from_str`] splits
/// on the first occurrence, so an entity id containing `::` would decode to
/// the wrong pair. This limitation applies to the string form only; the
/// typed key itself is unambiguous.
pub const KEY_SEPARATOR: &str = "::";

/// Errors from parsing the string encoding of a key
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyParseError {
    /// The string contained no separator
    #[error("missing '{KEY_SEPARATOR}' separator in key: {0}")]
    MissingSeparator(String),

    /// Entity or batch component was empty
    #[error("empty component in key: {0}")]
    EmptyComponent(String),
}

/// Typed composite key for one control record: an entity id (group name or
/// job code) scoped to a single batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchKey {
    entity: String,
    batch: String,
}

impl BatchKey {
    /// Create a key for `entity` under `batch`
    pub fn new(entity: impl Into<String>, batch: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            batch: batch.into(),
        }
    }

    /// The entity component (group name or job code)
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// The batch component
    pub fn batch(&self) -> &str {
        &self.batch
    }

    /// Whether this key belongs to the given batch
    pub fn belongs_to_batch(&self, batch_id: &str) -> bool {
        self.batch == batch_id
    }

    /// String encoding, `entity::batch`
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.entity, KEY_SEPARATOR, self.batch)
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.entity, KEY_SEPARATOR, self.batch)
    }
}

impl FromStr for BatchKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (entity, batch) = s
            .split_once(KEY_SEPARATOR)
            .ok_or_else(|| KeyParseError::MissingSeparator(s.to_string()))?;

        if entity.is_empty() || batch.is_empty() {
            return Err(KeyParseError::EmptyComponent(s.to_string()));
        }

        Ok(Self {
            entity: entity.to_string(),
            batch: batch.to_string(),
        })
    }
}
