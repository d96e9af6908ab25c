//! Conflict and resolution models

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Row, SyncId};

/// Deterministic key naming one conflicted row: `"{table}:{identity}"`.
///
/// Stable across detection runs over the same snapshots, so resolutions
/// can be collected out of order and applied in one pass.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictKey(String);

impl ConflictKey {
    /// Key for a row identity within a table
    #[must_use]
    pub fn new(table: &str, id: SyncId) -> Self {
        Self(format!("{table}:{id}"))
    }

    /// The rendered key
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConflictKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for ConflictKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// One candidate's version of a conflicted row.
///
/// `row` is `None` when that candidate deleted the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifier {
    /// Actor label the candidate's changes are attributed to
    pub actor: String,
    /// That candidate's version of the row, `None` for a deletion
    pub row: Option<Row>,
}

/// A row that two or more candidates changed in incompatible ways.
///
/// Carries everything a resolution screen needs: the common ancestor,
/// every divergent version, and a human-readable description of which
/// row is affected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    /// Deterministic conflict key
    pub key: ConflictKey,
    /// Table the row belongs to
    pub table: String,
    /// Identity of the conflicted row
    pub sync_id: SyncId,
    /// The row as of the base snapshot, `None` when both sides inserted it
    pub base_row: Option<Row>,
    /// Divergent versions, one per differing candidate, in candidate order
    pub modifiers: Vec<Modifier>,
    /// Display label for the affected row (falls back to the identity)
    pub row_description: String,
    /// True when the table is additive and `Resolution::All` is permitted
    pub allow_multiple: bool,
}

impl MergeConflict {
    /// Look up a modifier by index
    #[must_use]
    pub fn modifier(&self, index: usize) -> Option<&Modifier> {
        self.modifiers.get(index)
    }
}

/// A human's decision for one conflict.
///
/// Serializes as `"base"`, `{"modifier": 1}`, `"delete"`, or `"all"` so
/// resolution files stay hand-writable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Keep the base snapshot's version, discarding every change
    Base,
    /// Keep one candidate's version, by index into `modifiers`
    Modifier(usize),
    /// Tombstone the row regardless of any candidate's content
    Delete,
    /// Keep every version as separate rows; additive tables only
    All,
}
