//! Row identity and provenance

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Value;

/// A stable, table-scoped row identity, using UUID v7 (time-sortable).
///
/// Assigned once when the row is created and never reused; it survives
/// edits so divergent copies of the same logical row can be matched up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SyncId(Uuid);

impl SyncId {
    /// Create a new unique row identity using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this identity
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SyncId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// One row of the shared database, with sync provenance.
///
/// Domain fields live in `fields`; everything else exists so divergent
/// copies can be compared. A row is never physically removed while it can
/// still matter to a merge: deletion sets `deleted_at` and the tombstone
/// stays in place until compaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Stable identity, unique within the row's table
    pub id: SyncId,
    /// Domain field values, keyed by column name
    pub fields: BTreeMap<String, Value>,
    /// Last modification timestamp (Unix ms)
    pub modified_at: i64,
    /// Actor label of the last modifier (typically an email)
    pub modified_by: String,
    /// Tombstone timestamp (Unix ms); `None` while the row is live
    pub deleted_at: Option<i64>,
}

impl Row {
    /// Create a new row with a fresh identity, stamped by `actor` at `now`
    #[must_use]
    pub fn new(fields: BTreeMap<String, Value>, actor: impl Into<String>, now: i64) -> Self {
        Self {
            id: SyncId::new(),
            fields: canonical_fields(fields),
            modified_at: now,
            modified_by: actor.into(),
            deleted_at: None,
        }
    }

    /// Record a modification by `actor` at `now`.
    ///
    /// Called on every insert and update so later comparisons can tell
    /// who changed what, and when.
    pub fn touch(&mut self, actor: impl Into<String>, now: i64) {
        self.modified_at = now;
        self.modified_by = actor.into();
    }

    /// Replace the row's domain fields, folding non-finite floats to `Null`
    pub fn set_fields(&mut self, fields: BTreeMap<String, Value>) {
        self.fields = canonical_fields(fields);
    }

    /// Tombstone the row instead of removing it, stamped by `actor` at `now`
    pub fn mark_deleted(&mut self, actor: impl Into<String>, now: i64) {
        self.deleted_at = Some(now);
        self.touch(actor, now);
    }

    /// True when the row carries a tombstone
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Get a domain field value by column name
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Compare domain content only.
    ///
    /// Provenance (`modified_at`, `modified_by`, `deleted_at`) is ignored:
    /// two copies whose fields match are the same change no matter who
    /// saved them or when.
    #[must_use]
    pub fn content_eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

// JSON cannot carry NaN or infinities; fold them before they land in a row.
fn canonical_fields(fields: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    fields.into_iter().map(|(name, value)| (name, value.canonical())).collect()
}
