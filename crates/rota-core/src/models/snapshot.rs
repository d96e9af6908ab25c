//! Snapshot metadata and version listings

use serde::{Deserialize, Serialize};

use super::RowSet;

/// Snapshot file format version accepted by this build
pub const SNAPSHOT_FORMAT: u32 = 1;

/// Metadata block written at the head of every snapshot file.
///
/// Kept separate from the row payload so version listings can read it
/// without parsing the whole file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// File format version guard
    pub format: u32,
    /// When the snapshot was written (Unix ms)
    pub saved_at: i64,
    /// Actor label of the writer
    pub saved_by: String,
    /// When the writer's editing session started (Unix ms)
    pub session_started_at: i64,
}

impl SnapshotMeta {
    /// Metadata for a snapshot written right now by `saved_by`
    #[must_use]
    pub fn new(saved_at: i64, saved_by: impl Into<String>, session_started_at: i64) -> Self {
        Self {
            format: SNAPSHOT_FORMAT,
            saved_at,
            saved_by: saved_by.into(),
            session_started_at,
        }
    }
}

/// One snapshot as it appears in a version listing of the shared folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersionInfo {
    /// Snapshot filename within the shared folder
    pub filename: String,
    /// When the snapshot was written (Unix ms)
    pub saved_at: i64,
    /// Actor label of the writer
    pub saved_by: String,
    /// When the writer's editing session started (Unix ms)
    pub session_started_at: i64,
    /// File size on disk
    pub size_bytes: u64,
}

impl FileVersionInfo {
    /// Save-time ordering, with the filename as a total-order tiebreak for
    /// snapshots written in the same millisecond.
    #[must_use]
    pub fn is_newer_than(&self, other: &Self) -> bool {
        (self.saved_at, self.filename.as_str()) > (other.saved_at, other.filename.as_str())
    }
}

/// A fully loaded snapshot: metadata plus every row, immutable once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub rows: RowSet,
}
