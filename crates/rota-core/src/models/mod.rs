//! Data models for Rota

mod conflict;
mod row;
mod rowset;
mod snapshot;
mod value;

pub use conflict::{ConflictKey, MergeConflict, Modifier, Resolution};
pub use row::{Row, SyncId};
pub use rowset::RowSet;
pub use snapshot::{FileVersionInfo, Snapshot, SnapshotMeta, SNAPSHOT_FORMAT};
pub use value::Value;
