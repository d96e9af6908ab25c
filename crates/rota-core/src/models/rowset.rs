//! Whole-database row container

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Row, SyncId};

/// Every row of the shared database, grouped by table and indexed by
/// identity.
///
/// Serializes as `{ "table": [row, ...] }` with rows ordered by identity,
/// so snapshot files diff cleanly and identities are never written twice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Vec<Row>>", into = "BTreeMap<String, Vec<Row>>")]
pub struct RowSet {
    tables: BTreeMap<String, BTreeMap<SyncId, Row>>,
}

impl RowSet {
    /// Create an empty row set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no table holds any row, tombstones included
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(BTreeMap::is_empty)
    }

    /// Table names present in this row set, in order
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// All rows of a table, tombstones included
    pub fn rows(&self, table: &str) -> impl Iterator<Item = &Row> {
        self.tables.get(table).into_iter().flat_map(BTreeMap::values)
    }

    /// Rows of a table that are not tombstoned
    pub fn live_rows(&self, table: &str) -> impl Iterator<Item = &Row> {
        self.rows(table).filter(|row| !row.is_deleted())
    }

    /// Identities present in a table, tombstones included
    pub fn identities(&self, table: &str) -> impl Iterator<Item = SyncId> + '_ {
        self.tables.get(table).into_iter().flat_map(BTreeMap::keys).copied()
    }

    /// Look up a row by table and identity
    #[must_use]
    pub fn get(&self, table: &str, id: SyncId) -> Option<&Row> {
        self.tables.get(table)?.get(&id)
    }

    /// Mutable lookup by table and identity
    pub fn get_mut(&mut self, table: &str, id: SyncId) -> Option<&mut Row> {
        self.tables.get_mut(table)?.get_mut(&id)
    }

    /// Insert or replace a row under its own identity
    pub fn upsert(&mut self, table: &str, row: Row) {
        self.tables.entry(table.to_string()).or_default().insert(row.id, row);
    }

    /// Physically remove a row.
    ///
    /// Only compaction and insert-reverts do this; ordinary deletion goes
    /// through [`Row::mark_deleted`] so other copies can see it.
    pub fn remove(&mut self, table: &str, id: SyncId) -> Option<Row> {
        self.tables.get_mut(table)?.remove(&id)
    }

    /// Total number of rows, tombstones included
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// Total number of live rows
    #[must_use]
    pub fn live_row_count(&self) -> usize {
        self.tables
            .values()
            .map(|rows| rows.values().filter(|row| !row.is_deleted()).count())
            .sum()
    }

    /// Drop tombstones whose `deleted_at` is older than `cutoff_ms`.
    ///
    /// Returns the number of rows removed. Live rows are never touched.
    pub fn prune_tombstones(&mut self, cutoff_ms: i64) -> usize {
        let mut pruned = 0;
        for rows in self.tables.values_mut() {
            let before = rows.len();
            rows.retain(|_, row| row.deleted_at.is_none_or(|deleted| deleted >= cutoff_ms));
            pruned += before - rows.len();
        }
        pruned
    }
}

impl From<BTreeMap<String, Vec<Row>>> for RowSet {
    fn from(tables: BTreeMap<String, Vec<Row>>) -> Self {
        let mut set = Self::new();
        for (table, rows) in tables {
            let indexed = set.tables.entry(table).or_default();
            for row in rows {
                indexed.insert(row.id, row);
            }
        }
        set
    }
}

impl From<RowSet> for BTreeMap<String, Vec<Row>> {
    fn from(set: RowSet) -> Self {
        set.tables
            .into_iter()
            .map(|(table, rows)| (table, rows.into_values().collect()))
            .collect()
    }
}
