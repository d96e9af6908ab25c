//! Three-way merge over snapshots: conflict detection, resolution
//! collection, and merge application.
//!
//! A merge always runs between one base snapshot and two or more
//! candidates (the local working copy plus newer snapshots from the
//! shared folder). Rows are matched by identity; only rows that two or
//! more candidates changed in disagreeing ways become conflicts.

mod apply;
mod detect;
mod resolve;

pub use apply::apply_resolutions;
pub use detect::{coarse_diff, detect_conflicts, CoarseDiff};
pub use resolve::{ResolutionSet, ResolvedConflicts};

use std::collections::BTreeSet;

use crate::models::{Row, RowSet, SyncId};

/// One edited copy of the database entering a merge
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Actor label the candidate's changes are attributed to
    pub actor: String,
    /// The candidate's full row set
    pub rows: RowSet,
}

impl Candidate {
    /// Candidate copy attributed to `actor`
    #[must_use]
    pub fn new(actor: impl Into<String>, rows: RowSet) -> Self {
        Self {
            actor: actor.into(),
            rows,
        }
    }
}

/// How one candidate's copy of a row relates to the base version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowDelta<'a> {
    /// Same content as base, or absent on both sides
    Unchanged,
    /// Live on both sides with different content
    Edited(&'a Row),
    /// Live in the candidate, absent or tombstoned in base
    Added(&'a Row),
    /// Live in base, tombstoned or missing in the candidate
    Deleted,
}

impl RowDelta<'_> {
    const fn is_unchanged(self) -> bool {
        matches!(self, Self::Unchanged)
    }
}

/// Classify a candidate's copy of one row against the base copy.
///
/// `deleted_at` decides deleted-vs-edited; content comparison ignores
/// provenance entirely, so a bare `touch` never registers as a change.
fn classify<'a>(base: Option<&Row>, candidate: Option<&'a Row>) -> RowDelta<'a> {
    let base_live = base.filter(|row| !row.is_deleted());
    let candidate_live = candidate.filter(|row| !row.is_deleted());
    match (base_live, candidate_live) {
        (Some(base_row), Some(candidate_row)) => {
            if base_row.content_eq(candidate_row) {
                RowDelta::Unchanged
            } else {
                RowDelta::Edited(candidate_row)
            }
        }
        (Some(_), None) => RowDelta::Deleted,
        (None, Some(candidate_row)) => RowDelta::Added(candidate_row),
        (None, None) => RowDelta::Unchanged,
    }
}

/// Whether two non-`Unchanged` deltas amount to the same change.
///
/// Two deletions always agree; two live versions agree when their content
/// matches; a deletion never agrees with a live version.
fn deltas_agree(a: RowDelta<'_>, b: RowDelta<'_>) -> bool {
    match (a, b) {
        (RowDelta::Deleted, RowDelta::Deleted) => true,
        (
            RowDelta::Edited(left) | RowDelta::Added(left),
            RowDelta::Edited(right) | RowDelta::Added(right),
        ) => left.content_eq(right),
        _ => false,
    }
}

fn union_table_names<'a>(sets: &[&'a RowSet]) -> BTreeSet<&'a str> {
    let mut names = BTreeSet::new();
    for set in sets {
        names.extend(set.table_names());
    }
    names
}

fn union_identities(table: &str, sets: &[&RowSet]) -> BTreeSet<SyncId> {
    let mut ids = BTreeSet::new();
    for set in sets {
        ids.extend(set.identities(table));
    }
    ids
}
