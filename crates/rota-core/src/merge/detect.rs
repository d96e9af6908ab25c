//! Conflict detection between a base snapshot and divergent candidates

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use super::{classify, deltas_agree, union_identities, union_table_names, Candidate, RowDelta};
use crate::models::{ConflictKey, MergeConflict, Modifier, RowSet};
use crate::registry::TableRegistry;

/// Compare every candidate against the base snapshot and list the rows
/// that need a human decision.
///
/// A row conflicts only when two or more candidates changed it relative to
/// the base and their changes disagree: identical edits never conflict,
/// unanimous deletions never conflict, and a row only one candidate
/// touched is a forward edit the applier handles on its own. Output is
/// ordered by table then identity, so repeated runs over the same
/// snapshots produce the same list.
pub fn detect_conflicts(
    base: &RowSet,
    candidates: &[Candidate],
    registry: &TableRegistry,
) -> Vec<MergeConflict> {
    let mut sets: Vec<&RowSet> = vec![base];
    sets.extend(candidates.iter().map(|candidate| &candidate.rows));

    let mut conflicts = Vec::new();
    for table in union_table_names(&sets) {
        for id in union_identities(table, &sets) {
            let base_row = base.get(table, id);

            let mut differing: Vec<(usize, RowDelta<'_>)> = Vec::new();
            for (index, candidate) in candidates.iter().enumerate() {
                let delta = classify(base_row, candidate.rows.get(table, id));
                if !delta.is_unchanged() {
                    differing.push((index, delta));
                }
            }

            if differing.len() < 2 {
                continue;
            }
            let (_, first) = differing[0];
            if differing.iter().all(|&(_, delta)| deltas_agree(first, delta)) {
                continue;
            }

            let modifiers: Vec<Modifier> = differing
                .iter()
                .map(|&(index, delta)| Modifier {
                    actor: candidates[index].actor.clone(),
                    row: match delta {
                        RowDelta::Edited(row) | RowDelta::Added(row) => Some(row.clone()),
                        RowDelta::Deleted | RowDelta::Unchanged => None,
                    },
                })
                .collect();

            let representative = modifiers
                .iter()
                .find_map(|modifier| modifier.row.as_ref())
                .or(base_row);
            let row_description = representative
                .and_then(|row| registry.describe(table, row))
                .unwrap_or_else(|| id.to_string());

            conflicts.push(MergeConflict {
                key: ConflictKey::new(table, id),
                table: table.to_string(),
                sync_id: id,
                base_row: base_row.cloned(),
                modifiers,
                row_description,
                allow_multiple: registry.allow_multiple(table),
            });
        }
    }

    if !conflicts.is_empty() {
        debug!(count = conflicts.len(), "detected merge conflicts");
    }
    conflicts
}

/// Aggregate count of differing rows per table between the base and one
/// candidate copy.
///
/// This is the cheap pre-check: enough to tell a user "2 assignment rows
/// differ" before full detection runs. It names no rows and carries no
/// field detail, so it cannot drive a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoarseDiff {
    /// Differing-row counts keyed by table name; unchanged tables omitted
    pub tables: BTreeMap<String, usize>,
}

impl CoarseDiff {
    /// True when the two copies have identical content
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Total differing rows across all tables
    #[must_use]
    pub fn total(&self) -> usize {
        self.tables.values().sum()
    }
}

/// Count differing rows per table without classifying them
pub fn coarse_diff(base: &RowSet, candidate: &RowSet) -> CoarseDiff {
    let sets = [base, candidate];
    let mut tables = BTreeMap::new();
    for table in union_table_names(&sets) {
        let differing = union_identities(table, &sets)
            .into_iter()
            .filter(|&id| !classify(base.get(table, id), candidate.get(table, id)).is_unchanged())
            .count();
        if differing > 0 {
            tables.insert(table.to_string(), differing);
        }
    }
    CoarseDiff { tables }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Row, Value};
    use crate::registry::TableSpec;
    use pretty_assertions::assert_eq;

    fn registry() -> TableRegistry {
        TableRegistry::new()
            .with_table(
                "assignment",
                TableSpec::new().with_display_keys(["person", "date"]),
            )
            .with_table(
                "timeoff",
                TableSpec::new().with_display_keys(["person"]).additive(),
            )
    }

    fn assignment(person: &str, date: &str) -> Row {
        let fields = [
            ("person".to_string(), Value::from(person)),
            ("date".to_string(), Value::from(date)),
        ]
        .into();
        Row::new(fields, "author@example.com", 1_000)
    }

    fn with_date(row: &Row, date: &str, actor: &str, now: i64) -> Row {
        let mut edited = row.clone();
        edited.fields.insert("date".to_string(), Value::from(date));
        edited.touch(actor, now);
        edited
    }

    fn base_with(row: Row) -> RowSet {
        let mut base = RowSet::new();
        base.upsert("assignment", row);
        base
    }

    #[test]
    fn single_divergent_candidate_is_not_a_conflict() {
        let row = assignment("Jane", "2025-07-15");
        let base = base_with(row.clone());

        let mut edited = base.clone();
        edited.upsert(
            "assignment",
            with_date(&row, "2025-07-16", "jane@example.com", 2_000),
        );

        let candidates = [
            Candidate::new("jane@example.com", edited),
            Candidate::new("bob@example.com", base.clone()),
        ];
        assert!(detect_conflicts(&base, &candidates, &registry()).is_empty());
    }

    #[test]
    fn identical_changes_do_not_conflict() {
        let row = assignment("Jane", "2025-07-15");
        let base = base_with(row.clone());

        let mut jane = base.clone();
        jane.upsert(
            "assignment",
            with_date(&row, "2025-07-16", "jane@example.com", 2_000),
        );
        let mut bob = base.clone();
        bob.upsert(
            "assignment",
            with_date(&row, "2025-07-16", "bob@example.com", 3_000),
        );

        let candidates = [
            Candidate::new("jane@example.com", jane),
            Candidate::new("bob@example.com", bob),
        ];
        assert!(detect_conflicts(&base, &candidates, &registry()).is_empty());
    }

    #[test]
    fn divergent_edits_conflict_exactly_once() {
        let row = assignment("Jane", "2025-07-15");
        let base = base_with(row.clone());

        let mut jane = base.clone();
        jane.upsert(
            "assignment",
            with_date(&row, "2025-07-16", "jane@example.com", 2_000),
        );
        let mut bob = base.clone();
        bob.upsert(
            "assignment",
            with_date(&row, "2025-07-17", "bob@example.com", 3_000),
        );

        let candidates = [
            Candidate::new("jane@example.com", jane),
            Candidate::new("bob@example.com", bob),
        ];
        let conflicts = detect_conflicts(&base, &candidates, &registry());

        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.key, ConflictKey::new("assignment", row.id));
        assert_eq!(conflict.table, "assignment");
        assert_eq!(conflict.modifiers.len(), 2);
        assert_eq!(conflict.modifiers[0].actor, "jane@example.com");
        assert_eq!(conflict.modifiers[1].actor, "bob@example.com");
        assert_eq!(conflict.base_row.as_ref().unwrap().id, row.id);
        assert_eq!(conflict.row_description, "Jane, 2025-07-16");
        assert!(!conflict.allow_multiple);
    }

    #[test]
    fn delete_versus_edit_is_a_conflict() {
        let row = assignment("Jane", "2025-07-15");
        let base = base_with(row.clone());

        let mut deleter = base.clone();
        let mut tombstone = row.clone();
        tombstone.mark_deleted("jane@example.com", 2_000);
        deleter.upsert("assignment", tombstone);

        let mut editor = base.clone();
        editor.upsert(
            "assignment",
            with_date(&row, "2025-07-17", "bob@example.com", 3_000),
        );

        let candidates = [
            Candidate::new("jane@example.com", deleter),
            Candidate::new("bob@example.com", editor),
        ];
        let conflicts = detect_conflicts(&base, &candidates, &registry());

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].modifiers[0].row, None);
        assert!(conflicts[0].modifiers[1].row.is_some());
    }

    #[test]
    fn unanimous_deletion_is_not_a_conflict() {
        let row = assignment("Jane", "2025-07-15");
        let base = base_with(row.clone());

        let mut jane = base.clone();
        let mut jane_tombstone = row.clone();
        jane_tombstone.mark_deleted("jane@example.com", 2_000);
        jane.upsert("assignment", jane_tombstone);

        // Bob's copy lost the row outright instead of tombstoning it.
        let mut bob = base.clone();
        bob.remove("assignment", row.id);

        let candidates = [
            Candidate::new("jane@example.com", jane),
            Candidate::new("bob@example.com", bob),
        ];
        assert!(detect_conflicts(&base, &candidates, &registry()).is_empty());
    }

    #[test]
    fn independent_inserts_never_conflict() {
        let base = RowSet::new();

        let mut jane = RowSet::new();
        jane.upsert("timeoff", assignment("Jane", "2025-08-01"));
        let mut bob = RowSet::new();
        bob.upsert("timeoff", assignment("Bob", "2025-08-01"));

        let candidates = [
            Candidate::new("jane@example.com", jane),
            Candidate::new("bob@example.com", bob),
        ];
        assert!(detect_conflicts(&base, &candidates, &registry()).is_empty());
    }

    #[test]
    fn provenance_only_changes_are_invisible() {
        let row = assignment("Jane", "2025-07-15");
        let base = base_with(row.clone());

        let mut touched = base.clone();
        let mut copy = row.clone();
        copy.touch("jane@example.com", 9_000);
        touched.upsert("assignment", copy);

        let candidates = [
            Candidate::new("jane@example.com", touched.clone()),
            Candidate::new("bob@example.com", base.clone()),
        ];
        assert!(detect_conflicts(&base, &candidates, &registry()).is_empty());
        assert!(coarse_diff(&base, &touched).is_empty());
    }

    #[test]
    fn resurrection_conflicts_against_a_divergent_edit() {
        let mut tombstone = assignment("Jane", "2025-07-15");
        tombstone.mark_deleted("sam@example.com", 1_500);
        let base = base_with(tombstone.clone());

        let mut jane = base.clone();
        let mut revived = tombstone.clone();
        revived.deleted_at = None;
        revived.touch("jane@example.com", 2_000);
        jane.upsert("assignment", revived);

        let mut bob = base.clone();
        let mut revived_differently = tombstone.clone();
        revived_differently.deleted_at = None;
        revived_differently
            .fields
            .insert("date".to_string(), Value::from("2025-07-18"));
        revived_differently.touch("bob@example.com", 3_000);
        bob.upsert("assignment", revived_differently);

        let candidates = [
            Candidate::new("jane@example.com", jane),
            Candidate::new("bob@example.com", bob),
        ];
        let conflicts = detect_conflicts(&base, &candidates, &registry());

        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].base_row.as_ref().unwrap().is_deleted());
        assert_eq!(conflicts[0].modifiers.len(), 2);
    }

    #[test]
    fn partial_agreement_still_conflicts_with_every_differing_version() {
        let row = assignment("Jane", "2025-07-15");
        let base = base_with(row.clone());

        let mut first = base.clone();
        first.upsert(
            "assignment",
            with_date(&row, "2025-07-16", "jane@example.com", 2_000),
        );
        let mut second = base.clone();
        second.upsert(
            "assignment",
            with_date(&row, "2025-07-16", "bob@example.com", 3_000),
        );
        let mut third = base.clone();
        third.upsert(
            "assignment",
            with_date(&row, "2025-07-19", "sam@example.com", 4_000),
        );

        let candidates = [
            Candidate::new("jane@example.com", first),
            Candidate::new("bob@example.com", second),
            Candidate::new("sam@example.com", third),
        ];
        let conflicts = detect_conflicts(&base, &candidates, &registry());

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].modifiers.len(), 3);
    }

    #[test]
    fn description_falls_back_to_identity() {
        let row = assignment("Jane", "2025-07-15");
        let base = {
            let mut set = RowSet::new();
            set.upsert("shift", row.clone());
            set
        };

        let mut jane = base.clone();
        jane.upsert("shift", with_date(&row, "2025-07-16", "jane@example.com", 2_000));
        let mut bob = base.clone();
        bob.upsert("shift", with_date(&row, "2025-07-17", "bob@example.com", 3_000));

        let candidates = [
            Candidate::new("jane@example.com", jane),
            Candidate::new("bob@example.com", bob),
        ];
        let conflicts = detect_conflicts(&base, &candidates, &registry());
        assert_eq!(conflicts[0].row_description, row.id.to_string());
    }

    #[test]
    fn coarse_diff_counts_rows_per_table() {
        let jane_row = assignment("Jane", "2025-07-15");
        let bob_row = assignment("Bob", "2025-07-15");
        let timeoff_row = assignment("Sam", "2025-08-01");
        let mut base = RowSet::new();
        base.upsert("assignment", jane_row.clone());
        base.upsert("assignment", bob_row.clone());
        base.upsert("timeoff", timeoff_row.clone());

        let mut candidate = base.clone();
        candidate.upsert(
            "assignment",
            with_date(&jane_row, "2025-07-16", "jane@example.com", 2_000),
        );
        candidate.upsert(
            "assignment",
            with_date(&bob_row, "2025-07-20", "jane@example.com", 2_000),
        );
        candidate.upsert("timeoff", assignment("New", "2025-09-01"));

        let diff = coarse_diff(&base, &candidate);
        assert_eq!(diff.tables.get("assignment"), Some(&2));
        assert_eq!(diff.tables.get("timeoff"), Some(&1));
        assert_eq!(diff.total(), 3);
        assert!(!diff.is_empty());
    }
}
