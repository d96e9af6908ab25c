//! Merge application: forward edits plus resolved conflicts

use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::{
    classify, union_identities, union_table_names, Candidate, ResolvedConflicts, RowDelta,
};
use crate::models::{MergeConflict, Resolution, RowSet, SyncId};

/// Build the merged row set for a rebase.
///
/// Starts from the base snapshot, folds in every non-conflicted change
/// from the candidates (a row only one candidate touched, or a change all
/// differing candidates agree on), then applies each resolved conflict.
/// `actor` and `now` stamp only the tombstones this merge itself mints;
/// rows taken from a candidate keep that candidate's provenance.
pub fn apply_resolutions(
    base: &RowSet,
    candidates: &[Candidate],
    resolved: &ResolvedConflicts,
    actor: &str,
    now: i64,
) -> RowSet {
    let mut merged = base.clone();

    let conflicted: BTreeSet<(&str, SyncId)> = resolved
        .pairs()
        .iter()
        .map(|(conflict, _)| (conflict.table.as_str(), conflict.sync_id))
        .collect();

    let mut sets: Vec<&RowSet> = vec![base];
    sets.extend(candidates.iter().map(|candidate| &candidate.rows));

    let mut forwarded = 0;
    for table in union_table_names(&sets) {
        for id in union_identities(table, &sets) {
            if conflicted.contains(&(table, id)) {
                continue;
            }
            let base_row = base.get(table, id);
            for candidate in candidates {
                match classify(base_row, candidate.rows.get(table, id)) {
                    RowDelta::Unchanged => continue,
                    RowDelta::Edited(row) | RowDelta::Added(row) => {
                        merged.upsert(table, row.clone());
                    }
                    RowDelta::Deleted => {
                        if let Some(tombstone) = candidate.rows.get(table, id) {
                            merged.upsert(table, tombstone.clone());
                        } else if let Some(mut tombstone) = base_row.cloned() {
                            tombstone.mark_deleted(candidate.actor.as_str(), now);
                            merged.upsert(table, tombstone);
                        }
                    }
                }
                forwarded += 1;
                break;
            }
        }
    }

    for (conflict, resolution) in resolved.pairs() {
        apply_one(&mut merged, conflict, *resolution, actor, now);
    }

    debug!(forwarded, resolved = resolved.len(), "merge applied");
    merged
}

fn apply_one(
    merged: &mut RowSet,
    conflict: &MergeConflict,
    resolution: Resolution,
    actor: &str,
    now: i64,
) {
    match resolution {
        Resolution::Base => match &conflict.base_row {
            Some(row) => merged.upsert(&conflict.table, row.clone()),
            // Reverting an insert: the row never existed in base.
            None => {
                merged.remove(&conflict.table, conflict.sync_id);
            }
        },
        Resolution::Modifier(index) => {
            let Some(modifier) = conflict.modifier(index) else {
                warn!(key = %conflict.key, index, "resolution references a missing modifier");
                return;
            };
            match (&modifier.row, &conflict.base_row) {
                (Some(row), _) => merged.upsert(&conflict.table, row.clone()),
                (None, Some(base_row)) => {
                    let mut tombstone = base_row.clone();
                    tombstone.mark_deleted(modifier.actor.as_str(), now);
                    merged.upsert(&conflict.table, tombstone);
                }
                (None, None) => {
                    merged.remove(&conflict.table, conflict.sync_id);
                }
            }
        }
        Resolution::Delete => {
            let content = conflict
                .base_row
                .as_ref()
                .or_else(|| conflict.modifiers.iter().find_map(|m| m.row.as_ref()));
            match content {
                Some(row) => {
                    let mut tombstone = row.clone();
                    tombstone.mark_deleted(actor, now);
                    merged.upsert(&conflict.table, tombstone);
                }
                None => {
                    merged.remove(&conflict.table, conflict.sync_id);
                }
            }
        }
        Resolution::All => {
            let mut versions = conflict.modifiers.iter().filter_map(|m| m.row.as_ref());
            if let Some(first) = versions.next() {
                merged.upsert(&conflict.table, first.clone());
                for row in versions {
                    let mut minted = row.clone();
                    minted.id = SyncId::new();
                    merged.upsert(&conflict.table, minted);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{detect_conflicts, ResolutionSet};
    use crate::models::{Row, Value};
    use crate::registry::{TableRegistry, TableSpec};
    use pretty_assertions::assert_eq;

    const MERGER: &str = "merge@example.com";
    const NOW: i64 = 10_000;

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

    fn none_resolved() -> ResolvedConflicts {
        ResolvedConflicts::default()
    }

    #[test]
    fn forward_edits_apply_without_resolutions() {
        let row = assignment("Jane", "2025-07-15");
        let mut base = RowSet::new();
        base.upsert("assignment", row.clone());

        let mut edited = base.clone();
        edited.upsert(
            "assignment",
            with_date(&row, "2025-07-16", "jane@example.com", 2_000),
        );
        let added = assignment("Bob", "2025-07-20");
        edited.upsert("assignment", added.clone());

        let candidates = [
            Candidate::new("jane@example.com", edited),
            Candidate::new("bob@example.com", base.clone()),
        ];
        let merged = apply_resolutions(&base, &candidates, &none_resolved(), MERGER, NOW);

        assert_eq!(merged.row_count(), 2);
        assert_eq!(
            merged.get("assignment", row.id).unwrap().field("date"),
            Some(&Value::from("2025-07-16"))
        );
        assert_eq!(merged.get("assignment", added.id), Some(&added));
    }

    #[test]
    fn identical_changes_apply_once() {
        let row = assignment("Jane", "2025-07-15");
        let mut base = RowSet::new();
        base.upsert("assignment", row.clone());

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
        let merged = apply_resolutions(&base, &candidates, &none_resolved(), MERGER, NOW);

        assert_eq!(merged.row_count(), 1);
        assert_eq!(
            merged.get("assignment", row.id).unwrap().field("date"),
            Some(&Value::from("2025-07-16"))
        );
    }

    #[test]
    fn forward_deletion_keeps_the_tombstone() {
        let row = assignment("Jane", "2025-07-15");
        let mut base = RowSet::new();
        base.upsert("assignment", row.clone());

        let mut deleter = base.clone();
        let mut tombstone = row.clone();
        tombstone.mark_deleted("jane@example.com", 2_000);
        deleter.upsert("assignment", tombstone);

        let candidates = [Candidate::new("jane@example.com", deleter)];
        let merged = apply_resolutions(&base, &candidates, &none_resolved(), MERGER, NOW);

        let kept = merged.get("assignment", row.id).unwrap();
        assert!(kept.is_deleted());
        assert_eq!(kept.deleted_at, Some(2_000));
        assert_eq!(kept.modified_by, "jane@example.com");
    }

    #[test]
    fn forward_deletion_synthesizes_a_missing_tombstone() {
        let row = assignment("Jane", "2025-07-15");
        let mut base = RowSet::new();
        base.upsert("assignment", row.clone());

        let mut hard_deleter = base.clone();
        hard_deleter.remove("assignment", row.id);

        let candidates = [Candidate::new("jane@example.com", hard_deleter)];
        let merged = apply_resolutions(&base, &candidates, &none_resolved(), MERGER, NOW);

        let kept = merged.get("assignment", row.id).unwrap();
        assert!(kept.is_deleted());
        assert_eq!(kept.deleted_at, Some(NOW));
        assert_eq!(kept.modified_by, "jane@example.com");
    }

    /// Two people move the same assignment to different days; the merge
    /// keeps whichever version was chosen.
    fn divergent_assignment() -> (RowSet, Row, [Candidate; 2]) {
        let row = assignment("Jane", "2025-07-15");
        let mut base = RowSet::new();
        base.upsert("assignment", row.clone());

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
        (base, row, candidates)
    }

    #[test]
    fn keep_base_restores_the_base_version() {
        let (base, row, candidates) = divergent_assignment();
        let conflicts = detect_conflicts(&base, &candidates, &registry());
        let mut set = ResolutionSet::new(conflicts);
        set.keep_all_base();

        let merged = apply_resolutions(
            &base,
            &candidates,
            &set.into_resolved().unwrap(),
            MERGER,
            NOW,
        );

        assert_eq!(merged.row_count(), 1);
        assert_eq!(merged.get("assignment", row.id), base.get("assignment", row.id));
    }

    #[test]
    fn keeping_a_modifier_takes_that_version() {
        let (base, row, candidates) = divergent_assignment();
        let conflicts = detect_conflicts(&base, &candidates, &registry());
        assert_eq!(conflicts.len(), 1);
        let key = conflicts[0].key.clone();

        let mut set = ResolutionSet::new(conflicts);
        set.resolve(&key, Resolution::Modifier(1)).unwrap();

        let merged = apply_resolutions(
            &base,
            &candidates,
            &set.into_resolved().unwrap(),
            MERGER,
            NOW,
        );

        assert_eq!(merged.rows("assignment").count(), 1);
        let kept = merged.get("assignment", row.id).unwrap();
        assert_eq!(kept.field("date"), Some(&Value::from("2025-07-17")));
        assert_eq!(kept.modified_by, "bob@example.com");
    }

    #[test]
    fn choosing_a_deletion_modifier_tombstones_the_row() {
        let row = assignment("Jane", "2025-07-15");
        let mut base = RowSet::new();
        base.upsert("assignment", row.clone());

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
        let key = conflicts[0].key.clone();
        let mut set = ResolutionSet::new(conflicts);
        set.resolve(&key, Resolution::Modifier(0)).unwrap();

        let merged = apply_resolutions(
            &base,
            &candidates,
            &set.into_resolved().unwrap(),
            MERGER,
            NOW,
        );

        let kept = merged.get("assignment", row.id).unwrap();
        assert!(kept.is_deleted());
        assert_eq!(kept.modified_by, "jane@example.com");
        assert_eq!(kept.deleted_at, Some(NOW));
    }

    #[test]
    fn delete_resolution_overrides_every_version() {
        let (base, row, candidates) = divergent_assignment();
        let conflicts = detect_conflicts(&base, &candidates, &registry());
        let key = conflicts[0].key.clone();
        let mut set = ResolutionSet::new(conflicts);
        set.resolve(&key, Resolution::Delete).unwrap();

        let merged = apply_resolutions(
            &base,
            &candidates,
            &set.into_resolved().unwrap(),
            MERGER,
            NOW,
        );

        let kept = merged.get("assignment", row.id).unwrap();
        assert!(kept.is_deleted());
        assert_eq!(kept.modified_by, MERGER);
        // Content reverts to base before the tombstone lands.
        assert_eq!(kept.field("date"), Some(&Value::from("2025-07-15")));
    }

    #[test]
    fn keep_all_mints_fresh_identities() {
        let row = assignment("Sam", "2025-08-01");
        let mut base = RowSet::new();
        base.upsert("timeoff", row.clone());

        let mut jane = base.clone();
        jane.upsert("timeoff", with_date(&row, "2025-08-02", "jane@example.com", 2_000));
        let mut bob = base.clone();
        bob.upsert("timeoff", with_date(&row, "2025-08-03", "bob@example.com", 3_000));

        let candidates = [
            Candidate::new("jane@example.com", jane),
            Candidate::new("bob@example.com", bob),
        ];
        let conflicts = detect_conflicts(&base, &candidates, &registry());
        assert!(conflicts[0].allow_multiple);
        let key = conflicts[0].key.clone();
        let mut set = ResolutionSet::new(conflicts);
        set.resolve(&key, Resolution::All).unwrap();

        let merged = apply_resolutions(
            &base,
            &candidates,
            &set.into_resolved().unwrap(),
            MERGER,
            NOW,
        );

        let kept: Vec<&Row> = merged.live_rows("timeoff").collect();
        assert_eq!(kept.len(), 2);
        assert_ne!(kept[0].id, kept[1].id);
        assert!(kept.iter().any(|r| r.id == row.id));
        let dates: Vec<_> = kept.iter().filter_map(|r| r.field("date")).collect();
        assert!(dates.contains(&&Value::from("2025-08-02")));
        assert!(dates.contains(&&Value::from("2025-08-03")));
    }

    #[test]
    fn base_resolution_discards_an_insert() {
        // The row was born after the base snapshot: both candidates carry
        // it (one propagated the other's save), then edited it apart.
        let base = RowSet::new();
        let inserted = assignment("Jane", "2025-07-15");

        let mut first = RowSet::new();
        first.upsert("assignment", inserted.clone());
        let mut second = RowSet::new();
        second.upsert(
            "assignment",
            with_date(&inserted, "2025-07-18", "bob@example.com", 3_000),
        );

        let candidates = [
            Candidate::new("jane@example.com", first),
            Candidate::new("bob@example.com", second),
        ];
        let conflicts = detect_conflicts(&base, &candidates, &registry());
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].base_row, None);

        let mut set = ResolutionSet::new(conflicts);
        set.keep_all_base();
        let merged = apply_resolutions(
            &base,
            &candidates,
            &set.into_resolved().unwrap(),
            MERGER,
            NOW,
        );

        assert_eq!(merged.get("assignment", inserted.id), None);
    }

    #[test]
    fn empty_merge_is_identity() {
        let mut base = RowSet::new();
        base.upsert("assignment", assignment("Jane", "2025-07-15"));

        let merged = apply_resolutions(&base, &[], &none_resolved(), MERGER, NOW);
        assert_eq!(merged, base);
    }
}
