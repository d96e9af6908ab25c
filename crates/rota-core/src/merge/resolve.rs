//! Resolution collection for a detected conflict set

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::models::{ConflictKey, MergeConflict, Resolution};

/// Detected conflicts plus the resolutions collected so far.
///
/// Pure data: choices arrive in any order, can be revised, and nothing is
/// applied until every conflict has one and [`ResolutionSet::into_resolved`]
/// hands the complete set to the applier.
#[derive(Debug, Clone, Default)]
pub struct ResolutionSet {
    conflicts: Vec<MergeConflict>,
    choices: BTreeMap<ConflictKey, Resolution>,
}

impl ResolutionSet {
    /// Start collecting resolutions for `conflicts`
    #[must_use]
    pub fn new(conflicts: Vec<MergeConflict>) -> Self {
        Self {
            conflicts,
            choices: BTreeMap::new(),
        }
    }

    /// The conflicts being resolved, in detection order
    #[must_use]
    pub fn conflicts(&self) -> &[MergeConflict] {
        &self.conflicts
    }

    /// Number of conflicts in the set
    #[must_use]
    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    /// True when the set holds no conflicts at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// The choice recorded for a conflict, if any
    #[must_use]
    pub fn choice(&self, key: &ConflictKey) -> Option<Resolution> {
        self.choices.get(key).copied()
    }

    /// Record a choice for one conflict, replacing any earlier choice.
    ///
    /// Rejects keys that were never detected, modifier indexes that do not
    /// exist, and keep-all on tables that are not additive.
    pub fn resolve(&mut self, key: &ConflictKey, resolution: Resolution) -> Result<()> {
        let conflict = self
            .conflicts
            .iter()
            .find(|conflict| conflict.key == *key)
            .ok_or_else(|| Error::UnknownConflict(key.to_string()))?;

        match resolution {
            Resolution::Modifier(index) if index >= conflict.modifiers.len() => {
                return Err(Error::InvalidResolution {
                    key: key.to_string(),
                    message: format!(
                        "modifier index {index} out of range for {} modifiers",
                        conflict.modifiers.len()
                    ),
                });
            }
            Resolution::All if !conflict.allow_multiple => {
                return Err(Error::InvalidResolution {
                    key: key.to_string(),
                    message: "keep-all is only permitted for additive tables".to_string(),
                });
            }
            _ => {}
        }

        self.choices.insert(key.clone(), resolution);
        Ok(())
    }

    /// Resolve every conflict in favor of the base snapshot
    pub fn keep_all_base(&mut self) {
        for conflict in &self.conflicts {
            self.choices.insert(conflict.key.clone(), Resolution::Base);
        }
    }

    /// Resolve every conflict in favor of `actor`'s version where one
    /// exists, and the base version where it does not.
    pub fn keep_all_from(&mut self, actor: &str) {
        for conflict in &self.conflicts {
            let resolution = conflict
                .modifiers
                .iter()
                .position(|modifier| modifier.actor == actor)
                .map_or(Resolution::Base, Resolution::Modifier);
            self.choices.insert(conflict.key.clone(), resolution);
        }
    }

    /// Conflicts that still have no choice recorded
    pub fn unresolved(&self) -> impl Iterator<Item = &MergeConflict> {
        self.conflicts
            .iter()
            .filter(|conflict| !self.choices.contains_key(&conflict.key))
    }

    /// Number of conflicts still lacking a choice
    #[must_use]
    pub fn unresolved_count(&self) -> usize {
        self.unresolved().count()
    }

    /// True when every conflict has a choice
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unresolved_count() == 0
    }

    /// Finish collection, yielding a set the applier will accept.
    ///
    /// Fails with [`Error::IncompleteResolution`] while any conflict is
    /// still unresolved; partial application is never allowed.
    pub fn into_resolved(self) -> Result<ResolvedConflicts> {
        let unresolved = self.unresolved_count();
        if unresolved > 0 {
            return Err(Error::IncompleteResolution(unresolved));
        }

        let Self { conflicts, choices } = self;
        let mut pairs = Vec::with_capacity(conflicts.len());
        for conflict in conflicts {
            if let Some(resolution) = choices.get(&conflict.key).copied() {
                pairs.push((conflict, resolution));
            }
        }
        Ok(ResolvedConflicts { pairs })
    }
}

/// A complete conflict-to-resolution mapping.
///
/// Only [`ResolutionSet::into_resolved`] builds a non-empty one, so holding
/// a value of this type means every detected conflict has a decision. The
/// default value is the empty set used for conflict-free merges.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConflicts {
    pairs: Vec<(MergeConflict, Resolution)>,
}

impl ResolvedConflicts {
    /// Conflict/resolution pairs in detection order
    #[must_use]
    pub fn pairs(&self) -> &[(MergeConflict, Resolution)] {
        &self.pairs
    }

    /// True when there was nothing to resolve
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of resolved conflicts
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Modifier, Row, SyncId, Value};
    use pretty_assertions::assert_eq;

    fn conflict(table: &str, allow_multiple: bool) -> MergeConflict {
        let id = SyncId::new();
        let fields = [("person".to_string(), Value::from("Jane"))].into();
        let base_row = Row::new(fields, "sam@example.com", 1_000);
        let jane = {
            let mut row = base_row.clone();
            row.fields.insert("person".to_string(), Value::from("Janet"));
            row.touch("jane@example.com", 2_000);
            row
        };
        let bob = {
            let mut row = base_row.clone();
            row.fields.insert("person".to_string(), Value::from("Joan"));
            row.touch("bob@example.com", 3_000);
            row
        };
        MergeConflict {
            key: ConflictKey::new(table, id),
            table: table.to_string(),
            sync_id: id,
            base_row: Some(base_row),
            modifiers: vec![
                Modifier {
                    actor: "jane@example.com".to_string(),
                    row: Some(jane),
                },
                Modifier {
                    actor: "bob@example.com".to_string(),
                    row: Some(bob),
                },
            ],
            row_description: "Jane".to_string(),
            allow_multiple,
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut set = ResolutionSet::new(vec![conflict("assignment", false)]);
        let missing = ConflictKey::new("assignment", SyncId::new());
        assert!(matches!(
            set.resolve(&missing, Resolution::Base),
            Err(Error::UnknownConflict(_))
        ));
    }

    #[test]
    fn out_of_range_modifier_is_rejected() {
        let conflict = conflict("assignment", false);
        let key = conflict.key.clone();
        let mut set = ResolutionSet::new(vec![conflict]);
        assert!(matches!(
            set.resolve(&key, Resolution::Modifier(2)),
            Err(Error::InvalidResolution { .. })
        ));
        set.resolve(&key, Resolution::Modifier(1)).unwrap();
    }

    #[test]
    fn keep_all_requires_an_additive_table() {
        let strict = conflict("assignment", false);
        let strict_key = strict.key.clone();
        let additive = conflict("timeoff", true);
        let additive_key = additive.key.clone();
        let mut set = ResolutionSet::new(vec![strict, additive]);

        assert!(matches!(
            set.resolve(&strict_key, Resolution::All),
            Err(Error::InvalidResolution { .. })
        ));
        set.resolve(&additive_key, Resolution::All).unwrap();
    }

    #[test]
    fn choices_can_be_revised() {
        let conflict = conflict("assignment", false);
        let key = conflict.key.clone();
        let mut set = ResolutionSet::new(vec![conflict]);

        set.resolve(&key, Resolution::Base).unwrap();
        set.resolve(&key, Resolution::Delete).unwrap();
        assert_eq!(set.choice(&key), Some(Resolution::Delete));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn incomplete_sets_refuse_to_finish() {
        let mut set = ResolutionSet::new(vec![
            conflict("assignment", false),
            conflict("assignment", false),
        ]);
        let first_key = set.conflicts()[0].key.clone();
        set.resolve(&first_key, Resolution::Base).unwrap();

        assert!(!set.is_complete());
        assert_eq!(set.unresolved_count(), 1);
        assert!(matches!(
            set.into_resolved(),
            Err(Error::IncompleteResolution(1))
        ));
    }

    #[test]
    fn keep_all_base_completes_the_set() {
        let mut set = ResolutionSet::new(vec![
            conflict("assignment", false),
            conflict("timeoff", true),
        ]);
        set.keep_all_base();

        assert!(set.is_complete());
        let resolved = set.into_resolved().unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(resolved
            .pairs()
            .iter()
            .all(|(_, resolution)| *resolution == Resolution::Base));
    }

    #[test]
    fn keep_all_from_prefers_the_actors_version() {
        let mut set = ResolutionSet::new(vec![conflict("assignment", false)]);
        set.keep_all_from("bob@example.com");

        let resolved = set.into_resolved().unwrap();
        assert_eq!(resolved.pairs()[0].1, Resolution::Modifier(1));
    }

    #[test]
    fn keep_all_from_falls_back_to_base() {
        let mut set = ResolutionSet::new(vec![conflict("assignment", false)]);
        set.keep_all_from("nobody@example.com");

        let resolved = set.into_resolved().unwrap();
        assert_eq!(resolved.pairs()[0].1, Resolution::Base);
    }

    #[test]
    fn empty_set_is_trivially_complete() {
        let set = ResolutionSet::new(Vec::new());
        assert!(set.is_empty());
        assert!(set.is_complete());
        assert!(set.into_resolved().unwrap().is_empty());
    }
}
