//! Per-table sync configuration supplied by the host application.
//!
//! Nothing here is inferred from table names: whether a table is additive
//! and which columns describe a row to a human are declared explicitly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::Row;

/// Sync behavior for one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSpec {
    /// Column names used to describe a row to a human, in display order
    #[serde(default)]
    pub display_keys: Vec<String>,
    /// Additive table: parallel rows are acceptable, so keep-all
    /// resolution is permitted for its conflicts
    #[serde(default)]
    pub additive: bool,
}

impl TableSpec {
    /// Spec with no display keys, non-additive
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the columns used to describe rows of this table
    #[must_use]
    pub fn with_display_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.display_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the table additive
    #[must_use]
    pub const fn additive(mut self) -> Self {
        self.additive = true;
        self
    }
}

/// Table configuration for every synced table, keyed by table name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableRegistry {
    tables: BTreeMap<String, TableSpec>,
}

impl TableRegistry {
    /// Empty registry; unknown tables get default behavior
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration
    #[must_use]
    pub fn with_table(mut self, name: impl Into<String>, spec: TableSpec) -> Self {
        self.register(name, spec);
        self
    }

    /// Register or replace a table's spec
    pub fn register(&mut self, name: impl Into<String>, spec: TableSpec) {
        self.tables.insert(name.into(), spec);
    }

    /// Spec for a table, if registered
    #[must_use]
    pub fn spec(&self, table: &str) -> Option<&TableSpec> {
        self.tables.get(table)
    }

    /// Whether keep-all resolution is permitted for a table.
    ///
    /// Unregistered tables are never additive.
    #[must_use]
    pub fn allow_multiple(&self, table: &str) -> bool {
        self.tables.get(table).is_some_and(|spec| spec.additive)
    }

    /// Describe a row using the table's display keys.
    ///
    /// Joins the non-null display values in declared order; `None` when the
    /// table has no display keys or none of them resolve on this row.
    #[must_use]
    pub fn describe(&self, table: &str, row: &Row) -> Option<String> {
        let spec = self.tables.get(table)?;
        let parts: Vec<String> = spec
            .display_keys
            .iter()
            .filter_map(|key| row.field(key))
            .filter(|value| !value.is_null())
            .map(ToString::to_string)
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;
    use pretty_assertions::assert_eq;

    fn assignment_row() -> Row {
        let fields = [
            ("person".to_string(), Value::from("Jane")),
            ("date".to_string(), Value::from("2025-07-15")),
            ("note".to_string(), Value::Null),
        ]
        .into();
        Row::new(fields, "jane@example.com", 1_000)
    }

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

    #[test]
    fn describe_joins_display_values() {
        let registry = registry();
        assert_eq!(
            registry.describe("assignment", &assignment_row()),
            Some("Jane, 2025-07-15".to_string())
        );
    }

    #[test]
    fn describe_skips_missing_and_null_values() {
        let registry = TableRegistry::new().with_table(
            "assignment",
            TableSpec::new().with_display_keys(["missing", "note", "person"]),
        );
        assert_eq!(
            registry.describe("assignment", &assignment_row()),
            Some("Jane".to_string())
        );
    }

    #[test]
    fn describe_unregistered_table_is_none() {
        assert_eq!(registry().describe("shift", &assignment_row()), None);
    }

    #[test]
    fn allow_multiple_defaults_to_false() {
        let registry = registry();
        assert!(registry.allow_multiple("timeoff"));
        assert!(!registry.allow_multiple("assignment"));
        assert!(!registry.allow_multiple("shift"));
    }

    #[test]
    fn parses_from_json() {
        let registry: TableRegistry = serde_json::from_str(
            r#"{"timeoff": {"display_keys": ["person"], "additive": true}}"#,
        )
        .unwrap();
        assert!(registry.allow_multiple("timeoff"));
        assert_eq!(
            registry.spec("timeoff").unwrap().display_keys,
            vec!["person".to_string()]
        );
    }
}
