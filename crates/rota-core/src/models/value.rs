//! Scalar cell values

use serde::{Deserialize, Serialize};
use std::fmt;

/// A scalar value held by a single row field.
///
/// The untagged serde representation keeps snapshot files human-readable:
/// `"Jane"`, `42`, `1.5`, `true`, `null`. Variant order matters when
/// deserializing untagged data: whole JSON numbers become `Integer`,
/// fractional numbers become `Float`. JSON cannot represent NaN or
/// infinities, so rows fold non-finite floats to `Null` before storing
/// them (see [`Self::canonical`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Explicit empty value
    Null,
    /// Boolean flag
    Bool(bool),
    /// Whole number
    Integer(i64),
    /// Floating point number
    Float(f64),
    /// Text content (dates are stored as ISO-8601 text)
    Text(String),
}

impl Value {
    /// True when the value is `Null`
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text content, if this is a `Text` value
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Integer content, if this is an `Integer` value
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Boolean content, if this is a `Bool` value
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Fold a non-finite float to `Null`.
    ///
    /// `serde_json` writes NaN and infinities as `null`, so a row holding
    /// one would stop matching its own snapshot after a save. Folding when
    /// fields are set keeps the working copy identical to what a snapshot
    /// round-trip returns.
    #[must_use]
    pub fn canonical(self) -> Self {
        match self {
            Self::Float(value) if !value.is_finite() => Self::Null,
            other => other,
        }
    }
}

// Float comparison uses total_cmp so equality stays reflexive for every
// bit pattern and Value can implement Eq.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b) == std::cmp::Ordering::Equal,
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value).canonical()
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}
