//! Row predicates for `select`, `update` and `delete`.
//!
//! Predicates are plain data so they can be built on either side of the
//! script boundary and shipped across it as JSON.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::value::{Row, SqlValue};

/// A row -> bool filter built from comparisons and boolean combinators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Predicate {
    /// Matches every row.
    #[default]
    All,
    Eq { column: String, value: SqlValue },
    Ne { column: String, value: SqlValue },
    Gt { column: String, value: SqlValue },
    Ge { column: String, value: SqlValue },
    Lt { column: String, value: SqlValue },
    Le { column: String, value: SqlValue },
    /// SQL-style `%` wildcard match, see [`LikePattern`].
    Like { column: String, pattern: String },
    /// All sub-predicates hold. Empty is true.
    And { predicates: Vec<Predicate> },
    /// Any sub-predicate holds. Empty is false.
    Or { predicates: Vec<Predicate> },
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Predicate::Eq { column: column.into(), value: value.into() }
    }

    pub fn ne(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Predicate::Ne { column: column.into(), value: value.into() }
    }

    pub fn gt(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Predicate::Gt { column: column.into(), value: value.into() }
    }

    pub fn ge(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Predicate::Ge { column: column.into(), value: value.into() }
    }

    pub fn lt(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Predicate::Lt { column: column.into(), value: value.into() }
    }

    pub fn le(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Predicate::Le { column: column.into(), value: value.into() }
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::Like { column: column.into(), pattern: pattern.into() }
    }

    #[must_use]
    pub fn and(predicates: Vec<Predicate>) -> Self {
        Predicate::And { predicates }
    }

    #[must_use]
    pub fn or(predicates: Vec<Predicate>) -> Self {
        Predicate::Or { predicates }
    }

    /// Evaluate against a row. A column the row lacks reads as null.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        let cell = |column: &str| row.get(column).unwrap_or(&SqlValue::Null);
        match self {
            Predicate::All => true,
            Predicate::Eq { column, value } => cell(column) == value,
            Predicate::Ne { column, value } => cell(column) != value,
            Predicate::Gt { column, value } => order(cell(column), value) == Some(Ordering::Greater),
            Predicate::Ge { column, value } => matches!(
                order(cell(column), value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Predicate::Lt { column, value } => order(cell(column), value) == Some(Ordering::Less),
            Predicate::Le { column, value } => matches!(
                order(cell(column), value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Predicate::Like { column, pattern } => cell(column)
                .as_str()
                .is_some_and(|s| LikePattern::parse(pattern).matches(s)),
            Predicate::And { predicates } => predicates.iter().all(|p| p.matches(row)),
            Predicate::Or { predicates } => predicates.iter().any(|p| p.matches(row)),
        }
    }
}

/// Values of different types never order against each other.
fn order(a: &SqlValue, b: &SqlValue) -> Option<Ordering> {
    match (a, b) {
        (SqlValue::Number(x), SqlValue::Number(y)) => x.partial_cmp(y),
        (SqlValue::Text(x), SqlValue::Text(y)) => Some(x.cmp(y)),
        (SqlValue::Bool(x), SqlValue::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// A `like` pattern. `%` is only a wildcard as the first and/or last
/// character; anywhere else it is a literal and there is no escaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikePattern<'a> {
    /// `%needle%`
    Contains(&'a str),
    /// `%suffix`
    EndsWith(&'a str),
    /// `prefix%`
    StartsWith(&'a str),
    /// no wildcard
    Exact(&'a str),
}

impl<'a> LikePattern<'a> {
    #[must_use]
    pub fn parse(pattern: &'a str) -> Self {
        if pattern.len() >= 2 && pattern.starts_with('%') && pattern.ends_with('%') {
            LikePattern::Contains(&pattern[1..pattern.len() - 1])
        } else if let Some(rest) = pattern.strip_prefix('%') {
            LikePattern::EndsWith(rest)
        } else if let Some(rest) = pattern.strip_suffix('%') {
            LikePattern::StartsWith(rest)
        } else {
            LikePattern::Exact(pattern)
        }
    }

    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match self {
            LikePattern::Contains(needle) => value.contains(needle),
            LikePattern::EndsWith(suffix) => value.ends_with(suffix),
            LikePattern::StartsWith(prefix) => value.starts_with(prefix),
            LikePattern::Exact(exact) => value == *exact,
        }
    }
}
