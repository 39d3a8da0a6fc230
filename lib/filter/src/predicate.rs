//! The normalized boolean predicate tree.
//!
//! Every accepted filter grammar compiles into this one shape, so evaluation
//! and query translation never branch on where a filter came from.

use crate::condition::Condition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A boolean predicate over a single record's attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// True when every child matches. Vacuously true when empty.
    All(Vec<Predicate>),
    /// True when at least one child matches. Vacuously false when empty.
    Any(Vec<Predicate>),
    /// One atomic comparison.
    Compare(Condition),
    /// Always false. Produced for conditions whose field name failed
    /// validation, so an unsafe name can never reach the query layer.
    Never,
}

impl Predicate {
    /// Evaluates the predicate against a record's attribute object.
    ///
    /// `attributes` is expected to be a JSON object; attribute lookups on
    /// anything else behave as if every attribute were absent.
    #[must_use]
    pub fn matches(&self, attributes: &Value, now: DateTime<Utc>) -> bool {
        match self {
            Self::All(children) => children.iter().all(|c| c.matches(attributes, now)),
            Self::Any(children) => children.iter().any(|c| c.matches(attributes, now)),
            Self::Compare(condition) => condition.evaluate(attributes.get(&condition.field), now),
            Self::Never => false,
        }
    }

    /// Number of atomic comparisons in the tree.
    #[must_use]
    pub fn condition_count(&self) -> usize {
        match self {
            Self::All(children) | Self::Any(children) => {
                children.iter().map(Self::condition_count).sum()
            }
            Self::Compare(_) => 1,
            Self::Never => 0,
        }
    }
}
