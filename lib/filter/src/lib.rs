//! Stored-filter compilation and evaluation for the copper-spaniel platform.
//!
//! Tenant-authored filters arrive in one of three JSON shapes that accumulated
//! over the product's history. This crate detects the shape structurally,
//! normalizes all of them into one boolean predicate tree, and offers two ways
//! to apply that tree: in-memory evaluation against a fetched record, and
//! translation into a parameterized SQL fragment for bulk matching.

pub mod compile;
pub mod condition;
pub mod error;
pub mod predicate;
pub mod sql;

pub use compile::compile;
pub use condition::{Comparator, Condition, DateUnit};
pub use error::FilterError;
pub use predicate::Predicate;
pub use sql::{BindValue, WhereClause};
