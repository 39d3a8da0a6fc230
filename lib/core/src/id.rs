//! Strongly-typed ID types for domain entities.
//!
//! All IDs use ULID (Universally Unique Lexicographically Sortable Identifier) format,
//! providing both uniqueness and temporal ordering. Display renders a short entity
//! prefix (`wf_01H...`) so queue payloads and database rows stay readable; parsing
//! accepts both the prefixed and the raw form. Serde goes through the same
//! Display/FromStr pair, so the prefixed form is also the wire form.

use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when a string does not parse as an ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// Name of the ID type the parse was for.
    pub id_type: &'static str,
    /// What was wrong with the input.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Defines a newtype ID over ULID with a fixed display prefix.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Ulid);

        impl $name {
            /// Mints a fresh, random ID.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Wraps an existing ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Unwraps to the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // A foreign prefix falls through to the ULID parser, which rejects it.
                let ulid_str = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ulid::from_str(ulid_str)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        reason: e.to_string(),
                    })
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                struct IdVisitor;

                impl serde::de::Visitor<'_> for IdVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        write!(f, "a ULID string, optionally `{}_`-prefixed", $prefix)
                    }

                    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
                    where
                        E: serde::de::Error,
                    {
                        value.parse().map_err(E::custom)
                    }
                }

                deserializer.deserialize_str(IdVisitor)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a tenant (a business account on the platform).
    TenantId,
    "tn"
);

define_id!(
    /// Unique identifier for a workflow definition.
    WorkflowId,
    "wf"
);

define_id!(
    /// Unique identifier for a step within a workflow's step tree.
    StepId,
    "step"
);

define_id!(
    /// Unique identifier for a single enrollment of a record into a workflow.
    ExecutionId,
    "exec"
);

define_id!(
    /// Unique identifier for a suppression segment.
    SegmentId,
    "seg"
);

define_id!(
    /// Unique identifier for a domain record (pet, booking, owner, ...).
    RecordId,
    "rec"
);

define_id!(
    /// Unique identifier for an execution log entry.
    LogId,
    "log"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_display_format() {
        let id = TenantId::new();
        let display = id.to_string();
        assert!(display.starts_with("tn_"));
    }

    #[test]
    fn execution_id_display_format() {
        let id = ExecutionId::new();
        let display = id.to_string();
        assert!(display.starts_with("exec_"));
    }

    #[test]
    fn parse_with_prefix() {
        let id = WorkflowId::new();
        let display = id.to_string();
        let parsed: WorkflowId = display.parse().expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_without_prefix() {
        let ulid = Ulid::new();
        let id: StepId = ulid.to_string().parse().expect("should parse");
        assert_eq!(id.as_ulid(), ulid);
    }

    #[test]
    fn parse_invalid_ulid() {
        let result: Result<WorkflowId, _> = "not_a_ulid".parse();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.id_type, "WorkflowId");
    }

    #[test]
    fn parse_rejects_foreign_prefix() {
        let id = RecordId::new();
        // A SegmentId display string is not a valid RecordId ULID once the
        // wrong prefix fails to strip.
        let foreign = format!("seg_{}", id.as_ulid());
        let result: Result<RecordId, _> = foreign.parse();
        assert!(result.is_err());
    }

    #[test]
    fn id_equality() {
        let ulid = Ulid::new();
        let id1 = RecordId::from_ulid(ulid);
        let id2 = RecordId::from_ulid(ulid);
        assert_eq!(id1, id2);
    }

    #[test]
    fn id_hash() {
        use std::collections::HashSet;

        let id1 = StepId::new();
        let id2 = StepId::new();

        let mut set = HashSet::new();
        set.insert(id1);
        set.insert(id2);
        set.insert(id1); // duplicate

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn id_serde_uses_prefixed_form() {
        let id = ExecutionId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{id}\""));

        let parsed: ExecutionId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, parsed);
    }

    #[test]
    fn id_deserializes_from_raw_ulid() {
        let ulid = Ulid::new();
        let json = format!("\"{ulid}\"");
        let parsed: WorkflowId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.as_ulid(), ulid);
    }
}
