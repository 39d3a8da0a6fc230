//! Segments and the suppression check that runs before every enrollment.

use chrono::{DateTime, Utc};
use copper_spaniel_core::{RecordId, SegmentId, TenantId};
use copper_spaniel_filter::compile;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::RecordStore;
use crate::workflow::Workflow;

/// How a segment decides membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentRule {
    /// Membership is an explicit list maintained elsewhere.
    Static,
    /// Membership is records matching a stored filter tree.
    Dynamic {
        /// Raw filter tree as authored; compiled at evaluation time.
        filter: Value,
    },
}

/// A named set of records used for suppression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Unique identifier for this segment.
    pub id: SegmentId,
    /// Tenant that owns this segment.
    pub tenant_id: TenantId,
    /// Human-readable name.
    pub name: String,
    /// Record type this segment applies to; `None` means any type.
    pub record_type: Option<String>,
    /// How membership is decided.
    pub rule: SegmentRule,
    /// When this segment was created.
    pub created_at: DateTime<Utc>,
}

impl Segment {
    /// Create a segment for the given rule.
    #[must_use]
    pub fn new(tenant_id: TenantId, name: impl Into<String>, rule: SegmentRule) -> Self {
        Self {
            id: SegmentId::new(),
            tenant_id,
            name: name.into(),
            record_type: None,
            rule,
            created_at: Utc::now(),
        }
    }

    /// Restrict this segment to one record type.
    #[must_use]
    pub fn for_record_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    /// Whether this segment applies to records of `record_type`.
    #[must_use]
    pub fn applies_to(&self, record_type: &str) -> bool {
        self.record_type
            .as_deref()
            .is_none_or(|restricted| restricted == record_type)
    }
}

/// Result of probing one segment for one record.
///
/// Evaluation failures are a first-class outcome rather than an error: the
/// suppression check fails open, so an unevaluable segment never blocks an
/// enrollment on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// The record is in the segment.
    Matched,
    /// The record is not in the segment.
    NotMatched,
    /// The segment could not be evaluated; treated as not matched.
    EvaluationError,
}

/// Checks a workflow's suppression segments against one record.
pub struct SuppressionChecker<'a, S: RecordStore> {
    store: &'a S,
}

impl<'a, S: RecordStore> SuppressionChecker<'a, S> {
    /// Create a checker backed by `store`.
    #[must_use]
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Return the first suppression segment containing the record, if any.
    ///
    /// Segments are probed in the order the workflow lists them, and the
    /// first match wins. Segments that cannot be loaded or evaluated are
    /// logged and skipped, so suppression never blocks on a broken segment.
    pub async fn suppressing_segment(
        &self,
        workflow: &Workflow,
        record_id: RecordId,
        record_type: &str,
        attributes: &Value,
        now: DateTime<Utc>,
    ) -> Option<SegmentId> {
        for &segment_id in &workflow.suppression_segment_ids {
            let outcome = self
                .probe_segment(workflow.tenant_id, segment_id, record_id, record_type, attributes, now)
                .await;
            if outcome == SegmentOutcome::Matched {
                return Some(segment_id);
            }
        }
        None
    }

    async fn probe_segment(
        &self,
        tenant_id: TenantId,
        segment_id: SegmentId,
        record_id: RecordId,
        record_type: &str,
        attributes: &Value,
        now: DateTime<Utc>,
    ) -> SegmentOutcome {
        let segment = match self.store.segment(tenant_id, segment_id).await {
            Ok(Some(segment)) => segment,
            Ok(None) => {
                tracing::warn!(%segment_id, "suppression segment not found; skipping");
                return SegmentOutcome::EvaluationError;
            }
            Err(error) => {
                tracing::warn!(%segment_id, %error, "failed to load suppression segment; skipping");
                return SegmentOutcome::EvaluationError;
            }
        };

        if !segment.applies_to(record_type) {
            return SegmentOutcome::NotMatched;
        }

        match &segment.rule {
            SegmentRule::Static => {
                match self
                    .store
                    .is_segment_member(tenant_id, segment_id, record_id)
                    .await
                {
                    Ok(true) => SegmentOutcome::Matched,
                    Ok(false) => SegmentOutcome::NotMatched,
                    Err(error) => {
                        tracing::warn!(
                            %segment_id,
                            %error,
                            "failed to check segment membership; skipping"
                        );
                        SegmentOutcome::EvaluationError
                    }
                }
            }
            SegmentRule::Dynamic { filter } => match compile(filter) {
                Ok(predicate) => {
                    if predicate.matches(attributes, now) {
                        SegmentOutcome::Matched
                    } else {
                        SegmentOutcome::NotMatched
                    }
                }
                Err(error) => {
                    tracing::warn!(%segment_id, %error, "unusable segment filter; skipping");
                    SegmentOutcome::EvaluationError
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::workflow::EntryCondition;
    use chrono::TimeZone;
    use serde_json::json;

    fn manual_workflow(tenant_id: TenantId, segment_ids: Vec<SegmentId>) -> Workflow {
        Workflow::new(tenant_id, "Checkup reminders", "pet", EntryCondition::Manual)
            .with_suppression_segments(segment_ids)
    }

    #[tokio::test]
    async fn dynamic_segment_match_suppresses() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let tenant_id = TenantId::new();
        let store = MemoryStore::new();

        let segment = Segment::new(
            tenant_id,
            "Do not contact",
            SegmentRule::Dynamic {
                filter: json!({
                    "conditions": [{"field": "do_not_contact", "operator": "is_true"}]
                }),
            },
        );
        let segment_id = segment.id;
        store.insert_segment(segment).await;

        let workflow = manual_workflow(tenant_id, vec![segment_id]);
        let checker = SuppressionChecker::new(&store);

        let suppressed = checker
            .suppressing_segment(
                &workflow,
                RecordId::new(),
                "pet",
                &json!({"do_not_contact": true}),
                now,
            )
            .await;
        assert_eq!(suppressed, Some(segment_id));

        let clear = checker
            .suppressing_segment(
                &workflow,
                RecordId::new(),
                "pet",
                &json!({"do_not_contact": false}),
                now,
            )
            .await;
        assert_eq!(clear, None);
    }

    #[tokio::test]
    async fn static_segment_membership_suppresses() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let tenant_id = TenantId::new();
        let record_id = RecordId::new();
        let store = MemoryStore::new();

        let segment = Segment::new(tenant_id, "Lapsed clients", SegmentRule::Static);
        let segment_id = segment.id;
        store.insert_segment(segment).await;
        store.add_segment_member(segment_id, record_id).await;

        let workflow = manual_workflow(tenant_id, vec![segment_id]);
        let checker = SuppressionChecker::new(&store);

        let suppressed = checker
            .suppressing_segment(&workflow, record_id, "pet", &json!({}), now)
            .await;
        assert_eq!(suppressed, Some(segment_id));

        let other = checker
            .suppressing_segment(&workflow, RecordId::new(), "pet", &json!({}), now)
            .await;
        assert_eq!(other, None);
    }

    #[tokio::test]
    async fn broken_segment_fails_open() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let tenant_id = TenantId::new();
        let store = MemoryStore::new();

        let broken = Segment::new(
            tenant_id,
            "Unparseable",
            SegmentRule::Dynamic {
                filter: json!({"unexpected": true}),
            },
        );
        let broken_id = broken.id;
        store.insert_segment(broken).await;

        // Missing segment id plus a broken filter: both skipped, no match.
        let workflow = manual_workflow(tenant_id, vec![SegmentId::new(), broken_id]);
        let checker = SuppressionChecker::new(&store);

        let suppressed = checker
            .suppressing_segment(&workflow, RecordId::new(), "pet", &json!({}), now)
            .await;
        assert_eq!(suppressed, None);
    }

    #[tokio::test]
    async fn segment_for_other_record_type_does_not_match() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let tenant_id = TenantId::new();
        let store = MemoryStore::new();

        let segment = Segment::new(
            tenant_id,
            "Owner opt-outs",
            SegmentRule::Dynamic {
                filter: json!({
                    "conditions": [{"field": "opted_out", "operator": "is_true"}]
                }),
            },
        )
        .for_record_type("owner");
        let segment_id = segment.id;
        store.insert_segment(segment).await;

        let workflow = manual_workflow(tenant_id, vec![segment_id]);
        let checker = SuppressionChecker::new(&store);

        let suppressed = checker
            .suppressing_segment(
                &workflow,
                RecordId::new(),
                "pet",
                &json!({"opted_out": true}),
                now,
            )
            .await;
        assert_eq!(suppressed, None);
    }
}
