//! Translation of a [`Predicate`] into a parameterized SQL fragment.
//!
//! The fragment filters rows of a table with an `attributes` JSONB column.
//! Field names were validated at compile time and are re-checked here; every
//! operand becomes a bind parameter, never interpolated text. Numeric and
//! timestamp casts are guarded with a pattern test so a row holding
//! unparseable text drops out of the result instead of failing the query.

use crate::compile::is_safe_field;
use crate::condition::{parse_instant, Comparator, Condition};
use crate::predicate::Predicate;
use chrono::{DateTime, Utc};
use serde_json::Value;

const NUMBER_RE: &str = "^-?[0-9]+(\\.[0-9]+)?$";
const INSTANT_RE: &str = "^[0-9]{4}-[0-9]{2}-[0-9]{2}";

/// One bound operand of a rendered clause.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
}

/// A rendered SQL fragment plus its bind values, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    /// Boolean SQL expression using `$n` placeholders.
    pub clause: String,
    pub binds: Vec<BindValue>,
}

impl Predicate {
    /// Renders this predicate as a SQL boolean expression over the
    /// `attributes` column.
    ///
    /// `now` anchors relative-date windows; `first_param` is the `$n` index
    /// of the first bind, letting callers prepend their own parameters
    /// (tenant scoping and the like).
    #[must_use]
    pub fn to_where_clause(&self, now: DateTime<Utc>, first_param: usize) -> WhereClause {
        let mut renderer = Renderer {
            binds: Vec::new(),
            next_param: first_param,
            now,
        };
        let clause = renderer.render(self);
        WhereClause {
            clause,
            binds: renderer.binds,
        }
    }
}

struct Renderer {
    binds: Vec<BindValue>,
    next_param: usize,
    now: DateTime<Utc>,
}

impl Renderer {
    fn render(&mut self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::All(children) if children.is_empty() => "TRUE".to_string(),
            Predicate::Any(children) if children.is_empty() => "FALSE".to_string(),
            Predicate::All(children) => self.render_group(children, " AND "),
            Predicate::Any(children) => self.render_group(children, " OR "),
            Predicate::Compare(condition) => self.render_condition(condition),
            Predicate::Never => "FALSE".to_string(),
        }
    }

    fn render_group(&mut self, children: &[Predicate], joiner: &str) -> String {
        let parts: Vec<String> = children.iter().map(|c| self.render(c)).collect();
        format!("({})", parts.join(joiner))
    }

    fn render_condition(&mut self, condition: &Condition) -> String {
        if !is_safe_field(&condition.field) {
            return "FALSE".to_string();
        }
        let col = format!("attributes->>'{}'", condition.field);

        match condition.comparator {
            Comparator::Eq => match scalar_text(condition.value.as_ref()) {
                Some(text) => {
                    let p = self.bind(BindValue::Text(text));
                    format!("lower({col}) = lower({p})")
                }
                None => format!("({col} IS NULL OR {col} = '')"),
            },
            Comparator::Ne => match scalar_text(condition.value.as_ref()) {
                Some(text) => {
                    let p = self.bind(BindValue::Text(text));
                    format!("lower({col}) IS DISTINCT FROM lower({p})")
                }
                None => format!("({col} IS NOT NULL AND {col} <> '')"),
            },
            Comparator::In => self.render_membership(&col, &condition.values, false),
            Comparator::NotIn => self.render_membership(&col, &condition.values, true),
            Comparator::Contains => self.render_pattern(&col, condition, "%", "%"),
            Comparator::StartsWith => self.render_pattern(&col, condition, "", "%"),
            Comparator::EndsWith => self.render_pattern(&col, condition, "%", ""),
            Comparator::IsEmpty => {
                format!("({col} IS NULL OR {col} = '' OR {col} = '[]')")
            }
            Comparator::IsNotEmpty => {
                format!("NOT ({col} IS NULL OR {col} = '' OR {col} = '[]')")
            }
            Comparator::Gt => self.render_ordering(&col, condition, ">"),
            Comparator::Lt => self.render_ordering(&col, condition, "<"),
            Comparator::Gte => self.render_ordering(&col, condition, ">="),
            Comparator::Lte => self.render_ordering(&col, condition, "<="),
            Comparator::Between => self.render_between(&col, condition),
            Comparator::WithinLast(unit) => {
                self.render_window(&col, condition, unit, true)
            }
            Comparator::WithinNext(unit) => {
                self.render_window(&col, condition, unit, false)
            }
            Comparator::Before => self.render_instant(&col, condition, "<"),
            Comparator::After => self.render_instant(&col, condition, ">"),
            Comparator::OnOrBefore => self.render_date(&col, condition, "<="),
            Comparator::OnOrAfter => self.render_date(&col, condition, ">="),
            Comparator::IsTrue => format!("lower({col}) IN ('true', '1')"),
            Comparator::IsFalse => format!("lower({col}) IN ('false', '0')"),
        }
    }

    fn render_membership(&mut self, col: &str, values: &[Value], negated: bool) -> String {
        let texts: Vec<String> = values.iter().filter_map(|v| scalar_text(Some(v))).collect();
        if texts.is_empty() {
            // Nothing is a member of an empty list.
            return if negated { "TRUE" } else { "FALSE" }.to_string();
        }
        let placeholders: Vec<String> = texts
            .into_iter()
            .map(|t| format!("lower({})", self.bind(BindValue::Text(t))))
            .collect();
        let list = placeholders.join(", ");
        if negated {
            format!("({col} IS NULL OR lower({col}) NOT IN ({list}))")
        } else {
            format!("lower({col}) IN ({list})")
        }
    }

    fn render_pattern(
        &mut self,
        col: &str,
        condition: &Condition,
        before: &str,
        after: &str,
    ) -> String {
        let Some(text) = scalar_text(condition.value.as_ref()) else {
            return "FALSE".to_string();
        };
        let pattern = format!("{before}{}{after}", escape_like(&text));
        let p = self.bind(BindValue::Text(pattern));
        format!("{col} ILIKE {p}")
    }

    fn render_ordering(&mut self, col: &str, condition: &Condition, op: &str) -> String {
        if let Some(number) = condition.value.as_ref().and_then(scalar_number) {
            let p = self.bind(BindValue::Number(number));
            return format!("({col} ~ '{NUMBER_RE}' AND ({col})::numeric {op} {p})");
        }
        if let Some(instant) = condition.value.as_ref().and_then(parse_instant) {
            let p = self.bind(BindValue::Timestamp(instant));
            return format!("({col} ~ '{INSTANT_RE}' AND ({col})::timestamptz {op} {p})");
        }
        "FALSE".to_string()
    }

    fn render_between(&mut self, col: &str, condition: &Condition) -> String {
        let low_number = condition.value.as_ref().and_then(scalar_number);
        let high_number = condition.second.as_ref().and_then(scalar_number);
        if let (Some(low), Some(high)) = (low_number, high_number) {
            let p_low = self.bind(BindValue::Number(low));
            let p_high = self.bind(BindValue::Number(high));
            return format!(
                "({col} ~ '{NUMBER_RE}' AND ({col})::numeric BETWEEN {p_low} AND {p_high})"
            );
        }

        let low_instant = condition.value.as_ref().and_then(parse_instant);
        let high_instant = condition.second.as_ref().and_then(parse_instant);
        if let (Some(low), Some(high)) = (low_instant, high_instant) {
            let p_low = self.bind(BindValue::Timestamp(low));
            let p_high = self.bind(BindValue::Timestamp(high));
            return format!(
                "({col} ~ '{INSTANT_RE}' AND ({col})::timestamptz BETWEEN {p_low} AND {p_high})"
            );
        }
        "FALSE".to_string()
    }

    fn render_window(
        &mut self,
        col: &str,
        condition: &Condition,
        unit: crate::condition::DateUnit,
        last: bool,
    ) -> String {
        let Some(count) = condition.value.as_ref().and_then(scalar_number) else {
            return "FALSE".to_string();
        };
        let span = chrono::Duration::seconds((count * unit.seconds() as f64) as i64);
        let (start, end) = if last {
            (self.now - span, self.now)
        } else {
            (self.now, self.now + span)
        };
        let p_start = self.bind(BindValue::Timestamp(start));
        let p_end = self.bind(BindValue::Timestamp(end));
        format!(
            "({col} ~ '{INSTANT_RE}' AND ({col})::timestamptz >= {p_start} AND ({col})::timestamptz <= {p_end})"
        )
    }

    fn render_instant(&mut self, col: &str, condition: &Condition, op: &str) -> String {
        let Some(instant) = condition.value.as_ref().and_then(parse_instant) else {
            return "FALSE".to_string();
        };
        let p = self.bind(BindValue::Timestamp(instant));
        format!("({col} ~ '{INSTANT_RE}' AND ({col})::timestamptz {op} {p})")
    }

    fn render_date(&mut self, col: &str, condition: &Condition, op: &str) -> String {
        let Some(instant) = condition.value.as_ref().and_then(parse_instant) else {
            return "FALSE".to_string();
        };
        let p = self.bind(BindValue::Timestamp(instant));
        format!(
            "({col} ~ '{INSTANT_RE}' AND (({col})::timestamptz)::date {op} ({p})::date)"
        )
    }

    fn bind(&mut self, value: BindValue) -> String {
        let placeholder = format!("${}", self.next_param);
        self.next_param += 1;
        self.binds.push(value);
        placeholder
    }
}

fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Escapes LIKE metacharacters so operands match literally.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-15T12:00:00Z")
            .expect("valid instant")
            .with_timezone(&Utc)
    }

    #[test]
    fn renders_binds_in_placeholder_order() {
        let tree = json!({
            "logic": "and",
            "conditions": [
                {"field": "species", "operator": "eq", "value": "dog"},
                {"field": "weight_kg", "operator": "gt", "value": 20},
            ],
        });
        let predicate = compile(&tree).expect("compiles");
        let rendered = predicate.to_where_clause(now(), 3);

        assert_eq!(
            rendered.clause,
            "(lower(attributes->>'species') = lower($3) AND \
             (attributes->>'weight_kg' ~ '^-?[0-9]+(\\.[0-9]+)?$' AND \
             (attributes->>'weight_kg')::numeric > $4))"
        );
        assert_eq!(
            rendered.binds,
            vec![
                BindValue::Text("dog".to_string()),
                BindValue::Number(20.0),
            ]
        );
    }

    #[test]
    fn like_patterns_are_escaped() {
        let tree = json!({
            "conditions": [
                {"field": "name", "operator": "contains", "value": "100%_real"},
            ],
        });
        let rendered = compile(&tree)
            .expect("compiles")
            .to_where_clause(now(), 1);
        assert_eq!(rendered.clause, "(attributes->>'name' ILIKE $1)");
        assert_eq!(
            rendered.binds,
            vec![BindValue::Text("%100\\%\\_real%".to_string())]
        );
    }

    #[test]
    fn relative_window_binds_two_timestamps() {
        let tree = json!({
            "conditions": [
                {"field": "last_visit_at", "operator": "within_last_days", "value": 7},
            ],
        });
        let rendered = compile(&tree)
            .expect("compiles")
            .to_where_clause(now(), 1);
        assert_eq!(rendered.binds.len(), 2);
        let BindValue::Timestamp(start) = rendered.binds[0] else {
            panic!("expected timestamp bind");
        };
        let BindValue::Timestamp(end) = rendered.binds[1] else {
            panic!("expected timestamp bind");
        };
        assert_eq!(end - start, chrono::Duration::days(7));
        assert_eq!(end, now());
    }

    #[test]
    fn empty_membership_never_matches() {
        let tree = json!({
            "conditions": [
                {"field": "species", "operator": "in", "valueList": []},
            ],
        });
        let rendered = compile(&tree)
            .expect("compiles")
            .to_where_clause(now(), 1);
        assert_eq!(rendered.clause, "(FALSE)");
        assert!(rendered.binds.is_empty());
    }

    #[test]
    fn unsafe_field_renders_false() {
        // Hand-built condition bypassing compile-time validation.
        let predicate = Predicate::Compare(Condition {
            field: "x'); --".into(),
            comparator: Comparator::Eq,
            value: Some(json!("boom")),
            second: None,
            values: Vec::new(),
        });
        let rendered = predicate.to_where_clause(now(), 1);
        assert_eq!(rendered.clause, "FALSE");
        assert!(rendered.binds.is_empty());
    }

    #[test]
    fn vacuous_groups_render_constants() {
        let all = Predicate::All(vec![]);
        assert_eq!(all.to_where_clause(now(), 1).clause, "TRUE");
        let any = Predicate::Any(vec![]);
        assert_eq!(any.to_where_clause(now(), 1).clause, "FALSE");
    }
}
