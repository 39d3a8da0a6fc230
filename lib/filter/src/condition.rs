//! Atomic filter conditions and the comparison semantics behind them.
//!
//! A condition names a record attribute, a comparator, and up to two scalar
//! operands or a list. Comparator tokens are accepted case-insensitively with
//! hyphens and spaces treated as underscores, so `Starts-With`, `starts with`
//! and `STARTS_WITH` all mean the same thing.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unit for relative-date window comparators.
///
/// Units convert to a fixed duration: an hour is 1/24 day, a week 7 days,
/// a month 30 days and a year 365 days. Calendar-aware arithmetic is
/// deliberately not used so that two records one second apart never straddle
/// a month boundary differently than a day boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateUnit {
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl DateUnit {
    /// Seconds in one unit.
    #[must_use]
    pub const fn seconds(self) -> i64 {
        match self {
            Self::Hours => 3_600,
            Self::Days => 86_400,
            Self::Weeks => 7 * 86_400,
            Self::Months => 30 * 86_400,
            Self::Years => 365 * 86_400,
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "hour" | "hours" => Some(Self::Hours),
            "day" | "days" => Some(Self::Days),
            "week" | "weeks" => Some(Self::Weeks),
            "month" | "months" => Some(Self::Months),
            "year" | "years" => Some(Self::Years),
            _ => None,
        }
    }
}

/// Comparison operator of an atomic condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Ne,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    Gt,
    Lt,
    Gte,
    Lte,
    Between,
    WithinLast(DateUnit),
    WithinNext(DateUnit),
    Before,
    After,
    OnOrBefore,
    OnOrAfter,
    IsTrue,
    IsFalse,
}

impl Comparator {
    /// Parses a comparator token, accepting the synonym set accumulated across
    /// the filter grammars. Returns `None` for tokens no grammar defines.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();

        let parsed = match normalized.as_str() {
            "eq" | "equal" | "equals" | "is" => Self::Eq,
            "ne" | "neq" | "not_equal" | "not_equals" | "is_not" => Self::Ne,
            "in" | "any_of" | "is_any_of" | "one_of" => Self::In,
            "not_in" | "nin" | "none_of" | "is_none_of" => Self::NotIn,
            "contains" | "includes" => Self::Contains,
            "starts_with" | "begins_with" => Self::StartsWith,
            "ends_with" => Self::EndsWith,
            "is_empty" | "empty" | "is_blank" => Self::IsEmpty,
            "is_not_empty" | "not_empty" | "is_present" => Self::IsNotEmpty,
            "gt" | "greater_than" | ">" => Self::Gt,
            "lt" | "less_than" | "<" => Self::Lt,
            "gte" | "greater_than_or_equal" | ">=" => Self::Gte,
            "lte" | "less_than_or_equal" | "<=" => Self::Lte,
            "between" => Self::Between,
            "before" => Self::Before,
            "after" => Self::After,
            "on_or_before" => Self::OnOrBefore,
            "on_or_after" => Self::OnOrAfter,
            "is_true" | "true" => Self::IsTrue,
            "is_false" | "false" => Self::IsFalse,
            other => return Self::parse_relative(other),
        };
        Some(parsed)
    }

    fn parse_relative(token: &str) -> Option<Self> {
        for (prefix, last) in [
            ("within_last", true),
            ("in_last", true),
            ("within_next", false),
            ("in_next", false),
        ] {
            if let Some(rest) = token.strip_prefix(prefix) {
                // Bare "within_last" defaults to days.
                let unit = if rest.is_empty() {
                    DateUnit::Days
                } else {
                    DateUnit::parse(rest.strip_prefix('_')?)?
                };
                return Some(if last {
                    Self::WithinLast(unit)
                } else {
                    Self::WithinNext(unit)
                });
            }
        }
        None
    }
}

/// One atomic comparison against a single record attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Attribute name, already validated against the field allow-list.
    pub field: String,
    pub comparator: Comparator,
    /// Primary operand (absent for operand-free comparators).
    #[serde(default)]
    pub value: Option<Value>,
    /// Upper bound for `between`.
    #[serde(default)]
    pub second: Option<Value>,
    /// Operand list for membership comparators.
    #[serde(default)]
    pub values: Vec<Value>,
}

impl Condition {
    /// Evaluates this condition against an attribute value fetched from a
    /// record. `None` means the record has no such attribute.
    #[must_use]
    pub fn evaluate(&self, attr: Option<&Value>, now: DateTime<Utc>) -> bool {
        match self.comparator {
            Comparator::Eq => loose_eq(attr, self.value.as_ref()),
            Comparator::Ne => !loose_eq(attr, self.value.as_ref()),
            Comparator::In => self.values.iter().any(|v| loose_eq(attr, Some(v))),
            Comparator::NotIn => !self.values.iter().any(|v| loose_eq(attr, Some(v))),
            Comparator::Contains => self.string_test(attr, |a, v| a.contains(v)),
            Comparator::StartsWith => self.string_test(attr, |a, v| a.starts_with(v)),
            Comparator::EndsWith => self.string_test(attr, |a, v| a.ends_with(v)),
            Comparator::IsEmpty => is_empty(attr),
            Comparator::IsNotEmpty => !is_empty(attr),
            Comparator::Gt => self.ordering_test(attr, |o| o == std::cmp::Ordering::Greater),
            Comparator::Lt => self.ordering_test(attr, |o| o == std::cmp::Ordering::Less),
            Comparator::Gte => self.ordering_test(attr, |o| o != std::cmp::Ordering::Less),
            Comparator::Lte => self.ordering_test(attr, |o| o != std::cmp::Ordering::Greater),
            Comparator::Between => self.between_test(attr),
            Comparator::WithinLast(unit) => self.window_test(attr, unit, now, true),
            Comparator::WithinNext(unit) => self.window_test(attr, unit, now, false),
            Comparator::Before => self.instant_test(attr, |a, t| a < t),
            Comparator::After => self.instant_test(attr, |a, t| a > t),
            Comparator::OnOrBefore => self.date_test(attr, |a, t| a <= t),
            Comparator::OnOrAfter => self.date_test(attr, |a, t| a >= t),
            Comparator::IsTrue => is_truthy(attr),
            Comparator::IsFalse => is_falsy(attr),
        }
    }

    fn string_test(&self, attr: Option<&Value>, test: impl Fn(&str, &str) -> bool) -> bool {
        let (Some(attr_text), Some(value_text)) = (
            attr.and_then(value_text),
            self.value.as_ref().and_then(|v| value_text(v)),
        ) else {
            return false;
        };
        test(&attr_text.to_lowercase(), &value_text.to_lowercase())
    }

    fn ordering_test(
        &self,
        attr: Option<&Value>,
        accept: impl Fn(std::cmp::Ordering) -> bool,
    ) -> bool {
        compare_scalars(attr, self.value.as_ref()).is_some_and(accept)
    }

    fn between_test(&self, attr: Option<&Value>) -> bool {
        let low = compare_scalars(attr, self.value.as_ref());
        let high = compare_scalars(attr, self.second.as_ref());
        matches!(low, Some(o) if o != std::cmp::Ordering::Less)
            && matches!(high, Some(o) if o != std::cmp::Ordering::Greater)
    }

    fn window_test(&self, attr: Option<&Value>, unit: DateUnit, now: DateTime<Utc>, last: bool) -> bool {
        let Some(instant) = attr.and_then(parse_instant) else {
            return false;
        };
        let Some(count) = self.value.as_ref().and_then(as_number) else {
            return false;
        };
        let span = chrono::Duration::seconds((count * unit.seconds() as f64) as i64);
        if last {
            instant <= now && instant >= now - span
        } else {
            instant >= now && instant <= now + span
        }
    }

    fn instant_test(
        &self,
        attr: Option<&Value>,
        test: impl Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
    ) -> bool {
        let (Some(attr_instant), Some(target)) = (
            attr.and_then(parse_instant),
            self.value.as_ref().and_then(parse_instant),
        ) else {
            return false;
        };
        test(attr_instant, target)
    }

    fn date_test(&self, attr: Option<&Value>, test: impl Fn(NaiveDate, NaiveDate) -> bool) -> bool {
        let (Some(attr_instant), Some(target)) = (
            attr.and_then(parse_instant),
            self.value.as_ref().and_then(parse_instant),
        ) else {
            return false;
        };
        test(attr_instant.date_naive(), target.date_naive())
    }
}

/// Loose scalar equality: numeric when both sides are numeric, boolean when
/// both are boolean, otherwise case-insensitive text. A missing or null
/// attribute only equals a null or empty operand.
fn loose_eq(attr: Option<&Value>, target: Option<&Value>) -> bool {
    let target_empty = target.is_none_or(|t| t.is_null() || matches!(t, Value::String(s) if s.is_empty()));
    let Some(attr) = attr.filter(|a| !a.is_null()) else {
        return target_empty;
    };
    let Some(target) = target.filter(|t| !t.is_null()) else {
        return false;
    };
    if let (Some(a), Some(b)) = (as_number(attr), as_number(target)) {
        return a == b;
    }
    if let (Value::Bool(a), Value::Bool(b)) = (attr, target) {
        return a == b;
    }
    match (value_text(attr), value_text(target)) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(&b),
        _ => false,
    }
}

fn is_empty(attr: Option<&Value>) -> bool {
    match attr {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

fn is_truthy(attr: Option<&Value>) -> bool {
    match attr {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
        Some(Value::Number(n)) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

fn is_falsy(attr: Option<&Value>) -> bool {
    match attr {
        Some(Value::Bool(b)) => !*b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("false") || s == "0",
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

/// Orders an attribute against an operand: numerically when both sides are
/// numeric, as instants when both parse as dates, otherwise incomparable.
fn compare_scalars(attr: Option<&Value>, target: Option<&Value>) -> Option<std::cmp::Ordering> {
    let attr = attr?;
    let target = target?;
    if let (Some(a), Some(b)) = (as_number(attr), as_number(target)) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (parse_instant(attr), parse_instant(target)) {
        return Some(a.cmp(&b));
    }
    None
}

/// Text rendering of a scalar; composite values have none.
fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Numeric reading of a scalar, accepting numeric strings.
fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parses an instant from an attribute or operand. Accepts RFC 3339, a naive
/// `YYYY-MM-DDTHH:MM:SS` (taken as UTC), and a bare `YYYY-MM-DD` (midnight UTC).
pub(crate) fn parse_instant(v: &Value) -> Option<DateTime<Utc>> {
    let Value::String(s) = v else {
        return None;
    };
    let s = s.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}
