//! Compilation of stored filter trees into [`Predicate`]s.
//!
//! Three grammars are accepted, detected by structural inspection:
//!
//! - branch trees: nested nodes carrying `filterBranchType` (`OR`/`AND`),
//!   child `filterBranches`, and atomic `filters`;
//! - legacy groups: a top-level `groupLogic` combining `groups`, each with its
//!   own `logic` over `conditions`;
//! - flat lists: `conditions` combined by a single `logic`.
//!
//! Atoms with an unrecognized operator contribute nothing to their parent
//! node (logged, never fatal); atoms whose field name fails the allow-list
//! compile to an always-false node. Both policies are intentional: a filter
//! written in a newer product version must degrade, not crash, and an
//! unvalidated field name must never reach the query layer.

use crate::condition::{Comparator, Condition};
use crate::error::FilterError;
use crate::predicate::Predicate;
use serde_json::Value;

#[derive(Clone, Copy, PartialEq)]
enum Logic {
    And,
    Or,
}

impl Logic {
    fn combine(self, children: Vec<Predicate>) -> Predicate {
        match self {
            Self::And => Predicate::All(children),
            Self::Or => Predicate::Any(children),
        }
    }
}

/// Compiles a stored filter tree in any accepted grammar into a [`Predicate`].
///
/// Returns an error only for structurally unusable input (not an object, no
/// recognizable shape, malformed nesting). Per-condition problems degrade as
/// described in the module docs.
pub fn compile(tree: &Value) -> Result<Predicate, FilterError> {
    let Value::Object(map) = tree else {
        return Err(FilterError::UnrecognizedShape);
    };
    if map.contains_key("filterBranchType") || map.contains_key("filterBranches") {
        return compile_branch(tree);
    }
    if map.contains_key("groups") || map.contains_key("groupLogic") {
        return compile_groups(tree);
    }
    if map.contains_key("conditions") {
        return compile_flat(tree);
    }
    Err(FilterError::UnrecognizedShape)
}

fn compile_branch(node: &Value) -> Result<Predicate, FilterError> {
    let logic = match node.get("filterBranchType") {
        Some(value) => parse_logic(value)?,
        None => {
            return Err(FilterError::MalformedNode {
                reason: "branch node is missing filterBranchType".into(),
            });
        }
    };

    let mut children = Vec::new();
    for atom in array_field(node, "filters")? {
        if let Some(compiled) = compile_atom(atom) {
            children.push(compiled);
        }
    }
    for branch in array_field(node, "filterBranches")? {
        children.push(compile_branch(branch)?);
    }
    Ok(logic.combine(children))
}

fn compile_groups(node: &Value) -> Result<Predicate, FilterError> {
    let group_logic = match node.get("groupLogic") {
        Some(value) => parse_logic(value)?,
        None => Logic::And,
    };

    let mut groups = Vec::new();
    for group in array_field(node, "groups")? {
        let logic = match group.get("logic") {
            Some(value) => parse_logic(value)?,
            None => Logic::And,
        };
        let mut members = Vec::new();
        for atom in array_field(group, "conditions")? {
            if let Some(compiled) = compile_atom(atom) {
                members.push(compiled);
            }
        }
        groups.push(logic.combine(members));
    }
    Ok(group_logic.combine(groups))
}

fn compile_flat(node: &Value) -> Result<Predicate, FilterError> {
    let logic = match node.get("logic") {
        Some(value) => parse_logic(value)?,
        None => Logic::And,
    };

    let mut children = Vec::new();
    for atom in array_field(node, "conditions")? {
        if let Some(compiled) = compile_atom(atom) {
            children.push(compiled);
        }
    }
    Ok(logic.combine(children))
}

/// Reads an optional array field; present-but-not-an-array is malformed.
fn array_field<'a>(node: &'a Value, key: &str) -> Result<&'a [Value], FilterError> {
    match node.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(FilterError::MalformedNode {
            reason: format!("{key} must be an array"),
        }),
    }
}

fn parse_logic(value: &Value) -> Result<Logic, FilterError> {
    let token = value.as_str().unwrap_or_default();
    match token.to_ascii_lowercase().as_str() {
        "and" | "all" => Ok(Logic::And),
        "or" | "any" => Ok(Logic::Or),
        _ => Err(FilterError::InvalidLogic {
            found: token.to_string(),
        }),
    }
}

/// Compiles one atomic condition. `None` means the atom contributes nothing.
fn compile_atom(atom: &Value) -> Option<Predicate> {
    let Value::Object(map) = atom else {
        tracing::warn!("Skipping filter condition that is not an object");
        return None;
    };

    let field = map
        .get("field")
        .or_else(|| map.get("property"))
        .and_then(Value::as_str);
    let Some(field) = field else {
        tracing::warn!("Skipping filter condition without a field name");
        return None;
    };

    if !is_safe_field(field) {
        tracing::warn!(field, "Rejecting filter condition with unsafe field name");
        return Some(Predicate::Never);
    }

    let Some(operator) = map.get("operator").and_then(Value::as_str) else {
        tracing::warn!(field, "Skipping filter condition without an operator");
        return None;
    };
    let Some(comparator) = Comparator::parse(operator) else {
        tracing::warn!(field, operator, "Skipping filter condition with unrecognized operator");
        return None;
    };

    let values = map
        .get("valueList")
        .or_else(|| map.get("values"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    Some(Predicate::Compare(Condition {
        field: field.to_string(),
        comparator,
        value: map.get("value").filter(|v| !v.is_null()).cloned(),
        second: map.get("value2").filter(|v| !v.is_null()).cloned(),
        values,
    }))
}

/// Field names may only contain ASCII alphanumerics and underscores.
pub(crate) fn is_safe_field(field: &str) -> bool {
    !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn records() -> Vec<Value> {
        vec![
            json!({"species": "dog", "city": "portland"}),
            json!({"species": "dog", "city": "salem"}),
            json!({"species": "cat", "city": "portland"}),
            json!({"species": "cat"}),
            json!({}),
        ]
    }

    #[test]
    fn three_grammars_agree_on_every_record() {
        // species = dog AND city = portland, once per grammar.
        let branch = json!({
            "filterBranchType": "OR",
            "filterBranches": [{
                "filterBranchType": "AND",
                "filterBranches": [],
                "filters": [
                    {"property": "species", "operator": "EQ", "value": "dog"},
                    {"property": "city", "operator": "EQ", "value": "portland"},
                ],
            }],
            "filters": [],
        });
        let groups = json!({
            "groupLogic": "OR",
            "groups": [{
                "logic": "AND",
                "conditions": [
                    {"field": "species", "operator": "equals", "value": "dog"},
                    {"field": "city", "operator": "equals", "value": "portland"},
                ],
            }],
        });
        let flat = json!({
            "logic": "and",
            "conditions": [
                {"field": "species", "operator": "eq", "value": "dog"},
                {"field": "city", "operator": "eq", "value": "portland"},
            ],
        });

        let now = Utc::now();
        let compiled: Vec<Predicate> = [&branch, &groups, &flat]
            .iter()
            .map(|tree| compile(tree).expect("compiles"))
            .collect();

        for record in records() {
            let verdicts: Vec<bool> = compiled.iter().map(|p| p.matches(&record, now)).collect();
            assert!(
                verdicts.windows(2).all(|w| w[0] == w[1]),
                "grammars disagree on {record}: {verdicts:?}"
            );
        }
        // And the shared verdict is the right one.
        assert!(compiled[0].matches(&records()[0], now));
        assert!(!compiled[0].matches(&records()[1], now));
    }

    #[test]
    fn or_logic_across_groups() {
        let tree = json!({
            "groupLogic": "any",
            "groups": [
                {"logic": "all", "conditions": [
                    {"field": "species", "operator": "eq", "value": "dog"},
                ]},
                {"logic": "all", "conditions": [
                    {"field": "city", "operator": "eq", "value": "portland"},
                ]},
            ],
        });
        let predicate = compile(&tree).expect("compiles");
        let now = Utc::now();
        assert!(predicate.matches(&json!({"species": "dog", "city": "salem"}), now));
        assert!(predicate.matches(&json!({"species": "cat", "city": "portland"}), now));
        assert!(!predicate.matches(&json!({"species": "cat", "city": "salem"}), now));
    }

    #[test]
    fn unknown_operator_contributes_nothing() {
        let tree = json!({
            "conditions": [
                {"field": "species", "operator": "eq", "value": "dog"},
                {"field": "species", "operator": "resembles", "value": "wolf"},
            ],
        });
        let predicate = compile(&tree).expect("compiles");
        assert_eq!(predicate.condition_count(), 1);
        assert!(predicate.matches(&json!({"species": "dog"}), Utc::now()));
    }

    #[test]
    fn unsafe_field_name_compiles_to_always_false() {
        let tree = json!({
            "conditions": [
                {"field": "species; DROP TABLE records", "operator": "eq", "value": "dog"},
            ],
        });
        let predicate = compile(&tree).expect("compiles");
        assert_eq!(predicate, Predicate::All(vec![Predicate::Never]));
        assert!(!predicate.matches(&json!({"species": "dog"}), Utc::now()));
    }

    #[test]
    fn missing_field_or_operator_is_skipped() {
        let tree = json!({
            "conditions": [
                {"operator": "eq", "value": "dog"},
                {"field": "species", "value": "dog"},
            ],
        });
        let predicate = compile(&tree).expect("compiles");
        assert_eq!(predicate.condition_count(), 0);
    }

    #[test]
    fn unrecognized_shape_is_an_error() {
        assert!(matches!(
            compile(&json!(["not", "a", "filter"])),
            Err(FilterError::UnrecognizedShape)
        ));
        assert!(matches!(
            compile(&json!({"something": "else"})),
            Err(FilterError::UnrecognizedShape)
        ));
    }

    #[test]
    fn branch_node_without_type_is_malformed() {
        let tree = json!({
            "filterBranches": [{"filters": []}],
        });
        assert!(matches!(
            compile(&tree),
            Err(FilterError::MalformedNode { .. })
        ));
    }

    #[test]
    fn bad_logic_token_is_an_error() {
        let tree = json!({
            "logic": "xor",
            "conditions": [],
        });
        assert!(matches!(
            compile(&tree),
            Err(FilterError::InvalidLogic { .. })
        ));
    }

    #[test]
    fn empty_conditions_under_and_match_everything() {
        let predicate = compile(&json!({"conditions": []})).expect("compiles");
        assert!(predicate.matches(&json!({}), Utc::now()));
    }
}
