//! Edge-condition evaluation.
//!
//! A condition is zero or more clauses joined by `&&`. Each clause is
//! `key=value`, `key!=value`, or a bare `key` (truthy when the resolved value
//! is a non-empty string). An empty or whitespace-only condition is always
//! true. Evaluation is pure over the outcome and a context snapshot.

use std::collections::HashMap;

use waypoint_types::Outcome;

/// Evaluate a condition expression against an outcome and context snapshot.
pub fn evaluate_condition(
    condition: &str,
    outcome: &Outcome,
    values: &HashMap<String, serde_json::Value>,
) -> bool {
    let trimmed = condition.trim();
    if trimmed.is_empty() {
        return true;
    }
    trimmed
        .split("&&")
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .all(|clause| evaluate_clause(clause, outcome, values))
}

fn evaluate_clause(
    clause: &str,
    outcome: &Outcome,
    values: &HashMap<String, serde_json::Value>,
) -> bool {
    // `!=` must be tested before `=` so `a!=b` is not read as `a!` = `b`.
    if let Some((key, expected)) = clause.split_once("!=") {
        return resolve_key(key.trim(), outcome, values) != expected.trim();
    }
    if let Some((key, expected)) = clause.split_once('=') {
        return resolve_key(key.trim(), outcome, values) == expected.trim();
    }
    !resolve_key(clause, outcome, values).is_empty()
}

/// Resolve a clause key to its string value. Missing keys resolve to "".
fn resolve_key(
    key: &str,
    outcome: &Outcome,
    values: &HashMap<String, serde_json::Value>,
) -> String {
    match key {
        "outcome" => return outcome.status.as_str().to_string(),
        "preferred_label" => return outcome.preferred_label.clone().unwrap_or_default(),
        _ => {}
    }

    if let Some(rest) = key.strip_prefix("context.") {
        // Literal key first, then the suffix without the prefix.
        if let Some(v) = values.get(key) {
            return value_to_string(v);
        }
        if let Some(v) = values.get(rest) {
            return value_to_string(v);
        }
        return String::new();
    }

    values.get(key).map(value_to_string).unwrap_or_default()
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_types::StageStatus;

    fn ctx(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn empty_condition_is_true() {
        let outcome = Outcome::fail("anything");
        assert!(evaluate_condition("", &outcome, &ctx(&[])));
        assert!(evaluate_condition("   ", &outcome, &ctx(&[])));
    }

    #[test]
    fn outcome_equality() {
        let ok = Outcome::success("");
        assert!(evaluate_condition("outcome=success", &ok, &ctx(&[])));
        assert!(!evaluate_condition("outcome=fail", &ok, &ctx(&[])));

        let partial = Outcome::partial("");
        assert!(evaluate_condition("outcome=partial_success", &partial, &ctx(&[])));
    }

    #[test]
    fn outcome_inequality() {
        let failed = Outcome::fail("boom");
        assert!(evaluate_condition("outcome!=success", &failed, &ctx(&[])));
        assert!(!evaluate_condition("outcome!=fail", &failed, &ctx(&[])));
    }

    #[test]
    fn preferred_label_resolution() {
        let outcome = Outcome::success("").with_preferred_label("approve");
        assert!(evaluate_condition("preferred_label=approve", &outcome, &ctx(&[])));

        let unlabeled = Outcome::success("");
        assert!(evaluate_condition("preferred_label=", &unlabeled, &ctx(&[])));
    }

    #[test]
    fn context_prefix_tries_literal_then_suffix() {
        let outcome = Outcome::success("");

        // Literal "context.env" key wins.
        let values = ctx(&[
            ("context.env", serde_json::json!("prod")),
            ("env", serde_json::json!("staging")),
        ]);
        assert!(evaluate_condition("context.env=prod", &outcome, &values));

        // Falls back to the suffix key.
        let values = ctx(&[("env", serde_json::json!("staging"))]);
        assert!(evaluate_condition("context.env=staging", &outcome, &values));

        // Missing resolves to empty string.
        assert!(evaluate_condition("context.absent=", &outcome, &ctx(&[])));
        assert!(evaluate_condition("context.absent!=x", &outcome, &ctx(&[])));
    }

    #[test]
    fn plain_keys_read_context() {
        let outcome = Outcome::success("");
        let values = ctx(&[("tests_passed", serde_json::json!("yes"))]);
        assert!(evaluate_condition("tests_passed=yes", &outcome, &values));
        assert!(!evaluate_condition("tests_passed=no", &outcome, &values));
    }

    #[test]
    fn bare_key_is_truthiness() {
        let outcome = Outcome::success("");
        let values = ctx(&[
            ("set", serde_json::json!("value")),
            ("empty", serde_json::json!("")),
        ]);
        assert!(evaluate_condition("set", &outcome, &values));
        assert!(!evaluate_condition("empty", &outcome, &values));
        assert!(!evaluate_condition("missing", &outcome, &values));
    }

    #[test]
    fn non_string_values_coerce() {
        let outcome = Outcome::success("");
        let values = ctx(&[
            ("count", serde_json::json!(42)),
            ("flag", serde_json::json!(true)),
            ("nothing", serde_json::Value::Null),
        ]);
        assert!(evaluate_condition("count=42", &outcome, &values));
        assert!(evaluate_condition("flag=true", &outcome, &values));
        assert!(evaluate_condition("flag", &outcome, &values));
        assert!(!evaluate_condition("nothing", &outcome, &values));
    }

    #[test]
    fn conjunction_requires_every_clause() {
        let outcome = Outcome::success("");
        let values = ctx(&[("env", serde_json::json!("prod"))]);
        assert!(evaluate_condition("outcome=success && env=prod", &outcome, &values));
        assert!(!evaluate_condition("outcome=success && env=dev", &outcome, &values));
        assert!(!evaluate_condition("outcome=fail && env=prod", &outcome, &values));
    }

    #[test]
    fn whitespace_is_trimmed() {
        let outcome = Outcome::success("");
        let values = ctx(&[("env", serde_json::json!("prod"))]);
        assert!(evaluate_condition("  outcome = success  &&  env = prod ", &outcome, &values));
    }

    #[test]
    fn status_names_match_serialized_form() {
        for (status, name) in [
            (StageStatus::Success, "success"),
            (StageStatus::PartialSuccess, "partial_success"),
            (StageStatus::Retry, "retry"),
            (StageStatus::Fail, "fail"),
            (StageStatus::Skipped, "skipped"),
        ] {
            let mut outcome = Outcome::success("");
            outcome.status = status;
            assert!(evaluate_condition(&format!("outcome={name}"), &outcome, &ctx(&[])));
        }
    }
}
