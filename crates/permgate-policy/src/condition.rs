use chrono::NaiveDate;
use permgate_core::Timestamp;
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::context::{ContextField, ContextView, FieldValue};
use crate::error::PermissionError;
use crate::types::{Condition, ConditionOperator, Constraint, EvaluationContext};

/// Evaluate one condition against a context. Fails closed: anything that
/// cannot be compared is `false`.
pub fn evaluate_condition(condition: &Condition, context: &EvaluationContext) -> bool {
    ConditionEvaluator::new().condition(condition, &ContextView::new(context))
}

/// Evaluate a constraint: the AND of its conditions.
pub fn evaluate_constraint(constraint: &Constraint, context: &EvaluationContext) -> bool {
    ConditionEvaluator::new().constraint(constraint, &ContextView::new(context))
}

/// Condition evaluator scoped to a single `evaluate()` call.
///
/// Compiled patterns are memoised for the lifetime of the evaluator, and
/// malformed conditions are collected so the caller can report them.
#[derive(Debug, Default)]
pub struct ConditionEvaluator {
    patterns: HashMap<(String, bool), Option<Regex>>,
    failures: Vec<PermissionError>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constraint(&mut self, constraint: &Constraint, view: &ContextView<'_>) -> bool {
        constraint
            .conditions
            .iter()
            .all(|condition| self.condition(condition, view))
    }

    pub fn condition(&mut self, condition: &Condition, view: &ContextView<'_>) -> bool {
        let actual = view.get(&ContextField::parse(&condition.field));
        if actual == FieldValue::Unknown {
            return false;
        }
        let expected = FieldValue::from_json(&condition.value);
        let cs = condition.case_sensitive;

        match condition.operator {
            ConditionOperator::Eq => values_equal(&actual, &expected, cs),
            ConditionOperator::Ne => {
                expected != FieldValue::Unknown && !values_equal(&actual, &expected, cs)
            }
            ConditionOperator::Gt => compare(&actual, &expected) == Some(Ordering::Greater),
            ConditionOperator::Gte => matches!(
                compare(&actual, &expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            ConditionOperator::Lt => compare(&actual, &expected) == Some(Ordering::Less),
            ConditionOperator::Lte => matches!(
                compare(&actual, &expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            ConditionOperator::In => match &expected {
                FieldValue::List(items) => items.iter().any(|item| values_equal(&actual, item, cs)),
                _ => false,
            },
            ConditionOperator::Nin => match &expected {
                FieldValue::List(items) => !items.iter().any(|item| values_equal(&actual, item, cs)),
                _ => false,
            },
            ConditionOperator::Contains => contains(&actual, &expected, cs),
            ConditionOperator::Regex => match (&actual, &expected) {
                (FieldValue::Str(text), FieldValue::Str(pattern)) => {
                    match self.pattern(&condition.field, pattern, cs) {
                        Some(re) => re.is_match(text),
                        None => false,
                    }
                }
                _ => false,
            },
        }
    }

    /// Malformed conditions seen so far, drained.
    pub fn take_failures(&mut self) -> Vec<PermissionError> {
        std::mem::take(&mut self.failures)
    }

    fn pattern(&mut self, field: &str, pattern: &str, case_sensitive: bool) -> Option<&Regex> {
        let key = (pattern.to_string(), case_sensitive);
        if !self.patterns.contains_key(&key) {
            let compiled = match compile_pattern(pattern, case_sensitive) {
                Ok(re) => Some(re),
                Err(e) => {
                    let err = PermissionError::ConstraintEvaluation(format!(
                        "invalid regex on field '{}': {}",
                        field, e
                    ));
                    tracing::warn!(field, error = %err, "condition treated as unsatisfied");
                    self.failures.push(err);
                    None
                }
            };
            self.patterns.insert(key.clone(), compiled);
        }
        self.patterns.get(&key).and_then(|re| re.as_ref())
    }
}

pub(crate) fn compile_pattern(pattern: &str, case_sensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
}

fn values_equal(actual: &FieldValue, expected: &FieldValue, case_sensitive: bool) -> bool {
    match (actual, expected) {
        (FieldValue::Str(a), FieldValue::Str(b)) => {
            if case_sensitive {
                a == b
            } else {
                a.to_lowercase() == b.to_lowercase()
            }
        }
        (FieldValue::Num(a), FieldValue::Num(b)) => a == b,
        (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
        (FieldValue::Null, FieldValue::Null) => true,
        (FieldValue::Time(_), _) => compare(actual, expected) == Some(Ordering::Equal),
        (FieldValue::List(a), FieldValue::List(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .zip(b.iter())
                    .all(|(x, y)| values_equal(x, y, case_sensitive))
        }
        _ => false,
    }
}

/// Numeric or temporal ordering; `None` when the operands are not
/// comparable.
fn compare(actual: &FieldValue, expected: &FieldValue) -> Option<Ordering> {
    match (actual, expected) {
        (FieldValue::Num(a), FieldValue::Num(b)) => a.partial_cmp(b),
        (FieldValue::Time(a), FieldValue::Time(b)) => Some(a.cmp(b)),
        (FieldValue::Time(t), FieldValue::Num(secs)) => epoch_seconds(*t).partial_cmp(secs),
        (FieldValue::Time(t), FieldValue::Str(s)) => {
            let other = Timestamp::parse_rfc3339(s)?;
            Some(t.cmp(&other))
        }
        (FieldValue::Str(a), FieldValue::Str(b)) => {
            if let (Some(x), Some(y)) = (Timestamp::parse_rfc3339(a), Timestamp::parse_rfc3339(b)) {
                return Some(x.cmp(&y));
            }
            let x = NaiveDate::parse_from_str(a, "%Y-%m-%d").ok()?;
            let y = NaiveDate::parse_from_str(b, "%Y-%m-%d").ok()?;
            Some(x.cmp(&y))
        }
        _ => None,
    }
}

fn epoch_seconds(t: Timestamp) -> f64 {
    t.seconds_since_epoch as f64 + f64::from(t.nanoseconds) / 1e9
}

fn contains(actual: &FieldValue, expected: &FieldValue, case_sensitive: bool) -> bool {
    match (actual, expected) {
        (FieldValue::Str(haystack), FieldValue::Str(needle)) => {
            if case_sensitive {
                haystack.contains(needle.as_str())
            } else {
                haystack.to_lowercase().contains(&needle.to_lowercase())
            }
        }
        (FieldValue::List(items), _) => items
            .iter()
            .any(|item| values_equal(item, expected, case_sensitive)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, DocumentAction};
    use crate::types::ConstraintType;
    use serde_json::json;

    fn context() -> EvaluationContext {
        // 2023-11-14T22:13:20Z
        EvaluationContext::new(
            "user123",
            Action::Document(DocumentAction::Read),
            Some("doc1"),
            Timestamp::from_seconds(1_700_000_000),
        )
        .with_ip("10.0.0.7")
        .with_location("Lisbon")
        .with_user_agent("Mozilla/5.0 (X11; Linux x86_64)")
        .with_custom("department", json!("Finance"))
        .with_custom("clearance", json!(3))
        .with_custom("labels", json!(["internal", "q4"]))
    }

    fn cond(field: &str, op: ConditionOperator, value: serde_json::Value) -> Condition {
        Condition::new(field, op, value)
    }

    #[test]
    fn test_eq_is_case_insensitive_by_default() {
        let ctx = context();
        assert!(evaluate_condition(
            &cond("department", ConditionOperator::Eq, json!("finance")),
            &ctx
        ));
        assert!(!evaluate_condition(
            &cond("department", ConditionOperator::Eq, json!("finance")).case_sensitive(),
            &ctx
        ));
    }

    #[test]
    fn test_ne() {
        let ctx = context();
        assert!(evaluate_condition(
            &cond("location", ConditionOperator::Ne, json!("Porto")),
            &ctx
        ));
        assert!(!evaluate_condition(
            &cond("location", ConditionOperator::Ne, json!("lisbon")),
            &ctx
        ));
    }

    #[test]
    fn test_unknown_field_is_false_for_every_operator() {
        let ctx = context();
        for op in [
            ConditionOperator::Eq,
            ConditionOperator::Ne,
            ConditionOperator::Gt,
            ConditionOperator::Lt,
            ConditionOperator::In,
            ConditionOperator::Nin,
            ConditionOperator::Contains,
            ConditionOperator::Regex,
        ] {
            assert!(
                !evaluate_condition(&cond("device", op, json!("x")), &ctx),
                "{:?} on a missing field must fail closed",
                op
            );
        }
    }

    #[test]
    fn test_numeric_ordering() {
        let ctx = context();
        assert!(evaluate_condition(
            &cond("clearance", ConditionOperator::Gte, json!(3)),
            &ctx
        ));
        assert!(evaluate_condition(
            &cond("clearance", ConditionOperator::Gt, json!(2.5)),
            &ctx
        ));
        assert!(!evaluate_condition(
            &cond("clearance", ConditionOperator::Lt, json!(3)),
            &ctx
        ));
        assert!(evaluate_condition(
            &cond("hour", ConditionOperator::Gte, json!(22)),
            &ctx
        ));
    }

    #[test]
    fn test_ordering_type_mismatch_is_false() {
        let ctx = context();
        assert!(!evaluate_condition(
            &cond("clearance", ConditionOperator::Gt, json!("2")),
            &ctx
        ));
        assert!(!evaluate_condition(
            &cond("department", ConditionOperator::Lt, json!(10)),
            &ctx
        ));
    }

    #[test]
    fn test_timestamp_ordering_against_rfc3339_and_epoch() {
        let ctx = context();
        assert!(evaluate_condition(
            &cond("timestamp", ConditionOperator::Gt, json!("2023-01-01T00:00:00Z")),
            &ctx
        ));
        assert!(evaluate_condition(
            &cond("timestamp", ConditionOperator::Lt, json!(1_800_000_000u64)),
            &ctx
        ));
        assert!(!evaluate_condition(
            &cond("timestamp", ConditionOperator::Gt, json!("yesterday")),
            &ctx
        ));
    }

    #[test]
    fn test_date_ordering() {
        let ctx = context();
        assert!(evaluate_condition(
            &cond("date", ConditionOperator::Lte, json!("2023-12-31")),
            &ctx
        ));
        assert!(!evaluate_condition(
            &cond("date", ConditionOperator::Lt, json!("2023-11-14")),
            &ctx
        ));
    }

    #[test]
    fn test_in_and_nin() {
        let ctx = context();
        assert!(evaluate_condition(
            &cond("ipAddress", ConditionOperator::In, json!(["10.0.0.7", "10.0.0.8"])),
            &ctx
        ));
        assert!(evaluate_condition(
            &cond("location", ConditionOperator::Nin, json!(["Madrid", "Paris"])),
            &ctx
        ));
        assert!(!evaluate_condition(
            &cond("location", ConditionOperator::Nin, json!(["LISBON"])),
            &ctx
        ));
        // non-array value is not a set
        assert!(!evaluate_condition(
            &cond("location", ConditionOperator::In, json!("Lisbon")),
            &ctx
        ));
    }

    #[test]
    fn test_contains_string_and_list() {
        let ctx = context();
        assert!(evaluate_condition(
            &cond("userAgent", ConditionOperator::Contains, json!("linux")),
            &ctx
        ));
        assert!(evaluate_condition(
            &cond("labels", ConditionOperator::Contains, json!("q4")),
            &ctx
        ));
        assert!(!evaluate_condition(
            &cond("labels", ConditionOperator::Contains, json!("public")),
            &ctx
        ));
    }

    #[test]
    fn test_regex_match() {
        let ctx = context();
        assert!(evaluate_condition(
            &cond("ipAddress", ConditionOperator::Regex, json!(r"^10\.0\.")),
            &ctx
        ));
        assert!(!evaluate_condition(
            &cond("ipAddress", ConditionOperator::Regex, json!(r"^192\.168\.")),
            &ctx
        ));
    }

    #[test]
    fn test_malformed_regex_is_false_and_reported() {
        let ctx = context();
        let view = ContextView::new(&ctx);
        let mut evaluator = ConditionEvaluator::new();
        let bad = cond("ipAddress", ConditionOperator::Regex, json!("(unclosed"));
        assert!(!evaluator.condition(&bad, &view));
        // memoised: the second evaluation does not report again
        assert!(!evaluator.condition(&bad, &view));
        let failures = evaluator.take_failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].to_string().contains("ipAddress"));
        assert!(evaluator.take_failures().is_empty());
    }

    #[test]
    fn test_constraint_is_conjunction() {
        let ctx = context();
        let business_hours = Constraint::new(
            ConstraintType::Time,
            vec![
                cond("hour", ConditionOperator::Gte, json!(9)),
                cond("hour", ConditionOperator::Lt, json!(18)),
            ],
        );
        assert!(!evaluate_constraint(&business_hours, &ctx));

        let evening = Constraint::new(
            ConstraintType::Time,
            vec![
                cond("hour", ConditionOperator::Gte, json!(20)),
                cond("dayOfWeek", ConditionOperator::In, json!([0, 1, 2, 3, 4])),
            ],
        );
        assert!(evaluate_constraint(&evening, &ctx));
    }

    #[test]
    fn test_empty_constraint_holds() {
        let ctx = context();
        assert!(evaluate_constraint(
            &Constraint::new(ConstraintType::Custom, vec![]),
            &ctx
        ));
    }
}
