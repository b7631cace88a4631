//! Typed access to evaluation-context fields.
//!
//! Condition field names are parsed once into a [`ContextField`]; looking a
//! field up yields a [`FieldValue`], with [`FieldValue::Unknown`] for names
//! the context does not carry.

use chrono::{Datelike, Timelike};
use permgate_core::Timestamp;

use crate::types::{ConstraintType, EvaluationContext};

const CUSTOM_PREFIX: &str = "custom.";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextField {
    SubjectId,
    ResourceType,
    ResourceId,
    Action,
    Timestamp,
    /// UTC hour of the request, 0..=23.
    Hour,
    /// 0 = Monday .. 6 = Sunday.
    DayOfWeek,
    /// `YYYY-MM-DD` in UTC.
    Date,
    IpAddress,
    UserAgent,
    Location,
    Device,
    /// Key into `custom_context`.
    Custom(String),
}

impl ContextField {
    pub fn parse(name: &str) -> Self {
        match name {
            "subjectId" | "subject_id" => ContextField::SubjectId,
            "resourceType" | "resource_type" => ContextField::ResourceType,
            "resourceId" | "resource_id" => ContextField::ResourceId,
            "action" => ContextField::Action,
            "timestamp" => ContextField::Timestamp,
            "hour" => ContextField::Hour,
            "dayOfWeek" | "day_of_week" => ContextField::DayOfWeek,
            "date" => ContextField::Date,
            "ipAddress" | "ip_address" => ContextField::IpAddress,
            "userAgent" | "user_agent" => ContextField::UserAgent,
            "location" => ContextField::Location,
            "device" => ContextField::Device,
            other => ContextField::Custom(
                other
                    .strip_prefix(CUSTOM_PREFIX)
                    .unwrap_or(other)
                    .to_string(),
            ),
        }
    }
}

impl ConstraintType {
    /// Field whitelist per constraint type; custom constraints accept any field.
    pub fn permits(&self, field: &ContextField) -> bool {
        match self {
            ConstraintType::Time => matches!(
                field,
                ContextField::Timestamp
                    | ContextField::Hour
                    | ContextField::DayOfWeek
                    | ContextField::Date
            ),
            ConstraintType::Ip => matches!(field, ContextField::IpAddress),
            ConstraintType::Location => matches!(field, ContextField::Location),
            ConstraintType::Device => {
                matches!(field, ContextField::Device | ContextField::UserAgent)
            }
            ConstraintType::Custom => true,
        }
    }
}

/// A context value, normalised for comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Time(Timestamp),
    List(Vec<FieldValue>),
    Null,
    Unknown,
}

impl FieldValue {
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => FieldValue::Num(f),
                None => FieldValue::Unknown,
            },
            serde_json::Value::String(s) => FieldValue::Str(s.clone()),
            serde_json::Value::Array(items) => {
                FieldValue::List(items.iter().map(FieldValue::from_json).collect())
            }
            // Objects have no comparison semantics.
            serde_json::Value::Object(_) => FieldValue::Unknown,
        }
    }

    fn from_opt(value: Option<&str>) -> Self {
        match value {
            Some(s) => FieldValue::Str(s.to_string()),
            None => FieldValue::Unknown,
        }
    }
}

/// Read-only view over one evaluation context.
#[derive(Debug, Clone, Copy)]
pub struct ContextView<'a> {
    context: &'a EvaluationContext,
}

impl<'a> ContextView<'a> {
    pub fn new(context: &'a EvaluationContext) -> Self {
        Self { context }
    }

    pub fn get(&self, field: &ContextField) -> FieldValue {
        let ctx = self.context;
        match field {
            ContextField::SubjectId => FieldValue::Str(ctx.subject_id.as_str().to_string()),
            ContextField::ResourceType => FieldValue::Str(ctx.resource_type.as_str().to_string()),
            ContextField::ResourceId => {
                FieldValue::from_opt(ctx.resource_id.as_ref().map(|id| id.as_str()))
            }
            ContextField::Action => FieldValue::Str(ctx.action.to_string()),
            ContextField::Timestamp => FieldValue::Time(ctx.timestamp),
            ContextField::Hour => match ctx.timestamp.to_datetime() {
                Some(dt) => FieldValue::Num(dt.hour() as f64),
                None => FieldValue::Unknown,
            },
            ContextField::DayOfWeek => match ctx.timestamp.to_datetime() {
                Some(dt) => FieldValue::Num(dt.weekday().num_days_from_monday() as f64),
                None => FieldValue::Unknown,
            },
            ContextField::Date => match ctx.timestamp.to_datetime() {
                Some(dt) => FieldValue::Str(dt.format("%Y-%m-%d").to_string()),
                None => FieldValue::Unknown,
            },
            ContextField::IpAddress => FieldValue::from_opt(ctx.ip_address.as_deref()),
            ContextField::UserAgent => FieldValue::from_opt(ctx.user_agent.as_deref()),
            ContextField::Location => FieldValue::from_opt(ctx.location.as_deref()),
            ContextField::Device => FieldValue::from_opt(ctx.device.as_deref()),
            ContextField::Custom(key) => match ctx.custom_context.get(key) {
                Some(value) => FieldValue::from_json(value),
                None => FieldValue::Unknown,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, DocumentAction};
    use serde_json::json;

    fn context() -> EvaluationContext {
        // 2023-11-14T22:13:20Z, a Tuesday
        EvaluationContext::new(
            "user123",
            Action::Document(DocumentAction::Read),
            Some("doc1"),
            Timestamp::from_seconds(1_700_000_000),
        )
        .with_ip("10.0.0.7")
        .with_custom("department", json!("finance"))
        .with_custom("clearance", json!(3))
    }

    #[test]
    fn test_parse_known_and_custom_fields() {
        assert_eq!(ContextField::parse("ipAddress"), ContextField::IpAddress);
        assert_eq!(ContextField::parse("ip_address"), ContextField::IpAddress);
        assert_eq!(
            ContextField::parse("custom.department"),
            ContextField::Custom("department".into())
        );
        assert_eq!(
            ContextField::parse("department"),
            ContextField::Custom("department".into())
        );
    }

    #[test]
    fn test_derived_time_fields() {
        let ctx = context();
        let view = ContextView::new(&ctx);
        assert_eq!(view.get(&ContextField::Hour), FieldValue::Num(22.0));
        assert_eq!(view.get(&ContextField::DayOfWeek), FieldValue::Num(1.0));
        assert_eq!(
            view.get(&ContextField::Date),
            FieldValue::Str("2023-11-14".into())
        );
    }

    #[test]
    fn test_missing_values_are_unknown() {
        let ctx = context();
        let view = ContextView::new(&ctx);
        assert_eq!(view.get(&ContextField::Device), FieldValue::Unknown);
        assert_eq!(
            view.get(&ContextField::Custom("nope".into())),
            FieldValue::Unknown
        );
    }

    #[test]
    fn test_custom_values() {
        let ctx = context();
        let view = ContextView::new(&ctx);
        assert_eq!(
            view.get(&ContextField::parse("custom.department")),
            FieldValue::Str("finance".into())
        );
        assert_eq!(
            view.get(&ContextField::parse("clearance")),
            FieldValue::Num(3.0)
        );
        assert_eq!(
            view.get(&ContextField::Action),
            FieldValue::Str("document:read".into())
        );
    }

    #[test]
    fn test_constraint_whitelists() {
        assert!(ConstraintType::Time.permits(&ContextField::Hour));
        assert!(!ConstraintType::Time.permits(&ContextField::IpAddress));
        assert!(ConstraintType::Ip.permits(&ContextField::IpAddress));
        assert!(ConstraintType::Device.permits(&ContextField::UserAgent));
        assert!(!ConstraintType::Location.permits(&ContextField::Custom("x".into())));
        assert!(ConstraintType::Custom.permits(&ContextField::Custom("x".into())));
    }
}
