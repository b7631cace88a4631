//! Boundary validation for permission records and evaluation contexts.
//!
//! Every check runs; all issues are returned together so an administrator
//! can fix a grant in one round trip.

use permgate_core::{ResourceType, Scope};

use crate::condition::compile_pattern;
use crate::context::ContextField;
use crate::types::{Condition, ConditionOperator, EvaluationContext, Permission, MAX_PRIORITY};

/// Whether a permission on `resource_type` may be anchored at `scope`.
pub fn scope_allowed(resource_type: ResourceType, scope: Scope) -> bool {
    match resource_type {
        ResourceType::Document => true,
        ResourceType::Folder => scope >= Scope::Folder,
        ResourceType::Workflow | ResourceType::Report => scope >= Scope::Project,
        ResourceType::System => matches!(scope, Scope::Organization | Scope::Global),
        ResourceType::Global => scope == Scope::Global,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceIdRule {
    Required,
    Optional,
    Forbidden,
}

/// Whether a permission at `scope` must, may or must not name a resource.
pub fn resource_id_rule(scope: Scope) -> ResourceIdRule {
    match scope {
        Scope::Document | Scope::Folder => ResourceIdRule::Required,
        Scope::Project | Scope::Department | Scope::Organization => ResourceIdRule::Optional,
        Scope::Global => ResourceIdRule::Forbidden,
    }
}

/// Validate a materialised permission record.
pub fn validate_permission(permission: &Permission) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if permission.id.as_str().is_empty() {
        errors.push("permission id must not be empty".to_string());
    }
    if permission.subject.id.as_str().is_empty() {
        errors.push("subject id must not be empty".to_string());
    }

    let action_type = permission.action.resource_type();
    if action_type != permission.resource_type {
        errors.push(format!(
            "action '{}' does not apply to resource type '{}'",
            permission.action, permission.resource_type
        ));
    }

    if !scope_allowed(permission.resource_type, permission.scope) {
        errors.push(format!(
            "scope '{}' is not compatible with resource type '{}'",
            permission.scope, permission.resource_type
        ));
    }

    match (resource_id_rule(permission.scope), &permission.resource_id) {
        (ResourceIdRule::Required, None) => errors.push(format!(
            "scope '{}' requires a resource id",
            permission.scope
        )),
        (ResourceIdRule::Required, Some(id)) | (ResourceIdRule::Optional, Some(id))
            if id.as_str().is_empty() =>
        {
            errors.push("resource id must not be empty".to_string())
        }
        (ResourceIdRule::Forbidden, Some(_)) => errors.push(format!(
            "scope '{}' must not name a resource id",
            permission.scope
        )),
        _ => {}
    }

    if permission.priority > MAX_PRIORITY {
        errors.push(format!(
            "priority {} exceeds maximum of {}",
            permission.priority, MAX_PRIORITY
        ));
    }

    if let (Some(from), Some(until)) = (permission.valid_from, permission.valid_until) {
        if from >= until {
            errors.push("validFrom must be before validUntil".to_string());
        }
    }

    for (i, condition) in permission.conditions.iter().enumerate() {
        check_condition(&format!("conditions[{}]", i), condition, &mut errors);
    }

    for (i, constraint) in permission.constraints.iter().enumerate() {
        for (j, condition) in constraint.conditions.iter().enumerate() {
            let at = format!("constraints[{}].conditions[{}]", i, j);
            let field = ContextField::parse(&condition.field);
            if !constraint.constraint_type.permits(&field) {
                errors.push(format!(
                    "{}: field '{}' is not allowed in a {} constraint",
                    at, condition.field, constraint.constraint_type
                ));
            }
            check_condition(&at, condition, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_condition(at: &str, condition: &Condition, errors: &mut Vec<String>) {
    if condition.field.trim().is_empty() {
        errors.push(format!("{}: field must not be empty", at));
    }
    match condition.operator {
        ConditionOperator::In | ConditionOperator::Nin => {
            if !condition.value.is_array() {
                errors.push(format!(
                    "{}: value for '{:?}' must be an array",
                    at, condition.operator
                ));
            }
        }
        ConditionOperator::Regex => match condition.value.as_str() {
            Some(pattern) => {
                if let Err(e) = compile_pattern(pattern, condition.case_sensitive) {
                    errors.push(format!("{}: invalid regex: {}", at, e));
                }
            }
            None => errors.push(format!("{}: regex value must be a string", at)),
        },
        _ => {}
    }
}

/// Structural checks on a request before anything is looked up.
pub fn validate_context(context: &EvaluationContext) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if context.subject_id.as_str().trim().is_empty() {
        errors.push("subjectId must not be empty".to_string());
    }
    if context.action.resource_type() != context.resource_type {
        errors.push(format!(
            "action '{}' does not apply to resource type '{}'",
            context.action, context.resource_type
        ));
    }
    match (context.resource_type, &context.resource_id) {
        (ResourceType::Global, _) => {}
        (_, None) => errors.push(format!(
            "resourceId is required for resource type '{}'",
            context.resource_type
        )),
        (_, Some(id)) if id.as_str().is_empty() => {
            errors.push("resourceId must not be empty".to_string())
        }
        _ => {}
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
