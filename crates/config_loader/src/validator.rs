//! Configuration validation
//!
//! Rules:
//! - derive rules on the blueprint (attempts >= 1, batch_size >= 1, delay >= 0,
//!   at least one sink, non-empty sink names)
//! - sink names are unique
//! - each sink type has its required params
//!
//! Suspicious but legal settings are reported by [`warnings`].

use std::collections::HashSet;

use contracts::{BackoffKind, ContractError, PipelineBlueprint};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// Validate a PipelineBlueprint
///
/// Returns the first error encountered.
pub fn validate(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    blueprint.validate().map_err(|errors| to_contract_error(&errors))?;
    validate_sink_names(blueprint)?;
    validate_sink_params(blueprint)?;
    Ok(())
}

/// Legal settings worth a warning
pub fn warnings(blueprint: &PipelineBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();
    let delivery = &blueprint.delivery;
    if delivery.backoff_policy == BackoffKind::Exponential && delivery.delay_or_seed < 1.0 {
        warnings.push(format!(
            "delivery.delay_or_seed = {} is below 1 for exponential backoff; a seed of 1 is used",
            delivery.delay_or_seed
        ));
    }
    if blueprint.checkpoint.dry {
        warnings.push("checkpoint.dry is set; progress will not be persisted".to_string());
    }
    warnings
}

/// Sink name uniqueness
fn validate_sink_names(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (i, sink) in blueprint.sinks.iter().enumerate() {
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[{i}].name"),
                format!("duplicate sink name '{}'", sink.name),
            ));
        }
    }
    Ok(())
}

/// Required params per sink type
fn validate_sink_params(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    for sink in &blueprint.sinks {
        for key in sink.sink_type.required_params() {
            let present = sink.param(key).is_some_and(|v| !v.trim().is_empty());
            if !present {
                return Err(ContractError::config_validation(
                    format!("sinks[{}].params.{key}", sink.name),
                    format!("{:?} sink requires '{key}'", sink.sink_type),
                ));
            }
        }
    }
    Ok(())
}

/// First derive-rule violation as a ContractError, with its dotted path
fn to_contract_error(errors: &ValidationErrors) -> ContractError {
    match first_violation(errors, String::new()) {
        Some((field, message)) => ContractError::config_validation(field, message),
        None => ContractError::config_validation("<root>", errors.to_string()),
    }
}

fn first_violation(errors: &ValidationErrors, prefix: String) -> Option<(String, String)> {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    for (name, kind) in fields {
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}.{name}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                if let Some(err) = list.first() {
                    let message = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed '{}' check", err.code));
                    return Some((path, message));
                }
            }
            ValidationErrorsKind::Struct(inner) => {
                if let Some(found) = first_violation(inner, path) {
                    return Some(found);
                }
            }
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    if let Some(found) = first_violation(inner, format!("{path}[{index}]")) {
                        return Some(found);
                    }
                }
            }
        }
    }
    None
}
