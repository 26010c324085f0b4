//! Validation System - Rule/Policy Separation
//!
//! Rules produce structured violations against resolved (pre-format) values.
//! Policy maps violations to actions.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ValidationPolicy;
use crate::error::{EngineError, EngineResult};
use crate::parser::Identity;
use crate::resolver::{Resolution, ResolvedValue, ValueSource};
use crate::templates::{FieldSpec, Template};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub field: String,
    pub identity: String,
    pub rule: String,
    pub message: String,
    pub expected: Option<String>,
}

/// Checks one resolved value against its field spec.
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, identity: &Identity, value: &str, spec: &FieldSpec) -> EngineResult<Option<ValidationViolation>>;
}

fn violation(rule: &dyn ValidationRule, identity: &Identity, message: &str, expected: Option<String>) -> ValidationViolation {
    ValidationViolation {
        field: identity.field.clone(),
        identity: identity.name(),
        rule: rule.name().to_string(),
        message: message.to_string(),
        expected,
    }
}

// --- Concrete Rules ---

pub struct RequiredRule;

impl ValidationRule for RequiredRule {
    fn name(&self) -> &'static str { "required" }

    fn check(&self, identity: &Identity, value: &str, spec: &FieldSpec) -> EngineResult<Option<ValidationViolation>> {
        if spec.required && value.trim().is_empty() {
            return Ok(Some(violation(self, identity, "Value is required", None)));
        }
        Ok(None)
    }
}

/// Full-match of the template's validation pattern. Empty values are left
/// to [`RequiredRule`].
pub struct PatternRule;

impl ValidationRule for PatternRule {
    fn name(&self) -> &'static str { "pattern" }

    fn check(&self, identity: &Identity, value: &str, spec: &FieldSpec) -> EngineResult<Option<ValidationViolation>> {
        let Some(pattern) = spec.pattern.as_deref() else {
            return Ok(None);
        };
        if value.trim().is_empty() {
            return Ok(None);
        }
        let anchored = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            EngineError::Config(format!("Invalid pattern for '{}': {}", identity.field, e))
        })?;
        if anchored.is_match(value) {
            Ok(None)
        } else {
            Ok(Some(violation(self, identity, "Value does not match the required format", Some(pattern.to_string()))))
        }
    }
}

pub struct OptionsRule;

impl ValidationRule for OptionsRule {
    fn name(&self) -> &'static str { "options" }

    fn check(&self, identity: &Identity, value: &str, spec: &FieldSpec) -> EngineResult<Option<ValidationViolation>> {
        if spec.options.is_empty() || value.is_empty() || spec.options.iter().any(|o| o == value) {
            return Ok(None);
        }
        Ok(Some(violation(self, identity, "Value is not one of the allowed options", Some(spec.options.join(" | ")))))
    }
}

/// Validator runs every rule over every independently resolved identity
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(RequiredRule),
                Box::new(PatternRule),
                Box::new(OptionsRule),
            ],
        }
    }

    pub fn validate(&self, template: &Template, resolution: &Resolution) -> EngineResult<Vec<ValidationViolation>> {
        let mut all_violations = vec![];

        for (identity, resolved) in resolution.iter() {
            if !checks_independently(identity, resolved) {
                continue;
            }
            let Some(spec) = template.field(&identity.field) else {
                continue;
            };
            for rule in &self.rules {
                if let Some(v) = rule.check(identity, &resolved.value, spec)? {
                    all_violations.push(v);
                }
            }
        }

        Ok(all_violations)
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

/// Derived identities share the base value unless overridden.
fn checks_independently(identity: &Identity, resolved: &ResolvedValue) -> bool {
    identity.is_base() || resolved.source == ValueSource::InstanceOverride
}

/// `Fatal` turns any violation into an error; `Warning` hands them back.
pub fn apply_policy(
    violations: Vec<ValidationViolation>,
    policy: ValidationPolicy,
) -> EngineResult<Vec<ValidationViolation>> {
    match policy {
        ValidationPolicy::Fatal if !violations.is_empty() => Err(EngineError::Validation { violations }),
        _ => Ok(violations),
    }
}
