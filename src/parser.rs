//! Placeholder Parser
//!
//! Tokens look like `{{ field }}`. Repeated fields get deterministic
//! identities: occurrence 0 is the bare name, occurrence k is
//! `<field>_instance_<k>`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use crate::error::{EngineError, EngineResult, MalformedReason};
use crate::templates::{PlaceholderKind, Template, TemplateId};

pub const OPEN: &str = "{{";
pub const CLOSE: &str = "}}";
pub const INSTANCE_SUFFIX: &str = "_instance_";

/// One placeholder slot: a field name plus its occurrence index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub field: String,
    pub occurrence: usize,
}

impl Identity {
    pub fn new(field: impl Into<String>, occurrence: usize) -> Self {
        Self { field: field.into(), occurrence }
    }

    pub fn is_base(&self) -> bool {
        self.occurrence == 0
    }

    /// Disambiguated name used as the substitution key.
    pub fn name(&self) -> String {
        if self.is_base() {
            self.field.clone()
        } else {
            format!("{}{}{}", self.field, INSTANCE_SUFFIX, self.occurrence)
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// A placeholder occurrence and the byte range of its token in the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderToken {
    pub identity: Identity,
    pub span: Range<usize>,
}

/// Scans `body` for tokens in document order.
pub fn scan(body: &str) -> EngineResult<Vec<PlaceholderToken>> {
    let mut tokens = Vec::new();
    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut cursor = 0;

    while let Some(rel) = body[cursor..].find(OPEN) {
        let open = cursor + rel;
        let inner_start = open + OPEN.len();
        let close = body[inner_start..]
            .find(CLOSE)
            .map(|c| inner_start + c)
            .ok_or(EngineError::MalformedPlaceholder {
                offset: open,
                reason: MalformedReason::Unterminated,
            })?;

        if let Some(nested) = body[inner_start..close].find(OPEN) {
            return Err(EngineError::MalformedPlaceholder {
                offset: inner_start + nested,
                reason: MalformedReason::Nested,
            });
        }

        let field = body[inner_start..close].trim();
        check_field_name(field, open)?;

        let counter = counters.entry(field.to_string()).or_insert(0);
        tokens.push(PlaceholderToken {
            identity: Identity::new(field, *counter),
            span: open..close + CLOSE.len(),
        });
        *counter += 1;

        cursor = close + CLOSE.len();
    }

    Ok(tokens)
}

/// Ordered identities, one per textual occurrence.
pub fn extract_identities(body: &str) -> EngineResult<Vec<Identity>> {
    Ok(scan(body)?.into_iter().map(|t| t.identity).collect())
}

fn check_field_name(field: &str, offset: usize) -> EngineResult<()> {
    let valid = !field.is_empty() && field.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !valid {
        return Err(EngineError::MalformedPlaceholder {
            offset,
            reason: MalformedReason::InvalidName(field.to_string()),
        });
    }
    if let Some((_, suffix)) = field.rsplit_once(INSTANCE_SUFFIX) {
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            return Err(EngineError::MalformedPlaceholder {
                offset,
                reason: MalformedReason::ReservedSuffix(field.to_string()),
            });
        }
    }
    Ok(())
}

/// A base field as presented on a combined input form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSummary {
    pub name: String,
    pub kind: PlaceholderKind,
    pub display_name: String,
    pub required: bool,
    pub help_text: Option<String>,
    /// Allowed values; empty means free input
    pub options: Vec<String>,
    pub occurrences: usize,
    pub templates: Vec<TemplateId>,
}

/// Unique base fields across `templates`, in first-appearance order.
pub fn merged_fields(templates: &[&Template]) -> EngineResult<Vec<FieldSummary>> {
    let mut merged: Vec<FieldSummary> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for template in templates {
        for identity in extract_identities(&template.body)? {
            let spec = template.field(&identity.field);
            let slot = match index.get(&identity.field) {
                Some(&i) => i,
                None => {
                    index.insert(identity.field.clone(), merged.len());
                    merged.push(FieldSummary {
                        name: identity.field.clone(),
                        kind: template.kind_of(&identity.field),
                        display_name: spec
                            .and_then(|s| s.display_name.clone())
                            .unwrap_or_else(|| humanize(&identity.field)),
                        required: false,
                        help_text: None,
                        options: Vec::new(),
                        occurrences: 0,
                        templates: Vec::new(),
                    });
                    merged.len() - 1
                }
            };
            let summary = &mut merged[slot];
            summary.occurrences += 1;
            if let Some(spec) = spec {
                summary.required |= spec.required;
                if summary.help_text.is_none() {
                    summary.help_text = spec.help_text.clone();
                }
                if summary.options.is_empty() {
                    summary.options = spec.options.clone();
                }
            }
            if !summary.templates.contains(&template.id) {
                summary.templates.push(template.id.clone());
            }
        }
    }

    Ok(merged)
}

fn humanize(field: &str) -> String {
    crate::templates::Casing::Title.apply(&field.replace('_', " "))
}
