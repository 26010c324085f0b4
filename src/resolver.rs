//! Value Resolver
//!
//! Precedence per identity: instance override (derived identities only),
//! then explicit input for the field, then the template default, then "".
//! An explicitly supplied empty string is a value, not a gap.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::parser::Identity;
use crate::templates::Template;

/// Raw user input keyed by field name (or by a derived identity name for
/// per-instance overrides). A missing key means "not provided".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputSet(BTreeMap<String, String>);

impl InputSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// `None` when the key was not provided, `Some("")` when provided empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for InputSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// Keyed by the derived identity's own name
    InstanceOverride,
    /// Keyed by the field name
    User,
    TemplateDefault,
    /// Nothing supplied anywhere
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedValue {
    pub value: String,
    pub source: ValueSource,
}

/// Resolved values in document order.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    entries: Vec<(Identity, ResolvedValue)>,
}

impl Resolution {
    pub fn get(&self, identity: &Identity) -> Option<&ResolvedValue> {
        self.entries.iter().find(|(id, _)| id == identity).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identity, &ResolvedValue)> {
        self.entries.iter().map(|(id, v)| (id, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves every identity against `inputs` and the template defaults.
///
/// In strict mode an input key that matches neither a field nor a derived
/// identity name fails with [`EngineError::UnknownPlaceholder`].
pub fn resolve(
    identities: &[Identity],
    inputs: &InputSet,
    template: &Template,
    strict: bool,
) -> EngineResult<Resolution> {
    let mut known: HashSet<String> = HashSet::new();
    for identity in identities {
        known.insert(identity.field.clone());
        if !identity.is_base() {
            known.insert(identity.name());
        }
    }

    let unknown: Vec<String> = inputs
        .keys()
        .filter(|k| !known.contains(*k))
        .map(str::to_string)
        .collect();
    if !unknown.is_empty() {
        if strict {
            return Err(EngineError::UnknownPlaceholder { keys: unknown });
        }
        debug!(template_id = %template.id, keys = ?unknown, "ignoring unknown input keys");
    }

    let entries = identities
        .iter()
        .map(|identity| (identity.clone(), resolve_one(identity, inputs, template)))
        .collect();

    Ok(Resolution { entries })
}

fn resolve_one(identity: &Identity, inputs: &InputSet, template: &Template) -> ResolvedValue {
    if !identity.is_base() {
        if let Some(value) = inputs.get(&identity.name()) {
            return ResolvedValue { value: value.to_string(), source: ValueSource::InstanceOverride };
        }
    }

    match (inputs.get(&identity.field), template.default_for(&identity.field)) {
        (Some(value), _) => ResolvedValue { value: value.to_string(), source: ValueSource::User },
        (None, Some(default)) => {
            ResolvedValue { value: default.to_string(), source: ValueSource::TemplateDefault }
        }
        (None, None) => ResolvedValue { value: String::new(), source: ValueSource::Empty },
    }
}
