//! Template System - Read-Only Contracts
//!
//! Templates are created on upload and never mutated by the engine.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::ENGINE_VERSION;

pub type TemplateId = String;

/// Open-ended template category (Letter, Affidavit, Certificate, ...).
///
/// Compared case-insensitively through [`Category::key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn key(&self) -> String {
        self.0.trim().to_lowercase()
    }
}

impl From<&str> for Category {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: Category,
    pub template_version: String,
    pub engine_min_version: String,
    pub body: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

impl Template {
    /// Field name to template default, for fields that define one.
    pub fn defaults(&self) -> HashMap<&str, &str> {
        self.fields
            .iter()
            .filter_map(|(name, spec)| spec.default.as_deref().map(|d| (name.as_str(), d)))
            .collect()
    }

    pub fn default_for(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|f| f.default.as_deref())
    }

    pub fn validation_pattern(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|f| f.pattern.as_deref())
    }

    pub fn field(&self, field: &str) -> Option<&FieldSpec> {
        self.fields.get(field)
    }

    /// Declared kind for `field`, otherwise inferred from its name.
    pub fn kind_of(&self, field: &str) -> PlaceholderKind {
        self.field(field)
            .and_then(|f| f.kind)
            .unwrap_or_else(|| PlaceholderKind::infer(field))
    }

    /// Rejects templates that need a newer engine than this one.
    pub fn check_engine_version(&self) -> EngineResult<()> {
        let engine_ver = semver::Version::parse(ENGINE_VERSION)
            .map_err(|_| EngineError::Internal("Invalid engine version".into()))?;
        let min_ver = semver::Version::parse(&self.engine_min_version).map_err(|_| {
            EngineError::Config(format!(
                "Invalid engineMinVersion '{}' in template {}",
                self.engine_min_version, self.id
            ))
        })?;

        if engine_ver < min_ver {
            return Err(EngineError::EngineVersionMismatch(
                self.template_version.clone(),
                self.engine_min_version.clone(),
                ENGINE_VERSION.to_string(),
            ));
        }

        Ok(())
    }
}

/// Per-field metadata. Every part is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    #[serde(default)]
    pub kind: Option<PlaceholderKind>,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub casing: Casing,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub help_text: Option<String>,
}

/// Placeholder type tag used to select a formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderKind {
    Text,
    Date,
    Address,
    Email,
    Number,
    Currency,
    Url,
    Option,
}

/// Field names that usually take one of a fixed set of values.
const OPTION_HINTS: &[&str] = &["gender", "relation", "he_she", "his_her", "religion", "level"];

impl PlaceholderKind {
    /// Kind guessed from a field name when the template does not declare one.
    pub fn infer(field: &str) -> Self {
        let name = field.to_lowercase();
        if name.contains("date") {
            Self::Date
        } else if name.contains("address") {
            Self::Address
        } else if name.contains("email") {
            Self::Email
        } else if ["amount", "price", "fee"].iter().any(|k| name.contains(k)) {
            Self::Currency
        } else if name.contains("number") || name.contains("reg_no") {
            Self::Number
        } else if name.contains("url") {
            Self::Url
        } else if OPTION_HINTS.iter().any(|k| name.contains(k)) {
            Self::Option
        } else {
            Self::Text
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Casing {
    #[default]
    None,
    Upper,
    Lower,
    Title,
}

impl Casing {
    pub fn apply(&self, value: &str) -> String {
        match self {
            Self::None => value.to_string(),
            Self::Upper => value.to_uppercase(),
            Self::Lower => value.to_lowercase(),
            Self::Title => title_case(value),
        }
    }
}

fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut at_word_start = true;
    for c in value.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            // 22nd, 3rd: a suffix after digits stays part of the same word
            at_word_start = !c.is_numeric();
        }
    }
    out
}

/// Read side of the external template collaborator. The engine never writes templates.
pub trait TemplateStore: Send + Sync {
    fn load_template(&self, id: &str) -> EngineResult<Template>;
}

/// Template registry - loads and caches templates
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<TemplateId, Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self { templates: HashMap::new() }
    }

    pub fn load_from_dir(dir: &Path) -> Result<Self, std::io::Error> {
        let mut registry = Self::new();
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().map_or(false, |e| e == "json") {
                    let content = fs::read_to_string(&path)?;
                    match serde_json::from_str::<Template>(&content) {
                        Ok(template) => {
                            debug!(template_id = %template.id, path = %path.display(), "loaded template");
                            registry.register(template);
                        }
                        Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable template"),
                    }
                }
            }
        }
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    pub fn list(&self) -> Vec<&Template> {
        let mut templates: Vec<_> = self.templates.values().collect();
        templates.sort_by(|a, b| a.id.cmp(&b.id));
        templates
    }

    pub fn register(&mut self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateStore for TemplateRegistry {
    fn load_template(&self, id: &str) -> EngineResult<Template> {
        self.get(id).cloned().ok_or_else(|| EngineError::NotFound(id.to_string()))
    }
}
