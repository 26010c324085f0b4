//! Error Taxonomy
//!
//! Every failure carries a stable [`ErrorKind`]. `Display` is the developer
//! message; [`ErrorKind::user_message`] is the only text shown to end users.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::ValidationViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedPlaceholder,
    UnknownPlaceholder,
    Format,
    Validation,
    MissingValue,
    Synthesis,
    ConversionUnavailable,
    Timeout,
    NotFound,
    EngineVersionMismatch,
    Config,
    Io,
    Serialization,
    Internal,
}

impl ErrorKind {
    /// Stable user-facing message template for this kind.
    ///
    /// | kind                      | message |
    /// |---------------------------|---------|
    /// | `malformed_placeholder`   | The template contains a malformed placeholder. |
    /// | `unknown_placeholder`     | The input contains fields that this template does not use. |
    /// | `format`                  | A value could not be formatted. |
    /// | `validation`              | One or more values did not pass validation. |
    /// | `missing_value`           | The document could not be generated due to an internal error. |
    /// | `synthesis`               | The document could not be generated. |
    /// | `conversion_unavailable`  | Document conversion is currently unavailable. |
    /// | `timeout`                 | Document generation took too long and was stopped. |
    /// | `not_found`               | The requested template does not exist. |
    /// | `engine_version_mismatch` | This template requires a newer engine version. |
    /// | `config`                  | The engine configuration is invalid. |
    /// | `io`                      | The document could not be stored. |
    /// | `serialization`           | The request could not be read. |
    /// | `internal`                | The document could not be generated due to an internal error. |
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MalformedPlaceholder => "The template contains a malformed placeholder.",
            Self::UnknownPlaceholder => "The input contains fields that this template does not use.",
            Self::Format => "A value could not be formatted.",
            Self::Validation => "One or more values did not pass validation.",
            Self::MissingValue | Self::Internal => {
                "The document could not be generated due to an internal error."
            }
            Self::Synthesis => "The document could not be generated.",
            Self::ConversionUnavailable => "Document conversion is currently unavailable.",
            Self::Timeout => "Document generation took too long and was stopped.",
            Self::NotFound => "The requested template does not exist.",
            Self::EngineVersionMismatch => "This template requires a newer engine version.",
            Self::Config => "The engine configuration is invalid.",
            Self::Io => "The document could not be stored.",
            Self::Serialization => "The request could not be read.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    Unterminated,
    Nested,
    InvalidName(String),
    ReservedSuffix(String),
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unterminated => write!(f, "unterminated token"),
            Self::Nested => write!(f, "nested token"),
            Self::InvalidName(name) => write!(f, "invalid field name '{}'", name),
            Self::ReservedSuffix(name) => {
                write!(f, "field name '{}' uses the reserved _instance_ suffix", name)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatErrorKind {
    InvalidDate,
    InvalidNumber,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("cannot format '{raw}' ({kind:?})")]
pub struct FormatError {
    pub kind: FormatErrorKind,
    pub raw: String,
}

impl FormatError {
    pub fn invalid_date(raw: &str) -> Self {
        Self { kind: FormatErrorKind::InvalidDate, raw: raw.to_string() }
    }

    pub fn invalid_number(raw: &str) -> Self {
        Self { kind: FormatErrorKind::InvalidNumber, raw: raw.to_string() }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Malformed placeholder at byte {offset}: {reason}")]
    MalformedPlaceholder { offset: usize, reason: MalformedReason },

    #[error("Unknown placeholder keys: {}", .keys.join(", "))]
    UnknownPlaceholder { keys: Vec<String> },

    #[error("Format error in '{field}': {source}")]
    Format { field: String, source: FormatError },

    #[error("Validation failed: {}", summarize(.violations))]
    Validation { violations: Vec<ValidationViolation> },

    #[error("No formatted value for placeholder '{identity}'")]
    MissingValue { identity: String },

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Conversion unavailable: {0}")]
    ConversionUnavailable(String),

    #[error("{stage} timed out after {after_ms}ms")]
    Timeout { stage: &'static str, after_ms: u64 },

    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Template version {0} requires engine >= {1}, current is {2}")]
    EngineVersionMismatch(String, String, String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn summarize(violations: &[ValidationViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedPlaceholder { .. } => ErrorKind::MalformedPlaceholder,
            Self::UnknownPlaceholder { .. } => ErrorKind::UnknownPlaceholder,
            Self::Format { .. } => ErrorKind::Format,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::MissingValue { .. } => ErrorKind::MissingValue,
            Self::Synthesis(_) => ErrorKind::Synthesis,
            Self::ConversionUnavailable(_) => ErrorKind::ConversionUnavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::EngineVersionMismatch(..) => ErrorKind::EngineVersionMismatch,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }

    /// Contract violations between components, as opposed to bad input.
    pub fn is_defect(&self) -> bool {
        matches!(self, Self::MissingValue { .. } | Self::Internal(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
