//! Engine Configuration
//!
//! Every option has an explicit default. Nothing is read from the process
//! environment.

use chrono::{FixedOffset, Locale};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// chrono locale name used for month names, e.g. `en_US`, `fr_FR`
    #[serde(default = "default_locale")]
    pub locale: String,
    /// `UTC`, `Z`, or a fixed `+HH:MM` / `-HH:MM` offset
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub strict_unknown_placeholders: bool,
    #[serde(default)]
    pub validation_policy: ValidationPolicy,
    #[serde(default)]
    pub currency_symbol: String,
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Requests best-effort conversion after synthesis, e.g. `pdf`
    #[serde(default)]
    pub output_format: Option<String>,
    /// Where the text adapter writes artifacts; inline bytes when unset
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

fn default_locale() -> String {
    "en_US".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            locale: default_locale(),
            timezone: default_timezone(),
            strict_unknown_placeholders: false,
            validation_policy: ValidationPolicy::default(),
            currency_symbol: String::new(),
            execution: ExecutionConfig::default(),
            output_format: None,
            output_dir: None,
        }
    }
}

/// What a validation violation does to the document.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// The item fails with a validation error
    #[default]
    Fatal,
    /// The document is generated and the violations are recorded as warnings
    Warning,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Pool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_ms")]
    pub render_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub conversion_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub store_timeout_ms: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            concurrency: default_concurrency(),
            render_timeout_ms: default_timeout_ms(),
            conversion_timeout_ms: default_timeout_ms(),
            store_timeout_ms: default_timeout_ms(),
        }
    }
}

impl ExecutionConfig {
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_millis(self.conversion_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> EngineResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.chrono_locale()?;
        self.offset()?;
        if self.execution.concurrency == 0 {
            return Err(EngineError::Config("execution.concurrency must be at least 1".into()));
        }
        Ok(())
    }

    pub fn chrono_locale(&self) -> EngineResult<Locale> {
        Locale::try_from(self.locale.as_str())
            .map_err(|_| EngineError::Config(format!("Unknown locale '{}'", self.locale)))
    }

    pub fn offset(&self) -> EngineResult<FixedOffset> {
        parse_offset(&self.timezone)
            .ok_or_else(|| EngineError::Config(format!("Invalid timezone '{}'", self.timezone)))
    }
}

fn parse_offset(tz: &str) -> Option<FixedOffset> {
    let tz = tz.trim();
    if tz.eq_ignore_ascii_case("utc") || tz == "Z" {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    if hours.len() != 2 || minutes.len() != 2 {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
