//! Document Synthesizer
//!
//! Turns fully formatted values into exactly one artifact per call. Byte-level
//! work is delegated to a [`FormatAdapter`]; conversion and persistence are
//! external collaborators behind [`Converter`] and [`DocumentStore`].

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::hashing::compute_job_hash;
use crate::parser::{self, Identity};
use crate::resolver::InputSet;
use crate::templates::Template;
use crate::ENGINE_VERSION;

/// Identity name to final value.
pub type ValueMap = BTreeMap<String, String>;

/// Opaque reference to a produced artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactRef {
    Inline { data_base64: String },
    Location { path: PathBuf },
}

impl ArtifactRef {
    pub fn inline(bytes: &[u8]) -> Self {
        Self::Inline { data_base64: base64::engine::general_purpose::STANDARD.encode(bytes) }
    }

    pub fn inline_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Inline { data_base64 } => {
                base64::engine::general_purpose::STANDARD.decode(data_base64).ok()
            }
            Self::Location { .. } => None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Location { path } => Some(path),
            Self::Inline { .. } => None,
        }
    }
}

/// A non-fatal issue recorded on a generated document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub identity: String,
    pub kind: ErrorKind,
    /// `invalid_date`, `invalid_number`, or a validation rule name
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DocumentStatus {
    Succeeded,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConversionState {
    NotRequested,
    Converted { format: String, artifact: ArtifactRef },
    Unavailable { format: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedDocument {
    pub id: String,
    pub template_id: String,
    pub template_version: String,
    pub inputs: InputSet,
    pub artifact: ArtifactRef,
    pub created_at: DateTime<Utc>,
    pub status: DocumentStatus,
    pub warnings: Vec<Warning>,
    pub job_hash: String,
    pub suggested_filename: String,
    pub conversion: ConversionState,
}

impl GeneratedDocument {
    /// Status transition driven by a downstream step.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = DocumentStatus::Failed { reason: reason.into() };
    }

    pub fn succeeded(&self) -> bool {
        self.status == DocumentStatus::Succeeded
    }
}

/// Output of the formatting stage: every identity mapped to its final value.
#[derive(Debug, Clone, Default)]
pub struct FormattedValues {
    pub identities: Vec<Identity>,
    pub values: ValueMap,
    pub warnings: Vec<Warning>,
}

// --- Collaborator seams ---

#[async_trait]
pub trait FormatAdapter: Send + Sync {
    /// File extension of produced artifacts, without the dot.
    fn extension(&self) -> &str;

    async fn render(&self, body: &str, values: &ValueMap) -> EngineResult<ArtifactRef>;
}

#[async_trait]
pub trait Converter: Send + Sync {
    /// Fails with [`EngineError::ConversionUnavailable`] when conversion cannot run.
    async fn convert(&self, artifact: &ArtifactRef, format: &str) -> EngineResult<ArtifactRef>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn record(&self, document: &GeneratedDocument) -> EngineResult<()>;
}

/// Replaces every token in `body` with its identity's value. All other bytes
/// are copied unchanged.
pub fn substitute(body: &str, values: &ValueMap) -> EngineResult<String> {
    let mut out = String::with_capacity(body.len());
    let mut last = 0;
    for token in parser::scan(body)? {
        let name = token.identity.name();
        let value = values.get(&name).ok_or(EngineError::MissingValue { identity: name })?;
        out.push_str(&body[last..token.span.start]);
        out.push_str(value);
        last = token.span.end;
    }
    out.push_str(&body[last..]);
    Ok(out)
}

/// Plain-text adapter. Writes `<uuid>.<ext>` into `output_dir` when set,
/// otherwise returns the bytes inline.
#[derive(Debug, Clone)]
pub struct TextFormatAdapter {
    output_dir: Option<PathBuf>,
    extension: String,
}

impl TextFormatAdapter {
    pub fn inline() -> Self {
        Self { output_dir: None, extension: "txt".into() }
    }

    pub fn to_dir(dir: impl Into<PathBuf>) -> Self {
        Self { output_dir: Some(dir.into()), extension: "txt".into() }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

#[async_trait]
impl FormatAdapter for TextFormatAdapter {
    fn extension(&self) -> &str {
        &self.extension
    }

    async fn render(&self, body: &str, values: &ValueMap) -> EngineResult<ArtifactRef> {
        let filled = substitute(body, values)?;
        match &self.output_dir {
            Some(dir) => {
                let path = dir.join(format!("{}.{}", Uuid::new_v4(), self.extension));
                let written = match tokio::fs::create_dir_all(dir).await {
                    Ok(()) => tokio::fs::write(&path, filled.as_bytes()).await,
                    Err(e) => Err(e),
                };
                written.map_err(|e| {
                    EngineError::Synthesis(format!("cannot write {}: {}", path.display(), e))
                })?;
                Ok(ArtifactRef::Location { path })
            }
            None => Ok(ArtifactRef::inline(filled.as_bytes())),
        }
    }
}

/// Runs an external program such as AbiWord. `{input}`, `{output}` and
/// `{format}` in `args` are replaced per call.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandConverter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// `abiword --to=<format> <input> -o <output>`
    pub fn abiword() -> Self {
        Self::new(
            "abiword",
            ["--to={format}", "{input}", "-o", "{output}"].iter().map(|s| s.to_string()).collect(),
        )
    }
}

#[async_trait]
impl Converter for CommandConverter {
    async fn convert(&self, artifact: &ArtifactRef, format: &str) -> EngineResult<ArtifactRef> {
        let input = artifact.path().ok_or_else(|| {
            EngineError::ConversionUnavailable("only stored artifacts can be converted".into())
        })?;
        let output = input.with_extension(format);
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                a.replace("{input}", &input.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy())
                    .replace("{format}", format)
            })
            .collect();

        let result = tokio::process::Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EngineError::ConversionUnavailable(format!("{}: {}", self.program, e)))?;

        if !result.status.success() {
            return Err(EngineError::ConversionUnavailable(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }
        match tokio::fs::metadata(&output).await {
            Ok(meta) if meta.len() > 0 => Ok(ArtifactRef::Location { path: output }),
            _ => Err(EngineError::ConversionUnavailable(format!(
                "{} produced no output at {}",
                self.program,
                output.display()
            ))),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<Vec<GeneratedDocument>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn documents(&self) -> Vec<GeneratedDocument> {
        self.documents.lock().await.clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn record(&self, document: &GeneratedDocument) -> EngineResult<()> {
        self.documents.lock().await.push(document.clone());
        Ok(())
    }
}

// --- Synthesizer ---

pub struct Synthesizer {
    adapter: Arc<dyn FormatAdapter>,
    converter: Option<Arc<dyn Converter>>,
    store: Option<Arc<dyn DocumentStore>>,
    output_format: Option<String>,
    render_timeout: Duration,
    conversion_timeout: Duration,
    store_timeout: Duration,
}

impl Synthesizer {
    pub fn new(adapter: Arc<dyn FormatAdapter>) -> Self {
        Self {
            adapter,
            converter: None,
            store: None,
            output_format: None,
            render_timeout: Duration::from_secs(30),
            conversion_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn FormatAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn Converter>, format: impl Into<String>) -> Self {
        self.converter = Some(converter);
        self.output_format = Some(format.into());
        self
    }

    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_timeouts(mut self, render: Duration, conversion: Duration) -> Self {
        self.render_timeout = render;
        self.conversion_timeout = conversion;
        self
    }

    pub fn with_store_timeout(mut self, store: Duration) -> Self {
        self.store_timeout = store;
        self
    }

    pub async fn synthesize(
        &self,
        template: &Template,
        inputs: &InputSet,
        formatted: FormattedValues,
    ) -> EngineResult<GeneratedDocument> {
        for identity in &formatted.identities {
            if !formatted.values.contains_key(&identity.name()) {
                error!(
                    template_id = %template.id,
                    identity = %identity,
                    contract_violation = true,
                    "formatted value missing for identity"
                );
                return Err(EngineError::MissingValue { identity: identity.name() });
            }
        }

        let render = self.adapter.render(&template.body, &formatted.values);
        let artifact = tokio::time::timeout(self.render_timeout, render)
            .await
            .map_err(|_| EngineError::Timeout {
                stage: "render",
                after_ms: self.render_timeout.as_millis() as u64,
            })??;

        let created_at = Utc::now();
        let job_hash = compute_job_hash(&template.id, &template.template_version, inputs, ENGINE_VERSION)?;
        let conversion = self.convert(&artifact).await;

        let document = GeneratedDocument {
            id: Uuid::new_v4().to_string(),
            template_id: template.id.clone(),
            template_version: template.template_version.clone(),
            inputs: inputs.clone(),
            artifact,
            created_at,
            status: DocumentStatus::Succeeded,
            warnings: formatted.warnings,
            job_hash,
            suggested_filename: suggested_filename(template, inputs, created_at, self.adapter.extension()),
            conversion,
        };

        if let Some(store) = &self.store {
            tokio::time::timeout(self.store_timeout, store.record(&document))
                .await
                .map_err(|_| EngineError::Timeout {
                    stage: "store",
                    after_ms: self.store_timeout.as_millis() as u64,
                })??;
        }

        info!(
            document_id = %document.id,
            template_id = %document.template_id,
            warnings = document.warnings.len(),
            "generated document"
        );
        Ok(document)
    }

    /// Best-effort: never fails the document.
    async fn convert(&self, artifact: &ArtifactRef) -> ConversionState {
        let (Some(converter), Some(format)) = (&self.converter, &self.output_format) else {
            return ConversionState::NotRequested;
        };
        let attempt = tokio::time::timeout(self.conversion_timeout, converter.convert(artifact, format)).await;
        let reason = match attempt {
            Ok(Ok(converted)) => {
                return ConversionState::Converted { format: format.clone(), artifact: converted }
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}ms", self.conversion_timeout.as_millis()),
        };
        warn!(format = %format, reason = %reason, "conversion unavailable");
        ConversionState::Unavailable { format: format.clone(), reason }
    }
}

fn sanitize(part: &str) -> String {
    part.trim().replace([' ', '/', '\\'], "_")
}

/// `<name>_<template>_<YYYYmmdd_HHMMSS>.<ext>`; the name prefix only when a
/// non-empty `name` input was given.
pub fn suggested_filename(
    template: &Template,
    inputs: &InputSet,
    at: DateTime<Utc>,
    extension: &str,
) -> String {
    let base = format!("{}_{}.{}", sanitize(&template.name), at.format("%Y%m%d_%H%M%S"), extension);
    match inputs.get("name").map(str::trim) {
        Some(name) if !name.is_empty() => format!("{}_{}", sanitize(name), base),
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::Category;
    use chrono::TimeZone;

    fn template(body: &str) -> Template {
        Template {
            id: "letter".into(),
            name: "Reference Letter".into(),
            description: String::new(),
            category: Category::new("Letter"),
            template_version: "1.0.0".into(),
            engine_min_version: "1.0.0".into(),
            body: body.into(),
            fields: Default::default(),
        }
    }

    fn formatted(body: &str, pairs: &[(&str, &str)]) -> FormattedValues {
        FormattedValues {
            identities: parser::extract_identities(body).unwrap(),
            values: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            warnings: vec![],
        }
    }

    #[test]
    fn test_substitute_preserves_surrounding_bytes() {
        let body = "  Dear {{ name }},\r\n\tRe: {{name}} café  ";
        let values: ValueMap = [("name", "Ada"), ("name_instance_1", "ADA")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(substitute(body, &values).unwrap(), "  Dear Ada,\r\n\tRe: ADA café  ");
    }

    #[tokio::test]
    async fn test_missing_value_is_contract_error() {
        let body = "{{ a }} {{ b }}";
        let synth = Synthesizer::new(Arc::new(TextFormatAdapter::inline()));
        let err = synth
            .synthesize(&template(body), &InputSet::new(), formatted(body, &[("a", "1")]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingValue { ref identity } if identity == "b"));
        assert!(err.is_defect());
    }

    #[tokio::test]
    async fn test_writes_to_dir_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let synth = Synthesizer::new(Arc::new(TextFormatAdapter::to_dir(dir.path())))
            .with_store(store.clone());
        let body = "Hello {{ name }}";
        let doc = synth
            .synthesize(&template(body), &InputSet::new().with("name", "Ada Lovelace"), formatted(body, &[("name", "Ada")]))
            .await
            .unwrap();

        let path = doc.artifact.path().unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "Hello Ada");
        assert!(doc.suggested_filename.starts_with("Ada_Lovelace_Reference_Letter_"));
        assert!(doc.suggested_filename.ends_with(".txt"));
        assert_eq!(doc.conversion, ConversionState::NotRequested);
        assert_eq!(store.documents().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_failed_sets_status() {
        let body = "Hi {{ name }}";
        let synth = Synthesizer::new(Arc::new(TextFormatAdapter::inline()));
        let mut doc = synth
            .synthesize(&template(body), &InputSet::new(), formatted(body, &[("name", "Ada")]))
            .await
            .unwrap();
        assert!(doc.succeeded());

        doc.mark_failed("printer rejected the file");
        assert!(!doc.succeeded());
        assert_eq!(doc.status, DocumentStatus::Failed { reason: "printer rejected the file".into() });
    }

    struct Unavailable;

    #[async_trait]
    impl Converter for Unavailable {
        async fn convert(&self, _: &ArtifactRef, _: &str) -> EngineResult<ArtifactRef> {
            Err(EngineError::ConversionUnavailable("no converter installed".into()))
        }
    }

    #[tokio::test]
    async fn test_conversion_is_best_effort() {
        let body = "x";
        let synth = Synthesizer::new(Arc::new(TextFormatAdapter::inline()))
            .with_converter(Arc::new(Unavailable), "pdf");
        let doc = synth
            .synthesize(&template(body), &InputSet::new(), formatted(body, &[]))
            .await
            .unwrap();
        assert!(doc.succeeded());
        assert!(matches!(doc.conversion, ConversionState::Unavailable { ref format, .. } if format == "pdf"));
    }

    #[tokio::test]
    async fn test_command_converter_missing_program() {
        let converter = CommandConverter::new("definitely-not-a-converter-binary", vec!["{input}".into()]);
        let artifact = ArtifactRef::Location { path: PathBuf::from("/tmp/none.txt") };
        let err = converter.convert(&artifact, "pdf").await.unwrap_err();
        assert!(matches!(err, EngineError::ConversionUnavailable(_)));
    }

    #[test]
    fn test_suggested_filename_without_name() {
        let at = Utc.with_ymd_and_hms(2025, 9, 22, 8, 5, 0).unwrap();
        let name = suggested_filename(&template("x"), &InputSet::new().with("name", "  "), at, "docx");
        assert_eq!(name, "Reference_Letter_20250922_080500.docx");
    }
}
