//! Synthesis Pipeline - Single Entry Point
//!
//! parse → resolve → validate → format → synthesize. Validation always runs
//! before formatting; there is no bypass.

use std::sync::Arc;
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::{EngineResult, ErrorKind, FormatErrorKind};
use crate::formatting::{FormatContext, FormatterRegistry};
use crate::parser::extract_identities;
use crate::resolver::{resolve, InputSet};
use crate::synthesizer::{
    Converter, DocumentStore, FormatAdapter, FormattedValues, GeneratedDocument, Synthesizer,
    TextFormatAdapter, Warning,
};
use crate::templates::{Template, TemplateStore};
use crate::validation::{apply_policy, Validator};

pub struct SynthesisPipeline {
    store: Arc<dyn TemplateStore>,
    config: EngineConfig,
    formatters: FormatterRegistry,
    validator: Validator,
    synthesizer: Synthesizer,
}

impl SynthesisPipeline {
    /// Uses the built-in formatters and the text adapter configured by
    /// `config.output_dir`.
    pub fn new(store: Arc<dyn TemplateStore>, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let adapter: Arc<dyn FormatAdapter> = match &config.output_dir {
            Some(dir) => Arc::new(TextFormatAdapter::to_dir(dir)),
            None => Arc::new(TextFormatAdapter::inline()),
        };
        let synthesizer = Synthesizer::new(adapter)
            .with_timeouts(config.execution.render_timeout(), config.execution.conversion_timeout())
            .with_store_timeout(config.execution.store_timeout());
        Ok(Self {
            store,
            config,
            formatters: FormatterRegistry::with_builtins(),
            validator: Validator::new(),
            synthesizer,
        })
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn FormatAdapter>) -> Self {
        self.synthesizer = self.synthesizer.with_adapter(adapter);
        self
    }

    /// Conversion runs only when `config.output_format` is set.
    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        if let Some(format) = self.config.output_format.clone() {
            self.synthesizer = self.synthesizer.with_converter(converter, format);
        }
        self
    }

    pub fn with_document_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.synthesizer = self.synthesizer.with_store(store);
        self
    }

    pub fn with_formatters(mut self, formatters: FormatterRegistry) -> Self {
        self.formatters = formatters;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn load_template(&self, id: &str) -> EngineResult<Template> {
        self.store.load_template(id)
    }

    /// Everything up to synthesis. Pure: no I/O.
    pub fn prepare(&self, template: &Template, inputs: &InputSet) -> EngineResult<FormattedValues> {
        template.check_engine_version()?;

        let identities = extract_identities(&template.body)?;
        let resolution = resolve(&identities, inputs, template, self.config.strict_unknown_placeholders)?;

        // MANDATORY: validation sees resolved values before any formatting.
        let violations = self.validator.validate(template, &resolution)?;
        let mut warnings: Vec<Warning> = apply_policy(violations, self.config.validation_policy)?
            .into_iter()
            .map(|v| {
                warn!(template_id = %template.id, identity = %v.identity, rule = %v.rule, "validation warning");
                Warning {
                    identity: v.identity,
                    kind: ErrorKind::Validation,
                    code: v.rule,
                    message: v.message,
                }
            })
            .collect();

        let ctx = FormatContext::new(&self.config, &template.category)?;
        let mut formatted = FormattedValues { identities: identities.clone(), ..Default::default() };

        for (identity, resolved) in resolution.iter() {
            let spec = template.field(&identity.field);
            let value = if resolved.value.is_empty() {
                String::new()
            } else {
                let kind = template.kind_of(&identity.field);
                match self.formatters.format(kind, &resolved.value, &ctx) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(template_id = %template.id, identity = %identity, error = %e, "format warning, using raw value");
                        warnings.push(Warning {
                            identity: identity.name(),
                            kind: ErrorKind::Format,
                            code: format_code(e.kind).to_string(),
                            message: "Value could not be formatted and was used as entered".to_string(),
                        });
                        resolved.value.clone()
                    }
                }
            };
            let value = match spec {
                Some(spec) => spec.casing.apply(&value),
                None => value,
            };
            formatted.values.insert(identity.name(), value);
        }

        formatted.warnings = warnings;
        Ok(formatted)
    }

    /// Single-document generation. The first error is returned as is.
    pub async fn generate(&self, template: &Template, inputs: &InputSet) -> EngineResult<GeneratedDocument> {
        let formatted = self.prepare(template, inputs)?;
        self.synthesizer.synthesize(template, inputs, formatted).await
    }

    pub async fn generate_by_id(&self, template_id: &str, inputs: &InputSet) -> EngineResult<GeneratedDocument> {
        let template = self.load_template(template_id)?;
        self.generate(&template, inputs).await
    }
}

fn format_code(kind: FormatErrorKind) -> &'static str {
    match kind {
        FormatErrorKind::InvalidDate => "invalid_date",
        FormatErrorKind::InvalidNumber => "invalid_number",
    }
}
