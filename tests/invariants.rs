//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use docsynth_core::{
    extract_identities,
    parser::scan,
    synthesizer::{ConversionState, Converter, DocumentStore, ValueMap},
    templates::{FieldSpec, TemplateRegistry},
    ArtifactRef, BatchItem, BatchOrchestrator, BatchRequest, BatchStatus, Category, EngineConfig,
    EngineError, EngineResult, ErrorKind, FormatAdapter, GeneratedDocument, Identity, InputSet,
    SynthesisPipeline, Template,
};

fn template(id: &str, body: &str) -> Template {
    Template {
        id: id.to_string(),
        name: "Test Letter".to_string(),
        description: String::new(),
        category: Category::new("Letter"),
        template_version: "1.0.0".to_string(),
        engine_min_version: "1.0.0".to_string(),
        body: body.to_string(),
        fields: BTreeMap::new(),
    }
}

fn create_pipeline(config: EngineConfig, templates: Vec<Template>) -> SynthesisPipeline {
    let mut registry = TemplateRegistry::new();
    for t in templates {
        registry.register(t);
    }
    SynthesisPipeline::new(Arc::new(registry), config).unwrap()
}

fn text_of(artifact: &ArtifactRef) -> String {
    String::from_utf8(artifact.inline_bytes().unwrap()).unwrap()
}

#[test]
fn invariant_n_occurrences_give_n_gapless_identities() {
    for n in [2usize, 20] {
        let body = vec!["{{ name }}"; n].join(" / ");
        let identities = extract_identities(&body).unwrap();
        assert_eq!(identities.len(), n);
        for (k, identity) in identities.iter().enumerate() {
            assert_eq!(*identity, Identity::new("name", k));
        }
        assert_eq!(identities[0].name(), "name");
        assert_eq!(identities[n - 1].name(), format!("name_instance_{}", n - 1));
    }
}

#[test]
fn invariant_reparse_is_idempotent() {
    let body = "Dear {{ name }}, on {{ date }} {{name}} signed. {{ date }}";
    let first = extract_identities(body).unwrap();
    let second = extract_identities(body).unwrap();
    assert_eq!(first, second);
}

#[test]
fn invariant_malformed_tokens_fail() {
    assert!(matches!(scan("Hello {{ name"), Err(EngineError::MalformedPlaceholder { .. })));
    assert!(matches!(scan("{{ a {{ b }} }}"), Err(EngineError::MalformedPlaceholder { .. })));
    assert!(matches!(scan("{{ bad-name }}"), Err(EngineError::MalformedPlaceholder { .. })));
}

#[tokio::test]
async fn invariant_explicit_empty_differs_from_default() {
    let mut t = template("defaults", "[{{ title }}]");
    t.fields.insert(
        "title".to_string(),
        FieldSpec { default: Some("Mr".to_string()), ..Default::default() },
    );
    let pipeline = create_pipeline(EngineConfig::default(), vec![t.clone()]);

    let omitted = pipeline.generate(&t, &InputSet::new()).await.unwrap();
    assert_eq!(text_of(&omitted.artifact), "[Mr]");

    let empty = pipeline.generate(&t, &InputSet::new().with("title", "")).await.unwrap();
    assert_eq!(text_of(&empty.artifact), "[]");
}

#[tokio::test]
async fn invariant_instance_override_wins_over_base_value() {
    let t = template("override", "{{ name }} and {{ name }}");
    let pipeline = create_pipeline(EngineConfig::default(), vec![t.clone()]);
    let inputs = InputSet::new().with("name", "Ada").with("name_instance_1", "Grace");
    let doc = pipeline.generate(&t, &inputs).await.unwrap();
    assert_eq!(text_of(&doc.artifact), "Ada and Grace");
}

#[tokio::test]
async fn invariant_bad_date_warns_but_document_is_produced() {
    let t = template("dated", "Signed on {{ date }}.");
    let pipeline = create_pipeline(EngineConfig::default(), vec![t.clone()]);
    let doc = pipeline.generate(&t, &InputSet::new().with("date", "next tuesday")).await.unwrap();

    assert!(doc.succeeded());
    assert_eq!(text_of(&doc.artifact), "Signed on next tuesday.");
    assert_eq!(doc.warnings.len(), 1);
    assert_eq!(doc.warnings[0].code, "invalid_date");
    assert_eq!(doc.warnings[0].identity, "date");
}

#[tokio::test]
async fn invariant_synthesized_text_has_no_tokens_left() {
    let t = template("full", "{{ name }} lives at {{ address }}; {{ name }} owes {{ amount }}.");
    let pipeline = create_pipeline(EngineConfig::default(), vec![t.clone()]);
    let inputs = InputSet::new()
        .with("name", "Ada")
        .with("address", "1 Main St, Springfield")
        .with("amount", "1234.5");
    let doc = pipeline.generate(&t, &inputs).await.unwrap();
    let text = text_of(&doc.artifact);
    assert!(!text.contains("{{"));
    assert!(!text.contains("}}"));
    assert!(text.starts_with("Ada lives at "));
}

#[tokio::test]
async fn invariant_strict_mode_rejects_unknown_keys() {
    let t = template("strict", "{{ name }}");
    let config = EngineConfig { strict_unknown_placeholders: true, ..Default::default() };
    let pipeline = create_pipeline(config, vec![t.clone()]);
    let err = pipeline
        .generate(&t, &InputSet::new().with("name", "Ada").with("nickname", "A"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownPlaceholder);

    let lenient = create_pipeline(EngineConfig::default(), vec![t.clone()]);
    assert!(lenient.generate(&t, &InputSet::new().with("nickname", "A")).await.is_ok());
}

fn five_items() -> Vec<BatchItem> {
    let good = Arc::new(template("good", "Hello {{ name }}"));
    let bad = Arc::new(template("bad", "Hello {{ name"));
    (0..5)
        .map(|i| {
            let t = if i == 2 { bad.clone() } else { good.clone() };
            BatchItem::new(t, InputSet::new().with("name", format!("person{}", i)))
        })
        .collect()
}

fn assert_partial_in_order(result: &docsynth_core::BatchResult) {
    assert_eq!(result.status, BatchStatus::CompletedPartial);
    assert_eq!(result.outcomes.len(), 5);
    for (i, outcome) in result.outcomes.iter().enumerate() {
        assert_eq!(outcome.index, i);
        if i == 2 {
            assert_eq!(outcome.failure().unwrap().kind, ErrorKind::MalformedPlaceholder);
        } else {
            let doc = outcome.document().unwrap();
            assert_eq!(text_of(&doc.artifact), format!("Hello person{}", i));
        }
    }
    assert_eq!(result.failed_indices(), vec![2]);
}

#[tokio::test]
async fn invariant_batch_failure_is_isolated_sequential() {
    let pipeline = Arc::new(create_pipeline(EngineConfig::default(), vec![]));
    let result = BatchOrchestrator::new(pipeline).sequential().run_batch(five_items()).await;
    assert_partial_in_order(&result);
}

#[tokio::test]
async fn invariant_batch_failure_is_isolated_pool() {
    let pipeline = Arc::new(create_pipeline(EngineConfig::default(), vec![]));
    let result = BatchOrchestrator::new(pipeline).pooled(3).run_batch(five_items()).await;
    assert_partial_in_order(&result);
}

#[tokio::test]
async fn invariant_empty_batch_is_all_success() {
    let pipeline = Arc::new(create_pipeline(EngineConfig::default(), vec![]));
    let result = BatchOrchestrator::new(pipeline).run_batch(Vec::new()).await;
    assert_eq!(result.status, BatchStatus::CompletedAllSuccess);
    assert!(result.outcomes.is_empty());
}

#[tokio::test]
async fn invariant_submit_unknown_template_fails_only_that_item() {
    let pipeline = Arc::new(create_pipeline(EngineConfig::default(), vec![template("good", "Hi {{ name }}")]));
    let requests: Vec<BatchRequest> = serde_json::from_str(
        r#"[
            {"templateId": "good", "inputs": {"name": "Ada"}},
            {"templateId": "nope", "inputs": {}},
            {"templateId": "good"}
        ]"#,
    )
    .unwrap();
    let result = BatchOrchestrator::new(pipeline).submit(requests).await;

    assert_eq!(result.status, BatchStatus::CompletedPartial);
    assert!(result.outcomes[0].is_success());
    assert_eq!(result.outcomes[1].template_id, "nope");
    assert_eq!(result.outcomes[1].failure().unwrap().kind, ErrorKind::NotFound);
    assert_eq!(text_of(&result.outcomes[2].document().unwrap().artifact), "Hi ");
}

#[tokio::test]
async fn invariant_retry_merges_at_original_indices() {
    let pipeline = Arc::new(create_pipeline(EngineConfig::default(), vec![]));
    let orchestrator = BatchOrchestrator::new(pipeline);
    let mut items = five_items();
    let first = orchestrator.run_batch(items.clone()).await;
    assert_eq!(first.failed(), 1);

    items[2] = BatchItem::new(Arc::new(template("fixed", "Hello {{ name }}")), items[2].inputs.clone());
    let retried = orchestrator.retry_failed(&first, &items).await.unwrap();

    assert_eq!(retried.status, BatchStatus::CompletedAllSuccess);
    assert_eq!(retried.outcomes[2].index, 2);
    assert_eq!(retried.outcomes[2].template_id, "fixed");
    assert_eq!(
        retried.outcomes[0].document().unwrap().id,
        first.outcomes[0].document().unwrap().id
    );

    let err = orchestrator.retry_failed(&first, &items[..3]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

struct SlowAdapter;

#[async_trait]
impl FormatAdapter for SlowAdapter {
    fn extension(&self) -> &str {
        "txt"
    }

    async fn render(&self, _body: &str, _values: &ValueMap) -> EngineResult<ArtifactRef> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(ArtifactRef::inline(b"late"))
    }
}

#[tokio::test(start_paused = true)]
async fn invariant_slow_render_times_out_as_item_failure() {
    let mut config = EngineConfig::default();
    config.execution.render_timeout_ms = 100;
    let pipeline = create_pipeline(config, vec![]).with_adapter(Arc::new(SlowAdapter));
    let items = vec![BatchItem::new(Arc::new(template("slow", "{{ name }}")), InputSet::new())];

    let result = BatchOrchestrator::new(Arc::new(pipeline)).run_batch(items).await;
    assert_eq!(result.status, BatchStatus::CompletedAllFailed);
    assert_eq!(result.outcomes[0].failure().unwrap().kind, ErrorKind::Timeout);
}

struct StuckStore;

#[async_trait]
impl DocumentStore for StuckStore {
    async fn record(&self, _document: &GeneratedDocument) -> EngineResult<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn invariant_stuck_store_times_out_as_item_failure() {
    let mut config = EngineConfig::default();
    config.execution.store_timeout_ms = 100;
    let pipeline = create_pipeline(config, vec![]).with_document_store(Arc::new(StuckStore));
    let items = vec![
        BatchItem::new(Arc::new(template("stored", "{{ name }}")), InputSet::new().with("name", "Ada")),
        BatchItem::new(Arc::new(template("stored", "{{ name }}")), InputSet::new().with("name", "Grace")),
    ];

    let orchestrator = BatchOrchestrator::new(Arc::new(pipeline)).pooled(2);
    let run = orchestrator.run_batch(items);
    let result = tokio::time::timeout(Duration::from_secs(600), run)
        .await
        .expect("batch must finish once the store call times out");
    assert_eq!(result.status, BatchStatus::CompletedAllFailed);
    for outcome in &result.outcomes {
        assert_eq!(outcome.failure().unwrap().kind, ErrorKind::Timeout);
    }
}

struct NoConverter;

#[async_trait]
impl Converter for NoConverter {
    async fn convert(&self, _artifact: &ArtifactRef, format: &str) -> EngineResult<ArtifactRef> {
        Err(EngineError::ConversionUnavailable(format!("no converter for {}", format)))
    }
}

#[tokio::test]
async fn invariant_conversion_failure_keeps_document() {
    let t = template("convert", "{{ name }}");
    let config = EngineConfig { output_format: Some("pdf".to_string()), ..Default::default() };
    let pipeline = create_pipeline(config, vec![t.clone()]).with_converter(Arc::new(NoConverter));

    let doc = pipeline.generate(&t, &InputSet::new().with("name", "Ada")).await.unwrap();
    assert!(doc.succeeded());
    assert_eq!(text_of(&doc.artifact), "Ada");
    assert!(matches!(doc.conversion, ConversionState::Unavailable { ref format, .. } if format == "pdf"));
}

#[tokio::test]
async fn invariant_job_hash_is_deterministic() {
    let t = template("hash", "{{ name }}");
    let pipeline = create_pipeline(EngineConfig::default(), vec![t.clone()]);
    let inputs = InputSet::new().with("name", "Ada");
    let a = pipeline.generate(&t, &inputs).await.unwrap();
    let b = pipeline.generate(&t, &inputs).await.unwrap();
    assert_eq!(a.job_hash, b.job_hash);
    assert_ne!(a.id, b.id);
}
