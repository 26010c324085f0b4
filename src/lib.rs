//! DocSynth Core - Template Instantiation & Batch Synthesis
//!
//! # Pipeline
//! 1. Parse: every token gets a deterministic identity
//! 2. Resolve: instance override, explicit input, template default, empty
//! 3. Validate: rules produce violations, policy decides
//! 4. Format: (kind, category) registry with fallback
//! 5. Synthesize: one artifact per call, through an adapter
//!
//! Batches run this pipeline once per item and never fail as a whole.

pub mod batch;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod formatting;
pub mod hashing;
pub mod parser;
pub mod pipeline;
pub mod resolver;
pub mod synthesizer;
pub mod templates;
pub mod validation;

pub use batch::{BatchItem, BatchOrchestrator, BatchRequest, BatchResult, BatchStatus, Failure, ItemOutcome, ItemResult};
pub use config::{EngineConfig, ExecutionMode, ValidationPolicy};
pub use error::{EngineError, EngineResult, ErrorKind, FormatError, FormatErrorKind};
pub use formatting::{FormatContext, Formatter, FormatterRegistry};
pub use parser::{extract_identities, Identity};
pub use pipeline::SynthesisPipeline;
pub use resolver::{resolve, InputSet, ResolvedValue, ValueSource};
pub use synthesizer::{ArtifactRef, FormatAdapter, GeneratedDocument, Synthesizer};
pub use templates::{Category, FieldSpec, PlaceholderKind, Template, TemplateId, TemplateStore};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
