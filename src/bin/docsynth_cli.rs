//! DocSynth CLI - Bridge interface for web front ends
//!
//! Commands: templates, fields, generate, batch
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when a document (or any batch item) fails

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use docsynth_core::{
    parser::merged_fields,
    synthesizer::CommandConverter,
    templates::TemplateRegistry,
    BatchOrchestrator, BatchRequest, BatchStatus, EngineConfig, EngineError, InputSet,
    SynthesisPipeline,
};

#[derive(Parser)]
#[command(name = "docsynth-cli")]
#[command(about = "DocSynth CLI - Template Instantiation & Batch Synthesis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to templates directory
    #[arg(short, long, default_value = "templates")]
    templates_dir: PathBuf,

    /// Engine configuration (JSON); built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available templates
    Templates,

    /// Merged input fields for one or more templates
    Fields {
        /// Template IDs
        #[arg(short, long, required = true)]
        template: Vec<String>,
    },

    /// Generate a single document
    Generate {
        /// Template ID
        #[arg(short, long)]
        template: String,

        /// JSON object of field values
        #[arg(short, long)]
        inputs: String,
    },

    /// Generate a batch of documents
    Batch {
        /// JSON array of {"templateId", "inputs"}
        #[arg(short, long)]
        payload: String,
    },
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to serialize output: {}", e),
    }
}

fn print_error(err: &EngineError) {
    print_json(&serde_json::json!({
        "success": false,
        "kind": err.kind(),
        "error": err.user_message(),
    }));
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docsynth_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                print_error(&e);
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };

    // Load templates
    let registry = match TemplateRegistry::load_from_dir(&cli.templates_dir) {
        Ok(r) => r,
        Err(e) => {
            print_error(&EngineError::Io(e));
            return ExitCode::FAILURE;
        }
    };

    if let Commands::Templates = cli.command {
        let templates: Vec<_> = registry
            .list()
            .iter()
            .map(|t| serde_json::json!({
                "id": t.id,
                "name": t.name,
                "category": t.category,
                "version": t.template_version,
            }))
            .collect();
        print_json(&templates);
        return ExitCode::SUCCESS;
    }

    if let Commands::Fields { template } = &cli.command {
        let mut templates = Vec::new();
        for id in template {
            match registry.get(id) {
                Some(t) => templates.push(t),
                None => {
                    print_error(&EngineError::NotFound(id.clone()));
                    return ExitCode::from(2);
                }
            }
        }
        return match merged_fields(&templates) {
            Ok(fields) => {
                print_json(&fields);
                ExitCode::SUCCESS
            }
            Err(e) => {
                print_error(&e);
                ExitCode::from(2)
            }
        };
    }

    let pipeline = match SynthesisPipeline::new(Arc::new(registry), config) {
        Ok(p) => p.with_converter(Arc::new(CommandConverter::abiword())),
        Err(e) => {
            print_error(&e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Generate { template, inputs } => {
            let inputs: InputSet = match serde_json::from_str(&inputs) {
                Ok(i) => i,
                Err(e) => {
                    print_error(&EngineError::Serialization(e));
                    return ExitCode::FAILURE;
                }
            };

            match pipeline.generate_by_id(&template, &inputs).await {
                Ok(document) => {
                    print_json(&serde_json::json!({ "success": true, "document": document }));
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    print_error(&e);
                    ExitCode::from(2)
                }
            }
        }

        Commands::Batch { payload } => {
            let requests: Vec<BatchRequest> = match serde_json::from_str(&payload) {
                Ok(r) => r,
                Err(e) => {
                    print_error(&EngineError::Serialization(e));
                    return ExitCode::FAILURE;
                }
            };

            let orchestrator = BatchOrchestrator::new(Arc::new(pipeline));
            let result = orchestrator.submit(requests).await;
            print_json(&result);
            if result.status == BatchStatus::CompletedAllSuccess {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }

        Commands::Templates | Commands::Fields { .. } => ExitCode::SUCCESS,
    }
}
