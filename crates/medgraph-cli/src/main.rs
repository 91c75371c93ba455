//! Medgraph CLI - Pipeline driver
//!
//! Runs the extraction pipeline stage by stage. Every stage reads its
//! input from the persisted stores of the stage before it, so any
//! contiguous range can be re-run without repeating earlier work:
//!
//!   medgraph document.pdf
//!   medgraph document.pdf --start-stage relations --end-stage normalize
//!   medgraph document.pdf --start-stage import --end-stage import

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use medgraph_core::store::{self, StagePaths};
use medgraph_core::{LlmConfig, Neo4jConfig, PipelineConfig};
use medgraph_extract::{CleanStage, EntityStage, GeminiClient, NormalizeStage, RelationStage};
use medgraph_graph::{GraphAssembler, Neo4jImporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Stage {
    /// Extract page text from the source document
    Extract,
    /// Reconstruct paragraphs and clean them
    Clean,
    /// Extract categorized entities
    Entities,
    /// Extract relations between co-occurring entities
    Relations,
    /// Build and apply the term normalization map
    Normalize,
    /// Export node/edge CSV files
    Export,
    /// Import the exported graph into Neo4j
    Import,
}

#[derive(Parser)]
#[command(name = "medgraph")]
#[command(about = "Medical document to knowledge graph pipeline")]
#[command(version)]
struct Cli {
    /// Source PDF document
    input: PathBuf,

    /// Directory holding every stage's persisted output
    #[arg(long, default_value = "output")]
    out_dir: PathBuf,

    /// First stage to run
    #[arg(long, value_enum, default_value_t = Stage::Extract)]
    start_stage: Stage,

    /// Last stage to run (inclusive)
    #[arg(long, value_enum, default_value_t = Stage::Export)]
    end_stage: Stage,

    /// First page to process (1-based, defaults to the first page)
    #[arg(long)]
    start_page: Option<u32>,

    /// Last page to process (inclusive, defaults to the last page)
    #[arg(long)]
    end_page: Option<u32>,

    /// Text-generation model name
    #[arg(long, default_value = "gemini-2.5-flash-lite")]
    model: String,

    /// Paragraphs per external call
    #[arg(long, default_value_t = 5)]
    batch_size: usize,

    /// Seconds to wait between batches
    #[arg(long, default_value_t = 60)]
    wait: u64,

    /// Total attempts per external call
    #[arg(long, default_value_t = 3)]
    retries: u32,
}

impl Cli {
    fn runs(&self, stage: Stage) -> bool {
        self.start_stage <= stage && stage <= self.end_stage
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            batch_size: self.batch_size,
            wait_secs: self.wait,
            retries: self.retries,
            output_dir: self.out_dir.clone(),
            document_name: self.document_name(),
            ..PipelineConfig::default()
        }
    }

    fn document_name(&self) -> String {
        self.input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    anyhow::ensure!(
        cli.start_stage <= cli.end_stage,
        "start stage must not come after end stage"
    );

    let config = cli.pipeline_config();
    let paths = StagePaths::new(&config.output_dir);

    // Stages after extraction talk to the text-generation service.
    let needs_llm = [Stage::Clean, Stage::Entities, Stage::Relations, Stage::Normalize]
        .into_iter()
        .any(|s| cli.runs(s));
    let client: Option<Arc<GeminiClient>> = if needs_llm {
        let llm_config = LlmConfig::from_env(&cli.model)?;
        Some(Arc::new(GeminiClient::from_config(&llm_config)))
    } else {
        None
    };
    let client = |stage: &str| {
        client
            .clone()
            .map(|c| c as Arc<dyn medgraph_core::LlmClient>)
            .with_context(|| format!("no client for stage {stage}"))
    };

    if cli.runs(Stage::Extract) {
        let pages = medgraph_reader::read_pages(&cli.input, cli.start_page, cli.end_page)?;
        store::save_json(&paths.pages(), &pages)?;
        tracing::info!(pages = pages.len(), "Extract stage complete");
    }

    if cli.runs(Stage::Clean) {
        CleanStage::new(client("clean")?, config.clone())
            .run(&paths)
            .await?;
    }

    if cli.runs(Stage::Entities) {
        EntityStage::new(client("entities")?, config.clone())
            .run(&paths)
            .await?;
    }

    if cli.runs(Stage::Relations) {
        RelationStage::new(client("relations")?, config.clone())
            .run(&paths)
            .await?;
    }

    if cli.runs(Stage::Normalize) {
        NormalizeStage::new(client("normalize")?, config.clone())
            .run(&paths)
            .await?;
        medgraph_graph::run_merge(&paths)?;
    }

    if cli.runs(Stage::Export) {
        medgraph_graph::run_export(&paths, &config.document_name)?;
    }

    if cli.runs(Stage::Import) {
        import_graph(&paths, &config.document_name).await?;
    }

    Ok(())
}

/// Re-assemble the graph from the normalized stores and push it to Neo4j.
async fn import_graph(paths: &StagePaths, document_name: &str) -> anyhow::Result<()> {
    let entities: Vec<medgraph_core::Entity> = store::load_json(&paths.normalized_entities())?;
    let relations: Vec<medgraph_core::Relation> =
        store::load_jsonl(&paths.normalized_relations())?;
    let map: medgraph_core::NormalizationMap = store::load_json(&paths.normalization_map())?;

    let assembler = GraphAssembler::new(document_name);
    let (nodes, term_to_id) = assembler.assemble_nodes(&entities);
    let edges = assembler.assemble_edges(&relations, &term_to_id);
    let (term_nodes, term_edges) = assembler.assemble_normalization_graph(&map);

    let importer = Neo4jImporter::connect(&Neo4jConfig::from_env()?).await?;
    importer.import_graph(&nodes, &edges).await?;
    importer
        .import_normalization_graph(&term_nodes, &term_edges)
        .await?;
    tracing::info!("Import stage complete");
    Ok(())
}
