use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::config::Config;
use crate::embeddings::generator::{EmbeddingGenerator, OpenAiEmbeddingClient};
use crate::extraction::EntityExtractor;
use crate::extraction::relationships::RelationshipExtractor;
use crate::graph::export::{to_cytoscape, to_dot, to_graphml};
use crate::graph::{GraphBuilder, GraphOptions, KnowledgeGraph};
use crate::indexer::{DocumentSource, IngestionPipeline};
use crate::llm::{LanguageModel, OpenAiChatClient};
use crate::store::{KnowledgeStore, MemoryStore};

/// Output format for the graph export command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum GraphFormat {
    Dot,
    Graphml,
    Cytoscape,
}

/// Print the active configuration.
#[inline]
pub fn show_config(config: &Config) {
    println!("{}", style("Knowledge Base Configuration").bold().cyan());
    println!();

    println!("{}", style("Service:").bold().yellow());
    println!("  Base URL: {}", style(&config.service.base_url).cyan());
    println!("  Chat model: {}", style(&config.service.chat_model).cyan());
    println!("  API key env: {}", style(&config.service.api_key_env).cyan());
    println!("  Workspace: {}", style(&config.service.workspace).cyan());
    println!();

    println!("{}", style("Embedding:").bold().yellow());
    println!("  Model: {}", style(&config.embedding.model).cyan());
    println!("  Dimension: {}", style(config.embedding.dimension).cyan());
    println!();

    println!("{}", style("Chunking:").bold().yellow());
    println!("  Strategy: {}", style(config.chunking.strategy).cyan());
    println!("  Chunk size: {}", style(config.chunking.chunk_size).cyan());
    println!("  Overlap: {}", style(config.chunking.chunk_overlap).cyan());
    println!();

    println!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
}

/// Write the current configuration to disk, creating the directory if needed.
#[inline]
pub fn init_config(config: &Config) -> Result<()> {
    config.save()?;
    println!(
        "{} {}",
        style("✓ Configuration saved to").green(),
        style(config.config_file_path().display()).cyan()
    );
    Ok(())
}

/// Chunk one file and print a per-chunk summary without touching any service.
#[inline]
pub fn chunk_file(config: &Config, path: &Path) -> Result<()> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = document_name(path);

    let report = crate::chunking::chunk_text(&content, "preview", &name, &config.chunking)?;

    println!(
        "{} {} chunks from {} chars ({} strategy, {:?})",
        style("✓").green(),
        report.chunks.len(),
        report.original_length,
        report.strategy,
        report.processing_time
    );
    for chunk in &report.chunks {
        let preview: String = chunk.content.chars().take(60).collect();
        println!(
            "  [{}] {} chars, ~{} tokens, {}: {}",
            chunk.metadata.chunk_index,
            chunk.char_count,
            chunk.token_estimate,
            chunk.metadata.content_type,
            style(preview.replace('\n', " ")).dim()
        );
    }
    Ok(())
}

/// Ingest files into an in-process store and report per-document outcomes.
pub async fn index_documents(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = build_pipeline(config, Arc::clone(&store))?;
    let sources = read_documents(paths)?;

    let bar = progress_bar(sources.len() as u64);
    for source in &sources {
        bar.set_message(source.name.clone());
        match pipeline.ingest_document(source).await {
            Ok(report) => println!(
                "{} {}: {} chunks, {} embedded, {} failed",
                style("✓").green(),
                source.name,
                report.chunk_count,
                report.embedded_count,
                report.failed_count
            ),
            Err(e) => println!("{} {}: {}", style("✗").red(), source.name, e),
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    let cache = pipeline.cache_stats();
    info!(
        "Embedding cache: {} entries, {} hits, {} misses",
        cache.entries, cache.hits, cache.misses
    );
    Ok(())
}

/// Ingest files, then run a similarity search against them.
pub async fn search_documents(
    config: &Config,
    paths: &[PathBuf],
    query: &str,
    match_threshold: f32,
    match_count: usize,
) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = build_pipeline(config, Arc::clone(&store))?;
    ingest_all(&mut pipeline, paths).await?;

    let hits = pipeline.search(query, match_threshold, match_count).await?;
    if hits.is_empty() {
        println!("{}", style("No matches above the similarity threshold.").yellow());
        return Ok(());
    }

    for hit in hits {
        println!(
            "{} {} ({:.3})",
            style("→").cyan(),
            style(&hit.document_name).bold(),
            hit.similarity
        );
        let preview: String = hit.content.chars().take(200).collect();
        println!("  {}", style(preview.replace('\n', " ")).dim());
    }
    Ok(())
}

/// Ingest files and extract entities and relationships from them.
pub async fn extract_documents(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = build_pipeline(config, Arc::clone(&store))?;
    let item_ids = ingest_all(&mut pipeline, paths).await?;

    for item_id in &item_ids {
        let report = pipeline.extract_knowledge(item_id).await?;
        println!(
            "{} item {}: {} entities, {} relationships ({} dropped), {} tokens",
            style("✓").green(),
            item_id,
            report.entities.len(),
            report.relationships.len(),
            report.dropped_relationships,
            report.tokens_used
        );
        for entity in &report.entities {
            println!(
                "  [{}] {} ({:.2})",
                style(entity.entity_type()).cyan(),
                entity.name,
                entity.confidence
            );
        }
    }
    Ok(())
}

/// Ingest files, extract knowledge, build the workspace graph, and export it.
pub async fn export_graph(
    config: &Config,
    paths: &[PathBuf],
    format: GraphFormat,
    output: Option<&Path>,
) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = build_pipeline(config, Arc::clone(&store))?;
    let item_ids = ingest_all(&mut pipeline, paths).await?;

    for item_id in &item_ids {
        pipeline.extract_knowledge(item_id).await?;
    }

    let builder = GraphBuilder::new(Arc::clone(&store) as Arc<dyn KnowledgeStore>);
    let graph = builder
        .build(&config.service.workspace, &GraphOptions::default())
        .await?;

    println!(
        "{} graph: {} nodes, {} edges",
        style("✓").green(),
        graph.metadata.node_count,
        graph.metadata.edge_count
    );

    let rendered = render_graph(&graph, format)?;
    match output {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote graph to {}", style(path.display()).cyan());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn render_graph(graph: &KnowledgeGraph, format: GraphFormat) -> Result<String> {
    Ok(match format {
        GraphFormat::Dot => to_dot(graph),
        GraphFormat::Graphml => to_graphml(graph),
        GraphFormat::Cytoscape => {
            serde_json::to_string_pretty(&to_cytoscape(graph)).context("Failed to render JSON")?
        }
    })
}

fn document_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn read_documents(paths: &[PathBuf]) -> Result<Vec<DocumentSource>> {
    paths
        .iter()
        .map(|path| {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(DocumentSource {
                name: document_name(path),
                content,
            })
        })
        .collect()
}

async fn ingest_all(pipeline: &mut IngestionPipeline, paths: &[PathBuf]) -> Result<Vec<String>> {
    let sources = read_documents(paths)?;
    let mut item_ids = Vec::with_capacity(sources.len());
    for result in pipeline.ingest_documents(&sources).await {
        item_ids.push(result?.item_id);
    }
    Ok(item_ids)
}

fn progress_bar(len: u64) -> ProgressBar {
    if console::user_attended_stderr() {
        ProgressBar::new(len).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] Indexing {msg}")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    }
}

/// Build the full pipeline against live service clients.
fn build_pipeline(config: &Config, store: Arc<MemoryStore>) -> Result<IngestionPipeline> {
    let api_key = config.api_key().with_context(|| {
        format!(
            "API key environment variable '{}' is not set",
            config.service.api_key_env
        )
    })?;
    let base_url = config.service.service_url()?;
    let timeout = config.request_timeout();

    let provider =
        OpenAiEmbeddingClient::new(base_url.clone(), api_key.clone(), timeout)?;
    let model: Arc<dyn LanguageModel> = Arc::new(OpenAiChatClient::new(
        base_url,
        api_key,
        config.service.chat_model.clone(),
        timeout,
    )?);

    let generator = EmbeddingGenerator::new(Arc::new(provider), config.embedding.clone());
    let entity_extractor = EntityExtractor::new(Arc::clone(&model), config.extraction.clone());
    let relationship_extractor =
        RelationshipExtractor::new(model, config.relationships.clone());

    Ok(IngestionPipeline::new(
        store as Arc<dyn KnowledgeStore>,
        generator,
        entity_extractor,
        relationship_extractor,
        config.chunking.clone(),
        config.service.workspace.clone(),
    ))
}
