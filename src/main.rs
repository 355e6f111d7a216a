use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use kbgraph::commands::{
    GraphFormat, chunk_file, export_graph, extract_documents, index_documents, init_config,
    search_documents, show_config,
};
use kbgraph::config::Config;

#[derive(Parser)]
#[command(name = "kbgraph")]
#[command(about = "A knowledge base construction and retrieval engine")]
#[command(version)]
struct Cli {
    /// Override the configuration directory
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or initialize the configuration
    Config {
        /// Write the default configuration to disk
        #[arg(long)]
        init: bool,
    },
    /// Chunk a file and print the resulting chunks
    Chunk {
        /// File to chunk
        file: PathBuf,
    },
    /// Ingest documents: chunk, embed, and store them
    Index {
        /// Files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Ingest documents and run a similarity search against them
    Search {
        /// Query text
        query: String,
        /// Files to ingest before searching
        #[arg(long, required = true)]
        files: Vec<PathBuf>,
        /// Minimum cosine similarity for a match
        #[arg(long, default_value_t = 0.3)]
        threshold: f32,
        /// Maximum number of matches
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Ingest documents and extract entities and relationships
    Extract {
        /// Files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Ingest documents, build the knowledge graph, and export it
    Graph {
        /// Files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Export format
        #[arg(long, value_enum, default_value_t = GraphFormat::Dot)]
        format: GraphFormat,
        /// Write the export here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::default_dir()?,
    };
    let config = Config::load(&config_dir)?;

    match cli.command {
        Commands::Config { init } => {
            if init {
                init_config(&config)?;
            } else {
                show_config(&config);
            }
        }
        Commands::Chunk { file } => {
            chunk_file(&config, &file)?;
        }
        Commands::Index { files } => {
            index_documents(&config, &files).await?;
        }
        Commands::Search {
            query,
            files,
            threshold,
            limit,
        } => {
            search_documents(&config, &files, &query, threshold, limit).await?;
        }
        Commands::Extract { files } => {
            extract_documents(&config, &files).await?;
        }
        Commands::Graph {
            files,
            format,
            output,
        } => {
            export_graph(&config, &files, format, output.as_deref()).await?;
        }
    }

    Ok(())
}
