//! Engram CLI — episodic knowledge graph engine over your notes.
//!
//! Usage:
//!   engram ingest --text "Met with Sarah to discuss FAISS #project/alpha"
//!   engram query "what did I discuss with Sarah?" --natural
//!   engram cluster --resolution 1.0
//!   engram stats

use clap::{Parser, Subcommand};
use engram::{Engram, EngramConfig, HttpLlm, QueryFilters};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "engram", version, about = "Episodic knowledge graph engine for free-form notes")]
struct Cli {
    /// Path to the SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory for note markdown files
    #[arg(long, global = true)]
    notes_dir: Option<PathBuf>,

    /// Base URL of the LLM provider
    #[arg(long, global = true)]
    llm_url: Option<String>,

    /// Model name passed to the provider
    #[arg(long, global = true)]
    llm_model: Option<String>,

    /// Verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a note (from --text or stdin)
    Ingest {
        /// Note text; reads stdin when omitted
        #[arg(long)]
        text: Option<String>,
        /// Write a placeholder now and enrich in the background
        #[arg(long)]
        background: bool,
    },
    /// Search the graph
    Query {
        /// The search query
        query: String,
        /// Maximum results
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Extract filters from the query via the LLM first
        #[arg(long)]
        natural: bool,
        /// Filter by task status (todo, in_progress, done)
        #[arg(long)]
        status: Option<String>,
    },
    /// Recompute clusters and summaries
    Cluster {
        /// Community detection resolution (higher = more clusters)
        #[arg(long)]
        resolution: Option<f64>,
    },
    /// Create LLM-judged typed links (related/spawned/references/
    /// contradicts) for today's notes, or one note
    Consolidate {
        /// Consolidate a single note by id instead of today's notes
        #[arg(long)]
        note_id: Option<String>,
    },
    /// Retry embeddings for notes stored without one
    Reembed,
    /// Show LLM operation statistics
    Stats,
}

fn build_config(cli: &Cli) -> EngramConfig {
    let mut config = EngramConfig::default();
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(dir) = &cli.notes_dir {
        config.notes_dir = dir.clone();
    }
    if let Some(url) = &cli.llm_url {
        config.llm_endpoint = url.clone();
    }
    if let Some(model) = &cli.llm_model {
        config.llm_model = model.clone();
    }
    config
}

async fn run(cli: Cli) -> engram::EngineResult<()> {
    let config = build_config(&cli);

    let client = Arc::new(
        HttpLlm::new(config.llm_endpoint.clone(), config.llm_model.clone())
            .map_err(engram::EngineError::Provider)?,
    );

    #[cfg(feature = "embeddings")]
    let embedder: Arc<dyn engram::Embedder> = Arc::new(
        engram::FastEmbedder::default_model().map_err(engram::EngineError::Embedding)?,
    );
    #[cfg(not(feature = "embeddings"))]
    let embedder: Arc<dyn engram::Embedder> = Arc::new(engram::HashEmbedder::new());

    let engine = Engram::init(config, client, embedder)?;

    match cli.command {
        Commands::Ingest { text, background } => {
            let text = match text {
                Some(text) => text,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin().read_to_string(&mut buffer)?;
                    buffer
                }
            };
            let text = text.trim();
            if text.is_empty() {
                return Err(engram::EngineError::Config("empty note text".to_string()));
            }
            let outcome = if background {
                engine.ingest_background(text, None).await?
            } else {
                engine.ingest(text, None).await?
            };
            println!(
                "{}",
                serde_json::json!({
                    "note_id": outcome.note_id,
                    "title": outcome.title,
                    "path": outcome.path,
                    "episodic": {
                        "who": outcome.episodic.who,
                        "what": outcome.episodic.what,
                        "where": outcome.episodic.where_,
                        "when": outcome.episodic.when,
                        "tags": outcome.episodic.tags,
                    },
                })
            );
        }
        Commands::Query {
            query,
            limit,
            natural,
            status,
        } => {
            let hits = if natural {
                engine.query_natural(&query, limit).await?
            } else {
                let filters = QueryFilters {
                    status,
                    ..Default::default()
                };
                engine.query(&query, limit, &filters).await?
            };
            println!("{}", serde_json::to_string_pretty(&hits).unwrap_or_default());
        }
        Commands::Cluster { resolution } => {
            let report = engine.run_clustering(resolution).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).unwrap_or_default()
            );
        }
        Commands::Consolidate { note_id } => match note_id {
            Some(id) => {
                let outcome = engine
                    .consolidate_note(&engram::NoteId::from(id))
                    .await?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&outcome).unwrap_or_default()
                );
            }
            None => {
                let report = engine.consolidate_today(None).await?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).unwrap_or_default()
                );
            }
        },
        Commands::Reembed => {
            let repaired = engine.retry_missing_embeddings().await?;
            println!("{}", serde_json::json!({ "repaired": repaired }));
        }
        Commands::Stats => {
            let stats = engine.audit_stats()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&stats).unwrap_or_default()
            );
        }
    }

    engine.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli).await {
        eprintln!("error: {}", err);
        std::process::exit(err.exit_code());
    }
}
