//! # Docstream CLI (`dsctl`)
//!
//! The `dsctl` binary drives the ingestion and retrieval pipeline from the
//! command line.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dsctl init` | Create the SQLite database and run schema migrations |
//! | `dsctl import <file>` | Import a document and process it to completion |
//! | `dsctl status <doc-id>` | Show a document's processing status |
//! | `dsctl list` | List an owner's documents |
//! | `dsctl query "<text>"` | Retrieve the most relevant chunks |
//! | `dsctl delete <doc-id>` | Remove a document, its object, and its vectors |
//! | `dsctl worker` | Run the queue-polling worker pool |
//!
//! ## Examples
//!
//! ```bash
//! dsctl init --config ./docstream.toml
//! dsctl import report.pdf --owner u1 --name "Q3 report"
//! dsctl query "revenue forecast" --owner u1 --top-k 3
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use docstream::config::{load_config, Config};
use docstream::embedding::create_client;
use docstream::extract::DefaultExtractor;
use docstream::idempotency::IdempotencyRegister;
use docstream::import::ImportService;
use docstream::index::create_index;
use docstream::models::DocumentStatus;
use docstream::object_store::FsObjectStore;
use docstream::process::Processor;
use docstream::queue::InProcessQueue;
use docstream::retrieve::{Query, RetrievalEngine};
use docstream::store::DocumentStore;
use docstream::{db, migrate};

/// Docstream CLI — queue-driven document ingestion and semantic retrieval.
#[derive(Parser)]
#[command(
    name = "dsctl",
    about = "Docstream — queue-driven document ingestion and semantic retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./docstream.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Import a document and process it to completion.
    Import {
        /// File to import (txt, md, pdf, docx).
        file: PathBuf,

        /// Owner of the document; also the retrieval namespace.
        #[arg(long)]
        owner: String,

        /// Display name. Defaults to the filename.
        #[arg(long)]
        name: Option<String>,

        /// Client idempotency token. Repeating an import with the same
        /// token and bytes returns the original document.
        #[arg(long)]
        token: Option<String>,
    },

    /// Show a document's processing status.
    Status {
        doc_id: String,
        #[arg(long)]
        owner: String,
    },

    /// List an owner's documents.
    List {
        #[arg(long)]
        owner: String,
    },

    /// Retrieve the chunks most relevant to a query.
    Query {
        text: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        threshold: Option<f64>,
        /// Restrict results to one document.
        #[arg(long)]
        doc: Option<String>,
    },

    /// Remove a document, its stored object, and its vectors.
    Delete {
        doc_id: String,
        #[arg(long)]
        owner: String,
    },

    /// Run the queue-polling worker pool until interrupted.
    Worker,
}

/// Everything the commands need, wired from config.
struct Pipeline {
    config: Config,
    store: DocumentStore,
    queue: Arc<InProcessQueue>,
    imports: ImportService,
    processor: Arc<Processor>,
    retrieval: RetrievalEngine,
}

impl Pipeline {
    async fn build(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;
        let store = DocumentStore::new(pool);

        let objects = Arc::new(FsObjectStore::new(config.object_store.root.clone()));
        let queue = Arc::new(InProcessQueue::new(Duration::from_secs(
            config.processing.visibility_timeout_secs,
        )));
        let embedder: Arc<dyn docstream::embedding::EmbeddingClient> =
            create_client(&config.embedding)?.into();
        let index: Arc<dyn docstream::index::VectorIndex> = create_index(&config.index)?.into();
        let extractor = Arc::new(DefaultExtractor::new(config.processing.max_file_bytes));

        let imports = ImportService::new(
            store.clone(),
            objects.clone(),
            queue.clone(),
            index.clone(),
            config.processing.max_file_bytes,
        );
        let processor = Arc::new(Processor::new(
            &config,
            store.clone(),
            objects,
            extractor,
            embedder.clone(),
            index.clone(),
            queue.clone(),
        ));
        let retrieval = RetrievalEngine::new(
            embedder,
            index,
            config.retrieval.top_k,
            config.retrieval.score_threshold,
        );

        Ok(Self {
            config,
            store,
            queue,
            imports,
            processor,
            retrieval,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docstream=info".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized at {}", config.db.path.display());
        }
        Commands::Import {
            file,
            owner,
            name,
            token,
        } => {
            let pipeline = Pipeline::build(config).await?;
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("File has no usable name")?;
            let name = name.as_deref().unwrap_or(filename);

            let receipt = match token {
                Some(token) => {
                    let register = IdempotencyRegister::new(Duration::from_secs(
                        pipeline.config.idempotency.ttl_secs,
                    ));
                    pipeline
                        .imports
                        .import_idempotent(&register, &token, &owner, name, filename, &bytes)
                        .await?
                }
                None => pipeline.imports.import(&owner, name, filename, &bytes).await?,
            };
            println!("Imported {} as document {}", filename, receipt.doc_id);

            // single-node pipeline: process inline, waiting out retry delays
            loop {
                pipeline.processor.drain().await?;
                let status = pipeline
                    .imports
                    .status(&owner, &receipt.doc_id)
                    .await?
                    .unwrap_or(DocumentStatus::Failed);
                if status.is_terminal() {
                    println!("Status: {}", status.as_str());
                    break;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
        Commands::Status { doc_id, owner } => {
            let pipeline = Pipeline::build(config).await?;
            match pipeline.imports.status(&owner, &doc_id).await? {
                Some(status) => println!("{}", status.as_str()),
                None => println!("not_found"),
            }
        }
        Commands::List { owner } => {
            let pipeline = Pipeline::build(config).await?;
            let docs = pipeline.store.list_for_owner(&owner).await?;
            if docs.is_empty() {
                println!("No documents for owner {}", owner);
            }
            for doc in docs {
                println!(
                    "{}  {:<10}  {:>8} bytes  {}",
                    doc.id,
                    doc.status.as_str(),
                    doc.size_bytes,
                    doc.name
                );
            }
        }
        Commands::Query {
            text,
            owner,
            top_k,
            threshold,
            doc,
        } => {
            let pipeline = Pipeline::build(config).await?;
            let mut query = Query::new(&owner, &text);
            query.top_k = top_k;
            query.score_threshold = threshold;
            query.doc_id = doc;

            let chunks = pipeline.retrieval.retrieve(&query).await?;
            if chunks.is_empty() {
                println!("No matching chunks.");
            }
            for chunk in chunks {
                println!("[{:.3}] {} (chunk {})", chunk.score, chunk.vector_id, chunk.chunk_index);
                println!("  {}", chunk.text);
            }
        }
        Commands::Delete { doc_id, owner } => {
            let pipeline = Pipeline::build(config).await?;
            pipeline.imports.delete(&owner, &doc_id).await?;
            println!("Deleted {}", doc_id);
        }
        Commands::Worker => {
            let pipeline = Pipeline::build(config).await?;
            let workers = pipeline.config.processing.workers;
            println!(
                "Running {} workers (queue depth {})",
                workers,
                pipeline.queue.len()
            );
            pipeline.processor.run(workers).await?;
        }
    }

    Ok(())
}
