//! # procpilot CLI
//!
//! Command-line interface for the process-document engine.
//!
//! ## Usage
//!
//! ```bash
//! procpilot --config ./config/procpilot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `procpilot init` | Create the SQLite database and run schema migrations |
//! | `procpilot index <file>` | Index a document from a JSON file |
//! | `procpilot search "<query>"` | Run the tiered search and print results |
//! | `procpilot ask "<query>"` | Generate a grounded answer for a question |
//! | `procpilot serve` | Start the HTTP chat/search server |
//!
//! ## Examples
//!
//! ```bash
//! procpilot init --config ./config/procpilot.toml
//! procpilot index ./docs/onboarding.json --config ./config/procpilot.toml
//! procpilot search "customer onboarding" --tenant acme --role admin
//! procpilot ask "how do I onboard a customer?" --tenant acme --user ana@acme.io
//! procpilot serve --config ./config/procpilot.toml
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use procpilot::config;
use procpilot::db;
use procpilot::embedding::Embedder;
use procpilot::models::NewDocument;
use procpilot::store::DocumentStore;
use procpilot::{answer, completion, embedding, indexer, migrate, search, server};

/// procpilot — a retrieval and guided-execution engine for process
/// documents.
#[derive(Parser)]
#[command(
    name = "procpilot",
    about = "procpilot — retrieval and guided execution for process documents",
    version,
    long_about = "procpilot stores procedural documents, ranks them with a hybrid \
    multi-tier search, answers questions strictly from retrieved context, and can \
    walk a user through a document step by step."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/procpilot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent.
    Init,

    /// Index a document from a JSON file.
    ///
    /// The file holds `{tenantId, title, content, tags?, assignedTo?, id?}`.
    /// Oversized content is chunked and each chunk embedded individually.
    Index {
        /// Path to the document JSON file.
        file: PathBuf,
    },

    /// Run the tiered search and print ranked results.
    Search {
        /// The search query string.
        query: String,

        /// Tenant whose documents are searched.
        #[arg(long)]
        tenant: String,

        /// Acting user (email), used for assignment scoping.
        #[arg(long, default_value = "")]
        user: String,

        /// Caller role; "admin" sees all tenant documents.
        #[arg(long, default_value = "admin")]
        role: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Generate a grounded answer for a question.
    Ask {
        /// The question.
        query: String,

        #[arg(long)]
        tenant: String,

        #[arg(long, default_value = "")]
        user: String,

        #[arg(long, default_value = "admin")]
        role: String,
    },

    /// Start the HTTP chat/search server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Index { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read document file: {}", file.display()))?;
            let input: NewDocument =
                serde_json::from_str(&content).with_context(|| "Failed to parse document JSON")?;

            let pool = db::connect(&cfg.db.path).await?;
            let store = DocumentStore::new(pool);
            let embedder = Embedder::new(
                embedding::create_provider(&cfg.embedding)?,
                &cfg.embedding,
            );

            let doc = indexer::index_document(&store, &embedder, &cfg.chunking, input).await?;
            match doc.chunk_count {
                Some(parts) => println!("Indexed \"{}\" as {} chunks (id: {})", doc.title, parts, doc.id),
                None => println!("Indexed \"{}\" (id: {})", doc.title, doc.id),
            }
            store.pool().close().await;
        }
        Commands::Search {
            query,
            tenant,
            user,
            role,
            limit,
        } => {
            let pool = db::connect(&cfg.db.path).await?;
            let store = DocumentStore::new(pool);
            let embedder = Embedder::new(
                embedding::create_provider(&cfg.embedding)?,
                &cfg.embedding,
            );

            let results = search::search_documents(
                &store,
                &embedder,
                &query,
                &tenant,
                &user,
                &role,
                limit.unwrap_or(cfg.retrieval.limit),
            )
            .await?;

            if results.is_empty() {
                println!("No results.");
            } else {
                for (i, result) in results.iter().enumerate() {
                    println!(
                        "{}. [{:.2}] {} ({:?})",
                        i + 1,
                        result.relevance_score,
                        result.title,
                        result.tier
                    );
                    println!(
                        "    excerpt: \"{}\"",
                        answer::preview(&result.content, 120).replace('\n', " ")
                    );
                    println!("    id: {}", result.id);
                    println!();
                }
            }
            store.pool().close().await;
        }
        Commands::Ask {
            query,
            tenant,
            user,
            role,
        } => {
            let pool = db::connect(&cfg.db.path).await?;
            let store = DocumentStore::new(pool);
            let embedder = Embedder::new(
                embedding::create_provider(&cfg.embedding)?,
                &cfg.embedding,
            );
            let completion: Arc<dyn completion::CompletionProvider> =
                Arc::from(completion::create_provider(&cfg.completion)?);

            let result = answer::generate_answer(
                &store,
                &embedder,
                completion.as_ref(),
                &cfg,
                &query,
                &tenant,
                &user,
                &role,
                &[],
            )
            .await?;

            println!("{}", result.text);
            if !result.sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &result.sources {
                    println!("  - {} [{:.2}]", source.title, source.relevance_score);
                }
            }
            store.pool().close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
