//! # dochat CLI
//!
//! The `dochat` binary drives the document Q&A service: database setup,
//! document ingestion, question answering, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! dochat --config ./config/dochat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dochat init` | Create the SQLite database and run schema migrations |
//! | `dochat ingest <path>` | Extract, structure, and index one file |
//! | `dochat ask "<question>"` | Answer a question from indexed documents |
//! | `dochat documents` | List indexed documents |
//! | `dochat history` | Show chat history |
//! | `dochat serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! dochat init --config ./config/dochat.toml
//!
//! # Ingest a file for a user
//! dochat ingest ./lease.pdf --owner alice@example.com
//!
//! # Ask a question
//! dochat ask "how much is the rent?" --owner alice@example.com
//!
//! # Start the HTTP API
//! dochat serve --config ./config/dochat.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use dochat::answer;
use dochat::chat;
use dochat::config;
use dochat::db;
use dochat::documents;
use dochat::embedding::HttpEmbedder;
use dochat::llm::GenerativeClient;
use dochat::migrate;
use dochat::pipeline;
use dochat::server;

/// dochat — a personal document Q&A service.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dochat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dochat",
    about = "dochat — chat with your documents",
    version,
    long_about = "dochat ingests personal documents (PDF, DOCX, plain text, scanned images), \
    structures them with an LLM, indexes them per user in a local vector store, and answers \
    questions grounded strictly in the retrieved content."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dochat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Ingest one file: extract text, structure it, and index its chunks.
    Ingest {
        /// Path to the file (.pdf, .docx, .txt, or an image).
        path: PathBuf,

        /// Owner identity the document is indexed under.
        #[arg(long)]
        owner: String,

        /// Optional URL of the original image, stored in chunk metadata.
        #[arg(long)]
        image_url: Option<String>,
    },

    /// Answer a question from the owner's indexed documents.
    ///
    /// Use `@filename` in the question to restrict retrieval to specific
    /// documents.
    Ask {
        /// The question.
        query: String,

        /// Owner identity whose documents are searched.
        #[arg(long)]
        owner: String,
    },

    /// List an owner's indexed documents.
    Documents {
        #[arg(long)]
        owner: String,
    },

    /// Show an owner's chat history, newest first.
    History {
        #[arg(long)]
        owner: String,

        /// Delete the history instead of printing it.
        #[arg(long)]
        clear: bool,
    },

    /// Start the HTTP server.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dochat=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            owner,
            image_url,
        } => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;

            let chat_model = GenerativeClient::for_owner(&pool, &cfg.llm, &owner).await?;
            let embedder = HttpEmbedder::new(&cfg.embedding)?;

            let doc_id = pipeline::ingest_file(
                &pool,
                &cfg,
                &chat_model,
                &embedder,
                &path,
                &owner,
                image_url.as_deref(),
            )
            .await?;
            println!("Ingested {} as document {}", path.display(), doc_id);
        }
        Commands::Ask { query, owner } => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;

            let chat_model = GenerativeClient::for_owner(&pool, &cfg.llm, &owner).await?;
            let embedder = HttpEmbedder::new(&cfg.embedding)?;

            let response =
                answer::generate_answer(&pool, &cfg, &chat_model, &embedder, &query, &owner)
                    .await?;

            println!("{}\n", response.answer);
            if !response.ranked_documents.is_empty() {
                println!("Sources:");
                for source in &response.ranked_documents {
                    match &source.document_url {
                        Some(url) => println!("  {}. {} ({})", source.rank, source.document_id, url),
                        None => println!("  {}. {}", source.rank, source.document_id),
                    }
                }
            }
        }
        Commands::Documents { owner } => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;

            let docs = documents::list(&pool, &owner).await?;
            if docs.is_empty() {
                println!("No documents.");
            }
            for doc in docs {
                println!(
                    "{}  {}  [{}]  {}",
                    doc.id, doc.file_name, doc.document_type, doc.created_at
                );
            }
        }
        Commands::History { owner, clear } => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;

            if clear {
                let removed = chat::clear(&pool, &owner).await?;
                println!("Deleted {} entries.", removed);
            } else {
                let entries = chat::list(&pool, &owner).await?;
                if entries.is_empty() {
                    println!("No history.");
                }
                for entry in entries {
                    println!("[{}] Q: {}", entry.created_at, entry.question);
                    println!("       A: {}\n", entry.answer);
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
