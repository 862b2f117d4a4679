//! # Echodex CLI (`edx`)
//!
//! The `edx` binary runs the API server and provides local commands for
//! database initialization, indexing, search, and repository management.
//!
//! ## Usage
//!
//! ```bash
//! edx --config ./config/echodex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `edx init` | Create the SQLite database and run schema migrations |
//! | `edx serve` | Start the HTTP API server |
//! | `edx index <root>` | Index a repository from the command line |
//! | `edx search "<query>"` | Search indexed code |
//! | `edx repos list` | List active repositories |
//! | `edx repos remove <id>` | Soft-delete a repository |
//! | `edx token <user>` | Mint a development bearer token |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use echodex::auth::sign_token;
use echodex::config::{load_config, Config};
use echodex::indexer::index_repository;
use echodex::models::IndexMode;
use echodex::search::search_chunks;
use echodex::server::{build_state, run_server};

#[derive(Parser)]
#[command(
    name = "edx",
    about = "Echodex — voice-driven code retrieval and meeting advisor backend",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/echodex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Start the HTTP API server.
    Serve,

    /// Index a repository from the command line.
    Index {
        /// Repository root path (must be inside the configured sandbox).
        root: String,

        /// Indexing mode.
        #[arg(long, value_enum, default_value = "full")]
        mode: IndexMode,

        /// User to index as.
        #[arg(long, default_value = "local")]
        user: String,

        /// File list (manual mode) or glob patterns (guided mode).
        #[arg(long = "select")]
        selection: Vec<String>,
    },

    /// Search indexed code.
    Search {
        /// The search query string.
        query: String,

        /// User to search as.
        #[arg(long, default_value = "local")]
        user: String,

        /// Maximum number of results.
        #[arg(long)]
        top_k: Option<i64>,

        /// Restrict results to one repository.
        #[arg(long)]
        repo: Option<String>,
    },

    /// Manage registered repositories.
    Repos {
        #[command(subcommand)]
        action: ReposAction,
    },

    /// Mint a development bearer token (requires a configured secret).
    Token {
        /// Subject claim for the token.
        user: String,

        /// Token lifetime in seconds.
        #[arg(long, default_value_t = 3600)]
        ttl: i64,
    },
}

#[derive(Subcommand)]
enum ReposAction {
    /// List active repositories for a user.
    List {
        #[arg(long, default_value = "local")]
        user: String,
    },
    /// Soft-delete a repository. Its chunks stop appearing in search
    /// results immediately.
    Remove {
        repo_id: String,
        #[arg(long, default_value = "local")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("echodex=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = echodex::db::connect(&config.db.path).await?;
            echodex::migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            run_server(&config).await?;
        }
        Commands::Index {
            root,
            mode,
            user,
            selection,
        } => {
            run_index(&config, &root, mode, &user, &selection).await?;
        }
        Commands::Search {
            query,
            user,
            top_k,
            repo,
        } => {
            run_search(&config, &query, &user, top_k, repo.as_deref()).await?;
        }
        Commands::Repos { action } => match action {
            ReposAction::List { user } => {
                let state = build_state(&config).await?;
                let repos = state.registry.list_active(&user).await?;
                if repos.is_empty() {
                    println!("No active repositories.");
                }
                for repo in repos {
                    let last = repo
                        .last_indexed_at
                        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "never".to_string());
                    println!(
                        "{}  {}  mode={}  last indexed: {}",
                        repo.repo_id,
                        repo.root_path,
                        repo.mode.as_str(),
                        last
                    );
                }
            }
            ReposAction::Remove { repo_id, user } => {
                let state = build_state(&config).await?;
                if state.registry.deactivate(&user, &repo_id).await? {
                    println!("Removed repository {repo_id}.");
                } else {
                    anyhow::bail!("no active repository with id: {repo_id}");
                }
            }
        },
        Commands::Token { user, ttl } => {
            let secret = config
                .auth
                .resolve_secret()
                .ok_or_else(|| anyhow::anyhow!("no signing secret configured; set ECHODEX_JWT_SECRET"))?;
            println!("{}", sign_token(&user, ttl, &secret)?);
        }
    }

    Ok(())
}

async fn run_index(
    config: &Config,
    root: &str,
    mode: IndexMode,
    user: &str,
    selection: &[String],
) -> Result<()> {
    let state = build_state(config).await?;

    let outcome = index_repository(
        config,
        &state.sandbox,
        &state.registry,
        state.index.as_ref(),
        state.embedder.as_ref(),
        user,
        root,
        mode,
        selection,
    )
    .await
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    println!("index {root}");
    println!("  repository: {}", outcome.repo_id);
    println!("  files indexed: {}", outcome.report.files_indexed);
    println!("  chunks written: {}", outcome.report.chunks_written);
    println!("  skipped: {}", outcome.report.skipped.len());
    for skip in &outcome.report.skipped {
        println!("    {} ({:?})", skip.path, skip.reason);
    }
    println!("ok");

    Ok(())
}

async fn run_search(
    config: &Config,
    query: &str,
    user: &str,
    top_k: Option<i64>,
    repo: Option<&str>,
) -> Result<()> {
    let state = build_state(config).await?;

    let hits = search_chunks(
        config,
        &state.registry,
        state.index.as_ref(),
        state.embedder.as_ref(),
        user,
        query,
        top_k,
        repo,
    )
    .await
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.2}] {}:{}-{}",
            i + 1,
            hit.score,
            hit.file_path,
            hit.start_line,
            hit.end_line
        );
        let excerpt: String = hit.snippet.lines().take(2).collect::<Vec<_>>().join(" ");
        println!("    excerpt: \"{}\"", excerpt.trim());
        println!();
    }

    Ok(())
}
