//! # codeshot CLI
//!
//! Thin command-line front end over the library. Results go to stdout as
//! JSON; logs go to stderr (filter with `RUST_LOG`).
//!
//! ## Usage
//!
//! ```bash
//! codeshot --config ./config/codeshot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `codeshot init` | Create the SQLite database and run schema migrations |
//! | `codeshot register <id>` | Record a repository and its project summary |
//! | `codeshot generate <id>` | Select, score and render snapshots |
//! | `codeshot list <id>` | Show fresh snapshots |
//! | `codeshot invalidate <id> --sha <sha>` | Mark snapshots from older commits stale |
//! | `codeshot delete <snapshot>` | Delete one snapshot and its image |
//!
//! `generate` reads the repository host token from `GITHUB_TOKEN`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use codeshot::cache::SqliteCache;
use codeshot::config::{self, Config};
use codeshot::github::GithubSource;
use codeshot::invalidate::invalidate_on_new_commit;
use codeshot::models::{GenerateOptions, Repository};
use codeshot::openai::create_scorer;
use codeshot::pipeline::{Collaborators, SnapshotPipeline};
use codeshot::render::{FsObjectStorage, HttpRenderer};
use codeshot::sqlite_store::SqliteStore;
use codeshot::{db, migrate};

/// Code snapshot generator.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/codeshot.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "codeshot",
    about = "Select, score and render the most interesting code in a repository",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/codeshot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Record a repository and, optionally, a new project summary.
    Register {
        repository_id: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        /// Owning user.
        #[arg(long)]
        user: String,
        #[arg(long)]
        description: Option<String>,
        /// Primary language, when known.
        #[arg(long)]
        language: Option<String>,
        /// Project summary text from a prior analysis.
        #[arg(long)]
        summary: Option<String>,
    },

    /// Generate snapshots, or return the fresh ones that already exist.
    Generate {
        repository_id: String,
        #[arg(long)]
        user: String,
        /// Ignore existing snapshots and rerun the whole pipeline.
        #[arg(long)]
        force: bool,
        #[arg(long)]
        max_snippets: Option<usize>,
        #[arg(long)]
        theme: Option<String>,
        #[arg(long)]
        no_line_numbers: bool,
        #[arg(long)]
        font_size: Option<u32>,
    },

    /// List fresh snapshots, best first.
    List {
        repository_id: String,
        #[arg(long)]
        user: String,
    },

    /// Mark snapshots stale after the repository moved to a new head commit.
    Invalidate {
        repository_id: String,
        /// New head commit SHA.
        #[arg(long)]
        sha: String,
    },

    /// Delete a snapshot and its stored image.
    Delete {
        snapshot_id: String,
        #[arg(long)]
        user: String,
    },
}

#[derive(Serialize)]
struct InvalidateReport<'a> {
    repository_id: &'a str,
    new_head_sha: &'a str,
    marked_stale: u64,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let pool = db::connect(cfg).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

fn build_pipeline(cfg: &Config, store: Arc<SqliteStore>) -> anyhow::Result<SnapshotPipeline> {
    let deps = Collaborators {
        catalog: store.clone(),
        source: Arc::new(GithubSource::new(&cfg.github)?),
        scorer: Arc::from(create_scorer(&cfg.scorer)?),
        cache: Arc::new(SqliteCache::new(store.pool().clone())),
        store,
        renderer: Arc::new(HttpRenderer::new(&cfg.renderer)?),
        storage: Arc::new(FsObjectStorage::new(&cfg.storage)),
    };
    SnapshotPipeline::new(cfg, deps)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Register {
            repository_id,
            owner,
            name,
            user,
            description,
            language,
            summary,
        } => {
            let store = open_store(&cfg).await?;
            store
                .upsert_repository(&Repository {
                    id: repository_id.clone(),
                    owner,
                    name,
                    user_id: user,
                    description,
                    language,
                })
                .await?;
            if let Some(text) = summary {
                let summary = store.add_summary(&repository_id, &text).await?;
                eprintln!("Recorded summary {}", summary.id);
            }
            eprintln!("Registered repository {}", repository_id);
        }
        Commands::Generate {
            repository_id,
            user,
            force,
            max_snippets,
            theme,
            no_line_numbers,
            font_size,
        } => {
            let token = std::env::var("GITHUB_TOKEN").unwrap_or_default();
            let pipeline = build_pipeline(&cfg, open_store(&cfg).await?)?;
            let options = GenerateOptions {
                force_regenerate: force,
                max_snippets,
                theme,
                show_line_numbers: no_line_numbers.then_some(false),
                font_size,
            };
            let snapshots = pipeline
                .generate_snapshots(&repository_id, &user, &token, &options)
                .await?;
            print_json(&snapshots)?;
        }
        Commands::List {
            repository_id,
            user,
        } => {
            let pipeline = build_pipeline(&cfg, open_store(&cfg).await?)?;
            print_json(&pipeline.list_fresh_snapshots(&repository_id, &user).await?)?;
        }
        Commands::Invalidate { repository_id, sha } => {
            let store = open_store(&cfg).await?;
            let cache = SqliteCache::new(store.pool().clone());
            let marked =
                invalidate_on_new_commit(store.as_ref(), &cache, store.as_ref(), &repository_id, &sha)
                    .await?;
            print_json(&InvalidateReport {
                repository_id: &repository_id,
                new_head_sha: &sha,
                marked_stale: marked,
            })?;
        }
        Commands::Delete { snapshot_id, user } => {
            let pipeline = build_pipeline(&cfg, open_store(&cfg).await?)?;
            pipeline.delete_snapshot(&snapshot_id, &user).await?;
            eprintln!("Deleted snapshot {}", snapshot_id);
        }
    }

    Ok(())
}
