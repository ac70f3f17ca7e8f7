//! # Repo Context CLI (`rctx`)
//!
//! Stands in for the web layer that owns projects: it creates and edits
//! project rows and runs the indexing pipeline in the foreground where the
//! web layer would schedule it in the background.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rctx init` | Create the SQLite database and schema |
//! | `rctx project create` | Create a project, indexing it if it has a repository |
//! | `rctx project set-repo <id> [url]` | Change the repository URL |
//! | `rctx project show <id>` | Print a project's repository and status |
//! | `rctx project delete <id>` | Delete a project, its working copy, and its collection |
//! | `rctx index <id>` | Run the pipeline with the stored repository URL |
//! | `rctx search <id> "<query>"` | Query a project's collection |
//!
//! Logging follows `RUST_LOG` (default `info`).

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use repo_context::config;
use repo_context::db;
use repo_context::migrate;
use repo_context::orchestrator::IndexingOrchestrator;
use repo_context::projects;
use repo_context_core::models::{ContextStatus, Project};

/// Repo Context CLI: clone project repositories and index them for
/// retrieval.
#[derive(Parser)]
#[command(
    name = "rctx",
    about = "Repo Context: per-project repository indexing for retrieval-augmented context",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Manage projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Synchronize and index a project using its stored repository URL.
    ///
    /// Only projects in `PENDING` or `FAILED` are processed.
    Index {
        /// Project id.
        id: String,
    },

    /// Search a project's indexed chunks.
    Search {
        /// Project id.
        id: String,

        /// Query text.
        query: String,

        /// Maximum number of results.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project. With `--repo` it is indexed immediately.
    Create {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        /// Git repository URL.
        #[arg(long)]
        repo: Option<String>,
    },

    /// Set or clear a project's repository URL.
    ///
    /// A new URL re-arms indexing and runs it.
    SetRepo {
        id: String,
        /// New URL; omit to clear.
        url: Option<String>,
    },

    /// Show a project.
    Show { id: String },

    /// Delete a project with its working copy and collection.
    Delete { id: String },
}

fn print_project(project: &Project) {
    println!("id:     {}", project.id);
    println!("name:   {}", project.name);
    println!("owner:  {}", project.owner_id);
    println!(
        "repo:   {}",
        project.repository_url.as_deref().unwrap_or("(none)")
    );
    println!("status: {}", project.context_status);
}

/// Run the pipeline if the project is waiting for it, then report.
async fn index_and_report(
    pool: &sqlx::SqlitePool,
    orchestrator: &IndexingOrchestrator,
    project: &Project,
) -> Result<()> {
    if project.context_status != ContextStatus::Pending {
        return Ok(());
    }
    let Some(url) = project.repository_url.as_deref() else {
        return Ok(());
    };

    orchestrator.synchronize_and_index(&project.id, url).await;

    if let Some(updated) = projects::get_project(pool, &project.id).await? {
        println!("Indexing finished: {}", updated.context_status);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let pool = db::connect(&cfg).await?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&pool).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let orchestrator = IndexingOrchestrator::from_config(&cfg, pool.clone())?;

    match cli.command {
        Commands::Init => {}
        Commands::Project { action } => match action {
            ProjectAction::Create { owner, name, repo } => {
                let project = projects::create_project(&pool, &owner, &name, repo).await?;
                print_project(&project);
                index_and_report(&pool, &orchestrator, &project).await?;
            }
            ProjectAction::SetRepo { id, url } => {
                let Some((project, rearmed)) =
                    projects::update_repository_url(&pool, &id, url).await?
                else {
                    bail!("No project with id: {}", id);
                };
                print_project(&project);
                if rearmed {
                    index_and_report(&pool, &orchestrator, &project).await?;
                }
            }
            ProjectAction::Show { id } => match projects::get_project(&pool, &id).await? {
                Some(project) => print_project(&project),
                None => bail!("No project with id: {}", id),
            },
            ProjectAction::Delete { id } => {
                if !projects::delete_project(&pool, &id).await? {
                    bail!("No project with id: {}", id);
                }
                orchestrator.remove_workspace(&id).await;
                orchestrator.remove_collection(&id).await;
                println!("Deleted project {}", id);
            }
        },
        Commands::Index { id } => {
            let Some(project) = projects::get_project(&pool, &id).await? else {
                bail!("No project with id: {}", id);
            };
            let Some(url) = project.repository_url.as_deref() else {
                bail!("Project {} has no repository URL", id);
            };
            orchestrator.synchronize_and_index(&project.id, url).await;

            let status = projects::get_project(&pool, &id)
                .await?
                .map(|p| p.context_status.to_string())
                .unwrap_or_else(|| "(deleted)".to_string());
            println!("Indexing finished: {}", status);
        }
        Commands::Search { id, query, limit } => {
            let hits = orchestrator.query_context(&id, &query, limit).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} (chunk {})",
                    rank + 1,
                    hit.score,
                    hit.record.metadata.source,
                    hit.record.metadata.chunk_index
                );
                println!("   {}", preview(&hit.record.document, 200));
            }
        }
    }

    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &flat[..idx]),
        None => flat,
    }
}
