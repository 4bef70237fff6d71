use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use mender::config::Config;
use mender::embeddings::{EmbeddingStore, HttpEmbedder};
use mender::github::RepoIdentity;
use mender::indexer::Chunker;
use mender::job::{run_review, run_task, JobContext, ReviewRequest, TaskRequest};
use mender::llm::classify::classify_message;
use mender::llm::client::HttpCompletionBackend;
use mender::notify::{GithubNotifier, LogNotifier, Notifier};
use mender::store::{Db, DbHandle};

#[derive(Parser)]
#[command(name = "mender")]
#[command(version, about = "Retrieval-augmented repository maintenance agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk and embed a local repository into semantic memory
    Index {
        /// Path to the repository tree
        #[arg(long)]
        path: std::path::PathBuf,
        /// Partition key, usually the owner/repo slug
        #[arg(long)]
        repo_id: String,
    },
    /// Turn an issue thread into a generated change on a pushed branch
    Task {
        /// Target repository as owner/repo
        #[arg(long)]
        repo: String,
        /// Issue number
        #[arg(long)]
        issue: i64,
        /// Issue title
        #[arg(long)]
        title: String,
        /// Thread messages, repeatable
        #[arg(long = "thread")]
        threads: Vec<String>,
        /// Post progress comments on the issue instead of logging them
        #[arg(long)]
        comment: bool,
    },
    /// Review a pull-request patch against a clone of the repository
    Review {
        /// Target repository as owner/repo
        #[arg(long)]
        repo: String,
        /// Link to the pull request
        #[arg(long)]
        pr_link: String,
        /// File containing the unified diff
        #[arg(long)]
        patch_file: std::path::PathBuf,
        /// Post the review as a PR comment instead of logging it
        #[arg(long)]
        comment: bool,
    },
    /// Classify what a user comment is asking for
    Classify {
        /// The comment text
        #[arg(short, long)]
        message: String,
    },
}

fn parse_repo(slug: &str) -> Result<RepoIdentity> {
    RepoIdentity::parse_slug(slug)
        .with_context(|| format!("Invalid repository slug '{}', expected owner/repo", slug))
}

fn issue_number_from_pr_link(pr_link: &str) -> i64 {
    pr_link
        .rsplit('/')
        .next()
        .and_then(|tail| tail.parse().ok())
        .unwrap_or(0)
}

fn build_context(config: &Config, notifier: Arc<dyn Notifier>) -> Result<JobContext> {
    let db = DbHandle::new(Db::open(&config.db_path)?);
    let embedder = Arc::new(HttpEmbedder::new(
        &config.embedding_url,
        &config.embedding_model,
        &config.api_key,
    ));
    let embeddings = EmbeddingStore::new(db.clone(), embedder);
    let backend = Arc::new(HttpCompletionBackend::new(
        &config.completion_url,
        &config.completion_model,
        &config.api_key,
    ));
    Ok(JobContext {
        db,
        embeddings,
        backend,
        notifier,
        github_token: config.github_token.clone(),
        dashboard_url: config.dashboard_url.clone(),
        chunk_size: config.chunk_size,
        step_budget: config.step_budget,
        reindex: config.reindex,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Index { path, repo_id } => {
            let db = DbHandle::new(Db::open(&config.db_path)?);
            let embedder = Arc::new(HttpEmbedder::new(
                &config.embedding_url,
                &config.embedding_model,
                &config.api_key,
            ));
            let store = EmbeddingStore::new(db, embedder);
            let chunks = Chunker::new(config.chunk_size).generate_chunks(&path)?;
            if config.reindex {
                store.clear_repo(&repo_id).await?;
            }
            let count = store.index(&repo_id, &chunks).await?;
            info!(repo_id, count, "indexing complete");
        }
        Commands::Task {
            repo,
            issue,
            title,
            threads,
            comment,
        } => {
            let repo = parse_repo(&repo)?;
            let notifier: Arc<dyn Notifier> = if comment {
                Arc::new(GithubNotifier::new(&config.github_token, repo.clone(), issue))
            } else {
                Arc::new(LogNotifier)
            };
            let ctx = build_context(&config, notifier)?;
            let request = TaskRequest {
                issue_url: format!("{}/issues/{}", repo.html_url(), issue),
                repo,
                issue_number: issue,
                issue_title: title,
                threads,
                clone_url: None,
            };
            let task = run_task(&ctx, &request).await?;
            println!("task {} finished with status {}", task.id, task.status);
            if let Some(link) = task.pr_link {
                println!("branch: {}", link);
            }
        }
        Commands::Review {
            repo,
            pr_link,
            patch_file,
            comment,
        } => {
            let repo = parse_repo(&repo)?;
            let patch = std::fs::read_to_string(&patch_file)
                .with_context(|| format!("Failed to read patch file {}", patch_file.display()))?;
            let notifier: Arc<dyn Notifier> = if comment {
                Arc::new(GithubNotifier::new(
                    &config.github_token,
                    repo.clone(),
                    issue_number_from_pr_link(&pr_link),
                ))
            } else {
                Arc::new(LogNotifier)
            };
            let ctx = build_context(&config, notifier)?;
            let request = ReviewRequest {
                repo,
                pr_link,
                patch,
                clone_url: None,
            };
            let (review, issues) = run_review(&ctx, &request).await?;
            println!("review {} finished with status {}", review.id, review.status);
            println!("{} issue(s) found", issues.len());
            if let Some(body) = review.review {
                println!("{}", body);
            }
        }
        Commands::Classify { message } => {
            let backend = HttpCompletionBackend::new(
                &config.completion_url,
                &config.completion_model,
                &config.api_key,
            );
            let action = classify_message(&backend, &message).await?;
            println!("{}", serde_json::to_string_pretty(&action)?);
        }
    }

    Ok(())
}
