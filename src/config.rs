//! Runtime configuration for mender.
//!
//! All settings come from the environment (a local `.env` is honoured via
//! `dotenvy` in the binary entry point). The authenticated repository
//! identity and access token are deliberately plain fields here: they are
//! constructed once by the process entry point and passed explicitly into
//! every component that needs them, rather than read from ambient state.

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Default number of lines per chunk when indexing a repository.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Default ceiling on agent-loop completion rounds. Large on purpose: the
/// loop normally terminates when the model stops calling tools, the budget
/// only prevents runaways.
pub const DEFAULT_STEP_BUDGET: usize = 1000;

/// Default cosine-similarity threshold for semantic search.
pub const DEFAULT_SEARCH_THRESHOLD: f32 = 0.5;

/// How long to wait for a clone directory to materialize before giving up.
pub const DEFAULT_WORKSPACE_WAIT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database holding tasks, reviews, and embeddings.
    pub db_path: PathBuf,
    /// Base URL of the OpenAI-compatible embedding endpoint.
    pub embedding_url: String,
    /// Embedding model identifier (768-dimensional output expected).
    pub embedding_model: String,
    /// Base URL of the OpenAI-compatible chat-completions endpoint.
    pub completion_url: String,
    /// Chat model identifier.
    pub completion_model: String,
    /// API key for the completion/embedding provider (may be empty for
    /// local providers that do not authenticate).
    pub api_key: String,
    /// Short-lived repository access token embedded in clone URLs and used
    /// for posting comments.
    pub github_token: String,
    /// Dashboard URL referenced in user-facing failure notices.
    pub dashboard_url: String,
    /// Lines per chunk.
    pub chunk_size: usize,
    /// Agent-loop round ceiling.
    pub step_budget: usize,
    /// When true, wipe a repository's embedding partition before indexing
    /// instead of appending duplicate rows.
    pub reindex: bool,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let db_path = std::env::var("MENDER_DB")
            .unwrap_or_else(|_| "mender.db".to_string())
            .into();
        let embedding_url = std::env::var("EMBEDDING_URL")
            .unwrap_or_else(|_| "http://localhost:11434/v1".to_string());
        let embedding_model =
            std::env::var("EMBEDDING_MODEL").unwrap_or_else(|_| "nomic-embed-text".to_string());
        let completion_url = std::env::var("COMPLETION_URL")
            .context("COMPLETION_URL is required (OpenAI-compatible chat endpoint)")?;
        let completion_model =
            std::env::var("COMPLETION_MODEL").context("COMPLETION_MODEL is required")?;
        let api_key = std::env::var("PROVIDER_API_KEY").unwrap_or_default();
        let github_token = std::env::var("GITHUB_TOKEN").unwrap_or_default();
        let dashboard_url = std::env::var("MENDER_DASHBOARD_URL")
            .unwrap_or_else(|_| "https://mender.dev/dashboard".to_string());
        let chunk_size = parse_env("MENDER_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        let step_budget = parse_env("MENDER_STEP_BUDGET", DEFAULT_STEP_BUDGET)?;
        let reindex = std::env::var("MENDER_REINDEX")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            db_path,
            embedding_url,
            embedding_model,
            completion_url,
            completion_model,
            api_key,
            github_token,
            dashboard_url,
            chunk_size,
            step_budget,
            reindex,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}
