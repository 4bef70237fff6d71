//! Review pipeline: PR patch in, unstructured review text out.
//!
//! Read-only tools plus semantic search, so the reviewer can look at the
//! full files behind a diff hunk. The free-text output is handed to the
//! structural transform afterwards.

use std::path::Path;

use tracing::info;

use crate::errors::PipelineError;
use crate::llm::agent::AgentLoop;
use crate::llm::client::CompletionBackend;
use crate::llm::prompts;
use crate::tools::{read_tools, SearchContext, ToolGateway};

pub async fn generate_review(
    backend: &dyn CompletionBackend,
    repo_path: &Path,
    patch: &str,
    search: SearchContext,
    step_budget: usize,
) -> Result<String, PipelineError> {
    info!(repo = %repo_path.display(), "generating review");
    let gateway = ToolGateway::new(repo_path).with_search(search);

    let review = AgentLoop::new(backend, &gateway)
        .run(prompts::CODE_REVIEW, patch, &read_tools(), step_budget)
        .await?;
    info!("review generation completed");
    Ok(review)
}
