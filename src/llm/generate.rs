//! Generate pipeline: plan in, workspace mutations + change summary out.
//!
//! Read and write/create tools; semantic search is deliberately not
//! advertised here: the plan already names the files to touch, and the
//! generation model works from the tree itself. The returned string is only
//! a summary: the real output is the files the model wrote through the
//! gateway.

use std::path::Path;

use tracing::info;

use crate::errors::PipelineError;
use crate::llm::agent::AgentLoop;
use crate::llm::client::CompletionBackend;
use crate::llm::prompts;
use crate::tools::{write_tools, ToolGateway};

pub async fn generate_changes(
    backend: &dyn CompletionBackend,
    repo_path: &Path,
    plan: &str,
    step_budget: usize,
) -> Result<String, PipelineError> {
    info!(repo = %repo_path.display(), "generating code changes");
    let gateway = ToolGateway::new(repo_path);

    let summary = AgentLoop::new(backend, &gateway)
        .run(prompts::CODE_GENERATION, plan, &write_tools(), step_budget)
        .await?;
    info!("code generation completed");
    Ok(summary)
}
