//! Plan pipeline: issue thread in, step-outline string out.
//!
//! Read-only tools plus semantic search; the model explores the clone and
//! the embedding index before committing to an outline.

use std::path::Path;

use tracing::info;

use crate::errors::PipelineError;
use crate::llm::agent::AgentLoop;
use crate::llm::client::CompletionBackend;
use crate::llm::prompts;
use crate::tools::{read_tools, SearchContext, ToolGateway};

pub async fn generate_plan(
    backend: &dyn CompletionBackend,
    repo_path: &Path,
    threads: &[String],
    search: SearchContext,
    step_budget: usize,
) -> Result<String, PipelineError> {
    info!(repo = %repo_path.display(), threads = threads.len(), "generating plan");
    let gateway = ToolGateway::new(repo_path).with_search(search);
    let user_message = threads.join("\n");

    let plan = AgentLoop::new(backend, &gateway)
        .run(prompts::PLAN_GENERATION, &user_message, &read_tools(), step_budget)
        .await?;
    info!("plan generation completed");
    Ok(plan)
}
