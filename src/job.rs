//! Job drivers: the persisted, resumable state machines that take a task
//! from `started` to `done` (or `errored`) across clone, index, plan,
//! generate, and push, and a review from `started` through `reviewing`.
//!
//! The store is updated at every stage boundary, any stage error moves the
//! record to `errored` with a user-visible notice, and the workspace is
//! released on every exit path. Nothing here retries: `errored` is final
//! and retry policy belongs to the caller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::DEFAULT_WORKSPACE_WAIT_SECS;
use crate::embeddings::EmbeddingStore;
use crate::github::RepoIdentity;
use crate::indexer::Chunker;
use crate::llm::client::CompletionBackend;
use crate::llm::generate::generate_changes;
use crate::llm::plan::generate_plan;
use crate::llm::review::generate_review;
use crate::llm::structure::{transform_review, ReviewIssue};
use crate::notify::{render_review_markdown, try_post, Notifier};
use crate::store::{
    derive_review_id, derive_task_id, DbHandle, Review, ReviewStatus, Task, TaskStatus,
};
use crate::tools::SearchContext;
use crate::workspace::Workspace;

/// Shared collaborators for running jobs. One context serves many
/// concurrent jobs; the embedding store is the only shared mutable
/// resource and it is additive-only and partitioned by repository.
pub struct JobContext {
    pub db: DbHandle,
    pub embeddings: EmbeddingStore,
    pub backend: Arc<dyn CompletionBackend>,
    pub notifier: Arc<dyn Notifier>,
    pub github_token: String,
    pub dashboard_url: String,
    pub chunk_size: usize,
    pub step_budget: usize,
    pub reindex: bool,
}

/// A code-change request distilled from an issue thread.
pub struct TaskRequest {
    pub repo: RepoIdentity,
    pub issue_number: i64,
    pub issue_url: String,
    pub issue_title: String,
    pub threads: Vec<String>,
    /// Clone from this URL instead of the derived GitHub remote (local
    /// mirrors).
    pub clone_url: Option<String>,
}

/// A review request for an opened pull request.
pub struct ReviewRequest {
    pub repo: RepoIdentity,
    pub pr_link: String,
    pub patch: String,
    /// Clone from this URL instead of the derived GitHub remote.
    pub clone_url: Option<String>,
}

impl JobContext {
    async fn set_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        plan: Option<String>,
        pr_link: Option<String>,
    ) -> Result<Task> {
        let id = id.to_string();
        self.db
            .call(move |db| db.set_task_status(&id, status, plan.as_deref(), pr_link.as_deref()))
            .await
    }

    async fn set_review_status(
        &self,
        id: &str,
        status: ReviewStatus,
        review: Option<String>,
    ) -> Result<Review> {
        let id = id.to_string();
        self.db
            .call(move |db| db.set_review_status(&id, status, review.as_deref()))
            .await
    }

    fn clone_target(&self, repo: &RepoIdentity, override_url: &Option<String>) -> String {
        override_url
            .clone()
            .unwrap_or_else(|| repo.authenticated_clone_url(&self.github_token))
    }

    /// Chunk the workspace tree and index it into the repository's
    /// embedding partition. Re-embeds by default; clears the partition
    /// first when `reindex` is set.
    async fn index_workspace(&self, repo_id: &str, root: &std::path::Path) -> Result<usize> {
        let chunker = Chunker::new(self.chunk_size);
        chunker
            .wait_for_root(root, Duration::from_secs(DEFAULT_WORKSPACE_WAIT_SECS))
            .await?;

        let root_owned = root.to_path_buf();
        let chunk_size = self.chunk_size;
        let chunks = tokio::task::spawn_blocking(move || {
            Chunker::new(chunk_size).generate_chunks(&root_owned)
        })
        .await
        .context("chunking task panicked")??;

        if self.reindex {
            self.embeddings.clear_repo(repo_id).await?;
        }
        let indexed = self.embeddings.index(repo_id, &chunks).await?;
        Ok(indexed)
    }
}

/// Drive one code-change task to a terminal state. Infrastructure failures
/// (the database itself) surface as `Err`; everything else ends in a
/// persisted `done` or `errored` record, which is returned.
pub async fn run_task(ctx: &JobContext, request: &TaskRequest) -> Result<Task> {
    let id = derive_task_id(&request.issue_number.to_string(), &request.repo.slug());
    info!(task = %id, repo = %request.repo, "starting task");
    {
        let id = id.clone();
        let issue_id = request.issue_number.to_string();
        let issue_url = request.issue_url.clone();
        let issue_title = request.issue_title.clone();
        let threads = request.threads.clone();
        ctx.db
            .call(move |db| db.create_task(&id, &issue_id, &issue_url, &issue_title, &threads))
            .await?;
    }
    try_post(
        ctx.notifier.as_ref(),
        &format!(
            "Working on **{}**. Follow along at {}",
            request.issue_title, ctx.dashboard_url
        ),
    )
    .await;

    ctx.set_task_status(&id, TaskStatus::Cloning, None, None).await?;
    let workspace =
        match Workspace::clone_url(&ctx.clone_target(&request.repo, &request.clone_url)).await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!(task = %id, error = %e, "clone failed");
                return fail_task(ctx, &id, "Failed to clone the repository").await;
            }
        };

    let outcome = run_task_stages(ctx, &id, request, &workspace).await;

    // Scoped release: cleanup runs whether the stages succeeded or not.
    if let Err(e) = workspace.cleanup().await {
        warn!(task = %id, error = %e, "workspace cleanup failed");
    }

    match outcome {
        Ok(branch) => {
            let link = request.repo.branch_url(&branch);
            let task = ctx
                .set_task_status(&id, TaskStatus::Done, None, Some(link.clone()))
                .await?;
            info!(task = %id, branch, "task done");
            try_post(
                ctx.notifier.as_ref(),
                &format!("Pushed `{}`. Open a PR from {}", branch, link),
            )
            .await;
            Ok(task)
        }
        Err(e) => {
            error!(task = %id, error = ?e, "task failed");
            fail_task(ctx, &id, "Something went wrong while generating the change").await
        }
    }
}

async fn run_task_stages(
    ctx: &JobContext,
    id: &str,
    request: &TaskRequest,
    workspace: &Workspace,
) -> Result<String> {
    let repo_id = request.repo.slug();

    ctx.set_task_status(id, TaskStatus::Indexing, None, None).await?;
    ctx.index_workspace(&repo_id, workspace.path()).await?;

    ctx.set_task_status(id, TaskStatus::Planning, None, None).await?;
    let search = SearchContext {
        store: ctx.embeddings.clone(),
        repo_id: repo_id.clone(),
    };
    let plan = generate_plan(
        ctx.backend.as_ref(),
        workspace.path(),
        &request.threads,
        search,
        ctx.step_budget,
    )
    .await?;

    ctx.set_task_status(id, TaskStatus::Generating, Some(plan.clone()), None)
        .await?;
    let summary = generate_changes(ctx.backend.as_ref(), workspace.path(), &plan, ctx.step_budget)
        .await?;
    info!(task = %id, summary = %summary, "generation summary");

    ctx.set_task_status(id, TaskStatus::Pushing, None, None).await?;
    let branch = workspace.create_pull_request(request.issue_number).await?;
    Ok(branch)
}

async fn fail_task(ctx: &JobContext, id: &str, notice: &str) -> Result<Task> {
    let task = ctx
        .set_task_status(id, TaskStatus::Errored, None, None)
        .await?;
    try_post(
        ctx.notifier.as_ref(),
        &format!("{}. See {} for details.", notice, ctx.dashboard_url),
    )
    .await;
    Ok(task)
}

/// Drive one review to a terminal state. Returns the persisted record and
/// the structured issues (empty when the reviewer found nothing).
pub async fn run_review(
    ctx: &JobContext,
    request: &ReviewRequest,
) -> Result<(Review, Vec<ReviewIssue>)> {
    let id = derive_review_id(&request.pr_link);
    info!(review = %id, pr = %request.pr_link, "starting review");
    {
        let id = id.clone();
        let pr_link = request.pr_link.clone();
        ctx.db
            .call(move |db| db.create_review(&id, &pr_link))
            .await?;
    }
    try_post(ctx.notifier.as_ref(), "## Generating review...").await;

    ctx.set_review_status(&id, ReviewStatus::Cloning, None).await?;
    let workspace =
        match Workspace::clone_url(&ctx.clone_target(&request.repo, &request.clone_url)).await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!(review = %id, error = %e, "clone failed");
                let review = fail_review(ctx, &id, "Failed to clone the repository").await?;
                return Ok((review, Vec::new()));
            }
        };

    let outcome = run_review_stages(ctx, &id, request, &workspace).await;

    if let Err(e) = workspace.cleanup().await {
        warn!(review = %id, error = %e, "workspace cleanup failed");
    }

    match outcome {
        Ok(issues) => {
            let markdown = render_review_markdown(&issues);
            let review = ctx
                .set_review_status(&id, ReviewStatus::Done, Some(markdown.clone()))
                .await?;
            info!(review = %id, issues = issues.len(), "review done");
            try_post(ctx.notifier.as_ref(), &markdown).await;
            Ok((review, issues))
        }
        Err(e) => {
            error!(review = %id, error = ?e, "review failed");
            let review = fail_review(ctx, &id, "Something went wrong while reviewing").await?;
            Ok((review, Vec::new()))
        }
    }
}

async fn run_review_stages(
    ctx: &JobContext,
    id: &str,
    request: &ReviewRequest,
    workspace: &Workspace,
) -> Result<Vec<ReviewIssue>> {
    let repo_id = request.repo.slug();

    ctx.set_review_status(id, ReviewStatus::Indexing, None).await?;
    ctx.index_workspace(&repo_id, workspace.path()).await?;

    ctx.set_review_status(id, ReviewStatus::Reviewing, None).await?;
    let search = SearchContext {
        store: ctx.embeddings.clone(),
        repo_id,
    };
    let raw = generate_review(
        ctx.backend.as_ref(),
        workspace.path(),
        &request.patch,
        search,
        ctx.step_budget,
    )
    .await?;

    // A transform failure is a pipeline failure; an empty array is a valid
    // "no issues found" and flows through.
    let issues = transform_review(ctx.backend.as_ref(), &raw).await?;
    Ok(issues)
}

async fn fail_review(ctx: &JobContext, id: &str, notice: &str) -> Result<Review> {
    let review = ctx
        .set_review_status(id, ReviewStatus::Errored, None)
        .await?;
    try_post(
        ctx.notifier.as_ref(),
        &format!("{}. See {} for details.", notice, ctx.dashboard_url),
    )
    .await;
    Ok(review)
}
