//! User-facing progress reporting.
//!
//! Jobs report milestones and failures through the [`Notifier`] seam. The
//! GitHub implementation posts comments back to the triggering issue or
//! pull request; failures to deliver a notice are logged and never fail the
//! job itself. Internal error detail stays in the logs; notices carry a
//! human-readable message and the dashboard link only.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::github::{post_issue_comment, RepoIdentity};
use crate::llm::structure::{IssueKind, ReviewIssue, Severity};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post(&self, body: &str) -> anyhow::Result<()>;
}

/// Posts comments on the triggering issue or pull request.
pub struct GithubNotifier {
    token: String,
    repo: RepoIdentity,
    issue_number: i64,
}

impl GithubNotifier {
    pub fn new(token: &str, repo: RepoIdentity, issue_number: i64) -> Self {
        Self {
            token: token.to_string(),
            repo,
            issue_number,
        }
    }
}

#[async_trait]
impl Notifier for GithubNotifier {
    async fn post(&self, body: &str) -> anyhow::Result<()> {
        post_issue_comment(&self.token, &self.repo, self.issue_number, body).await
    }
}

/// Log-only notifier for CLI runs without a comment target.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn post(&self, body: &str) -> anyhow::Result<()> {
        info!(notice = body, "notifier");
        Ok(())
    }
}

/// Deliver a notice, downgrading delivery failures to a warning.
pub async fn try_post(notifier: &dyn Notifier, body: &str) {
    if let Err(e) = notifier.post(body).await {
        warn!(error = %e, "failed to deliver notice");
    }
}

fn kind_label(kind: IssueKind) -> &'static str {
    match kind {
        IssueKind::Security => "Security",
        IssueKind::Performance => "Performance",
        IssueKind::Logic => "Logic",
        IssueKind::Misc => "Misc",
    }
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "Low",
        Severity::Medium => "Medium",
        Severity::High => "High",
    }
}

/// Render a structured review as the markdown comment posted on the PR.
pub fn render_review_markdown(issues: &[ReviewIssue]) -> String {
    if issues.is_empty() {
        return "## Review\n\nNo issues found. :white_check_mark:".to_string();
    }

    let mut out = String::from("## Review\n");
    for issue in issues {
        out.push_str(&format!(
            "\n### `{}`: {} ({})\n\n{}\n\n```\n{}\n```\n\nSuggested fix:\n\n```\n{}\n```\n",
            issue.file_name,
            kind_label(issue.kind),
            severity_label(issue.severity),
            issue.description,
            issue.snippet,
            issue.fix,
        ));
    }
    out
}
