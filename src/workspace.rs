//! Workspace manager: authenticated clone, branch + push, guaranteed
//! cleanup.
//!
//! Each workspace is an ownership-exclusive temporary directory bound to
//! one clone. Git runs as a subprocess; stderr is advisory and logged as a
//! warning, only a nonzero exit fails a command. The backing [`TempDir`]
//! guarantees the directory is released exactly once: either through an
//! explicit `cleanup()` or, on any early exit path, when the workspace is
//! dropped.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tempfile::TempDir;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::WorkspaceError;
use crate::github::RepoIdentity;

const ADJECTIVES: &[&str] = &[
    "brisk", "calm", "dapper", "eager", "fuzzy", "gentle", "humble", "keen", "lively", "mellow",
    "nimble", "plucky", "quiet", "rustic", "sly", "tidy",
];

const ANIMALS: &[&str] = &[
    "otter", "lynx", "heron", "badger", "finch", "marmot", "newt", "osprey", "pika", "quail",
    "raven", "stoat", "tern", "vole", "wren", "yak",
];

/// Random human-readable suffix for branch names.
fn readable_suffix() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    format!(
        "{}-{}",
        ADJECTIVES[bytes[0] as usize % ADJECTIVES.len()],
        ANIMALS[bytes[1] as usize % ANIMALS.len()],
    )
}

async fn run_git(args: &[&str], cwd: &Path) -> Result<String, WorkspaceError> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(WorkspaceError::GitSpawnFailed)?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        // Advisory only; git writes progress here even on success.
        warn!(command = args.first().copied().unwrap_or(""), git_stderr = %stderr.trim());
    }
    if !output.status.success() {
        return Err(WorkspaceError::GitNonZeroExit {
            command: args.join(" "),
            code: output.status.code(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Clone an authenticated remote into a freshly allocated unique
    /// temporary directory.
    pub async fn clone_repository(
        repo: &RepoIdentity,
        token: &str,
    ) -> Result<Self, WorkspaceError> {
        Self::clone_url(&repo.authenticated_clone_url(token)).await
    }

    /// Clone any git URL into a new workspace. Split out from
    /// [`Workspace::clone_repository`] so tests can clone local paths.
    pub async fn clone_url(url: &str) -> Result<Self, WorkspaceError> {
        let dir = tempfile::Builder::new()
            .prefix("mender-")
            .tempdir()
            .map_err(WorkspaceError::TempDirFailed)?;

        run_git(&["clone", url, "."], dir.path()).await?;
        if !dir.path().join(".git").exists() {
            return Err(WorkspaceError::CloneFailed);
        }
        info!(path = %dir.path().display(), "cloned workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Stage everything, commit with the fixed message template, and
    /// force-push a uniquely named feature branch. Returns the branch name.
    pub async fn create_pull_request(&self, issue_number: i64) -> Result<String, WorkspaceError> {
        let branch = format!("mender/issue-{}-{}", issue_number, readable_suffix());
        let message = format!("mender: automated changes for issue #{}", issue_number);

        run_git(&["checkout", "-b", &branch], self.path()).await?;
        run_git(&["add", "-A"], self.path()).await?;
        // Commit as the bot identity; clones have no local user config.
        run_git(
            &[
                "-c",
                "user.name=mender[bot]",
                "-c",
                "user.email=mender[bot]@users.noreply.github.com",
                "commit",
                "-m",
                &message,
            ],
            self.path(),
        )
        .await?;
        run_git(&["push", "--force", "origin", &branch], self.path()).await?;

        info!(branch, "pushed feature branch");
        Ok(branch)
    }

    /// Delete the workspace directory. Consumes the workspace, so release
    /// happens at most once; dropping an un-cleaned workspace removes the
    /// directory as well.
    pub async fn cleanup(self) -> Result<(), WorkspaceError> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(WorkspaceError::TempDirFailed)?;
        info!(path = %path.display(), "workspace cleaned up");
        Ok(())
    }

    /// Where the workspace lives, for callers that outlive it (logging).
    pub fn path_buf(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }
}
