//! SQLite persistence for tasks, reviews, and embedding rows.
//!
//! All access goes through [`DbHandle`], which wraps the connection behind
//! `Arc<Mutex<_>>` and runs closures on tokio's blocking thread pool so
//! synchronous SQLite I/O never ties up async worker threads.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// Lifecycle of a code-change task.
///
/// Transitions are monotonic: a task only ever moves forward through
/// `started → cloning → indexing → planning → generating → pushing → done`,
/// with `errored` reachable from any non-terminal state. `done` and
/// `errored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Started,
    Cloning,
    Indexing,
    Planning,
    Generating,
    Pushing,
    Done,
    Errored,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Cloning => "cloning",
            Self::Indexing => "indexing",
            Self::Planning => "planning",
            Self::Generating => "generating",
            Self::Pushing => "pushing",
            Self::Done => "done",
            Self::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Errored)
    }

    /// Position in the forward progression. `Errored` has no rank of its
    /// own; it is reachable from anywhere non-terminal.
    fn rank(&self) -> u8 {
        match self {
            Self::Started => 0,
            Self::Cloning => 1,
            Self::Indexing => 2,
            Self::Planning => 3,
            Self::Generating => 4,
            Self::Pushing => 5,
            Self::Done => 6,
            Self::Errored => 7,
        }
    }

    pub fn can_advance_to(&self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Errored {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "cloning" => Ok(Self::Cloning),
            "indexing" => Ok(Self::Indexing),
            "planning" => Ok(Self::Planning),
            "generating" => Ok(Self::Generating),
            "pushing" => Ok(Self::Pushing),
            "done" => Ok(Self::Done),
            "errored" => Ok(Self::Errored),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// Lifecycle of a pull-request review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Started,
    Cloning,
    Indexing,
    Reviewing,
    Done,
    Errored,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Cloning => "cloning",
            Self::Indexing => "indexing",
            Self::Reviewing => "reviewing",
            Self::Done => "done",
            Self::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Errored)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Started => 0,
            Self::Cloning => 1,
            Self::Indexing => 2,
            Self::Reviewing => 3,
            Self::Done => 4,
            Self::Errored => 5,
        }
    }

    pub fn can_advance_to(&self, next: ReviewStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Errored {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "cloning" => Ok(Self::Cloning),
            "indexing" => Ok(Self::Indexing),
            "reviewing" => Ok(Self::Reviewing),
            "done" => Ok(Self::Done),
            "errored" => Ok(Self::Errored),
            _ => Err(format!("Invalid review status: {}", s)),
        }
    }
}

/// One persisted code-change task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub issue_id: String,
    pub issue_url: String,
    pub issue_title: String,
    pub threads: Vec<String>,
    pub status: TaskStatus,
    pub plan: Option<String>,
    pub pr_link: Option<String>,
    pub created_at: String,
    pub ended_at: Option<String>,
}

/// One persisted pull-request review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub pr_link: String,
    pub status: ReviewStatus,
    pub review: Option<String>,
    pub created_at: String,
    pub ended_at: Option<String>,
}

/// A stored embedding row scoped to one repository.
#[derive(Debug, Clone)]
pub struct EmbeddingRow {
    pub id: i64,
    pub repo_id: String,
    pub content: String,
    pub vector: Vec<f32>,
}

/// Derive a task id from creation time + issue number + repo identity.
/// Unique by construction, not enforced by a constraint.
pub fn derive_task_id(issue_id: &str, repo_slug: &str) -> String {
    format!(
        "{}-{}-{}",
        Utc::now().timestamp_millis(),
        issue_id,
        repo_slug.replace('/', "-")
    )
}

/// Derive a review id from creation time + PR link.
pub fn derive_review_id(pr_link: &str) -> String {
    let tail = pr_link.rsplit('/').next().unwrap_or("pr");
    format!("{}-review-{}", Utc::now().timestamp_millis(), tail)
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}

/// Async-safe handle to the mender database.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Db>>,
}

impl DbHandle {
    pub fn new(db: Db) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Db) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Synchronous access for startup initialization and tests. Not for hot
    /// async paths.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, Db>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    issue_id TEXT NOT NULL,
                    issue_url TEXT NOT NULL,
                    issue_title TEXT NOT NULL,
                    threads TEXT NOT NULL DEFAULT '[]',
                    status TEXT NOT NULL DEFAULT 'started',
                    plan TEXT,
                    pr_link TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    ended_at TEXT
                );

                CREATE TABLE IF NOT EXISTS reviews (
                    id TEXT PRIMARY KEY,
                    pr_link TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'started',
                    review TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    ended_at TEXT
                );

                CREATE TABLE IF NOT EXISTS embeddings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    repo_id TEXT NOT NULL,
                    content TEXT NOT NULL,
                    embedding BLOB NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_embeddings_repo ON embeddings(repo_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_issue ON tasks(issue_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    pub fn create_task(
        &self,
        id: &str,
        issue_id: &str,
        issue_url: &str,
        issue_title: &str,
        threads: &[String],
    ) -> Result<Task> {
        let threads_json =
            serde_json::to_string(threads).context("Failed to serialize threads")?;
        self.conn
            .execute(
                "INSERT INTO tasks (id, issue_id, issue_url, issue_title, threads, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'started')",
                params![id, issue_id, issue_url, issue_title, threads_json],
            )
            .context("Failed to insert task")?;
        self.get_task(id)?.context("Task not found after insert")
    }

    /// Advance a task's status, optionally attaching the plan or PR link
    /// produced at that boundary. One atomic UPDATE keyed by the immutable
    /// id. Backward transitions and transitions out of a terminal state are
    /// rejected. `ended_at` is stamped exactly once, on reaching a terminal
    /// state.
    pub fn set_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        plan: Option<&str>,
        pr_link: Option<&str>,
    ) -> Result<Task> {
        let current = self
            .get_task(id)?
            .with_context(|| format!("Task {} not found", id))?;
        if !current.status.can_advance_to(status) {
            anyhow::bail!(
                "Invalid task transition {} -> {} for {}",
                current.status,
                status,
                id
            );
        }
        let ended_at = if status.is_terminal() {
            Some(Utc::now().to_rfc3339())
        } else {
            None
        };
        self.conn
            .execute(
                "UPDATE tasks SET
                     status = ?1,
                     plan = COALESCE(?2, plan),
                     pr_link = COALESCE(?3, pr_link),
                     ended_at = COALESCE(ended_at, ?4)
                 WHERE id = ?5",
                params![status.as_str(), plan, pr_link, ended_at, id],
            )
            .context("Failed to update task status")?;
        self.get_task(id)?.context("Task not found after update")
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, issue_id, issue_url, issue_title, threads, status, plan, pr_link,
                        created_at, ended_at
                 FROM tasks WHERE id = ?1",
            )
            .context("Failed to prepare get_task")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            })
            .context("Failed to query task")?;
        match rows.next() {
            Some(row) => {
                let (id, issue_id, issue_url, issue_title, threads, status, plan, pr_link, created_at, ended_at) =
                    row.context("Failed to read task row")?;
                Ok(Some(Task {
                    id,
                    issue_id,
                    issue_url,
                    issue_title,
                    threads: serde_json::from_str(&threads)
                        .context("Failed to parse task threads")?,
                    status: status
                        .parse()
                        .map_err(|e: String| anyhow::anyhow!(e))?,
                    plan,
                    pr_link,
                    created_at,
                    ended_at,
                }))
            }
            None => Ok(None),
        }
    }

    // ── Reviews ───────────────────────────────────────────────────────

    pub fn create_review(&self, id: &str, pr_link: &str) -> Result<Review> {
        self.conn
            .execute(
                "INSERT INTO reviews (id, pr_link, status) VALUES (?1, ?2, 'started')",
                params![id, pr_link],
            )
            .context("Failed to insert review")?;
        self.get_review(id)?
            .context("Review not found after insert")
    }

    pub fn set_review_status(
        &self,
        id: &str,
        status: ReviewStatus,
        review_text: Option<&str>,
    ) -> Result<Review> {
        let current = self
            .get_review(id)?
            .with_context(|| format!("Review {} not found", id))?;
        if !current.status.can_advance_to(status) {
            anyhow::bail!(
                "Invalid review transition {} -> {} for {}",
                current.status,
                status,
                id
            );
        }
        let ended_at = if status.is_terminal() {
            Some(Utc::now().to_rfc3339())
        } else {
            None
        };
        self.conn
            .execute(
                "UPDATE reviews SET
                     status = ?1,
                     review = COALESCE(?2, review),
                     ended_at = COALESCE(ended_at, ?3)
                 WHERE id = ?4",
                params![status.as_str(), review_text, ended_at, id],
            )
            .context("Failed to update review status")?;
        self.get_review(id)?
            .context("Review not found after update")
    }

    pub fn get_review(&self, id: &str) -> Result<Option<Review>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, pr_link, status, review, created_at, ended_at
                 FROM reviews WHERE id = ?1",
            )
            .context("Failed to prepare get_review")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .context("Failed to query review")?;
        match rows.next() {
            Some(row) => {
                let (id, pr_link, status, review, created_at, ended_at) =
                    row.context("Failed to read review row")?;
                Ok(Some(Review {
                    id,
                    pr_link,
                    status: status
                        .parse()
                        .map_err(|e: String| anyhow::anyhow!(e))?,
                    review,
                    created_at,
                    ended_at,
                }))
            }
            None => Ok(None),
        }
    }

    // ── Embeddings ────────────────────────────────────────────────────

    /// Insert a batch of embedding rows in one transaction. All-or-nothing:
    /// a failure rolls the whole batch back.
    pub fn insert_embeddings(&self, rows: &[(String, String, Vec<f32>)]) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to start embedding transaction")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO embeddings (repo_id, content, embedding) VALUES (?1, ?2, ?3)",
                )
                .context("Failed to prepare embedding insert")?;
            for (repo_id, content, vector) in rows {
                stmt.execute(params![repo_id, content, vector_to_blob(vector)])
                    .context("Failed to insert embedding row")?;
            }
        }
        tx.commit().context("Failed to commit embeddings")?;
        Ok(rows.len())
    }

    /// Every embedding row in one repository's partition, storage order.
    pub fn embeddings_for_repo(&self, repo_id: &str) -> Result<Vec<EmbeddingRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, repo_id, content, embedding FROM embeddings WHERE repo_id = ?1")
            .context("Failed to prepare embeddings query")?;
        let rows = stmt
            .query_map(params![repo_id], |row| {
                Ok(EmbeddingRow {
                    id: row.get(0)?,
                    repo_id: row.get(1)?,
                    content: row.get(2)?,
                    vector: blob_to_vector(&row.get::<_, Vec<u8>>(3)?),
                })
            })
            .context("Failed to query embeddings")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("Failed to read embedding row")?);
        }
        Ok(out)
    }

    /// Drop a repository's embedding partition. Used when reindexing with
    /// deduplication enabled.
    pub fn clear_repo_embeddings(&self, repo_id: &str) -> Result<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM embeddings WHERE repo_id = ?1", params![repo_id])
            .context("Failed to clear embeddings")?;
        Ok(deleted)
    }
}
