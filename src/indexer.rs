//! Repository chunker.
//!
//! Walks a repository tree and slices every regular file into fixed-size
//! line windows, each rendered as a single string with a delimiter header
//! naming its source file. Chunks are ephemeral: they are recomputed on
//! every indexing run and feed straight into the embedding store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::errors::IndexError;

/// One fixed-size window of a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Path of the file this window was cut from, relative to the root.
    pub source_path: String,
    /// Zero-based window index within the file.
    pub ordinal: usize,
    /// Rendered chunk: delimiter header line followed by the raw window.
    pub text: String,
}

pub struct Chunker {
    chunk_size: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl Chunker {
    pub fn new(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self { chunk_size }
    }

    /// Poll until `root` exists, up to `timeout`. Tolerates a caller that is
    /// still materializing a clone; expiry is a distinct error rather than
    /// an infinite retry.
    pub async fn wait_for_root(&self, root: &Path, timeout: Duration) -> Result<(), IndexError> {
        let deadline = tokio::time::Instant::now() + timeout;
        while !root.exists() {
            if tokio::time::Instant::now() >= deadline {
                return Err(IndexError::TimedOutWaitingForWorkspace {
                    path: root.to_path_buf(),
                    waited_secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }

    /// Traverse the tree rooted at `root` and produce every chunk.
    ///
    /// Output order is deterministic: files in sorted path order, windows in
    /// ordinal order. An unreadable file aborts the whole run.
    pub fn generate_chunks(&self, root: &Path) -> Result<Vec<Chunk>, IndexError> {
        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| !is_ignored(entry.path()))
            .map(|entry| entry.into_path())
            .collect();
        files.sort();

        let mut chunks = Vec::new();
        for file in &files {
            let content = std::fs::read_to_string(file).map_err(|source| {
                IndexError::FileReadFailed { path: file.clone(), source }
            })?;
            let rel = file
                .strip_prefix(root)
                .unwrap_or(file)
                .to_string_lossy()
                .to_string();
            chunks.extend(self.chunk_file(&rel, &content));
        }

        debug!(count = chunks.len(), root = %root.display(), "generated chunks");
        Ok(chunks)
    }

    fn chunk_file(&self, source_path: &str, content: &str) -> Vec<Chunk> {
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Vec::new();
        }
        lines
            .chunks(self.chunk_size)
            .enumerate()
            .map(|(ordinal, window)| Chunk {
                source_path: source_path.to_string(),
                ordinal,
                text: format!("####### {} #######\n{}", source_path, window.join("\n")),
            })
            .collect()
    }
}

/// Skip VCS metadata and build output. Everything else is read as text.
fn is_ignored(path: &Path) -> bool {
    path.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some(".git") | Some("node_modules") | Some("target")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_lines(dir: &Path, name: &str, count: usize) {
        let body: String = (0..count).map(|i| format!("line {}\n", i)).collect();
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn chunking_a_250_line_file_yields_three_windows() {
        let dir = tempfile::tempdir().unwrap();
        write_lines(dir.path(), "big.rs", 250);

        let chunks = Chunker::new(100).generate_chunks(dir.path()).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks.iter().map(|c| c.ordinal).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        // Window boundaries: [0,100), [100,200), [200,250)
        assert!(chunks[0].text.contains("line 0\n"));
        assert!(chunks[0].text.contains("line 99"));
        assert!(!chunks[0].text.contains("line 100\n"));
        assert!(chunks[1].text.contains("line 100\n"));
        assert!(chunks[1].text.contains("line 199"));
        assert!(chunks[2].text.contains("line 200\n"));
        assert!(chunks[2].text.ends_with("line 249"));
    }

    #[test]
    fn chunks_carry_the_source_path_header() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        write_lines(&dir.path().join("src"), "main.rs", 5);

        let chunks = Chunker::new(100).generate_chunks(dir.path()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.starts_with("####### src/main.rs #######\n"));
        assert_eq!(chunks[0].source_path, "src/main.rs");
    }

    #[test]
    fn chunking_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write_lines(dir.path(), "a.rs", 150);
        write_lines(dir.path(), "b.rs", 30);
        fs::create_dir(dir.path().join("nested")).unwrap();
        write_lines(&dir.path().join("nested"), "c.rs", 101);

        let chunker = Chunker::new(100);
        let first = chunker.generate_chunks(dir.path()).unwrap();
        let second = chunker.generate_chunks(dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2 + 1 + 2);
    }

    #[test]
    fn empty_files_produce_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("empty.rs"), "").unwrap();
        let chunks = Chunker::new(100).generate_chunks(dir.path()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn git_metadata_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git").join("HEAD"), "ref: main\n").unwrap();
        write_lines(dir.path(), "kept.rs", 3);

        let chunks = Chunker::new(100).generate_chunks(dir.path()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_path, "kept.rs");
    }

    #[tokio::test]
    async fn wait_for_root_times_out_with_distinct_error() {
        let chunker = Chunker::default();
        let missing = PathBuf::from("/definitely/not/a/real/path/mender-test");
        let err = chunker
            .wait_for_root(&missing, Duration::from_millis(150))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::TimedOutWaitingForWorkspace { .. }
        ));
    }

    #[tokio::test]
    async fn wait_for_root_returns_once_directory_appears() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("clone");
        let target_clone = target.clone();
        let creator = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            fs::create_dir(&target_clone).unwrap();
        });

        Chunker::default()
            .wait_for_root(&target, Duration::from_secs(5))
            .await
            .unwrap();
        creator.await.unwrap();
    }
}
