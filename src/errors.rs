//! Typed error hierarchy for the mender agent.
//!
//! Three top-level enums cover the three subsystems:
//! - `IndexError` — chunking and embedding-store failures
//! - `WorkspaceError` — clone, branch, and push failures
//! - `PipelineError` — agent-loop and transform failures

use thiserror::Error;

/// Errors from repository indexing (chunker + embedding store).
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Timed out after {waited_secs}s waiting for workspace at {path}")]
    TimedOutWaitingForWorkspace { path: std::path::PathBuf, waited_secs: u64 },

    #[error("Failed to read {path}: {source}")]
    FileReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Embedding provider error: {0}")]
    Provider(String),

    #[error("Embedding provider returned {got} vectors for {expected} inputs")]
    BatchShapeMismatch { expected: usize, got: usize },

    #[error("Embedding dimensionality mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the workspace manager (clone, branch, push, cleanup).
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Failed to allocate temporary directory: {0}")]
    TempDirFailed(#[source] std::io::Error),

    #[error("git {command} exited with code {code:?}")]
    GitNonZeroExit { command: String, code: Option<i32> },

    #[error("Failed to spawn git: {0}")]
    GitSpawnFailed(#[source] std::io::Error),

    #[error("Clone produced no working directory")]
    CloneFailed,
}

/// Errors from pipeline execution (agent loop, structural transform).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Completion provider failed after {attempts} attempts: {message}")]
    ProviderExhausted { attempts: u32, message: String },

    #[error("Model returned an empty final response")]
    EmptyResponse,

    #[error("Structural transform could not parse review output: {0}")]
    TransformFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_out_error_carries_path_and_duration() {
        let err = IndexError::TimedOutWaitingForWorkspace {
            path: std::path::PathBuf::from("/tmp/clone-target"),
            waited_secs: 30,
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/clone-target"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn dimension_mismatch_is_matchable() {
        let err = IndexError::DimensionMismatch { expected: 768, got: 384 };
        match err {
            IndexError::DimensionMismatch { expected, got } => {
                assert_eq!(expected, 768);
                assert_eq!(got, 384);
            }
            _ => panic!("Expected DimensionMismatch"),
        }
    }

    #[test]
    fn workspace_git_error_includes_command() {
        let err = WorkspaceError::GitNonZeroExit {
            command: "push".to_string(),
            code: Some(128),
        };
        assert!(err.to_string().contains("push"));
        assert!(err.to_string().contains("128"));
    }

    #[test]
    fn transform_failure_is_distinct_from_provider_failure() {
        let transform = PipelineError::TransformFailed("expected array".into());
        let provider = PipelineError::ProviderExhausted {
            attempts: 3,
            message: "timeout".into(),
        };
        assert!(matches!(transform, PipelineError::TransformFailed(_)));
        assert!(!matches!(provider, PipelineError::TransformFailed(_)));
    }

    #[test]
    fn all_error_types_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&IndexError::Provider("x".into()));
        assert_std_error(&WorkspaceError::CloneFailed);
        assert_std_error(&PipelineError::EmptyResponse);
    }
}
