//! Tool gateway: the fixed capability set exposed to the model.
//!
//! Every operation is scoped beneath one immutable base path supplied at
//! construction, and every operation returns a descriptive string on both
//! success and failure. Failures become error-tagged observation text the
//! agent loop feeds back to the model so it can self-correct; nothing here
//! aborts a conversation.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::embeddings::EmbeddingStore;

/// Closed registry of tool identifiers. Dispatch is lookup + typed-argument
/// validation + invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    ReadFile,
    ReadDirectory,
    GetAllFiles,
    CreateDirectory,
    CreateFile,
    WriteFile,
    FindRelevantEmbeddings,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadFile => "ReadFile",
            Self::ReadDirectory => "ReadDirectory",
            Self::GetAllFiles => "GetAllFiles",
            Self::CreateDirectory => "CreateDirectory",
            Self::CreateFile => "CreateFile",
            Self::WriteFile => "WriteFile",
            Self::FindRelevantEmbeddings => "FindRelevantEmbeddings",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ReadFile" => Some(Self::ReadFile),
            "ReadDirectory" => Some(Self::ReadDirectory),
            "GetAllFiles" => Some(Self::GetAllFiles),
            "CreateDirectory" => Some(Self::CreateDirectory),
            "CreateFile" => Some(Self::CreateFile),
            "WriteFile" => Some(Self::WriteFile),
            "FindRelevantEmbeddings" => Some(Self::FindRelevantEmbeddings),
            _ => None,
        }
    }

    /// JSON-schema definition advertised to the model.
    pub fn definition(&self) -> ToolDefinition {
        let (description, parameters) = match self {
            Self::ReadFile => (
                "Reads a file and returns its content",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Path to the file, relative to the repository root"
                        }
                    },
                    "required": ["path"]
                }),
            ),
            Self::ReadDirectory => (
                "Lists the immediate entries of a directory",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Path to the directory, relative to the repository root (use \".\" for the root)"
                        }
                    },
                    "required": ["path"]
                }),
            ),
            Self::GetAllFiles => (
                "Returns the name and content of every immediate entry in a directory",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Path to the directory, relative to the repository root"
                        }
                    },
                    "required": ["path"]
                }),
            ),
            Self::CreateDirectory => (
                "Creates a directory (non-recursive; the parent must exist)",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Path to the directory to create, relative to the repository root"
                        }
                    },
                    "required": ["path"]
                }),
            ),
            Self::CreateFile => (
                "Creates a file with the given content",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Path to the file to create, relative to the repository root"
                        },
                        "content": {
                            "type": "string",
                            "description": "Content of the file"
                        }
                    },
                    "required": ["path", "content"]
                }),
            ),
            Self::WriteFile => (
                "Writes (overwrites) a file with the given content",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Path to the file to write, relative to the repository root"
                        },
                        "content": {
                            "type": "string",
                            "description": "New content of the file"
                        }
                    },
                    "required": ["path", "content"]
                }),
            ),
            Self::FindRelevantEmbeddings => (
                "Semantic search over the indexed codebase; returns relevant code sections",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The query to search for"
                        }
                    },
                    "required": ["query"]
                }),
            ),
        };
        ToolDefinition {
            tool_type: "function",
            function: FunctionDefinition {
                name: self.as_str(),
                description,
                parameters,
            },
        }
    }
}

/// Wire-format tool definition (OpenAI-compatible function schema).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FunctionDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: serde_json::Value,
}

/// The read-only capability subset (Plan and Review pipelines).
pub fn read_tools() -> Vec<ToolName> {
    vec![ToolName::ReadFile, ToolName::ReadDirectory, ToolName::GetAllFiles]
}

/// Read plus write/create capabilities (Generate pipeline).
pub fn write_tools() -> Vec<ToolName> {
    vec![
        ToolName::ReadFile,
        ToolName::ReadDirectory,
        ToolName::GetAllFiles,
        ToolName::WriteFile,
        ToolName::CreateFile,
        ToolName::CreateDirectory,
    ]
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct PathContentArgs {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct QueryArgs {
    query: String,
}

/// Semantic-search capability handed to a gateway when the pipeline's tool
/// subset includes `FindRelevantEmbeddings`.
#[derive(Clone)]
pub struct SearchContext {
    pub store: EmbeddingStore,
    pub repo_id: String,
}

/// Filesystem + search operations scoped beneath one base path.
pub struct ToolGateway {
    base: PathBuf,
    search: Option<SearchContext>,
}

impl ToolGateway {
    pub fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            search: None,
        }
    }

    pub fn with_search(mut self, search: SearchContext) -> Self {
        self.search = Some(search);
        self
    }

    /// The tools this gateway can actually serve, given the requested
    /// subset. `FindRelevantEmbeddings` is only advertised when a search
    /// context was attached.
    pub fn definitions(&self, subset: &[ToolName]) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = subset.iter().map(|t| t.definition()).collect();
        if self.search.is_some() {
            defs.push(ToolName::FindRelevantEmbeddings.definition());
        }
        defs
    }

    /// Dispatch one tool invocation. Always returns observation text; an
    /// unknown name, malformed arguments, or an I/O failure produce an
    /// error-tagged string rather than an error value.
    pub async fn execute(&self, name: &str, arguments: &str) -> String {
        let Some(tool) = ToolName::from_name(name) else {
            return format!("Error: Unknown tool '{}'", name);
        };
        debug!(tool = name, "dispatching tool call");
        match tool {
            ToolName::ReadFile => match parse_args::<PathArgs>(arguments) {
                Ok(args) => self.read_file(&args.path).await,
                Err(e) => e,
            },
            ToolName::ReadDirectory => match parse_args::<PathArgs>(arguments) {
                Ok(args) => self.read_directory(&args.path).await,
                Err(e) => e,
            },
            ToolName::GetAllFiles => match parse_args::<PathArgs>(arguments) {
                Ok(args) => self.get_all_files(&args.path).await,
                Err(e) => e,
            },
            ToolName::CreateDirectory => match parse_args::<PathArgs>(arguments) {
                Ok(args) => self.create_directory(&args.path).await,
                Err(e) => e,
            },
            ToolName::CreateFile => match parse_args::<PathContentArgs>(arguments) {
                Ok(args) => self.write_file(&args.path, &args.content, "created").await,
                Err(e) => e,
            },
            ToolName::WriteFile => match parse_args::<PathContentArgs>(arguments) {
                Ok(args) => self.write_file(&args.path, &args.content, "written").await,
                Err(e) => e,
            },
            ToolName::FindRelevantEmbeddings => match parse_args::<QueryArgs>(arguments) {
                Ok(args) => self.find_relevant(&args.query).await,
                Err(e) => e,
            },
        }
    }

    /// Join a model-supplied relative path under the base. Absolute paths
    /// and parent traversal are rejected so the gateway stays inside the
    /// workspace.
    fn resolve(&self, relative: &str) -> Result<PathBuf, String> {
        let candidate = Path::new(relative);
        if candidate.is_absolute() {
            return Err(format!("Error: Absolute paths are not allowed: {}", relative));
        }
        if candidate
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(format!("Error: Parent traversal is not allowed: {}", relative));
        }
        Ok(self.base.join(candidate))
    }

    async fn read_file(&self, path: &str) -> String {
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => content,
            Err(e) => format!("Error: Failed to read file - {}", e),
        }
    }

    async fn read_directory(&self, path: &str) -> String {
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        match tokio::fs::read_dir(&full).await {
            Ok(mut entries) => {
                let mut names = Vec::new();
                loop {
                    match entries.next_entry().await {
                        Ok(Some(entry)) => {
                            names.push(entry.file_name().to_string_lossy().to_string())
                        }
                        Ok(None) => break,
                        Err(e) => return format!("Error: Failed to read directory - {}", e),
                    }
                }
                names.sort();
                names.join("\n")
            }
            Err(e) => format!("Error: Failed to read directory - {}", e),
        }
    }

    /// Per-entry read failures degrade to error content for that entry;
    /// they never abort the batch.
    async fn get_all_files(&self, path: &str) -> String {
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let mut entries = match tokio::fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(e) => return format!("Error: Failed to get files - {}", e),
        };
        let mut files = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name().to_string_lossy().to_string();
                    let content = match tokio::fs::read_to_string(entry.path()).await {
                        Ok(content) => content,
                        Err(e) => format!("Error: {}", e),
                    };
                    files.push((name, content));
                }
                Ok(None) => break,
                Err(e) => return format!("Error: Failed to get files - {}", e),
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        files
            .into_iter()
            .map(|(name, content)| format!("=== {} ===\n{}", name, content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn create_directory(&self, path: &str) -> String {
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        match tokio::fs::create_dir(&full).await {
            Ok(()) => format!("Directory created: {}", path),
            Err(e) => format!("Error: Failed to create directory - {}", e),
        }
    }

    async fn write_file(&self, path: &str, content: &str, verb: &str) -> String {
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        match tokio::fs::write(&full, content).await {
            Ok(()) => format!("File {}: {}", verb, path),
            Err(e) => format!("Error: Failed to write file - {}", e),
        }
    }

    async fn find_relevant(&self, query: &str) -> String {
        let Some(search) = &self.search else {
            return "Error: Semantic search is not available for this task".to_string();
        };
        match search.store.search_default(&search.repo_id, query).await {
            Ok(hits) if hits.is_empty() => "No relevant content found".to_string(),
            Ok(hits) => hits.join("\n---\n"),
            Err(e) => format!("Error: Semantic search failed - {}", e),
        }
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, String> {
    serde_json::from_str(raw).map_err(|e| format!("Error: Invalid tool arguments - {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn gateway() -> (tempfile::TempDir, ToolGateway) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.txt"), "hello world").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("nested.txt"), "nested").unwrap();
        let gw = ToolGateway::new(dir.path());
        (dir, gw)
    }

    #[tokio::test]
    async fn read_file_returns_content() {
        let (_dir, gw) = gateway();
        let out = gw.execute("ReadFile", r#"{"path": "hello.txt"}"#).await;
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn read_missing_file_returns_error_tagged_string() {
        let (_dir, gw) = gateway();
        let out = gw.execute("ReadFile", r#"{"path": "nope.txt"}"#).await;
        assert!(out.starts_with("Error: Failed to read file"));
    }

    #[tokio::test]
    async fn read_directory_lists_entries() {
        let (_dir, gw) = gateway();
        let out = gw.execute("ReadDirectory", r#"{"path": "."}"#).await;
        assert!(out.contains("hello.txt"));
        assert!(out.contains("sub"));
    }

    #[tokio::test]
    async fn get_all_files_degrades_per_entry() {
        let (_dir, gw) = gateway();
        // "sub" is a directory, so its read fails per-entry while hello.txt
        // still comes through.
        let out = gw.execute("GetAllFiles", r#"{"path": "."}"#).await;
        assert!(out.contains("=== hello.txt ===\nhello world"));
        assert!(out.contains("=== sub ===\nError:"));
    }

    #[tokio::test]
    async fn create_directory_is_non_recursive() {
        let (dir, gw) = gateway();
        let out = gw
            .execute("CreateDirectory", r#"{"path": "a/b/c"}"#)
            .await;
        assert!(out.starts_with("Error: Failed to create directory"));

        let out = gw.execute("CreateDirectory", r#"{"path": "fresh"}"#).await;
        assert_eq!(out, "Directory created: fresh");
        assert!(dir.path().join("fresh").is_dir());
    }

    #[tokio::test]
    async fn write_file_overwrites() {
        let (dir, gw) = gateway();
        gw.execute(
            "WriteFile",
            r#"{"path": "hello.txt", "content": "replaced"}"#,
        )
        .await;
        assert_eq!(
            fs::read_to_string(dir.path().join("hello.txt")).unwrap(),
            "replaced"
        );
    }

    #[tokio::test]
    async fn create_file_writes_new_file() {
        let (dir, gw) = gateway();
        let out = gw
            .execute("CreateFile", r#"{"path": "new.rs", "content": "fn main() {}"}"#)
            .await;
        assert_eq!(out, "File created: new.rs");
        assert_eq!(
            fs::read_to_string(dir.path().join("new.rs")).unwrap(),
            "fn main() {}"
        );
    }

    #[tokio::test]
    async fn absolute_and_traversal_paths_are_rejected() {
        let (_dir, gw) = gateway();
        let out = gw.execute("ReadFile", r#"{"path": "/etc/passwd"}"#).await;
        assert!(out.starts_with("Error: Absolute paths"));

        let out = gw
            .execute("ReadFile", r#"{"path": "../outside.txt"}"#)
            .await;
        assert!(out.starts_with("Error: Parent traversal"));
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_are_observations() {
        let (_dir, gw) = gateway();
        let out = gw.execute("LaunchMissiles", "{}").await;
        assert_eq!(out, "Error: Unknown tool 'LaunchMissiles'");

        let out = gw.execute("ReadFile", "not json").await;
        assert!(out.starts_with("Error: Invalid tool arguments"));
    }

    #[tokio::test]
    async fn search_without_context_is_an_observation() {
        let (_dir, gw) = gateway();
        let out = gw
            .execute("FindRelevantEmbeddings", r#"{"query": "anything"}"#)
            .await;
        assert!(out.starts_with("Error: Semantic search is not available"));
    }

    #[test]
    fn tool_names_roundtrip() {
        for tool in [
            ToolName::ReadFile,
            ToolName::ReadDirectory,
            ToolName::GetAllFiles,
            ToolName::CreateDirectory,
            ToolName::CreateFile,
            ToolName::WriteFile,
            ToolName::FindRelevantEmbeddings,
        ] {
            assert_eq!(ToolName::from_name(tool.as_str()), Some(tool));
        }
        assert_eq!(ToolName::from_name("Nope"), None);
    }

    #[test]
    fn definitions_follow_the_requested_subset() {
        let dir = tempfile::tempdir().unwrap();
        let gw = ToolGateway::new(dir.path());
        let defs = gw.definitions(&read_tools());
        let names: Vec<&str> = defs.iter().map(|d| d.function.name).collect();
        assert_eq!(names, vec!["ReadFile", "ReadDirectory", "GetAllFiles"]);

        let defs = gw.definitions(&write_tools());
        assert_eq!(defs.len(), 6);
    }
}
