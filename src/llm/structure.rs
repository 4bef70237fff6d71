//! Structural transform: free-text review in, typed issue list out.
//!
//! One non-agentic completion constrained to a fixed array shape. An empty
//! array is a meaningful "no issues found" result; only a response that
//! cannot be coerced into the schema is a failure.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::PipelineError;
use crate::llm::client::{complete_plain, CompletionBackend};
use crate::llm::prompts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    #[serde(rename = "SECURITY")]
    Security,
    #[serde(rename = "PERFORMANCE", alias = "PERFOMANCE")]
    Performance,
    #[serde(rename = "LOGIC")]
    Logic,
    #[serde(rename = "MISC")]
    Misc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
}

/// One structured finding from a review.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewIssue {
    pub file_name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub severity: Severity,
    pub snippet: String,
    pub fix: String,
}

/// Convert unstructured review text into the typed issue list.
pub async fn transform_review(
    backend: &dyn CompletionBackend,
    review_text: &str,
) -> Result<Vec<ReviewIssue>, PipelineError> {
    let response = complete_plain(backend, prompts::STRUCTURAL_TRANSFORM, review_text).await?;
    let issues = parse_issues(&response)?;
    debug!(count = issues.len(), "structural transform parsed issues");
    Ok(issues)
}

/// Parse the model's response as a JSON array of issues, salvaging an
/// embedded array when the model wrapped it in prose or markdown fences.
pub fn parse_issues(response: &str) -> Result<Vec<ReviewIssue>, PipelineError> {
    let candidate = extract_json_array(response)
        .ok_or_else(|| PipelineError::TransformFailed("no JSON array in response".to_string()))?;
    serde_json::from_str(&candidate).map_err(|e| PipelineError::TransformFailed(e.to_string()))
}

/// Extract the outermost JSON array from text using bracket counting,
/// skipping brackets inside string literals.
fn extract_json_array(text: &str) -> Option<String> {
    let start = text.find('[')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_ISSUE: &str = r#"[
        {
            "fileName": "src/auth.rs",
            "description": "Token check always succeeds",
            "type": "SECURITY",
            "severity": "HIGH",
            "snippet": "fn check(token: &str) -> bool { true }",
            "fix": "fn check(token: &str) -> bool { verify(token) }"
        }
    ]"#;

    #[test]
    fn parses_a_plain_issue_array() {
        let issues = parse_issues(ONE_ISSUE).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].file_name, "src/auth.rs");
        assert_eq!(issues[0].kind, IssueKind::Security);
        assert_eq!(issues[0].severity, Severity::High);
    }

    #[test]
    fn empty_array_is_a_valid_no_issues_result() {
        let issues = parse_issues("[]").unwrap();
        assert!(issues.is_empty());
    }

    #[test]
    fn salvages_an_array_wrapped_in_markdown() {
        let wrapped = format!("Here is the structured review:\n```json\n{}\n```\nDone.", ONE_ISSUE);
        let issues = parse_issues(&wrapped).unwrap();
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn garbage_is_a_transform_failure_not_an_empty_list() {
        let err = parse_issues("I could not produce JSON, sorry").unwrap_err();
        assert!(matches!(err, PipelineError::TransformFailed(_)));

        let err = parse_issues(r#"[{"fileName": 12}]"#).unwrap_err();
        assert!(matches!(err, PipelineError::TransformFailed(_)));
    }

    #[test]
    fn accepts_the_legacy_perfomance_spelling() {
        let json = r#"[{
            "fileName": "a.rs",
            "description": "slow loop",
            "type": "PERFOMANCE",
            "severity": "LOW",
            "snippet": "for ...",
            "fix": "iter()"
        }]"#;
        let issues = parse_issues(json).unwrap();
        assert_eq!(issues[0].kind, IssueKind::Performance);
    }

    #[test]
    fn brackets_inside_strings_do_not_confuse_extraction() {
        let json = r#"[{
            "fileName": "a.rs",
            "description": "uses arr[0] without a bounds check",
            "type": "LOGIC",
            "severity": "MEDIUM",
            "snippet": "let x = arr[0];",
            "fix": "let x = arr.first();"
        }]"#;
        let issues = parse_issues(json).unwrap();
        assert!(issues[0].snippet.contains("arr[0]"));
    }

    #[tokio::test]
    async fn transform_drives_a_single_plain_completion() {
        use crate::llm::agent::test_support::{text_turn, ScriptedBackend};
        let backend = ScriptedBackend::new(vec![text_turn("[]")]);
        let issues = transform_review(&backend, "no issues found").await.unwrap();
        assert!(issues.is_empty());

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0][0].role, "system");
        assert_eq!(requests[0][1].content.as_deref(), Some("no issues found"));
    }
}
