//! Message classification: decide what a triggering comment asks for.

use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::llm::client::{complete_plain, CompletionBackend};
use crate::llm::prompts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "FEATURE")]
    Feature,
    #[serde(rename = "REVIEW")]
    Review,
    #[serde(rename = "NONE")]
    None,
}

/// The parsed intent of a user comment. For `None`, `message` carries a
/// user-facing capability explanation instead of an acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub message: String,
}

pub async fn classify_message(
    backend: &dyn CompletionBackend,
    comment: &str,
) -> Result<ActionRequest, PipelineError> {
    let response = complete_plain(backend, prompts::MESSAGE_PARSE, comment).await?;
    parse_action(&response)
}

fn parse_action(response: &str) -> Result<ActionRequest, PipelineError> {
    let candidate = extract_json_object(response)
        .ok_or_else(|| PipelineError::TransformFailed("no JSON object in response".to_string()))?;
    serde_json::from_str(&candidate).map_err(|e| PipelineError::TransformFailed(e.to_string()))
}

/// Extract the outermost JSON object from text using brace counting.
fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
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
            '{' => depth += 1,
            '}' => {
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
