//! The bounded tool-calling conversation loop shared by every pipeline.
//!
//! Each round is one completion request. If the model answers with tool
//! calls, all sibling calls of that round are dispatched concurrently, the
//! results are collected, and then appended to history in call order before
//! the next request. Ordering across rounds is strict; ordering within a
//! round is concurrent but aggregated deterministically. The loop ends when
//! the model answers without tool calls, or when the round budget runs out,
//! in which case one final tool-less completion forces an answer.

use futures::future::join_all;
use tracing::{debug, info};

use crate::errors::PipelineError;
use crate::llm::client::{AssistantTurn, CompletionBackend, Message};
use crate::tools::{ToolGateway, ToolName};

pub struct AgentLoop<'a> {
    backend: &'a dyn CompletionBackend,
    gateway: &'a ToolGateway,
}

impl<'a> AgentLoop<'a> {
    pub fn new(backend: &'a dyn CompletionBackend, gateway: &'a ToolGateway) -> Self {
        Self { backend, gateway }
    }

    /// Drive the conversation to a final text answer.
    pub async fn run(
        &self,
        system: &str,
        user: &str,
        subset: &[ToolName],
        step_budget: usize,
    ) -> Result<String, PipelineError> {
        let tools = self.gateway.definitions(subset);
        let mut messages = vec![Message::system(system), Message::user(user)];

        for round in 0..step_budget {
            let turn = self.backend.complete(&messages, &tools).await?;

            if turn.tool_calls.is_empty() {
                let content = turn.content.unwrap_or_default();
                if content.trim().is_empty() {
                    return Err(PipelineError::EmptyResponse);
                }
                info!(rounds = round + 1, "agent loop finished");
                return Ok(content);
            }

            self.dispatch_round(&mut messages, turn).await;
        }

        // Budget exhausted: one final completion with no tools advertised,
        // so the model has to answer with what it gathered.
        info!(step_budget, "step budget exhausted, forcing final answer");
        messages.push(Message::user(
            "You have gathered enough context. Respond now with your final answer; \
             no more tool calls are available.",
        ));
        let turn = self.backend.complete(&messages, &[]).await?;
        turn.content
            .filter(|c| !c.trim().is_empty())
            .ok_or(PipelineError::EmptyResponse)
    }

    /// Execute all sibling tool calls of one round concurrently, then
    /// append the observations in call order.
    async fn dispatch_round(&self, messages: &mut Vec<Message>, turn: AssistantTurn) {
        let calls = turn.tool_calls.clone();
        debug!(count = calls.len(), "dispatching tool round");
        messages.push(Message::assistant(turn.content, turn.tool_calls));

        let futures = calls
            .iter()
            .map(|call| self.gateway.execute(&call.function.name, &call.function.arguments));
        let results = join_all(futures).await;

        for (call, result) in calls.iter().zip(results) {
            messages.push(Message::tool_result(&call.id, result));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::tools::read_tools;
    use std::fs;

    fn gateway_with_file() -> (tempfile::TempDir, ToolGateway) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.rs"), "pub fn answer() -> u32 { 42 }").unwrap();
        let gw = ToolGateway::new(dir.path());
        (dir, gw)
    }

    #[tokio::test]
    async fn terminates_on_final_text() {
        let (_dir, gw) = gateway_with_file();
        let backend = ScriptedBackend::new(vec![text_turn("the plan")]);
        let result = AgentLoop::new(&backend, &gw)
            .run("sys", "user", &read_tools(), 10)
            .await
            .unwrap();
        assert_eq!(result, "the plan");
    }

    #[tokio::test]
    async fn feeds_tool_results_back_as_observations() {
        let (_dir, gw) = gateway_with_file();
        let backend = ScriptedBackend::new(vec![
            tool_turn(vec![tool_call("c1", "ReadFile", r#"{"path": "lib.rs"}"#)]),
            text_turn("done"),
        ]);
        let result = AgentLoop::new(&backend, &gw)
            .run("sys", "user", &read_tools(), 10)
            .await
            .unwrap();
        assert_eq!(result, "done");

        // The second request must contain the assistant turn plus the tool
        // observation, in order.
        let requests = backend.requests.lock().unwrap();
        let second = &requests[1];
        assert_eq!(second[2].role, "assistant");
        assert_eq!(second[3].role, "tool");
        assert_eq!(second[3].tool_call_id.as_deref(), Some("c1"));
        assert!(second[3].content.as_deref().unwrap().contains("answer()"));
    }

    #[tokio::test]
    async fn failed_tool_call_continues_the_conversation() {
        let (_dir, gw) = gateway_with_file();
        let backend = ScriptedBackend::new(vec![
            tool_turn(vec![tool_call("c1", "ReadFile", r#"{"path": "missing.rs"}"#)]),
            text_turn("recovered"),
        ]);
        let result = AgentLoop::new(&backend, &gw)
            .run("sys", "user", &read_tools(), 10)
            .await
            .unwrap();
        assert_eq!(result, "recovered");

        let requests = backend.requests.lock().unwrap();
        let observation = requests[1][3].content.as_deref().unwrap();
        assert!(observation.starts_with("Error:"));
    }

    #[tokio::test]
    async fn sibling_calls_are_appended_in_call_order() {
        let (_dir, gw) = gateway_with_file();
        let backend = ScriptedBackend::new(vec![
            tool_turn(vec![
                tool_call("c1", "ReadDirectory", r#"{"path": "."}"#),
                tool_call("c2", "ReadFile", r#"{"path": "lib.rs"}"#),
            ]),
            text_turn("done"),
        ]);
        AgentLoop::new(&backend, &gw)
            .run("sys", "user", &read_tools(), 10)
            .await
            .unwrap();

        let requests = backend.requests.lock().unwrap();
        let second = &requests[1];
        assert_eq!(second[3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(second[4].tool_call_id.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn budget_exhaustion_forces_a_toolless_final_answer() {
        let (_dir, gw) = gateway_with_file();
        let backend = ScriptedBackend::new(vec![
            tool_turn(vec![tool_call("c1", "ReadFile", r#"{"path": "lib.rs"}"#)]),
            tool_turn(vec![tool_call("c2", "ReadFile", r#"{"path": "lib.rs"}"#)]),
            text_turn("forced answer"),
        ]);
        let result = AgentLoop::new(&backend, &gw)
            .run("sys", "user", &read_tools(), 2)
            .await
            .unwrap();
        assert_eq!(result, "forced answer");

        // Third request is the forced finalization: it carries the nudge
        // message at the end.
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        let last_msg = requests[2].last().unwrap();
        assert_eq!(last_msg.role, "user");
        assert!(last_msg.content.as_deref().unwrap().contains("final answer"));
    }

    #[tokio::test]
    async fn empty_final_response_is_an_error() {
        let (_dir, gw) = gateway_with_file();
        let backend = ScriptedBackend::new(vec![text_turn("   ")]);
        let err = AgentLoop::new(&backend, &gw)
            .run("sys", "user", &read_tools(), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptyResponse));
    }

    #[tokio::test]
    async fn provider_failure_surfaces_after_retries() {
        let (_dir, gw) = gateway_with_file();
        // Script is empty: the backend fails immediately.
        let backend = ScriptedBackend::new(vec![]);
        let err = AgentLoop::new(&backend, &gw)
            .run("sys", "user", &read_tools(), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ProviderExhausted { .. }));
    }
}
