// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Bounded tool-calling chat loop.
//!
//! ```text
//! AwaitModel ──▶ tool calls? ──yes──▶ ExecuteTools ──┐
//!     ▲              │                               │
//!     │              no                              │
//!     │              ▼                               │
//!     │            Done                              │
//!     └──────────────────────────────────────────────┘
//! ```
//!
//! At most `max_rounds` inference round-trips per user turn. Dropping the
//! event receiver abandons the in-flight inference call or tool execution.

use super::ChatEvent;
use crate::llm::{ChatChunk, InferenceClient, LlmError, Message, ModelSelection, ToolCall, ToolSpec};
use crate::tool_registry::{ToolName, ToolRegistry};
use kubememory_core::truncate_chars;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const SYSTEM_PROMPT: &str = "You are the KubeMemory cluster assistant, an expert SRE with access to \
THIS cluster's incident history, causal graph and fix database through tools.

When to use each tool:
- search_incident_history: broad or vague questions such as \"recent incidents\", \"what happened\", \"any OOMKills\", \"incidents in production\". Only needs \"query\" (the user's question in natural language).
- get_cluster_patterns: \"patterns\", \"what fails most\", \"recurring issues\", \"deploy crashes\".
- get_top_blast_radius_services: \"which services cause the most blast radius\", \"most impactful when they fail\". No pod name needed.
- get_blast_radius: what breaks when ONE named pod fails. Requires pod_name and namespace.
- get_pod_history: incident timeline for ONE named pod. Requires pod_name and namespace.
- analyze_incident: root cause and recommendation for a named pod. Requires pod_name and namespace.
- risk_check: pre-deploy risk for a service. Requires service_name and namespace.
- get_graph_context: knowledge graph summary for a namespace.

Rules:
1. Use tools before answering; never guess from general knowledge.
2. Never call get_blast_radius, get_pod_history or analyze_incident without a specific pod name.
3. If a tool finds nothing, say so and suggest narrowing the query to a namespace or pod, or ingesting more incidents.
4. Answer concisely and summarize tool results for the user.";

/// Content shorter than this on the first round counts as a non-answer
const MIN_CONTENT_CHARS: usize = 80;
const MIN_QUESTION_CHARS: usize = 3;
const TOOL_RESULT_EVENT_CHARS: usize = 500;
pub const FALLBACK_SEARCH_LIMIT: u64 = 8;

const INCIDENT_KEYWORDS: [&str; 13] = [
    "incident", "history", "crash", "pattern", "what", "show", "recent", "oom", "error", "fail",
    "cluster", "namespace", "pod",
];

/// One tool execution within a turn, kept for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRun {
    pub name: String,
    pub arguments: Value,
    pub output: String,
    pub success: bool,
    pub latency_ms: u64,
}

/// What a turn produced, mirroring the events that were sent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub content: String,
    pub tool_runs: Vec<ToolRun>,
    pub rounds: usize,
    pub latency_ms: u64,
    /// Set when the turn ended with an `Error` event
    pub error: Option<String>,
    /// Receiver dropped before a terminal event
    pub cancelled: bool,
}

impl TurnOutcome {
    pub fn tools_used(&self) -> Vec<String> {
        self.tool_runs.iter().map(|r| r.name.clone()).collect()
    }
}

enum RoundError {
    Cancelled,
    Llm(LlmError),
}

impl From<LlmError> for RoundError {
    fn from(e: LlmError) -> Self {
        RoundError::Llm(e)
    }
}

pub struct ConversationalAgent {
    llm: Arc<dyn InferenceClient>,
    tools: Arc<ToolRegistry>,
    model: ModelSelection,
    specs: Vec<ToolSpec>,
    max_rounds: usize,
    timeout: Duration,
}

impl ConversationalAgent {
    pub fn new(
        llm: Arc<dyn InferenceClient>,
        tools: Arc<ToolRegistry>,
        model: ModelSelection,
        max_rounds: usize,
        timeout: Duration,
    ) -> Self {
        let specs = tools.specs();
        Self {
            llm,
            tools,
            model,
            specs,
            max_rounds: max_rounds.max(1),
            timeout,
        }
    }

    pub fn model(&self) -> &ModelSelection {
        &self.model
    }

    pub fn system_prompt(session_namespace: Option<&str>) -> String {
        match session_namespace {
            Some(ns) => format!(
                "{}\n\nCurrent cluster namespace context: {}. Tool calls default to it unless the user names another namespace.",
                SYSTEM_PROMPT, ns
            ),
            None => format!(
                "{}\n\nCurrent cluster namespace context: all namespaces.",
                SYSTEM_PROMPT
            ),
        }
    }

    /// Run one user turn over `history` (prior user/assistant/tool turns,
    /// without the system prompt).
    pub async fn run_turn(
        &self,
        history: Vec<Message>,
        user_message: &str,
        session_namespace: Option<&str>,
        tx: mpsc::Sender<ChatEvent>,
    ) -> TurnOutcome {
        let start = Instant::now();
        let mut outcome = TurnOutcome::default();

        let Some(model) = self.model.model() else {
            let message = LlmError::NoModel.to_string();
            warn!("chat turn refused: {}", message);
            outcome.cancelled = !emit(&tx, ChatEvent::Error { message: message.clone() }).await;
            outcome.error = Some(message);
            return outcome;
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(Self::system_prompt(session_namespace)));
        messages.extend(history);
        messages.push(Message::user(user_message));

        for round in 1..=self.max_rounds {
            outcome.rounds = round;
            debug!(round, model, "chat round");

            let (content, mut calls) = match self.stream_round(model, &messages, &tx).await {
                Ok(reply) => reply,
                Err(RoundError::Cancelled) => {
                    info!(round, "chat turn cancelled by caller");
                    outcome.cancelled = true;
                    outcome.latency_ms = elapsed_ms(start);
                    return outcome;
                }
                Err(RoundError::Llm(e)) => {
                    warn!(round, "chat inference failed: {}", e);
                    let message = e.to_string();
                    outcome.cancelled = !emit(&tx, ChatEvent::Error { message: message.clone() }).await;
                    outcome.error = Some(message);
                    outcome.latency_ms = elapsed_ms(start);
                    return outcome;
                }
            };
            outcome.content = content;

            if round == 1 && calls.is_empty() && needs_fallback_search(&outcome.content, user_message) {
                info!("model skipped tools on a cluster question; searching history instead");
                calls.push(fallback_search(user_message));
                outcome.content.clear();
            }

            if calls.is_empty() {
                outcome.latency_ms = elapsed_ms(start);
                let done = ChatEvent::Done {
                    content: outcome.content.clone(),
                    tools_used: outcome.tools_used(),
                    latency_ms: outcome.latency_ms,
                };
                outcome.cancelled = !emit(&tx, done).await;
                return outcome;
            }

            messages.push(Message::assistant(outcome.content.clone()).with_tool_calls(calls.clone()));
            for call in calls {
                match self.run_tool(call, session_namespace, &tx).await {
                    Some(run) => {
                        messages.push(Message::tool(&run.name, run.output.clone()));
                        outcome.tool_runs.push(run);
                    }
                    None => {
                        info!(round, "chat turn cancelled during tool execution");
                        outcome.cancelled = true;
                        outcome.latency_ms = elapsed_ms(start);
                        return outcome;
                    }
                }
            }
        }

        warn!(max_rounds = self.max_rounds, "chat turn hit the round limit");
        outcome.latency_ms = elapsed_ms(start);
        let done = ChatEvent::Done {
            content: outcome.content.clone(),
            tools_used: outcome.tools_used(),
            latency_ms: outcome.latency_ms,
        };
        outcome.cancelled = !emit(&tx, done).await;
        outcome
    }

    /// Stream one inference round, forwarding text deltas as they arrive.
    async fn stream_round(
        &self,
        model: &str,
        messages: &[Message],
        tx: &mpsc::Sender<ChatEvent>,
    ) -> Result<(String, Vec<ToolCall>), RoundError> {
        let round = async {
            let mut rx = self
                .llm
                .chat_stream(model, messages, &self.specs, self.timeout)
                .await?;

            let mut content = String::new();
            let mut calls = Vec::new();
            while let Some(chunk) = rx.recv().await {
                match chunk? {
                    ChatChunk::Delta(delta) if delta.is_empty() => {}
                    ChatChunk::Delta(delta) => {
                        content.push_str(&delta);
                        if tx.send(ChatEvent::TokenDelta { content: delta }).await.is_err() {
                            return Err(RoundError::Cancelled);
                        }
                    }
                    ChatChunk::ToolCalls(batch) => calls.extend(batch),
                    ChatChunk::Done => break,
                }
            }
            Ok::<_, RoundError>((content, calls))
        };

        tokio::select! {
            _ = tx.closed() => Err(RoundError::Cancelled),
            result = round => result,
        }
    }

    /// `None` when the caller went away mid-execution.
    async fn run_tool(
        &self,
        call: ToolCall,
        session_namespace: Option<&str>,
        tx: &mpsc::Sender<ChatEvent>,
    ) -> Option<ToolRun> {
        let invoked = ChatEvent::ToolInvoked {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        };
        if !emit(tx, invoked).await {
            return None;
        }

        let started = Instant::now();
        let outcome = tokio::select! {
            _ = tx.closed() => return None,
            outcome = self.tools.execute(&call.name, call.arguments.clone(), session_namespace) => outcome,
        };
        let latency_ms = elapsed_ms(started);
        debug!(tool = %call.name, success = outcome.success, latency_ms, "tool finished");

        let result = ChatEvent::ToolResult {
            name: call.name.clone(),
            output: truncate_chars(&outcome.output, TOOL_RESULT_EVENT_CHARS).to_string(),
            success: outcome.success,
            latency_ms,
        };
        if !emit(tx, result).await {
            return None;
        }

        Some(ToolRun {
            name: call.name,
            arguments: call.arguments,
            output: outcome.output,
            success: outcome.success,
            latency_ms,
        })
    }
}

/// Small local models often answer cluster questions without calling a
/// tool; a short first reply to such a question triggers a history search.
fn needs_fallback_search(content: &str, user_message: &str) -> bool {
    let question = user_message.trim();
    if content.trim().chars().count() >= MIN_CONTENT_CHARS
        || question.chars().count() <= MIN_QUESTION_CHARS
    {
        return false;
    }
    let lower = question.to_lowercase();
    INCIDENT_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn fallback_search(user_message: &str) -> ToolCall {
    ToolCall::new(
        ToolName::SearchIncidentHistory.as_str(),
        json!({"query": user_message.trim(), "limit": FALLBACK_SEARCH_LIMIT}),
    )
}

/// `false` once the receiver is gone
async fn emit(tx: &mpsc::Sender<ChatEvent>, event: ChatEvent) -> bool {
    tx.send(event).await.is_ok()
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_heuristic() {
        assert!(needs_fallback_search("", "show recent incidents"));
        assert!(needs_fallback_search("I am not sure.", "Any OOM kills lately?"));
        assert!(!needs_fallback_search("", "hi"));
        assert!(!needs_fallback_search("", "good morning team"));

        let long_answer = "x".repeat(MIN_CONTENT_CHARS);
        assert!(!needs_fallback_search(&long_answer, "show recent incidents"));
    }

    #[test]
    fn test_fallback_call_shape() {
        let call = fallback_search("  what crashed in prod?  ");
        assert_eq!(call.name, "search_incident_history");
        assert_eq!(call.arguments, json!({"query": "what crashed in prod?", "limit": 8}));
    }

    #[test]
    fn test_system_prompt_carries_namespace() {
        assert!(ConversationalAgent::system_prompt(Some("prod")).contains("namespace context: prod."));
        assert!(ConversationalAgent::system_prompt(None).contains("all namespaces"));
    }
}
