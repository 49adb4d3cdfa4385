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

//! Inference endpoint seam.
//!
//! The pipeline, runbook generator and chat loop only see
//! [`InferenceClient`]. [`OllamaClient`] talks to a local Ollama server;
//! [`ScriptedClient`] replays canned responses for offline runs and tests.

mod model;
mod ollama;
mod scripted;

pub use model::{resolve_model, select_model, ModelSelection};
pub use ollama::{OllamaClient, OllamaEmbedder};
pub use scripted::{ScriptedClient, ScriptedTurn};

use async_trait::async_trait;
use kubememory_core::KubeMemoryError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no chat model available; pull one, e.g. `ollama pull qwen2.5:0.5b`")]
    NoModel,

    #[error("inference endpoint error: {0}")]
    Endpoint(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("malformed response: {0}")]
    Protocol(String),
}

impl From<LlmError> for KubeMemoryError {
    fn from(e: LlmError) -> Self {
        KubeMemoryError::InferenceUnavailable(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `Role::Tool` messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn tool(name: &str, content: impl Into<String>) -> Self {
        Self {
            tool_name: Some(name.to_string()),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }
}

/// Function declaration offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub parameters: Value,
}

/// One increment of a streamed chat response
#[derive(Debug, Clone, PartialEq)]
pub enum ChatChunk {
    Delta(String),
    ToolCalls(Vec<ToolCall>),
    Done,
}

pub type ChunkStream = mpsc::Receiver<Result<ChatChunk, LlmError>>;

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Single prompt, full response text
    async fn complete(&self, model: &str, prompt: &str, timeout: Duration) -> Result<String, LlmError>;

    /// Streamed chat with optional tools. Dropping the receiver cancels the
    /// request.
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolSpec],
        timeout: Duration,
    ) -> Result<ChunkStream, LlmError>;

    /// Names of the models the endpoint can serve
    async fn list_models(&self, timeout: Duration) -> Result<Vec<String>, LlmError>;

    fn name(&self) -> &str;
}
