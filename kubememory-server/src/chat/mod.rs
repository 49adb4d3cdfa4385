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

//! Conversational incident assistant.
//!
//! [`ConversationalAgent`] runs one bounded, tool-augmented turn and
//! streams [`ChatEvent`]s over a channel. [`ChatService`] wraps it with
//! session persistence.

mod agent;
mod service;

pub use agent::{ConversationalAgent, ToolRun, TurnOutcome, FALLBACK_SEARCH_LIMIT, SYSTEM_PROMPT};
pub use service::ChatService;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Streamed to the caller during a turn.
///
/// Every turn ends with exactly one `Done` or `Error`, unless the
/// receiver is dropped first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    TokenDelta {
        content: String,
    },
    ToolInvoked {
        name: String,
        arguments: Value,
    },
    ToolResult {
        name: String,
        /// Truncated to 500 characters
        output: String,
        success: bool,
        latency_ms: u64,
    },
    Done {
        content: String,
        tools_used: Vec<String>,
        latency_ms: u64,
    },
    Error {
        message: String,
    },
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Done { .. } | ChatEvent::Error { .. })
    }
}
