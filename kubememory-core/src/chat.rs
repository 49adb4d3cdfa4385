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

//! Chat session and message log.

use crate::incident::truncate_chars;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace scope meaning "whole cluster"
pub const ALL_NAMESPACES: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    ToolCall,
    ToolResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub title: String,
    /// Namespace injected into tool calls, or `all`
    pub namespace: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(namespace: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: String::new(),
            namespace: namespace
                .filter(|ns| !ns.trim().is_empty())
                .unwrap_or_else(|| ALL_NAMESPACES.to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Namespace to inject into tool arguments, `None` for cluster-wide.
    pub fn scoped_namespace(&self) -> Option<&str> {
        if self.namespace == ALL_NAMESPACES {
            None
        } else {
            Some(&self.namespace)
        }
    }

    /// Set the title from the first user message if none was given.
    pub fn auto_title(&mut self, first_message: &str) {
        if self.title.is_empty() {
            self.title = truncate_chars(first_message.trim(), 60).to_string();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_output: Option<String>,
    #[serde(default)]
    pub tool_success: Option<bool>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(session_id: Uuid, role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role,
            content: content.into(),
            tool_name: None,
            tool_input: None,
            tool_output: None,
            tool_success: None,
            latency_ms: None,
            created_at: Utc::now(),
        }
    }

    pub fn tool(
        session_id: Uuid,
        name: &str,
        input: serde_json::Value,
        output: &str,
        success: bool,
    ) -> Self {
        let mut msg = Self::new(session_id, ChatRole::ToolResult, output);
        msg.tool_name = Some(name.to_string());
        msg.tool_input = Some(input);
        msg.tool_output = Some(output.to_string());
        msg.tool_success = Some(success);
        msg
    }

    pub fn latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_defaults_to_all_namespaces() {
        let session = ChatSession::new(None);
        assert_eq!(session.namespace, ALL_NAMESPACES);
        assert!(session.scoped_namespace().is_none());

        let scoped = ChatSession::new(Some("prod".into()));
        assert_eq!(scoped.scoped_namespace(), Some("prod"));
    }

    #[test]
    fn test_auto_title_only_once() {
        let mut session = ChatSession::new(None);
        let long = "why does payment-api keep getting OOMKilled every night around two am in prod";
        session.auto_title(long);
        assert_eq!(session.title.chars().count(), 60);
        session.auto_title("second message");
        assert!(session.title.starts_with("why does payment-api"));
    }
}
