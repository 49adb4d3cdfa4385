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

//! Chat session persistence

use crate::error::{MemoryError, MemoryResult};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use kubememory_core::{ChatMessage, ChatSession};
use uuid::Uuid;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_session(&self, namespace: Option<String>) -> MemoryResult<ChatSession>;

    async fn session(&self, id: Uuid) -> MemoryResult<Option<ChatSession>>;

    /// Most recently updated first
    async fn sessions(&self) -> MemoryResult<Vec<ChatSession>>;

    async fn update_session(&self, session: &ChatSession) -> MemoryResult<()>;

    async fn delete_session(&self, id: Uuid) -> MemoryResult<bool>;

    /// Appends and bumps the session's `updated_at`
    async fn append(&self, message: ChatMessage) -> MemoryResult<()>;

    /// Chronological order
    async fn messages(&self, session: Uuid) -> MemoryResult<Vec<ChatMessage>>;
}

#[derive(Debug, Default)]
pub struct InMemoryChatStore {
    sessions: DashMap<Uuid, ChatSession>,
    messages: DashMap<Uuid, Vec<ChatMessage>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn create_session(&self, namespace: Option<String>) -> MemoryResult<ChatSession> {
        let session = ChatSession::new(namespace);
        self.sessions.insert(session.id, session.clone());
        self.messages.insert(session.id, Vec::new());
        Ok(session)
    }

    async fn session(&self, id: Uuid) -> MemoryResult<Option<ChatSession>> {
        Ok(self.sessions.get(&id).map(|s| s.clone()))
    }

    async fn sessions(&self) -> MemoryResult<Vec<ChatSession>> {
        let mut sessions: Vec<ChatSession> = self.sessions.iter().map(|s| s.clone()).collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn update_session(&self, session: &ChatSession) -> MemoryResult<()> {
        match self.sessions.get_mut(&session.id) {
            Some(mut existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(MemoryError::NotFound(format!("chat session {}", session.id))),
        }
    }

    async fn delete_session(&self, id: Uuid) -> MemoryResult<bool> {
        self.messages.remove(&id);
        Ok(self.sessions.remove(&id).is_some())
    }

    async fn append(&self, message: ChatMessage) -> MemoryResult<()> {
        let Some(mut session) = self.sessions.get_mut(&message.session_id) else {
            return Err(MemoryError::NotFound(format!(
                "chat session {}",
                message.session_id
            )));
        };
        session.updated_at = Utc::now();
        drop(session);

        self.messages
            .entry(message.session_id)
            .or_default()
            .push(message);
        Ok(())
    }

    async fn messages(&self, session: Uuid) -> MemoryResult<Vec<ChatMessage>> {
        Ok(self
            .messages
            .get(&session)
            .map(|m| m.clone())
            .unwrap_or_default())
    }
}
