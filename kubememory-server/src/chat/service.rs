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

//! Session-backed chat: history reconstruction and message persistence
//! around [`ConversationalAgent::run_turn`].

use super::agent::{ConversationalAgent, TurnOutcome};
use super::ChatEvent;
use crate::llm::Message;
use kubememory_core::{truncate_chars, ChatMessage, ChatRole, ChatSession, KmResult, KubeMemoryError};
use kubememory_memory::{ChatStore, MemoryError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Stored tool results keep a short `content`; the full text is in `tool_output`
const TOOL_RESULT_CONTENT_CHARS: usize = 500;

pub struct ChatService {
    store: Arc<dyn ChatStore>,
    agent: Arc<ConversationalAgent>,
}

impl ChatService {
    pub fn new(store: Arc<dyn ChatStore>, agent: Arc<ConversationalAgent>) -> Self {
        Self { store, agent }
    }

    pub async fn create_session(&self, namespace: Option<String>) -> KmResult<ChatSession> {
        let session = self
            .store
            .create_session(namespace)
            .await
            .map_err(MemoryError::into_store)?;
        info!(session = %session.id, namespace = %session.namespace, "chat session created");
        Ok(session)
    }

    pub async fn sessions(&self) -> KmResult<Vec<ChatSession>> {
        self.store.sessions().await.map_err(MemoryError::into_store)
    }

    pub async fn session(&self, id: Uuid) -> KmResult<ChatSession> {
        self.store
            .session(id)
            .await
            .map_err(MemoryError::into_store)?
            .ok_or_else(|| KubeMemoryError::NotFound(format!("chat session {}", id)))
    }

    pub async fn messages(&self, id: Uuid) -> KmResult<Vec<ChatMessage>> {
        self.session(id).await?;
        self.store.messages(id).await.map_err(MemoryError::into_store)
    }

    pub async fn delete_session(&self, id: Uuid) -> KmResult<bool> {
        self.store
            .delete_session(id)
            .await
            .map_err(MemoryError::into_store)
    }

    /// Send one user message and stream the reply over `tx`.
    ///
    /// Unknown sessions and blank messages fail before any event is sent.
    /// Persistence failures after the turn are logged, not returned, since
    /// the caller already received the reply.
    pub async fn send(
        &self,
        session_id: Uuid,
        user_message: &str,
        tx: mpsc::Sender<ChatEvent>,
    ) -> KmResult<TurnOutcome> {
        let user_message = user_message.trim();
        if user_message.is_empty() {
            return Err(KubeMemoryError::Validation("message must not be empty".into()));
        }

        let mut session = self.session(session_id).await?;
        let history = self.history(session_id).await?;

        if session.title.is_empty() {
            session.auto_title(user_message);
            self.store
                .update_session(&session)
                .await
                .map_err(MemoryError::into_store)?;
        }
        self.store
            .append(ChatMessage::new(session_id, ChatRole::User, user_message))
            .await
            .map_err(MemoryError::into_store)?;

        let outcome = self
            .agent
            .run_turn(history, user_message, session.scoped_namespace(), tx)
            .await;

        if let Err(e) = self.persist_turn(session_id, &outcome).await {
            warn!(session = %session_id, "chat turn not fully persisted: {}", e);
        }
        Ok(outcome)
    }

    /// Stored messages as model turns; tool-call rows are bookkeeping only.
    async fn history(&self, session_id: Uuid) -> KmResult<Vec<Message>> {
        let stored = self
            .store
            .messages(session_id)
            .await
            .map_err(MemoryError::into_store)?;

        Ok(stored
            .into_iter()
            .filter_map(|m| match m.role {
                ChatRole::User => Some(Message::user(m.content)),
                ChatRole::Assistant => Some(Message::assistant(m.content)),
                ChatRole::ToolResult => {
                    let name = m.tool_name.unwrap_or_default();
                    let output = m.tool_output.unwrap_or(m.content);
                    Some(Message::tool(&name, output))
                }
                ChatRole::ToolCall => None,
            })
            .collect())
    }

    async fn persist_turn(&self, session_id: Uuid, outcome: &TurnOutcome) -> Result<(), MemoryError> {
        for run in &outcome.tool_runs {
            let mut call = ChatMessage::new(session_id, ChatRole::ToolCall, format!("Calling {}", run.name))
                .latency(run.latency_ms);
            call.tool_name = Some(run.name.clone());
            call.tool_input = Some(run.arguments.clone());
            self.store.append(call).await?;

            let mut result = ChatMessage::tool(
                session_id,
                &run.name,
                run.arguments.clone(),
                &run.output,
                run.success,
            )
            .latency(run.latency_ms);
            result.content = truncate_chars(&run.output, TOOL_RESULT_CONTENT_CHARS).to_string();
            self.store.append(result).await?;
        }

        if outcome.error.is_none() && !outcome.cancelled {
            let reply = ChatMessage::new(session_id, ChatRole::Assistant, outcome.content.clone())
                .latency(outcome.latency_ms);
            self.store.append(reply).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AnalysisPipeline;
    use crate::llm::{InferenceClient, ModelSelection, ScriptedClient, ScriptedTurn, ToolCall};
    use crate::tool_registry::ToolRegistry;
    use kubememory_memory::{
        CausalGraph, FileIncidentStore, HashEmbedder, InMemoryChatStore, InMemoryGraphStore,
        InMemoryVectorStore, MemoryConfig, SimilaritySearch,
    };
    use serde_json::json;
    use std::time::Duration;

    fn service(llm: Arc<ScriptedClient>) -> (ChatService, Arc<InMemoryChatStore>) {
        let config = MemoryConfig::default();
        let search = Arc::new(SimilaritySearch::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashEmbedder::new(64)),
            Duration::from_secs(1),
        ));
        let graph = Arc::new(CausalGraph::new(Arc::new(InMemoryGraphStore::new()), &config));
        let llm: Arc<dyn InferenceClient> = llm;
        let model = ModelSelection::Model("scripted:latest".into());
        let pipeline = Arc::new(AnalysisPipeline::new(
            search.clone(),
            graph.clone(),
            llm.clone(),
            model.clone(),
            Duration::from_secs(1),
        ));
        let tools = ToolRegistry::new(search, graph, Arc::new(FileIncidentStore::in_memory()), pipeline)
            .unwrap();
        let agent = Arc::new(ConversationalAgent::new(
            llm,
            Arc::new(tools),
            model,
            10,
            Duration::from_secs(1),
        ));
        let store = Arc::new(InMemoryChatStore::new());
        (ChatService::new(store.clone(), agent), store)
    }

    #[tokio::test]
    async fn test_turn_is_persisted_with_tool_rows() {
        let llm = Arc::new(
            ScriptedClient::new()
                .turn(ScriptedTurn::Tools(
                    String::new(),
                    vec![ToolCall::new("get_cluster_patterns", json!({}))],
                ))
                .turn(ScriptedTurn::Reply("No recurring patterns yet.".into())),
        );
        let (service, store) = service(llm);
        let session = service.create_session(Some("prod".into())).await.unwrap();

        let (tx, mut rx) = mpsc::channel(64);
        let outcome = service
            .send(session.id, "what fails most in prod?", tx)
            .await
            .unwrap();
        while rx.recv().await.is_some() {}

        assert_eq!(outcome.tools_used(), vec!["get_cluster_patterns".to_string()]);
        let roles: Vec<ChatRole> = store
            .messages(session.id)
            .await
            .unwrap()
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(
            roles,
            vec![ChatRole::User, ChatRole::ToolCall, ChatRole::ToolResult, ChatRole::Assistant]
        );

        let titled = service.session(session.id).await.unwrap();
        assert_eq!(titled.title, "what fails most in prod?");
    }

    #[tokio::test]
    async fn test_history_replayed_on_next_turn() {
        let llm = Arc::new(
            ScriptedClient::new()
                .turn(ScriptedTurn::Reply("Hello there, ask me about the cluster any time you like. I keep its incident memory.".into()))
                .turn(ScriptedTurn::Reply("Still here and ready to look at incidents with you whenever needed, just ask away.".into())),
        );
        let (service, _store) = service(llm.clone());
        let session = service.create_session(None).await.unwrap();

        for text in ["hello", "thanks"] {
            let (tx, _rx) = mpsc::channel(64);
            service.send(session.id, text, tx).await.unwrap();
        }

        let transcripts = llm.transcripts();
        assert_eq!(transcripts.len(), 2);
        // system, user, assistant, user
        assert_eq!(transcripts[1].len(), 4);
        assert_eq!(transcripts[1][1].content, "hello");
        assert_eq!(transcripts[1][3].content, "thanks");
    }

    #[tokio::test]
    async fn test_unknown_session_and_blank_message() {
        let (service, _store) = service(Arc::new(ScriptedClient::new()));
        let (tx, _rx) = mpsc::channel(8);
        let err = service.send(Uuid::new_v4(), "show incidents", tx).await.unwrap_err();
        assert!(matches!(err, KubeMemoryError::NotFound(_)));

        let session = service.create_session(None).await.unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let err = service.send(session.id, "   ", tx).await.unwrap_err();
        assert!(matches!(err, KubeMemoryError::Validation(_)));
    }
}
