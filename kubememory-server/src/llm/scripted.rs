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

use super::{ChatChunk, ChunkStream, InferenceClient, LlmError, Message, ToolCall, ToolSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// One canned chat round
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Streamed word by word, no tool calls
    Reply(String),
    /// Optional text followed by tool calls
    Tools(String, Vec<ToolCall>),
    /// The request fails before streaming starts
    Fail(String),
}

/// Deterministic [`InferenceClient`] that replays queued responses.
///
/// Chat rounds pop from the turn queue and fall back to the repeat turn
/// (or an empty reply) once it is drained. Completions behave the same way.
pub struct ScriptedClient {
    models: Vec<String>,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    repeat: Option<ScriptedTurn>,
    completions: Mutex<VecDeque<Result<String, String>>>,
    chat_calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    transcripts: Mutex<Vec<Vec<Message>>>,
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            models: vec!["scripted:latest".to_string()],
            turns: Mutex::new(VecDeque::new()),
            repeat: None,
            completions: Mutex::new(VecDeque::new()),
            chat_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            transcripts: Mutex::new(Vec::new()),
        }
    }

    /// An endpoint that lists no models
    pub fn without_models(mut self) -> Self {
        self.models.clear();
        self
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn turn(self, turn: ScriptedTurn) -> Self {
        self.turns.lock().push_back(turn);
        self
    }

    /// Returned for every chat round once the queue is empty
    pub fn repeat(mut self, turn: ScriptedTurn) -> Self {
        self.repeat = Some(turn);
        self
    }

    pub fn completion(self, text: impl Into<String>) -> Self {
        self.completions.lock().push_back(Ok(text.into()));
        self
    }

    pub fn failing_completion(self, error: impl Into<String>) -> Self {
        self.completions.lock().push_back(Err(error.into()));
        self
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    /// Every prompt passed to `complete`, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Message lists passed to `chat_stream`, in call order
    pub fn transcripts(&self) -> Vec<Vec<Message>> {
        self.transcripts.lock().clone()
    }
}

#[async_trait]
impl InferenceClient for ScriptedClient {
    async fn complete(&self, _model: &str, prompt: &str, _timeout: Duration) -> Result<String, LlmError> {
        self.prompts.lock().push(prompt.to_string());
        match self.completions.lock().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(LlmError::Endpoint(e)),
            None => Err(LlmError::Endpoint("no scripted completion".into())),
        }
    }

    async fn chat_stream(
        &self,
        _model: &str,
        messages: &[Message],
        _tools: &[ToolSpec],
        _timeout: Duration,
    ) -> Result<ChunkStream, LlmError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.transcripts.lock().push(messages.to_vec());

        let turn = self
            .turns
            .lock()
            .pop_front()
            .or_else(|| self.repeat.clone())
            .unwrap_or_else(|| ScriptedTurn::Reply(String::new()));

        let mut chunks: Vec<ChatChunk> = Vec::new();
        match turn {
            ScriptedTurn::Fail(e) => return Err(LlmError::Endpoint(e)),
            ScriptedTurn::Reply(text) => {
                chunks.extend(text.split_inclusive(' ').map(|w| ChatChunk::Delta(w.to_string())));
            }
            ScriptedTurn::Tools(text, calls) => {
                if !text.is_empty() {
                    chunks.push(ChatChunk::Delta(text));
                }
                chunks.push(ChatChunk::ToolCalls(calls));
            }
        }
        chunks.push(ChatChunk::Done);

        let (tx, rx) = mpsc::channel(chunks.len());
        for chunk in chunks {
            // Capacity matches the chunk count
            let _ = tx.try_send(Ok(chunk));
        }
        Ok(rx)
    }

    async fn list_models(&self, _timeout: Duration) -> Result<Vec<String>, LlmError> {
        Ok(self.models.clone())
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_streams_words_in_order() {
        let client = ScriptedClient::new().turn(ScriptedTurn::Reply("two OOM kills".into()));
        let mut rx = client
            .chat_stream("m", &[], &[], Duration::from_secs(1))
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(Ok(chunk)) = rx.recv().await {
            match chunk {
                ChatChunk::Delta(d) => text.push_str(&d),
                ChatChunk::Done => break,
                ChatChunk::ToolCalls(_) => panic!("no tools scripted"),
            }
        }
        assert_eq!(text, "two OOM kills");
        assert_eq!(client.chat_calls(), 1);
    }

    #[tokio::test]
    async fn test_completion_queue_drains_to_error() {
        let client = ScriptedClient::new().completion("ROOT_CAUSE: x");
        assert!(client.complete("m", "p", Duration::from_secs(1)).await.is_ok());
        assert!(client.complete("m", "p", Duration::from_secs(1)).await.is_err());
        assert_eq!(client.prompts().len(), 2);
    }
}
