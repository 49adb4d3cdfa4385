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
use futures::StreamExt;
use kubememory_memory::{Embedder, MemoryError, MemoryResult};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

// Ollama Provider (Local)
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(LlmError::Endpoint(format!("{} {}", status, body)))
    }
}

fn map_send_error(e: reqwest::Error, timeout: Duration) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(timeout.as_millis() as u64)
    } else {
        LlmError::Http(e)
    }
}

fn wire_message(message: &Message) -> Value {
    let mut wire = json!({"role": message.role, "content": message.content});
    if !message.tool_calls.is_empty() {
        wire["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|c| json!({"type": "function", "function": {"name": c.name, "arguments": c.arguments}}))
            .collect();
    }
    if let Some(name) = &message.tool_name {
        wire["tool_name"] = json!(name);
    }
    wire
}

fn wire_tool(tool: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

/// Accepts both object and JSON-string arguments; anything else becomes `{}`.
fn parse_tool_call(raw: &Value) -> Option<ToolCall> {
    let function = raw.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let arguments = match function.get("arguments") {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(s)) if !s.trim().is_empty() => {
            serde_json::from_str(s).unwrap_or_else(|_| json!({}))
        }
        _ => json!({}),
    };
    Some(ToolCall { name, arguments })
}

/// Byte buffer that yields complete NDJSON lines.
///
/// Lines are split on `\n` before decoding, so a multi-byte character that
/// straddles two network chunks is decoded whole.
#[derive(Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Next complete, non-empty line, or `None` until more bytes arrive.
    fn next_line(&mut self) -> Option<Result<String, LlmError>> {
        loop {
            let pos = self.bytes.iter().position(|b| *b == b'\n')?;
            let line: Vec<u8> = self.bytes.drain(..=pos).collect();
            let decoded = match std::str::from_utf8(&line) {
                Ok(text) => text.trim().to_string(),
                Err(e) => return Some(Err(LlmError::Protocol(format!("invalid UTF-8 in stream: {}", e)))),
            };
            if !decoded.is_empty() {
                return Some(Ok(decoded));
            }
        }
    }
}

/// Decode one NDJSON line of a streamed `/api/chat` response.
fn parse_line(line: &str) -> Result<Vec<ChatChunk>, LlmError> {
    let parsed: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return Ok(Vec::new()),
    };
    if let Some(error) = parsed.get("error").and_then(|e| e.as_str()) {
        return Err(LlmError::Endpoint(error.to_string()));
    }

    let mut chunks = Vec::new();
    if let Some(message) = parsed.get("message") {
        if let Some(content) = message.get("content").and_then(|c| c.as_str()) {
            if !content.is_empty() {
                chunks.push(ChatChunk::Delta(content.to_string()));
            }
        }
        if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
            let calls: Vec<ToolCall> = calls.iter().filter_map(parse_tool_call).collect();
            if !calls.is_empty() {
                chunks.push(ChatChunk::ToolCalls(calls));
            }
        }
    }
    if parsed.get("done").and_then(|d| d.as_bool()).unwrap_or(false) {
        chunks.push(ChatChunk::Done);
    }
    Ok(chunks)
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn complete(&self, model: &str, prompt: &str, timeout: Duration) -> Result<String, LlmError> {
        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": false,
        });

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(e, timeout))?;
        let json: Value = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| map_send_error(e, timeout))?;

        json["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::Protocol("missing message.content".into()))
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolSpec],
        timeout: Duration,
    ) -> Result<ChunkStream, LlmError> {
        let body = json!({
            "model": model,
            "messages": messages.iter().map(wire_message).collect::<Vec<_>>(),
            "tools": tools.iter().map(wire_tool).collect::<Vec<_>>(),
            "stream": true,
        });

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(e, timeout))?;
        let response = Self::check(response).await?;

        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = LineBuffer::default();
            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(map_send_error(e, timeout))).await;
                        return;
                    }
                };
                buffer.push(&bytes);

                while let Some(line) = buffer.next_line() {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    };
                    match parse_line(&line) {
                        Ok(chunks) => {
                            for chunk in chunks {
                                let done = chunk == ChatChunk::Done;
                                if tx.send(Ok(chunk)).await.is_err() {
                                    debug!("chat stream receiver dropped");
                                    return;
                                }
                                if done {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }
            // Body ended without a done marker
            let _ = tx.send(Ok(ChatChunk::Done)).await;
        });

        Ok(rx)
    }

    async fn list_models(&self, timeout: Duration) -> Result<Vec<String>, LlmError> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .header("Accept", "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_send_error(e, timeout))?;
        let json: Value = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| map_send_error(e, timeout))?;

        Ok(json["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str())
                    .filter(|name| !name.is_empty())
                    .map(|name| name.to_string())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "Ollama"
    }
}

/// Embeddings through Ollama's `/api/embeddings`
pub struct OllamaEmbedder {
    http: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
        let response = self
            .http
            .post(format!("{}/api/embeddings", self.base_url))
            .timeout(self.timeout)
            .json(&json!({"model": self.model, "prompt": text}))
            .send()
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(model = %self.model, %status, "embedding request rejected");
            return Err(MemoryError::Embedding(format!("Ollama returned {}", status)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        let embedding: Vec<f32> = json["embedding"]
            .as_array()
            .map(|values| values.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
            .unwrap_or_default();

        if embedding.is_empty() {
            return Err(MemoryError::Embedding("empty embedding".into()));
        }
        Ok(embedding)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn test_parse_line_content_and_done() {
        let chunks = parse_line(r#"{"message":{"role":"assistant","content":"OOM"},"done":false}"#).unwrap();
        assert_eq!(chunks, vec![ChatChunk::Delta("OOM".into())]);

        let chunks = parse_line(r#"{"message":{"role":"assistant","content":""},"done":true}"#).unwrap();
        assert_eq!(chunks, vec![ChatChunk::Done]);
    }

    #[test]
    fn test_parse_line_tool_calls_with_string_arguments() {
        let line = r#"{"message":{"content":"","tool_calls":[
            {"function":{"name":"get_blast_radius","arguments":"{\"pod_name\":\"api\"}"}},
            {"function":{"name":"get_cluster_patterns","arguments":{"limit":3}}}
        ]},"done":false}"#
            .replace('\n', "");
        let chunks = parse_line(&line).unwrap();
        match &chunks[0] {
            ChatChunk::ToolCalls(calls) => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].arguments["pod_name"], "api");
                assert_eq!(calls[1].arguments["limit"], 3);
            }
            other => panic!("unexpected chunk {:?}", other),
        }
    }

    #[test]
    fn test_line_buffer_joins_character_split_across_chunks() {
        let mut buffer = LineBuffer::default();
        let mut first = br#"{"message":{"content":"caf"#.to_vec();
        first.push(0xC3);
        buffer.push(&first);
        assert!(buffer.next_line().is_none());

        let mut second = vec![0xA9];
        second.extend_from_slice(b"\"},\"done\":false}\n\n{\"message\":{\"content\":\"\"},\"done\":true}\n");
        buffer.push(&second);

        let mut chunks = Vec::new();
        while let Some(line) = buffer.next_line() {
            chunks.extend(parse_line(&line.unwrap()).unwrap());
        }
        assert_eq!(chunks, vec![ChatChunk::Delta("café".into()), ChatChunk::Done]);
    }

    #[test]
    fn test_line_buffer_rejects_invalid_utf8_line() {
        let mut buffer = LineBuffer::default();
        buffer.push(&[b'{', 0xFF, b'}', b'\n']);
        assert!(matches!(buffer.next_line(), Some(Err(LlmError::Protocol(_)))));
        assert!(buffer.next_line().is_none());
    }

    #[test]
    fn test_parse_line_error_and_garbage() {
        assert!(parse_line(r#"{"error":"model not found"}"#).is_err());
        assert!(parse_line("not json").unwrap().is_empty());
    }

    #[test]
    fn test_wire_message_shapes() {
        let tool = wire_message(&Message::tool("risk_check", "LOW"));
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_name"], "risk_check");

        let assistant = wire_message(
            &Message::assistant("").with_tool_calls(vec![ToolCall::new("ping", json!({}))]),
        );
        assert_eq!(assistant["tool_calls"][0]["function"]["name"], "ping");
        assert_eq!(Message::user("x").role, Role::User);
    }
}
