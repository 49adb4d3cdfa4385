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

//! MCP stdio transport: one JSON-RPC message per line.
//!
//! Stdout carries protocol traffic only, so logging must go to stderr.

use super::protocol::JsonRpcRequest;
use super::protocol::JsonRpcResponse;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One inbound line
#[derive(Debug)]
pub enum Incoming {
    Request(JsonRpcRequest),
    /// Not a JSON-RPC message; answered with a parse error
    Malformed(String),
}

/// Transport abstraction for MCP JSON-RPC messages.
#[async_trait::async_trait]
pub trait McpTransport: Send {
    /// `None` once the peer closed its side
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError>;

    async fn send(&mut self, response: &JsonRpcResponse) -> Result<(), TransportError>;
}

/// Newline-delimited transport over any async reader/writer pair.
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
    line: String,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            line: String::new(),
        }
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}

pub type StdioTransport = LineTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout>;

impl StdioTransport {
    pub fn stdio() -> Self {
        LineTransport::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

#[async_trait::async_trait]
impl<R, W> McpTransport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(match serde_json::from_str(trimmed) {
                Ok(request) => Incoming::Request(request),
                Err(e) => Incoming::Malformed(e.to_string()),
            }));
        }
    }

    async fn send(&mut self, response: &JsonRpcResponse) -> Result<(), TransportError> {
        let mut payload = serde_json::to_vec(response)?;
        payload.push(b'\n');
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::JsonRpcId;
    use serde_json::json;

    #[tokio::test]
    async fn test_reads_lines_and_skips_blanks() {
        let input = b"\n{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":1}\nnot json\n".to_vec();
        let mut transport = LineTransport::new(&input[..], Vec::new());

        match transport.recv().await.unwrap() {
            Some(Incoming::Request(req)) => assert_eq!(req.method, "ping"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(transport.recv().await.unwrap(), Some(Incoming::Malformed(_))));
        assert!(transport.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writes_one_line_per_response() {
        let mut transport = LineTransport::new(&b""[..], Vec::new());
        transport
            .send(&JsonRpcResponse::success(JsonRpcId::Number(1), json!({})))
            .await
            .unwrap();
        let written = String::from_utf8(transport.into_writer()).unwrap();
        assert!(written.ends_with('\n'));
        assert_eq!(written.lines().count(), 1);
    }
}
