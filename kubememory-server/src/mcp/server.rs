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

//! MCP Server Implementation
//!
//! Serves the tool registry to MCP clients over a [`McpTransport`].

use super::protocol::*;
use super::transport::{Incoming, McpTransport, TransportError};
use crate::tool_registry::ToolRegistry;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct McpServer {
    tools: Arc<ToolRegistry>,
    /// Injected into tool calls that carry no namespace
    namespace: Option<String>,
}

impl McpServer {
    pub fn new(tools: Arc<ToolRegistry>, namespace: Option<String>) -> Self {
        Self { tools, namespace }
    }

    /// Answer requests until the client closes the stream.
    pub async fn serve<T: McpTransport>(&self, transport: &mut T) -> Result<(), TransportError> {
        info!(protocol = MCP_PROTOCOL_VERSION, "MCP server ready");
        while let Some(incoming) = transport.recv().await? {
            let response = match incoming {
                Incoming::Request(request) => self.handle_request(request).await,
                Incoming::Malformed(e) => {
                    warn!(error = %e, "Invalid JSON-RPC message");
                    Some(JsonRpcResponse::error(
                        JsonRpcId::Null,
                        JsonRpcError::parse_error(format!("Invalid JSON: {}", e)),
                    ))
                }
            };
            if let Some(response) = response {
                transport.send(&response).await?;
            }
        }
        info!("MCP client disconnected");
        Ok(())
    }

    /// `None` for notifications, which get no reply.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, "MCP request received");
        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "MCP notification");
            return None;
        };
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request(format!("Unsupported jsonrpc version: {}", request.jsonrpc)),
            ));
        }

        let response = match request.method.as_str() {
            "ping" => JsonRpcResponse::success(id, json!({})),
            "initialize" => self.handle_initialize(id, request.params),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            _ => {
                warn!(method = %request.method, "Unknown MCP method");
                JsonRpcResponse::error(id, JsonRpcError::method_not_found(&request.method))
            }
        };
        Some(response)
    }

    fn handle_initialize(&self, id: JsonRpcId, params: Option<serde_json::Value>) -> JsonRpcResponse {
        let params = match params.map(serde_json::from_value::<InitializeParams>).transpose() {
            Ok(Some(params)) => params,
            Ok(None) => {
                return JsonRpcResponse::error(id, JsonRpcError::invalid_params("Missing initialize params"))
            }
            Err(e) => {
                return JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_params(format!("Invalid initialize params: {}", e)),
                )
            }
        };
        info!(
            client = params.client_info.as_ref().map(|c| c.name.as_str()).unwrap_or("unknown"),
            client_protocol = %params.protocol_version,
            "MCP client initializing"
        );

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        JsonRpcResponse::from_result(id, &result)
    }

    fn handle_tools_list(&self, id: JsonRpcId) -> JsonRpcResponse {
        let tools = self
            .tools
            .specs()
            .into_iter()
            .map(|spec| Tool {
                name: spec.name,
                description: Some(spec.description),
                input_schema: spec.parameters,
            })
            .collect();
        JsonRpcResponse::from_result(
            id,
            &ListToolsResult {
                tools,
                next_cursor: None,
            },
        )
    }

    async fn handle_tools_call(&self, id: JsonRpcId, params: Option<serde_json::Value>) -> JsonRpcResponse {
        let call = match params.map(serde_json::from_value::<CallToolParams>).transpose() {
            Ok(Some(call)) => call,
            Ok(None) => {
                return JsonRpcResponse::error(id, JsonRpcError::invalid_params("Missing tool call params"))
            }
            Err(e) => {
                return JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_params(format!("Invalid tool call params: {}", e)),
                )
            }
        };

        info!(tool = %call.name, "Executing MCP tool");
        let outcome = self
            .tools
            .execute(&call.name, call.arguments, self.namespace.as_deref())
            .await;

        JsonRpcResponse::from_result(
            id,
            &CallToolResult {
                content: vec![ToolContent::Text {
                    text: outcome.output,
                }],
                is_error: Some(!outcome.success),
            },
        )
    }
}
