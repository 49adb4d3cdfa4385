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

//! Model Context Protocol (MCP) Server
//!
//! Exposes the incident-memory tools to MCP clients such as desktop
//! assistants and editors, over newline-delimited JSON-RPC 2.0 on stdio.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let server = McpServer::new(tools, None);
//! server.serve(&mut StdioTransport::stdio()).await?;
//! ```
//!
//! Supported methods: `initialize`, `ping`, `tools/list`, `tools/call`.
//! Tool failures come back as `isError` results, not JSON-RPC errors.

pub mod protocol;
pub mod server;
pub mod transport;

pub use protocol::{JsonRpcId, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use server::McpServer;
pub use transport::{Incoming, LineTransport, McpTransport, StdioTransport, TransportError};
