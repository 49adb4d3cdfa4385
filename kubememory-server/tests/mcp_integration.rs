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

//! MCP sessions driven through an in-memory line transport.

mod common;

use common::{at, incident, Harness};
use kubememory_server::llm::ScriptedClient;
use kubememory_server::mcp::{LineTransport, McpServer, MCP_PROTOCOL_VERSION};
use serde_json::{json, Value};

/// Feed `requests` as one line each and return every response line.
async fn session(server: &McpServer, requests: &[Value]) -> Vec<Value> {
    let mut input = String::new();
    for request in requests {
        input.push_str(&request.to_string());
        input.push('\n');
    }
    let mut transport = LineTransport::new(input.as_bytes(), Vec::new());
    server.serve(&mut transport).await.unwrap();

    String::from_utf8(transport.into_writer())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_initialize_list_and_call() {
    let harness = Harness::new(ScriptedClient::new());
    harness
        .memory
        .ingest(incident("api", "prod", "OOMKill", at(0)), false)
        .await
        .unwrap();
    let server = McpServer::new(harness.tools.clone(), Some("prod".into()));

    let responses = session(
        &server,
        &[
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize",
                   "params": {"protocolVersion": MCP_PROTOCOL_VERSION,
                              "clientInfo": {"name": "test-client", "version": "0.1"}}}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call",
                   "params": {"name": "get_pod_history", "arguments": {"pod_name": "api"}}}),
            json!({"jsonrpc": "2.0", "id": "four", "method": "tools/call",
                   "params": {"name": "get_blast_radius", "arguments": {"pod_name": "all"}}}),
        ],
    )
    .await;

    // The notification gets no reply
    assert_eq!(responses.len(), 4);

    let init = &responses[0];
    assert_eq!(init["id"], 1);
    assert_eq!(init["result"]["protocolVersion"], MCP_PROTOCOL_VERSION);
    assert_eq!(init["result"]["serverInfo"]["name"], "kubememory");
    assert!(init["result"]["capabilities"]["tools"].is_object());

    let tools = responses[1]["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 8);
    assert!(tools
        .iter()
        .all(|t| t["inputSchema"]["type"] == "object" && t["description"].is_string()));

    let call = &responses[2]["result"];
    assert_eq!(call["isError"], false);
    let text = call["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("Incident timeline for api (1 incidents)"));

    let vague = &responses[3];
    assert_eq!(vague["id"], "four");
    assert_eq!(vague["result"]["isError"], true);
    assert!(vague["result"]["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("requires a specific pod name"));
}

#[tokio::test]
async fn test_protocol_errors() {
    let harness = Harness::new(ScriptedClient::new());
    let server = McpServer::new(harness.tools.clone(), None);

    let mut input = String::from("{not json\n");
    input.push_str(&json!({"jsonrpc": "2.0", "id": 1, "method": "resources/list"}).to_string());
    input.push('\n');
    input.push_str(&json!({"jsonrpc": "1.0", "id": 2, "method": "ping"}).to_string());
    input.push('\n');
    input.push_str(&json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call"}).to_string());
    input.push('\n');
    input.push_str(&json!({"jsonrpc": "2.0", "id": 4, "method": "ping"}).to_string());
    input.push('\n');

    let mut transport = LineTransport::new(input.as_bytes(), Vec::new());
    server.serve(&mut transport).await.unwrap();
    let responses: Vec<Value> = String::from_utf8(transport.into_writer())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(responses.len(), 5);
    assert_eq!(responses[0]["error"]["code"], -32700);
    assert_eq!(responses[0]["id"], Value::Null);
    assert_eq!(responses[1]["error"]["code"], -32601);
    assert_eq!(responses[2]["error"]["code"], -32600);
    assert_eq!(responses[3]["error"]["code"], -32602);
    assert_eq!(responses[4]["result"], json!({}));
}
