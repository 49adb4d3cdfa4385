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

//! Streaming chat turns against a scripted model.

mod common;

use common::{at, collect, incident, Harness};
use kubememory_core::ChatRole;
use kubememory_server::chat::{ChatEvent, FALLBACK_SEARCH_LIMIT};
use kubememory_server::llm::{ModelSelection, Role, ScriptedClient, ScriptedTurn, ToolCall};
use serde_json::json;
use tokio::sync::mpsc;

fn terminal_count(events: &[ChatEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

#[tokio::test]
async fn test_tool_loop_stops_at_round_limit() {
    let client = ScriptedClient::new().repeat(ScriptedTurn::Tools(
        String::new(),
        vec![ToolCall::new("get_cluster_patterns", json!({}))],
    ));
    let harness = Harness::new(client);
    let agent = harness.agent(10);

    let (tx, rx) = mpsc::channel(256);
    let outcome = agent
        .run_turn(Vec::new(), "what keeps crashing?", None, tx)
        .await;
    let events = collect(rx).await;

    assert_eq!(harness.llm.chat_calls(), 10);
    assert_eq!(outcome.rounds, 10);
    assert_eq!(outcome.tool_runs.len(), 10);
    assert!(outcome.error.is_none());
    assert_eq!(terminal_count(&events), 1);
    assert!(matches!(events.last(), Some(ChatEvent::Done { .. })));
}

#[tokio::test]
async fn test_inference_failure_sends_single_error() {
    let client = ScriptedClient::new().turn(ScriptedTurn::Fail("connection refused".into()));
    let harness = Harness::new(client);
    let agent = harness.agent(10);

    let (tx, rx) = mpsc::channel(64);
    let outcome = agent.run_turn(Vec::new(), "hello there", None, tx).await;
    let events = collect(rx).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        ChatEvent::Error { message } => assert!(message.contains("connection refused")),
        other => panic!("expected error event, got {:?}", other),
    }
    assert!(outcome.error.is_some());
    assert!(!outcome.cancelled);
}

#[tokio::test]
async fn test_missing_model_refuses_turn() {
    let harness = Harness::new(ScriptedClient::new());
    let agent = harness.agent_with_model(ModelSelection::Unavailable, 10);

    let (tx, rx) = mpsc::channel(8);
    let outcome = agent.run_turn(Vec::new(), "any crashes?", None, tx).await;
    let events = collect(rx).await;

    assert_eq!(harness.llm.chat_calls(), 0);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], ChatEvent::Error { message } if message.contains("ollama pull")));
    assert!(outcome.error.is_some());
}

#[tokio::test]
async fn test_short_answer_to_cluster_question_falls_back_to_search() {
    let client = ScriptedClient::new()
        .turn(ScriptedTurn::Reply("Not sure.".into()))
        .turn(ScriptedTurn::Reply("payment-api ran out of memory twice last week.".into()));
    let harness = Harness::new(client);
    harness
        .memory
        .ingest(incident("payment-api", "prod", "OOMKill", at(0)), false)
        .await
        .unwrap();
    let agent = harness.agent(10);

    let (tx, rx) = mpsc::channel(256);
    let outcome = agent
        .run_turn(Vec::new(), "show recent crashes in prod", None, tx)
        .await;
    let events = collect(rx).await;

    let invoked: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::ToolInvoked { name, arguments } => Some((name.clone(), arguments.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(invoked.len(), 1);
    assert_eq!(invoked[0].0, "search_incident_history");
    assert_eq!(invoked[0].1["query"], "show recent crashes in prod");
    assert_eq!(invoked[0].1["limit"], FALLBACK_SEARCH_LIMIT);

    assert_eq!(outcome.tools_used(), vec!["search_incident_history".to_string()]);
    assert_eq!(outcome.content, "payment-api ran out of memory twice last week.");
    assert!(outcome.tool_runs[0].output.contains("payment-api"));
    assert_eq!(terminal_count(&events), 1);

    // The search result was fed back to the model
    let transcripts = harness.llm.transcripts();
    assert_eq!(transcripts.len(), 2);
    let last = transcripts[1].last().unwrap();
    assert_eq!(last.role, Role::Tool);
    assert_eq!(last.tool_name.as_deref(), Some("search_incident_history"));
}

#[tokio::test]
async fn test_vague_pod_gets_guidance_instead_of_lookup() {
    let client = ScriptedClient::new()
        .turn(ScriptedTurn::Tools(
            String::new(),
            vec![ToolCall::new(
                "get_blast_radius",
                json!({"pod_name": "all", "namespace": "prod"}),
            )],
        ))
        .turn(ScriptedTurn::Reply("Let me rank services instead.".into()));
    let harness = Harness::new(client);
    let agent = harness.agent(10);

    let (tx, rx) = mpsc::channel(64);
    let outcome = agent
        .run_turn(Vec::new(), "which services cause the biggest blast radius?", None, tx)
        .await;
    let events = collect(rx).await;

    let result = events
        .iter()
        .find_map(|e| match e {
            ChatEvent::ToolResult { output, success, .. } => Some((output.clone(), *success)),
            _ => None,
        })
        .expect("tool result event");
    assert!(!result.1);
    assert!(result
        .0
        .starts_with("get_blast_radius requires a specific pod name and namespace."));
    assert!(result.0.contains("get_top_blast_radius_services"));
    assert_eq!(outcome.content, "Let me rank services instead.");
}

#[tokio::test]
async fn test_session_scope_and_persisted_rows() {
    let client = ScriptedClient::new()
        .turn(ScriptedTurn::Tools(
            "Checking.".into(),
            vec![ToolCall::new("get_cluster_patterns", json!({}))],
        ))
        .turn(ScriptedTurn::Reply("No recurring patterns yet.".into()));
    let harness = Harness::new(client);
    let chat = harness.chat(10);

    let session = chat.create_session(Some("prod".into())).await.unwrap();
    let (tx, rx) = mpsc::channel(64);
    let outcome = chat
        .send(session.id, "any patterns in this namespace?", tx)
        .await
        .unwrap();
    let events = collect(rx).await;
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(outcome.content, "No recurring patterns yet.");

    let system = &harness.llm.transcripts()[0][0];
    assert_eq!(system.role, Role::System);
    assert!(system
        .content
        .contains("Current cluster namespace context: prod."));

    let roles: Vec<ChatRole> = chat
        .messages(session.id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.role)
        .collect();
    assert_eq!(
        roles,
        vec![
            ChatRole::User,
            ChatRole::ToolCall,
            ChatRole::ToolResult,
            ChatRole::Assistant
        ]
    );

    let titled = chat.session(session.id).await.unwrap();
    assert!(!titled.title.is_empty());
}

#[tokio::test]
async fn test_dropped_receiver_cancels_turn() {
    let client = ScriptedClient::new().repeat(ScriptedTurn::Reply(
        "a long streamed answer with many words in it".into(),
    ));
    let harness = Harness::new(client);
    let agent = harness.agent(10);

    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let outcome = agent.run_turn(Vec::new(), "hello there", None, tx).await;

    assert!(outcome.cancelled);
    assert!(outcome.error.is_none());
}
