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

//! Tool registry over populated in-memory backends.

mod common;

use common::{at, incident, FailingGraphStore, Harness};
use std::sync::Arc;
use kubememory_core::NewFix;
use kubememory_server::llm::ScriptedClient;
use kubememory_server::tool_registry::RiskLevel;
use serde_json::json;

/// api and db fail within the blast window; cache fails alone later on.
async fn populated() -> Harness {
    let harness = Harness::new(ScriptedClient::new());
    for new in [
        incident("api", "prod", "OOMKill", at(0)),
        incident("db", "prod", "CrashLoopBackOff", at(2)),
        incident("cache", "prod", "Evicted", at(30)),
        incident("api", "prod", "OOMKill", at(100)),
        incident("api", "staging", "OOMKill", at(0)),
    ] {
        harness.memory.ingest(new, false).await.unwrap();
    }
    harness
}

#[tokio::test]
async fn test_blast_radius_lists_co_failing_pods() {
    let harness = populated().await;

    let outcome = harness
        .tools
        .execute("get_blast_radius", json!({"pod_name": "api", "namespace": "prod"}), None)
        .await;
    assert!(outcome.success);
    assert!(outcome.output.starts_with("Blast radius for api"));
    assert!(outcome.output.contains("🟢 LOW db (prod) — co-occurred 1x"));
    assert!(!outcome.output.contains("cache"));

    let ranking = harness
        .tools
        .execute("get_top_blast_radius_services", json!({"namespace": "prod"}), None)
        .await;
    assert!(ranking.success);
    assert!(ranking.output.contains("(namespace: prod)"));
    assert!(ranking.output.contains("api (prod)"));
    assert!(ranking.output.contains("db (prod)"));
    assert!(!ranking.output.contains("cache"));
}

#[tokio::test]
async fn test_session_namespace_is_injected() {
    let harness = populated().await;

    let outcome = harness
        .tools
        .execute("get_pod_history", json!({"pod_name": "api"}), Some("staging"))
        .await;
    assert!(outcome.success, "{}", outcome.output);
    assert!(outcome.output.starts_with("Incident timeline for api (1 incidents)"));

    let prod = harness
        .tools
        .execute("get_pod_history", json!({"pod_name": "api", "namespace": "prod"}), Some("staging"))
        .await;
    assert!(prod.output.starts_with("Incident timeline for api (2 incidents)"));
    assert_eq!(prod.output.matches("✗ no fix recorded").count(), 2);
}

#[tokio::test]
async fn test_risk_drops_once_incidents_are_fixed() {
    let harness = populated().await;

    let before = harness.tools.assess_risk("api", "prod").await.unwrap();
    assert_eq!(before.open_incidents, 2);
    assert_eq!(before.risk_score, 40);
    assert_eq!(before.risk_level, RiskLevel::Medium);

    harness
        .memory
        .submit_fix(NewFix {
            incident_id: 1,
            description: "Raised the heap limit".into(),
            applied_by: "oncall".into(),
            worked: true,
            ai_suggested: true,
            correction_of: None,
        })
        .await
        .unwrap();

    let outcome = harness
        .tools
        .execute("risk_check", json!({"service_name": "api", "namespace": "prod"}), None)
        .await;
    assert!(outcome.success);
    assert!(outcome.output.starts_with("🟢 RISK LEVEL: LOW (score: 20)"));
    assert!(outcome.output.contains("Open incidents: 1"));

    let history = harness
        .tools
        .execute("get_pod_history", json!({"pod_name": "api", "namespace": "prod"}), None)
        .await;
    assert!(history.output.contains("✓ fixed: Raised the heap limit"));

    let patterns = harness
        .tools
        .execute("get_cluster_patterns", json!({"namespace": "prod"}), None)
        .await;
    assert!(patterns.output.contains("api (prod) — OOMKill × 2 times | fix success: 100%"));
}

#[tokio::test]
async fn test_rejections_come_back_as_text() {
    let harness = populated().await;

    let unknown = harness.tools.execute("drop_tables", json!({}), None).await;
    assert!(!unknown.success);
    assert_eq!(unknown.output, "Unknown tool: drop_tables");

    let invalid = harness
        .tools
        .execute("search_incident_history", json!({"limit": 3}), None)
        .await;
    assert!(!invalid.success);
    assert!(invalid.output.starts_with("Error executing search_incident_history"));

    let vague = harness
        .tools
        .execute("get_pod_history", json!({"pod_name": "Any", "namespace": "prod"}), None)
        .await;
    assert!(!vague.success);
    assert!(vague.output.contains("requires a specific pod name"));
}

#[tokio::test]
async fn test_graph_context_counts_tracked_pods() {
    let harness = populated().await;

    let outcome = harness
        .tools
        .execute("get_graph_context", json!({"namespace": "prod"}), None)
        .await;
    assert!(outcome.success);
    assert!(outcome.output.starts_with("Graph context for prod:"));
    assert!(outcome.output.contains("3 pods tracked"));
    assert!(outcome.output.contains("4 incident nodes"));
}

#[tokio::test]
async fn test_reset_empties_graph_and_search() {
    let harness = populated().await;

    harness.graph.clear_all().await.unwrap();
    harness.search.clear_all().await.unwrap();

    let context = harness
        .tools
        .execute("get_graph_context", json!({"namespace": "prod"}), None)
        .await;
    assert!(context.output.contains("0 pods tracked"));
    assert!(context.output.contains("0 incident nodes"));

    let search = harness
        .tools
        .execute("search_incident_history", json!({"query": "api OOMKill"}), None)
        .await;
    assert!(search.success);
    assert_eq!(search.output, "No similar incidents found in cluster history.");
}

#[tokio::test]
async fn test_vague_pod_names_never_reach_the_graph() {
    let store = Arc::new(FailingGraphStore::default());
    let harness = Harness::with_graph_store(ScriptedClient::new(), store.clone());

    for pod in ["", "all", "any", "?", "none", "ALL", "Any", "  None  "] {
        let outcome = harness
            .tools
            .execute("get_blast_radius", json!({"pod_name": pod, "namespace": "prod"}), None)
            .await;
        assert!(!outcome.success, "{:?} was accepted", pod);
        assert!(
            outcome
                .output
                .starts_with("get_blast_radius requires a specific pod name and namespace."),
            "{:?}: {}",
            pod,
            outcome.output
        );
        assert!(outcome.output.contains("get_top_blast_radius_services"));
    }
    assert_eq!(store.calls(), 0);

    // A concrete pod does hit the store
    let outcome = harness
        .tools
        .execute("get_blast_radius", json!({"pod_name": "api", "namespace": "prod"}), None)
        .await;
    assert!(!outcome.success);
    assert!(store.calls() > 0);
}
