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

//! Shared wiring for the integration tests: in-memory backends, a hashing
//! embedder and a scripted inference client.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use kubememory_core::{
    DeploymentNode, FixNode, GraphRef, GraphSnapshot, Incident, IncidentNode, NewIncident,
    Topology,
};
use kubememory_memory::{
    CausalGraph, FileIncidentStore, GraphStore, HashEmbedder, InMemoryChatStore,
    InMemoryGraphStore, InMemoryVectorStore, IncidentQuery, IncidentStore, MemoryConfig,
    MemoryError, MemoryResult, Neo4jGraphStore, SimilaritySearch,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use kubememory_server::agents::AnalysisPipeline;
use kubememory_server::chat::{ChatEvent, ChatService, ConversationalAgent};
use kubememory_server::ingest::IncidentMemory;
use kubememory_server::llm::{InferenceClient, ModelSelection, OllamaEmbedder, ScriptedClient};
use kubememory_server::tool_registry::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const MODEL: &str = "scripted:latest";

/// Nothing listens on port 1
pub const DEAD_ENDPOINT: &str = "http://127.0.0.1:1";

pub struct Harness {
    pub llm: Arc<ScriptedClient>,
    pub incidents: Arc<dyn IncidentStore>,
    pub search: Arc<SimilaritySearch>,
    pub graph: Arc<CausalGraph>,
    pub pipeline: Arc<AnalysisPipeline>,
    pub tools: Arc<ToolRegistry>,
    pub memory: IncidentMemory,
}

impl Harness {
    pub fn new(client: ScriptedClient) -> Self {
        let config = MemoryConfig::default();
        let search = Arc::new(SimilaritySearch::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashEmbedder::new(128)),
            Duration::from_secs(2),
        ));
        let graph = Arc::new(CausalGraph::new(Arc::new(InMemoryGraphStore::new()), &config));
        Self::assemble(client, ModelSelection::Model(MODEL.into()), search, graph)
    }

    /// Every memory backend unreachable
    pub fn offline(client: ScriptedClient) -> Self {
        let config = MemoryConfig {
            store_timeout_secs: 2,
            ..MemoryConfig::default()
        };
        let search = Arc::new(SimilaritySearch::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(OllamaEmbedder::new(
                DEAD_ENDPOINT,
                "nomic-embed-text",
                Duration::from_secs(2),
            )),
            Duration::from_secs(2),
        ));
        let graph = Arc::new(CausalGraph::new(
            Arc::new(Neo4jGraphStore::new(DEAD_ENDPOINT, "neo4j", "neo4j", "")),
            &config,
        ));
        Self::assemble(client, ModelSelection::Model(MODEL.into()), search, graph)
    }

    /// In-memory vectors over a caller-supplied graph store
    pub fn with_graph_store(client: ScriptedClient, store: Arc<dyn GraphStore>) -> Self {
        let search = Arc::new(SimilaritySearch::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashEmbedder::new(128)),
            Duration::from_secs(2),
        ));
        let graph = Arc::new(CausalGraph::new(store, &MemoryConfig::default()));
        Self::assemble(client, ModelSelection::Model(MODEL.into()), search, graph)
    }

    fn assemble(
        client: ScriptedClient,
        model: ModelSelection,
        search: Arc<SimilaritySearch>,
        graph: Arc<CausalGraph>,
    ) -> Self {
        let llm = Arc::new(client);
        let incidents: Arc<dyn IncidentStore> = Arc::new(FileIncidentStore::in_memory());
        let pipeline = Arc::new(AnalysisPipeline::new(
            search.clone(),
            graph.clone(),
            llm.clone() as Arc<dyn InferenceClient>,
            model,
            Duration::from_secs(2),
        ));
        let tools = Arc::new(
            ToolRegistry::new(search.clone(), graph.clone(), incidents.clone(), pipeline.clone())
                .expect("tool schemas compile"),
        );
        let memory = IncidentMemory::new(
            incidents.clone(),
            search.clone(),
            graph.clone(),
            pipeline.clone(),
        );
        Self {
            llm,
            incidents,
            search,
            graph,
            pipeline,
            tools,
            memory,
        }
    }

    pub fn agent(&self, max_rounds: usize) -> ConversationalAgent {
        self.agent_with_model(ModelSelection::Model(MODEL.into()), max_rounds)
    }

    pub fn agent_with_model(&self, model: ModelSelection, max_rounds: usize) -> ConversationalAgent {
        ConversationalAgent::new(
            self.llm.clone() as Arc<dyn InferenceClient>,
            self.tools.clone(),
            model,
            max_rounds,
            Duration::from_secs(5),
        )
    }

    pub fn chat(&self, max_rounds: usize) -> ChatService {
        ChatService::new(Arc::new(InMemoryChatStore::new()), Arc::new(self.agent(max_rounds)))
    }
}

pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap() + ChronoDuration::minutes(minutes)
}

pub fn incident(pod: &str, namespace: &str, kind: &str, occurred_at: DateTime<Utc>) -> NewIncident {
    NewIncident {
        pod_name: pod.into(),
        namespace: namespace.into(),
        node_name: "node-1".into(),
        service_name: pod.into(),
        incident_type: kind.into(),
        severity: "high".into(),
        description: format!("{} reported {}", pod, kind),
        raw_logs: "java.lang.OutOfMemoryError: Java heap space".into(),
        image: format!("{}:1.0", pod),
        restart_count: 3,
        occurred_at,
    }
}

/// Drain every event sent during a turn
pub async fn collect(mut rx: mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// Graph store that fails every call and counts them.
#[derive(Default)]
pub struct FailingGraphStore {
    calls: AtomicUsize,
}

impl FailingGraphStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> MemoryResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(MemoryError::Backend("graph store down".into()))
    }
}

#[async_trait]
impl GraphStore for FailingGraphStore {
    async fn ping(&self) -> MemoryResult<()> {
        self.fail()
    }
    async fn merge_topology(&self, _topology: &Topology) -> MemoryResult<()> {
        self.fail()
    }
    async fn create_incident(&self, _incident: &Incident) -> MemoryResult<GraphRef> {
        self.fail()
    }
    async fn create_deployment(
        &self,
        _service: &str,
        _namespace: &str,
        _version: &str,
        _deployed_at: DateTime<Utc>,
    ) -> MemoryResult<GraphRef> {
        self.fail()
    }
    async fn deployments(&self, _service: &str, _namespace: &str) -> MemoryResult<Vec<DeploymentNode>> {
        self.fail()
    }
    async fn link_triggered(&self, _deployment: &GraphRef, _incident: &GraphRef) -> MemoryResult<()> {
        self.fail()
    }
    async fn incident(&self, _incident: &GraphRef) -> MemoryResult<Option<IncidentNode>> {
        self.fail()
    }
    async fn incidents(&self, _query: &IncidentQuery) -> MemoryResult<Vec<IncidentNode>> {
        self.fail()
    }
    async fn fixes_for(&self, _incident: &GraphRef) -> MemoryResult<Vec<FixNode>> {
        self.fail()
    }
    async fn trigger_for(&self, _incident: &GraphRef) -> MemoryResult<Option<DeploymentNode>> {
        self.fail()
    }
    async fn triggered_pairs(&self) -> MemoryResult<Vec<(DeploymentNode, IncidentNode)>> {
        self.fail()
    }
    async fn resolve_incident(
        &self,
        _incident: &GraphRef,
        _fix_description: &str,
        _resolved_at: DateTime<Utc>,
    ) -> MemoryResult<()> {
        self.fail()
    }
    async fn snapshot(&self, _namespace: Option<&str>) -> MemoryResult<GraphSnapshot> {
        self.fail()
    }
    async fn clear(&self) -> MemoryResult<()> {
        self.fail()
    }
}
