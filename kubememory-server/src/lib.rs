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

pub mod agents;
pub mod chat;
pub mod config;
pub mod ingest;
pub mod llm;
pub mod mcp;
pub mod tool_registry;

use agents::{AnalysisPipeline, RunbookGenerator};
use anyhow::{Context, Result};
use chat::{ChatService, ConversationalAgent};
use config::{GraphBackend, ServerConfig, VectorBackend};
use ingest::IncidentMemory;
use kubememory_memory::{
    CausalGraph, ChromaVectorStore, FileIncidentStore, GraphStore, InMemoryChatStore,
    InMemoryGraphStore, InMemoryVectorStore, IncidentStore, Neo4jGraphStore, SimilaritySearch,
    VectorStore,
};
use llm::{resolve_model, InferenceClient, ModelSelection, OllamaClient, OllamaEmbedder};
use std::sync::Arc;
use tool_registry::ToolRegistry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const GRAPH_SNAPSHOT_FILE: &str = "graph.json";

/// Install the global subscriber. Output goes to stderr so stdout stays free
/// for command output and MCP traffic.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kubememory_server=info,kubememory_memory=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Every service of a running instance, wired to one set of backends.
pub struct App {
    pub config: ServerConfig,
    pub incidents: Arc<dyn IncidentStore>,
    pub search: Arc<SimilaritySearch>,
    pub graph: Arc<CausalGraph>,
    pub llm: Arc<dyn InferenceClient>,
    pub model: ModelSelection,
    pub pipeline: Arc<AnalysisPipeline>,
    pub runbooks: RunbookGenerator,
    pub tools: Arc<ToolRegistry>,
    pub chat: ChatService,
    pub memory: IncidentMemory,
}

/// Open the configured backends and build the services on top of them.
///
/// Unreachable graph or vector backends are logged, not fatal; the affected
/// operations degrade when they are used.
pub async fn build_app(config: &ServerConfig) -> Result<App> {
    config.validate()?;
    let memory_config = config.memory();

    let incidents: Arc<dyn IncidentStore> = Arc::new(
        FileIncidentStore::open(config.storage.data_dir.join("records"))
            .await
            .with_context(|| format!("opening incident store in {:?}", config.storage.data_dir))?,
    );

    let graph_store: Arc<dyn GraphStore> = match config.graph.backend {
        GraphBackend::Memory => Arc::new(
            InMemoryGraphStore::with_persistence(config.storage.data_dir.join(GRAPH_SNAPSHOT_FILE))
                .context("loading graph snapshot")?,
        ),
        GraphBackend::Neo4j => Arc::new(Neo4jGraphStore::new(
            config.graph.neo4j_url.clone(),
            &config.graph.neo4j_database,
            config.graph.neo4j_user.clone(),
            config.graph.neo4j_password.clone(),
        )),
    };
    let graph = Arc::new(CausalGraph::new(graph_store, &memory_config));

    let vector_store: Arc<dyn VectorStore> = match config.vector.backend {
        VectorBackend::Memory => Arc::new(InMemoryVectorStore::new()),
        VectorBackend::Chroma => Arc::new(ChromaVectorStore::new(
            config.vector.chroma_url.clone(),
            config.vector.collection.clone(),
        )),
    };
    let embedder = Arc::new(OllamaEmbedder::new(
        config.ollama.base_url.clone(),
        config.ollama.embedding_model.clone(),
        memory_config.store_timeout(),
    ));
    let search = Arc::new(SimilaritySearch::new(
        vector_store,
        embedder,
        memory_config.store_timeout(),
    ));

    let llm: Arc<dyn InferenceClient> = Arc::new(OllamaClient::new(config.ollama.base_url.clone()));
    let model = resolve_model(
        llm.as_ref(),
        &config.ollama.preferred_model,
        &config.ollama.fallback_models,
        config.timeouts.model_list(),
    )
    .await;
    match model.model() {
        Some(name) => tracing::info!(model = name, "Chat model selected"),
        None => tracing::warn!("No chat model available; analysis and chat will degrade"),
    }

    if !graph.check_connectivity().await {
        tracing::warn!(backend = ?config.graph.backend, "Graph store unreachable");
    }
    if !search.check_connectivity().await {
        tracing::warn!(backend = ?config.vector.backend, "Vector store unreachable");
    }

    let pipeline = Arc::new(AnalysisPipeline::new(
        search.clone(),
        graph.clone(),
        llm.clone(),
        model.clone(),
        config.timeouts.analysis(),
    ));
    let runbooks = RunbookGenerator::new(llm.clone(), model.clone(), config.timeouts.runbook());
    let tools = Arc::new(
        ToolRegistry::new(search.clone(), graph.clone(), incidents.clone(), pipeline.clone())
            .context("compiling tool schemas")?,
    );
    let agent = Arc::new(ConversationalAgent::new(
        llm.clone(),
        tools.clone(),
        model.clone(),
        config.chat.max_rounds,
        config.timeouts.chat(),
    ));
    let chat = ChatService::new(Arc::new(InMemoryChatStore::new()), agent);
    let memory = IncidentMemory::new(
        incidents.clone(),
        search.clone(),
        graph.clone(),
        pipeline.clone(),
    );

    Ok(App {
        config: config.clone(),
        incidents,
        search,
        graph,
        llm,
        model,
        pipeline,
        runbooks,
        tools,
        chat,
        memory,
    })
}
