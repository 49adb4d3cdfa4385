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

//! Tool Registry - validation and dispatch
//!
//! Arguments go through, in order: session-namespace injection, the
//! specific-pod guard, JSON schema validation and typed deserialisation.
//! Every failure comes back as text; nothing here returns an error to the
//! chat loop.

use super::args::{
    scoped, AnalyzeArgs, NamespaceArgs, PodArgs, RankingArgs, RiskArgs, SearchArgs, ToolName,
};
use super::render;
use super::risk::RiskReport;
use crate::agents::AnalysisPipeline;
use crate::llm::ToolSpec;
use jsonschema::JSONSchema;
use kubememory_core::{KubeMemoryError, ALL_NAMESPACES};
use kubememory_memory::{CausalGraph, IncidentFilter, IncidentStore, MemoryError, SimilaritySearch};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_SEARCH_LIMIT: usize = 5;
const DEFAULT_RANKING_LIMIT: usize = 10;
const DEFAULT_HISTORY_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;

/// Pod names a model uses when it has no specific pod in mind
const VAGUE_POD_NAMES: [&str; 5] = ["", "all", "any", "?", "none"];

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("{0}")]
    Guidance(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Memory(#[from] KubeMemoryError),

    #[error("Invalid schema for {0}: {1}")]
    Schema(String, String),
}

/// Text handed back to the caller plus whether the lookup itself succeeded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub output: String,
    pub success: bool,
}

impl ToolOutcome {
    fn ok(output: String) -> Self {
        Self {
            output,
            success: true,
        }
    }

    fn failed(output: String) -> Self {
        Self {
            output,
            success: false,
        }
    }
}

/// Fixed table of evidence lookups shared by the chat agent and MCP server.
pub struct ToolRegistry {
    search: Arc<SimilaritySearch>,
    graph: Arc<CausalGraph>,
    incidents: Arc<dyn IncidentStore>,
    pipeline: Arc<AnalysisPipeline>,
    validators: HashMap<ToolName, JSONSchema>,
}

impl ToolRegistry {
    pub fn new(
        search: Arc<SimilaritySearch>,
        graph: Arc<CausalGraph>,
        incidents: Arc<dyn IncidentStore>,
        pipeline: Arc<AnalysisPipeline>,
    ) -> Result<Self, ToolError> {
        let mut validators = HashMap::new();
        for tool in ToolName::ALL {
            let schema = tool.schema();
            let validator = JSONSchema::options()
                .compile(&schema)
                .map_err(|e| ToolError::Schema(tool.to_string(), e.to_string()))?;
            validators.insert(tool, validator);
        }

        Ok(Self {
            search,
            graph,
            incidents,
            pipeline,
            validators,
        })
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        ToolName::ALL.iter().map(|t| t.spec()).collect()
    }

    /// Run one tool call. `session_namespace` is injected when the call
    /// has no `namespace` of its own.
    pub async fn execute(
        &self,
        name: &str,
        arguments: Value,
        session_namespace: Option<&str>,
    ) -> ToolOutcome {
        match self.try_execute(name, arguments, session_namespace).await {
            Ok(output) => ToolOutcome::ok(output),
            Err(e @ ToolError::UnknownTool(_)) | Err(e @ ToolError::Guidance(_)) => {
                debug!(tool = name, "tool call rejected: {}", e);
                ToolOutcome::failed(e.to_string())
            }
            Err(e) => {
                warn!(tool = name, error = %e, "tool execution failed");
                ToolOutcome::failed(format!("Error executing {}: {}", name, e))
            }
        }
    }

    async fn try_execute(
        &self,
        name: &str,
        arguments: Value,
        session_namespace: Option<&str>,
    ) -> Result<String, ToolError> {
        let tool = ToolName::parse(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let arguments = prepare_arguments(arguments, session_namespace);

        if tool.needs_specific_pod() {
            let pod = arguments
                .get("pod_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_lowercase();
            if VAGUE_POD_NAMES.contains(&pod.as_str()) {
                return Err(ToolError::Guidance(format!(
                    "{} requires a specific pod name and namespace. \
                     For 'which services cause blast radius' or 'most impactful services', \
                     use get_top_blast_radius_services instead. \
                     For broad incident queries use search_incident_history with a natural-language query.",
                    tool
                )));
            }
        }

        if let Some(validator) = self.validators.get(&tool) {
            if let Err(errors) = validator.validate(&arguments) {
                let message = errors
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(ToolError::InvalidArguments(message));
            }
        }

        debug!(tool = %tool, "executing tool");
        match tool {
            ToolName::SearchIncidentHistory => self.search_history(typed(arguments)?).await,
            ToolName::AnalyzeIncident => self.analyze(typed(arguments)?).await,
            ToolName::GetBlastRadius => self.blast_radius(typed(arguments)?).await,
            ToolName::GetTopBlastRadiusServices => self.top_blast_radius(typed(arguments)?).await,
            ToolName::GetClusterPatterns => self.cluster_patterns(typed(arguments)?).await,
            ToolName::GetPodHistory => self.pod_history(typed(arguments)?).await,
            ToolName::RiskCheck => self.risk_check(typed(arguments)?).await,
            ToolName::GetGraphContext => self.graph_context(typed(arguments)?).await,
        }
    }

    async fn search_history(&self, args: SearchArgs) -> Result<String, ToolError> {
        let limit = bounded_limit(args.limit, DEFAULT_SEARCH_LIMIT);
        let hits = self
            .search
            .search_similar(&args.query, limit, scoped(&args.namespace), None)
            .await?;
        Ok(render::search_results(&hits))
    }

    async fn analyze(&self, args: AnalyzeArgs) -> Result<String, ToolError> {
        let state = self
            .pipeline
            .analyze_in_memory(
                &args.pod_name,
                &args.namespace,
                args.incident_type.as_deref().filter(|t| !t.trim().is_empty()),
                args.description.as_deref().unwrap_or_default(),
                args.logs_excerpt.as_deref().unwrap_or_default(),
            )
            .await;
        Ok(render::analysis(&state))
    }

    async fn blast_radius(&self, args: PodArgs) -> Result<String, ToolError> {
        let entries = self
            .graph
            .find_blast_radius(&args.pod_name, &args.namespace)
            .await?;
        Ok(render::blast_radius(&args.pod_name, &entries))
    }

    async fn top_blast_radius(&self, args: RankingArgs) -> Result<String, ToolError> {
        let namespace = scoped(&args.namespace);
        let limit = bounded_limit(args.limit, DEFAULT_RANKING_LIMIT);
        let ranks = self
            .graph
            .find_top_blast_radius_pods(namespace, limit)
            .await?;
        Ok(render::top_blast_radius(
            namespace.unwrap_or(ALL_NAMESPACES),
            &ranks,
        ))
    }

    async fn cluster_patterns(&self, args: RankingArgs) -> Result<String, ToolError> {
        let limit = bounded_limit(args.limit, DEFAULT_RANKING_LIMIT);
        let mut patterns = self
            .incidents
            .patterns(scoped(&args.namespace))
            .await
            .map_err(MemoryError::into_store)?;
        patterns.truncate(limit);

        // Deploy history is a bonus section; the store rows still answer
        let deploys = match self.graph.find_deploy_to_crash_correlation().await {
            Ok(deploys) => deploys,
            Err(e) => {
                warn!("deploy correlation skipped: {}", e);
                Vec::new()
            }
        };
        Ok(render::cluster_patterns(&patterns, &deploys))
    }

    async fn pod_history(&self, args: PodArgs) -> Result<String, ToolError> {
        let limit = bounded_limit(args.limit, DEFAULT_HISTORY_LIMIT);
        let filter = IncidentFilter::default()
            .namespace(args.namespace.as_str())
            .pod(args.pod_name.as_str())
            .limit(limit);
        let incidents = self
            .incidents
            .list(&filter)
            .await
            .map_err(MemoryError::into_store)?;

        let mut history = Vec::with_capacity(incidents.len());
        for incident in incidents {
            let fixes = self
                .incidents
                .fixes_for(incident.id)
                .await
                .map_err(MemoryError::into_store)?;
            history.push((incident, fixes));
        }
        Ok(render::pod_timeline(&args.pod_name, &args.namespace, &history))
    }

    async fn risk_check(&self, args: RiskArgs) -> Result<String, ToolError> {
        let report = self.assess_risk(&args.service_name, &args.namespace).await?;
        Ok(render::risk(&report))
    }

    /// Risk report for deploying `service` into `namespace`.
    ///
    /// Graph trouble lowers the evidence, not the availability of the check.
    pub async fn assess_risk(&self, service: &str, namespace: &str) -> Result<RiskReport, ToolError> {
        let filter = IncidentFilter::default().namespace(namespace);
        let open: Vec<_> = self
            .incidents
            .list(&filter)
            .await
            .map_err(MemoryError::into_store)?
            .into_iter()
            .filter(|i| i.status.is_open() && (i.service() == service || i.pod_name == service))
            .collect();

        let blast = self
            .graph
            .find_blast_radius(service, namespace)
            .await
            .unwrap_or_else(|e| {
                warn!(service, "blast radius skipped in risk check: {}", e);
                Vec::new()
            });
        let deploys = self
            .graph
            .find_deploy_to_crash_correlation()
            .await
            .unwrap_or_else(|e| {
                warn!(service, "deploy history skipped in risk check: {}", e);
                Vec::new()
            });

        Ok(RiskReport::compute(service, namespace, &open, &blast, &deploys))
    }

    async fn graph_context(&self, args: NamespaceArgs) -> Result<String, ToolError> {
        let namespace = scoped(&args.namespace);
        let snapshot = self.graph.namespace_snapshot(namespace).await?;
        Ok(render::graph_context(
            namespace.unwrap_or(ALL_NAMESPACES),
            &snapshot,
        ))
    }
}

fn typed<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

fn bounded_limit(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).clamp(1, MAX_LIMIT)
}

/// Normalise what small models actually send: a non-object becomes `{}`,
/// nulls are dropped, numeric strings for `limit` become integers and the
/// session namespace fills a missing `namespace`.
fn prepare_arguments(arguments: Value, session_namespace: Option<&str>) -> Value {
    let mut map = match arguments {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    map.retain(|_, v| !v.is_null());

    if let Some(Value::String(s)) = map.get("limit") {
        if let Ok(n) = s.trim().parse::<u64>() {
            map.insert("limit".to_string(), Value::from(n));
        }
    }
    if let Some(ns) = session_namespace {
        map.entry("namespace")
            .or_insert_with(|| Value::String(ns.to_string()));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prepare_arguments() {
        let args = prepare_arguments(json!({"limit": "3", "namespace": null}), Some("prod"));
        assert_eq!(args, json!({"limit": 3, "namespace": "prod"}));

        let args = prepare_arguments(json!({"namespace": "dev"}), Some("prod"));
        assert_eq!(args["namespace"], "dev");

        assert_eq!(prepare_arguments(json!("junk"), None), json!({}));
    }

    #[test]
    fn test_bounded_limit() {
        assert_eq!(bounded_limit(None, 5), 5);
        assert_eq!(bounded_limit(Some(0), 5), 1);
        assert_eq!(bounded_limit(Some(500), 5), MAX_LIMIT);
    }
}
