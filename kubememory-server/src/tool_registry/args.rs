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

//! Tool names, argument structs and their JSON schemas.

use crate::llm::ToolSpec;
use kubememory_core::ALL_NAMESPACES;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    SearchIncidentHistory,
    AnalyzeIncident,
    GetBlastRadius,
    GetTopBlastRadiusServices,
    GetClusterPatterns,
    GetPodHistory,
    RiskCheck,
    GetGraphContext,
}

impl ToolName {
    pub const ALL: [ToolName; 8] = [
        ToolName::SearchIncidentHistory,
        ToolName::AnalyzeIncident,
        ToolName::GetBlastRadius,
        ToolName::GetTopBlastRadiusServices,
        ToolName::GetClusterPatterns,
        ToolName::GetPodHistory,
        ToolName::RiskCheck,
        ToolName::GetGraphContext,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::SearchIncidentHistory => "search_incident_history",
            ToolName::AnalyzeIncident => "analyze_incident",
            ToolName::GetBlastRadius => "get_blast_radius",
            ToolName::GetTopBlastRadiusServices => "get_top_blast_radius_services",
            ToolName::GetClusterPatterns => "get_cluster_patterns",
            ToolName::GetPodHistory => "get_pod_history",
            ToolName::RiskCheck => "risk_check",
            ToolName::GetGraphContext => "get_graph_context",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }

    /// Tools that only make sense for one concrete pod
    pub fn needs_specific_pod(&self) -> bool {
        matches!(
            self,
            ToolName::GetBlastRadius | ToolName::GetPodHistory | ToolName::AnalyzeIncident
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolName::SearchIncidentHistory => {
                "Semantic search over this cluster's incident history. Use natural language: \
                 'OOMKill incidents in production' or 'payment service crashes after deploy'."
            }
            ToolName::AnalyzeIncident => {
                "Analyze a Kubernetes pod using this cluster's full history. Returns root cause, \
                 recommendation and blast radius grounded in actual past incidents."
            }
            ToolName::GetBlastRadius => {
                "Find which services are historically affected when a specific pod fails. \
                 Requires a concrete pod name."
            }
            ToolName::GetTopBlastRadiusServices => {
                "List the pods with the LARGEST blast radius (when they fail, the most other pods \
                 fail too). Does NOT require a pod name; use it for cluster-wide questions."
            }
            ToolName::GetClusterPatterns => {
                "Top recurring incident patterns in this cluster: which pods fail most often, \
                 which fixes worked, and which deployments were followed by crashes."
            }
            ToolName::GetPodHistory => {
                "Full incident timeline for one specific pod, with the fixes that worked."
            }
            ToolName::RiskCheck => {
                "Pre-deploy risk assessment for a service: open incidents, unstable blast radius \
                 and deploy-to-crash history."
            }
            ToolName::GetGraphContext => {
                "Summary of the knowledge graph for a namespace: pods, services, incident nodes \
                 and relationships."
            }
        }
    }

    pub fn schema(&self) -> Value {
        match self {
            ToolName::SearchIncidentHistory => json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {"type": "string", "description": "Natural language query"},
                    "namespace": {"type": "string", "description": "Filter by namespace"},
                    "limit": {"type": "integer", "minimum": 1, "description": "Max results", "default": 5}
                }
            }),
            ToolName::AnalyzeIncident => json!({
                "type": "object",
                "required": ["pod_name", "namespace"],
                "properties": {
                    "pod_name": {"type": "string", "description": "Pod name"},
                    "namespace": {"type": "string", "description": "Namespace"},
                    "incident_type": {"type": "string", "description": "Optional incident type (e.g. CrashLoopBackOff, OOMKill)"},
                    "description": {"type": "string", "description": "Optional incident description"},
                    "logs_excerpt": {"type": "string", "description": "Optional logs excerpt"}
                }
            }),
            ToolName::GetBlastRadius => json!({
                "type": "object",
                "required": ["pod_name", "namespace"],
                "properties": {
                    "pod_name": {"type": "string"},
                    "namespace": {"type": "string"}
                }
            }),
            ToolName::GetTopBlastRadiusServices => json!({
                "type": "object",
                "properties": {
                    "namespace": {"type": "string", "description": "Namespace, or 'all'"},
                    "limit": {"type": "integer", "minimum": 1, "default": 10}
                }
            }),
            ToolName::GetClusterPatterns => json!({
                "type": "object",
                "properties": {
                    "namespace": {"type": "string", "description": "Filter by namespace"},
                    "limit": {"type": "integer", "minimum": 1, "description": "Max patterns", "default": 10}
                }
            }),
            ToolName::GetPodHistory => json!({
                "type": "object",
                "required": ["pod_name", "namespace"],
                "properties": {
                    "pod_name": {"type": "string"},
                    "namespace": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "default": 10}
                }
            }),
            ToolName::RiskCheck => json!({
                "type": "object",
                "required": ["service_name", "namespace"],
                "properties": {
                    "service_name": {"type": "string"},
                    "namespace": {"type": "string"}
                }
            }),
            ToolName::GetGraphContext => json!({
                "type": "object",
                "properties": {
                    "namespace": {"type": "string", "description": "Namespace, or 'all'"}
                }
            }),
        }
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.as_str().to_string(),
            description: self.description().to_string(),
            parameters: self.schema(),
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `all`, blank or missing means cluster-wide
pub(crate) fn scoped(namespace: &Option<String>) -> Option<&str> {
    namespace
        .as_deref()
        .map(str::trim)
        .filter(|ns| !ns.is_empty() && !ns.eq_ignore_ascii_case(ALL_NAMESPACES))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchArgs {
    pub query: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeArgs {
    pub pod_name: String,
    pub namespace: String,
    #[serde(default)]
    pub incident_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub logs_excerpt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PodArgs {
    pub pod_name: String,
    pub namespace: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankingArgs {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskArgs {
    pub service_name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamespaceArgs {
    #[serde(default)]
    pub namespace: Option<String>,
}
