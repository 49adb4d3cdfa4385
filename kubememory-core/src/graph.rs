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

//! Property-graph entities and the rows returned by graph analytics.

use crate::incident::{IncidentId, IncidentType, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of a node inside the graph store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphRef(pub String);

impl GraphRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GraphRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    Pod,
    Service,
    Node,
    Incident,
    Fix,
    Deployment,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Pod => "Pod",
            NodeLabel::Service => "Service",
            NodeLabel::Node => "Node",
            NodeLabel::Incident => "Incident",
            NodeLabel::Fix => "Fix",
            NodeLabel::Deployment => "Deployment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    BelongsTo,
    RunsOn,
    Affected,
    ResolvedBy,
    Triggered,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::BelongsTo => "BELONGS_TO",
            RelationType::RunsOn => "RUNS_ON",
            RelationType::Affected => "AFFECTED",
            RelationType::ResolvedBy => "RESOLVED_BY",
            RelationType::Triggered => "TRIGGERED",
        }
    }
}

/// Pod/Service/Node facts merged on every ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub pod_name: String,
    pub namespace: String,
    pub service_name: String,
    pub node_name: String,
    pub image: String,
    pub restart_count: u32,
}

/// Incident-node as stored in the graph (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentNode {
    pub graph_ref: GraphRef,
    pub incident_id: IncidentId,
    pub pod_name: String,
    pub namespace: String,
    pub service_name: String,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub occurred_at: DateTime<Utc>,
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixNode {
    pub graph_ref: GraphRef,
    pub description: String,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentNode {
    pub graph_ref: GraphRef,
    pub service: String,
    pub namespace: String,
    pub version: String,
    pub deployed_at: DateTime<Utc>,
}

/// Per-pod aggregation of one incident type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalPattern {
    pub incident_type: IncidentType,
    pub frequency: u32,
    /// At most three, most recently resolved first
    pub fixes_that_worked: Vec<String>,
    pub deploy_versions: Vec<String>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastRadiusEntry {
    pub affected_pod: String,
    pub namespace: String,
    pub co_occurrence: u32,
    pub incident_types: Vec<IncidentType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastRank {
    pub pod_name: String,
    pub namespace: String,
    /// Distinct pods that co-fail with this one
    pub blast_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployCorrelation {
    pub service: String,
    pub version: String,
    pub minutes_before_crash: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployCrashPattern {
    pub service: String,
    pub crash_count: u32,
    pub crash_types: Vec<IncidentType>,
    pub avg_minutes_to_crash: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub id: GraphRef,
    pub label: NodeLabel,
    pub name: String,
    pub namespace: Option<String>,
    /// Only meaningful for incident nodes
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEdge {
    pub from: GraphRef,
    pub to: GraphRef,
    pub relation: RelationType,
}

/// Nodes and edges visible in one namespace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<SnapshotNode>,
    pub edges: Vec<SnapshotEdge>,
}

impl GraphSnapshot {
    pub fn nodes_with(&self, label: NodeLabel) -> impl Iterator<Item = &SnapshotNode> {
        self.nodes.iter().filter(move |n| n.label == label)
    }
}
