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

//! Causal/temporal property graph
//!
//! ```text
//!  (Deployment)─TRIGGERED─►(Incident)─AFFECTED─►(Pod)─BELONGS_TO─►(Service)
//!                              │                  │
//!                         RESOLVED_BY          RUNS_ON
//!                              ▼                  ▼
//!                            (Fix)              (Node)
//! ```
//!
//! [`GraphStore`] exposes storage primitives only. The analytics (causal
//! patterns, blast radius, deploy correlation) live in [`CausalGraph`] and
//! run the same way whichever backend is plugged in.

mod causal;
mod memory;
mod neo4j;

pub use causal::CausalGraph;
pub use memory::InMemoryGraphStore;
pub use neo4j::Neo4jGraphStore;

use crate::error::MemoryResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kubememory_core::{
    DeploymentNode, FixNode, GraphRef, GraphSnapshot, Incident, IncidentNode, Topology,
};

/// Selection over Incident-nodes; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncidentQuery {
    pub pod_name: Option<String>,
    pub namespace: Option<String>,
    pub service: Option<String>,
    /// Inclusive lower bound
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub to: Option<DateTime<Utc>>,
}

impl IncidentQuery {
    pub fn for_pod(pod_name: &str, namespace: &str) -> Self {
        Self {
            pod_name: Some(pod_name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Default::default()
        }
    }

    pub fn matches(&self, node: &IncidentNode) -> bool {
        self.pod_name.as_ref().map_or(true, |p| &node.pod_name == p)
            && self.namespace.as_ref().map_or(true, |ns| &node.namespace == ns)
            && self.service.as_ref().map_or(true, |s| &node.service_name == s)
            && self.from.map_or(true, |from| node.occurred_at >= from)
            && self.to.map_or(true, |to| node.occurred_at <= to)
    }
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn ping(&self) -> MemoryResult<()>;

    /// Idempotent upsert of Pod, Service, Node and their edges
    async fn merge_topology(&self, topology: &Topology) -> MemoryResult<()>;

    /// Always creates a new Incident-node linked to its Pod
    async fn create_incident(&self, incident: &Incident) -> MemoryResult<GraphRef>;

    async fn create_deployment(
        &self,
        service: &str,
        namespace: &str,
        version: &str,
        deployed_at: DateTime<Utc>,
    ) -> MemoryResult<GraphRef>;

    /// Deployments of one service in one namespace
    async fn deployments(&self, service: &str, namespace: &str) -> MemoryResult<Vec<DeploymentNode>>;

    async fn link_triggered(&self, deployment: &GraphRef, incident: &GraphRef) -> MemoryResult<()>;

    async fn incident(&self, incident: &GraphRef) -> MemoryResult<Option<IncidentNode>>;

    async fn incidents(&self, query: &IncidentQuery) -> MemoryResult<Vec<IncidentNode>>;

    async fn fixes_for(&self, incident: &GraphRef) -> MemoryResult<Vec<FixNode>>;

    /// Most recent deployment that TRIGGERED this incident
    async fn trigger_for(&self, incident: &GraphRef) -> MemoryResult<Option<DeploymentNode>>;

    /// Every TRIGGERED edge in the graph
    async fn triggered_pairs(&self) -> MemoryResult<Vec<(DeploymentNode, IncidentNode)>>;

    /// Mark resolved and attach a new Fix-node
    async fn resolve_incident(
        &self,
        incident: &GraphRef,
        fix_description: &str,
        resolved_at: DateTime<Utc>,
    ) -> MemoryResult<()>;

    /// `None` snapshots every namespace
    async fn snapshot(&self, namespace: Option<&str>) -> MemoryResult<GraphSnapshot>;

    async fn clear(&self) -> MemoryResult<()>;
}
