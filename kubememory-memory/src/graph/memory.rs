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

//! In-process property graph
//!
//! Adjacency-list graph with DashMap-backed node storage, a merge-key index
//! for the idempotent Pod/Service/Node portion and optional JSON
//! persistence (write to a temp file, then rename).

use super::{GraphStore, IncidentQuery};
use crate::error::{MemoryError, MemoryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kubememory_core::{
    DeploymentNode, FixNode, GraphRef, GraphSnapshot, Incident, IncidentNode, NodeLabel,
    RelationType, SnapshotEdge, SnapshotNode, Topology,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

type NodeId = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "label")]
enum StoredNode {
    Pod {
        name: String,
        namespace: String,
        image: String,
        restart_count: u32,
    },
    Service {
        name: String,
        namespace: String,
    },
    Node {
        name: String,
    },
    Incident(IncidentNode),
    Fix(FixNode),
    Deployment(DeploymentNode),
}

impl StoredNode {
    fn label(&self) -> NodeLabel {
        match self {
            StoredNode::Pod { .. } => NodeLabel::Pod,
            StoredNode::Service { .. } => NodeLabel::Service,
            StoredNode::Node { .. } => NodeLabel::Node,
            StoredNode::Incident(_) => NodeLabel::Incident,
            StoredNode::Fix(_) => NodeLabel::Fix,
            StoredNode::Deployment(_) => NodeLabel::Deployment,
        }
    }

    fn namespace(&self) -> Option<&str> {
        match self {
            StoredNode::Pod { namespace, .. } | StoredNode::Service { namespace, .. } => {
                Some(namespace)
            }
            StoredNode::Incident(i) => Some(&i.namespace),
            StoredNode::Deployment(d) => Some(&d.namespace),
            StoredNode::Node { .. } | StoredNode::Fix(_) => None,
        }
    }

    fn display_name(&self) -> String {
        match self {
            StoredNode::Pod { name, .. }
            | StoredNode::Service { name, .. }
            | StoredNode::Node { name } => name.clone(),
            StoredNode::Incident(i) => format!("{} on {}", i.incident_type, i.pod_name),
            StoredNode::Fix(f) => f.description.clone(),
            StoredNode::Deployment(d) => format!("{}@{}", d.service, d.version),
        }
    }
}

/// Directed edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct GraphEdge {
    from: NodeId,
    to: NodeId,
    relation: RelationType,
}

pub struct InMemoryGraphStore {
    nodes: DashMap<NodeId, StoredNode>,
    /// Merge key -> node, for Pod/Service/Node
    merge_index: DashMap<String, NodeId>,
    outgoing: DashMap<NodeId, Vec<GraphEdge>>,
    incoming: DashMap<NodeId, Vec<GraphEdge>>,
    next_id: AtomicU64,
    persist_path: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            merge_index: DashMap::new(),
            outgoing: DashMap::new(),
            incoming: DashMap::new(),
            next_id: AtomicU64::new(1),
            persist_path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Open a graph persisted at `path`, or start empty if the file is absent.
    pub fn with_persistence<P: AsRef<Path>>(path: P) -> MemoryResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            Self::load_from_disk(&path)
        } else {
            let mut graph = Self::new();
            graph.persist_path = Some(path);
            Ok(graph)
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn allocate(&self, node: StoredNode) -> NodeId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.nodes.insert(id, node);
        id
    }

    fn merge_node(&self, key: String, make: impl FnOnce() -> StoredNode) -> NodeId {
        *self
            .merge_index
            .entry(key)
            .or_insert_with(|| self.allocate(make()))
    }

    fn add_edge(&self, from: NodeId, to: NodeId, relation: RelationType) {
        let edge = GraphEdge { from, to, relation };
        let mut out = self.outgoing.entry(from).or_default();
        if out.contains(&edge) {
            return;
        }
        out.push(edge.clone());
        drop(out);
        self.incoming.entry(to).or_default().push(edge);
    }

    fn parse_ref(graph_ref: &GraphRef) -> MemoryResult<NodeId> {
        graph_ref
            .as_str()
            .parse()
            .map_err(|_| MemoryError::NotFound(format!("graph node {}", graph_ref)))
    }

    fn neighbours(&self, id: NodeId, relation: RelationType, outgoing: bool) -> Vec<NodeId> {
        let edges = if outgoing {
            self.outgoing.get(&id).map(|e| e.clone())
        } else {
            self.incoming.get(&id).map(|e| e.clone())
        };
        edges
            .unwrap_or_default()
            .into_iter()
            .filter(|e| e.relation == relation)
            .map(|e| if outgoing { e.to } else { e.from })
            .collect()
    }

    fn incident_node(&self, id: NodeId) -> Option<IncidentNode> {
        match self.nodes.get(&id).map(|n| n.clone()) {
            Some(StoredNode::Incident(node)) => Some(node),
            _ => None,
        }
    }

    fn deployment_node(&self, id: NodeId) -> Option<DeploymentNode> {
        match self.nodes.get(&id).map(|n| n.clone()) {
            Some(StoredNode::Deployment(node)) => Some(node),
            _ => None,
        }
    }

    /// Save graph to disk (no-op without a persistence path)
    pub fn save_to_disk(&self) -> MemoryResult<()> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock();

        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }

        let data = GraphPersistence {
            nodes: self
                .nodes
                .iter()
                .map(|e| (*e.key(), e.value().clone()))
                .collect(),
            edges: self.outgoing.iter().flat_map(|e| e.clone()).collect(),
            next_id: self.next_id.load(Ordering::SeqCst),
        };

        let temp_path = path.with_extension("tmp");
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &data)?;
        writer.flush()?;
        std::fs::rename(&temp_path, path)?;

        debug!(path = %path.display(), nodes = data.nodes.len(), "graph persisted");
        Ok(())
    }

    fn load_from_disk(path: &Path) -> MemoryResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        let data: GraphPersistence = serde_json::from_reader(reader)?;

        let mut graph = Self::new();
        graph.persist_path = Some(path.to_path_buf());
        graph.next_id = AtomicU64::new(data.next_id);

        for (id, node) in data.nodes {
            if let Some(key) = merge_key(&node) {
                graph.merge_index.insert(key, id);
            }
            graph.nodes.insert(id, node);
        }
        for edge in data.edges {
            graph.outgoing.entry(edge.from).or_default().push(edge.clone());
            graph.incoming.entry(edge.to).or_default().push(edge);
        }
        Ok(graph)
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Persistence format
#[derive(Debug, Serialize, Deserialize)]
struct GraphPersistence {
    nodes: Vec<(NodeId, StoredNode)>,
    edges: Vec<GraphEdge>,
    next_id: u64,
}

fn merge_key(node: &StoredNode) -> Option<String> {
    match node {
        StoredNode::Pod {
            name, namespace, ..
        } => Some(format!("pod:{}/{}", namespace, name)),
        StoredNode::Service { name, namespace } => Some(format!("service:{}/{}", namespace, name)),
        StoredNode::Node { name } => Some(format!("node:{}", name)),
        _ => None,
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn ping(&self) -> MemoryResult<()> {
        Ok(())
    }

    async fn merge_topology(&self, t: &Topology) -> MemoryResult<()> {
        let pod = self.merge_node(format!("pod:{}/{}", t.namespace, t.pod_name), || {
            StoredNode::Pod {
                name: t.pod_name.clone(),
                namespace: t.namespace.clone(),
                image: t.image.clone(),
                restart_count: t.restart_count,
            }
        });
        // SET on merge: latest image and restart count win
        if let Some(mut node) = self.nodes.get_mut(&pod) {
            if let StoredNode::Pod {
                image,
                restart_count,
                ..
            } = node.value_mut()
            {
                *image = t.image.clone();
                *restart_count = t.restart_count;
            }
        }

        let service = self.merge_node(
            format!("service:{}/{}", t.namespace, t.service_name),
            || StoredNode::Service {
                name: t.service_name.clone(),
                namespace: t.namespace.clone(),
            },
        );
        let node = self.merge_node(format!("node:{}", t.node_name), || StoredNode::Node {
            name: t.node_name.clone(),
        });

        self.add_edge(pod, service, RelationType::BelongsTo);
        self.add_edge(pod, node, RelationType::RunsOn);
        self.save_to_disk()
    }

    async fn create_incident(&self, incident: &Incident) -> MemoryResult<GraphRef> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let graph_ref = GraphRef::new(id.to_string());
        self.nodes.insert(
            id,
            StoredNode::Incident(IncidentNode {
                graph_ref: graph_ref.clone(),
                incident_id: incident.id,
                pod_name: incident.pod_name.clone(),
                namespace: incident.namespace.clone(),
                service_name: incident.service().to_string(),
                incident_type: incident.incident_type,
                severity: incident.severity,
                occurred_at: incident.occurred_at,
                resolved: false,
            }),
        );

        let pod_key = format!("pod:{}/{}", incident.namespace, incident.pod_name);
        if let Some(pod) = self.merge_index.get(&pod_key).map(|p| *p) {
            self.add_edge(id, pod, RelationType::Affected);
        }
        self.save_to_disk()?;
        Ok(graph_ref)
    }

    async fn create_deployment(
        &self,
        service: &str,
        namespace: &str,
        version: &str,
        deployed_at: DateTime<Utc>,
    ) -> MemoryResult<GraphRef> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let graph_ref = GraphRef::new(id.to_string());
        self.nodes.insert(
            id,
            StoredNode::Deployment(DeploymentNode {
                graph_ref: graph_ref.clone(),
                service: service.to_string(),
                namespace: namespace.to_string(),
                version: version.to_string(),
                deployed_at,
            }),
        );
        self.save_to_disk()?;
        Ok(graph_ref)
    }

    async fn deployments(&self, service: &str, namespace: &str) -> MemoryResult<Vec<DeploymentNode>> {
        let mut found: Vec<DeploymentNode> = self
            .nodes
            .iter()
            .filter_map(|n| match n.value() {
                StoredNode::Deployment(d) if d.service == service && d.namespace == namespace => {
                    Some(d.clone())
                }
                _ => None,
            })
            .collect();
        found.sort_by_key(|d| d.deployed_at);
        Ok(found)
    }

    async fn link_triggered(&self, deployment: &GraphRef, incident: &GraphRef) -> MemoryResult<()> {
        let from = Self::parse_ref(deployment)?;
        let to = Self::parse_ref(incident)?;
        if self.deployment_node(from).is_none() || self.incident_node(to).is_none() {
            return Err(MemoryError::NotFound(format!(
                "deployment {} or incident {}",
                deployment, incident
            )));
        }
        self.add_edge(from, to, RelationType::Triggered);
        self.save_to_disk()
    }

    async fn incident(&self, incident: &GraphRef) -> MemoryResult<Option<IncidentNode>> {
        Ok(Self::parse_ref(incident)
            .ok()
            .and_then(|id| self.incident_node(id)))
    }

    async fn incidents(&self, query: &IncidentQuery) -> MemoryResult<Vec<IncidentNode>> {
        let mut found: Vec<IncidentNode> = self
            .nodes
            .iter()
            .filter_map(|n| match n.value() {
                StoredNode::Incident(i) if query.matches(i) => Some(i.clone()),
                _ => None,
            })
            .collect();
        found.sort_by_key(|i| i.occurred_at);
        Ok(found)
    }

    async fn fixes_for(&self, incident: &GraphRef) -> MemoryResult<Vec<FixNode>> {
        let id = Self::parse_ref(incident)?;
        Ok(self
            .neighbours(id, RelationType::ResolvedBy, true)
            .into_iter()
            .filter_map(|fix| match self.nodes.get(&fix).map(|n| n.clone()) {
                Some(StoredNode::Fix(node)) => Some(node),
                _ => None,
            })
            .collect())
    }

    async fn trigger_for(&self, incident: &GraphRef) -> MemoryResult<Option<DeploymentNode>> {
        let id = Self::parse_ref(incident)?;
        Ok(self
            .neighbours(id, RelationType::Triggered, false)
            .into_iter()
            .filter_map(|d| self.deployment_node(d))
            .max_by_key(|d| d.deployed_at))
    }

    async fn triggered_pairs(&self) -> MemoryResult<Vec<(DeploymentNode, IncidentNode)>> {
        let mut pairs = Vec::new();
        for edges in self.outgoing.iter() {
            for edge in edges.iter().filter(|e| e.relation == RelationType::Triggered) {
                if let (Some(d), Some(i)) =
                    (self.deployment_node(edge.from), self.incident_node(edge.to))
                {
                    pairs.push((d, i));
                }
            }
        }
        Ok(pairs)
    }

    async fn resolve_incident(
        &self,
        incident: &GraphRef,
        fix_description: &str,
        resolved_at: DateTime<Utc>,
    ) -> MemoryResult<()> {
        let id = Self::parse_ref(incident)?;
        match self.nodes.get_mut(&id) {
            Some(mut node) => match node.value_mut() {
                StoredNode::Incident(i) => i.resolved = true,
                _ => return Err(MemoryError::NotFound(format!("incident {}", incident))),
            },
            None => return Err(MemoryError::NotFound(format!("incident {}", incident))),
        }

        let fix_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.nodes.insert(
            fix_id,
            StoredNode::Fix(FixNode {
                graph_ref: GraphRef::new(fix_id.to_string()),
                description: fix_description.to_string(),
                resolved_at,
            }),
        );
        self.add_edge(id, fix_id, RelationType::ResolvedBy);
        self.save_to_disk()
    }

    async fn snapshot(&self, namespace: Option<&str>) -> MemoryResult<GraphSnapshot> {
        let in_scope = |node: &StoredNode| match (namespace, node.namespace()) {
            (None, _) => true,
            (Some(ns), Some(node_ns)) => ns == node_ns,
            (Some(_), None) => false,
        };

        let mut included: HashSet<NodeId> = self
            .nodes
            .iter()
            .filter(|n| in_scope(n.value()))
            .map(|n| *n.key())
            .collect();

        // Namespace-less nodes come along through their edges
        let attached: Vec<NodeId> = included
            .iter()
            .flat_map(|id| {
                let mut extra = self.neighbours(*id, RelationType::RunsOn, true);
                extra.extend(self.neighbours(*id, RelationType::ResolvedBy, true));
                extra
            })
            .collect();
        included.extend(attached);

        let mut ids: Vec<NodeId> = included.iter().copied().collect();
        ids.sort_unstable();

        let nodes = ids
            .iter()
            .filter_map(|id| {
                self.nodes.get(id).map(|n| SnapshotNode {
                    id: GraphRef::new(id.to_string()),
                    label: n.label(),
                    name: n.display_name(),
                    namespace: n.namespace().map(str::to_string),
                    resolved: matches!(n.value(), StoredNode::Incident(i) if i.resolved),
                })
            })
            .collect();

        let edges = ids
            .iter()
            .flat_map(|id| self.outgoing.get(id).map(|e| e.clone()).unwrap_or_default())
            .filter(|e| included.contains(&e.to))
            .map(|e| SnapshotEdge {
                from: GraphRef::new(e.from.to_string()),
                to: GraphRef::new(e.to.to_string()),
                relation: e.relation,
            })
            .collect();

        Ok(GraphSnapshot { nodes, edges })
    }

    async fn clear(&self) -> MemoryResult<()> {
        self.nodes.clear();
        self.merge_index.clear();
        self.outgoing.clear();
        self.incoming.clear();
        self.save_to_disk()
    }
}
