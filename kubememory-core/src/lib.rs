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

//! KubeMemory Core
//!
//! Shared data model for the incident-memory engine:
//! - **Incidents and fixes**: the event log supplied by the cluster watcher
//!   and the human/agent remediation attempts attached to it
//! - **Graph entities**: Pod, Service, Node, Incident, Fix and Deployment
//!   nodes plus the rows returned by causal, blast-radius and deploy queries
//! - **Search documents**: typed metadata stored next to embeddings
//! - **Chat log**: sessions and role-tagged messages
//! - **Errors**: the recoverable failure taxonomy every component degrades on

pub mod chat;
pub mod error;
pub mod graph;
pub mod incident;
pub mod search;

pub use chat::{ChatMessage, ChatRole, ChatSession, ALL_NAMESPACES};
pub use error::{KmResult, KubeMemoryError};
pub use graph::{
    BlastRadiusEntry, BlastRank, CausalPattern, DeployCorrelation, DeployCrashPattern,
    DeploymentNode, FixNode, GraphRef, GraphSnapshot, IncidentNode, NodeLabel, RelationType,
    SnapshotEdge, SnapshotNode, Topology,
};
pub use incident::{
    truncate_chars, ClusterPattern, Fix, FixId, Incident, IncidentId, IncidentStatus,
    IncidentType, NewFix, NewIncident, Severity,
};
pub use search::{similarity_from_distance, DocKind, DocMetadata, SearchFilter, SearchHit};
