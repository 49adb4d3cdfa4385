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

//! KubeMemory Memory Layer
//!
//! Long-term memory for a Kubernetes cluster's failure history:
//! - **Causal graph**: topology, incidents, fixes and deployments with the
//!   temporal queries built on top of them (blast radius, deploy correlation)
//! - **Similarity search**: embeddings of incidents, fixes and engineer
//!   corrections, retrieved by semantic distance
//! - **Record stores**: incidents, fixes, cluster patterns and chat sessions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Memory Layer                            │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────┐  │
//! │  │   CausalGraph   │  │SimilaritySearch │  │IncidentStore│  │
//! │  │   (analytics)   │  │  (embed+rank)   │  │ ChatStore   │  │
//! │  └────────┬────────┘  └────────┬────────┘  └──────┬──────┘  │
//! │           │                    │                  │         │
//! │  ┌────────▼────────┐  ┌────────▼────────┐  ┌──────▼──────┐  │
//! │  │   GraphStore    │  │  VectorStore    │  │ JSON files  │  │
//! │  │ memory | neo4j  │  │ memory | chroma │  │  / memory   │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every remote call is bounded by [`MemoryConfig::store_timeout_secs`] and
//! surfaces as a [`kubememory_core::KubeMemoryError`] so callers can degrade
//! instead of failing.

pub mod chat_store;
pub mod config;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod incidents;
pub mod similarity;
pub mod vector;

pub use chat_store::{ChatStore, InMemoryChatStore};
pub use config::MemoryConfig;
pub use embedding::{Embedder, HashEmbedder};
pub use error::{MemoryError, MemoryResult};
pub use graph::{CausalGraph, GraphStore, InMemoryGraphStore, IncidentQuery, Neo4jGraphStore};
pub use incidents::{FileIncidentStore, IncidentFilter, IncidentStore, Inserted};
pub use similarity::{excerpt, SimilaritySearch};
pub use vector::{ChromaVectorStore, InMemoryVectorStore, VectorStore};
