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

//! Semantic retrieval over incidents, fixes and corrective overrides.
//!
//! ```text
//!   text ──► Embedder ──► VectorStore.query(k, where) ──► distance ∈ [0,2]
//!                                                            │
//!                                   similarity = 1 − d/2 ◄───┘
//! ```
//!
//! Embedding failures surface as `EmbeddingUnavailable` so callers can tell
//! "search failed" apart from "no matches".

use crate::embedding::Embedder;
use crate::error::{bounded, MemoryError};
use crate::vector::{VectorMatch, VectorRecord, VectorStore};
use kubememory_core::{
    similarity_from_distance, truncate_chars, DocKind, DocMetadata, Fix, Incident, KmResult,
    KubeMemoryError, SearchFilter, SearchHit,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct SimilaritySearch {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

impl SimilaritySearch {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self {
            store,
            embedder,
            timeout,
        }
    }

    /// Log whether the vector store answers; never fails.
    pub async fn check_connectivity(&self) -> bool {
        match bounded(self.timeout, self.store.heartbeat()).await {
            Ok(()) => {
                info!(embedder = self.embedder.name(), "Vector store reachable");
                true
            }
            Err(e) => {
                warn!("Vector store unreachable: {}", e);
                false
            }
        }
    }

    async fn embed(&self, text: &str) -> KmResult<Vec<f32>> {
        self.embedder
            .embed(text)
            .await
            .map_err(|e| KubeMemoryError::EmbeddingUnavailable(e.to_string()))
    }

    /// Embed `text` and store it tagged with `kind`. Returns the document id.
    pub async fn embed_and_store(
        &self,
        text: &str,
        mut metadata: DocMetadata,
        kind: DocKind,
    ) -> KmResult<String> {
        let embedding = self.embed(text).await?;
        metadata.doc_type = Some(kind);

        let stem = metadata
            .incident_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "adhoc".to_string());
        let uuid = Uuid::new_v4().simple().to_string();
        let id = format!("{}_{}_{}", kind, stem, &uuid[..8]);

        let record = VectorRecord {
            id: id.clone(),
            embedding,
            document: text.to_string(),
            metadata,
        };
        bounded(self.timeout, self.store.add(vec![record]))
            .await
            .map_err(MemoryError::into_store)?;

        debug!(doc_id = %id, kind = %kind, "stored document");
        Ok(id)
    }

    pub async fn store_incident(&self, incident: &Incident) -> KmResult<String> {
        let metadata = DocMetadata {
            incident_id: Some(incident.id),
            pod_name: Some(incident.pod_name.clone()),
            namespace: Some(incident.namespace.clone()),
            incident_type: Some(incident.incident_type.to_string()),
            severity: Some(incident.severity.to_string()),
            occurred_at: Some(incident.occurred_at.to_rfc3339()),
            ..Default::default()
        };
        self.embed_and_store(&incident.embedding_text(), metadata, DocKind::Incident)
            .await
    }

    pub async fn store_fix(&self, incident: &Incident, fix: &Fix) -> KmResult<String> {
        let text = format!(
            "Fix for {} on {}: {}",
            incident.incident_type, incident.pod_name, fix.description
        );
        let metadata = DocMetadata {
            fix_id: Some(fix.id),
            ..fix_metadata(incident)
        };
        self.embed_and_store(&text, metadata, DocKind::Fix).await
    }

    /// Corrective-feedback write: `correction` overrides `original`.
    pub async fn store_correction(
        &self,
        incident: &Incident,
        original: &Fix,
        correction: &Fix,
    ) -> KmResult<String> {
        let text = format!(
            "CORRECTION: {} overrides {}",
            correction.description, original.description
        );
        let metadata = DocMetadata {
            original_fix_id: Some(original.id),
            correction_fix_id: Some(correction.id),
            ..fix_metadata(incident)
        };
        self.embed_and_store(&text, metadata, DocKind::Correction)
            .await
    }

    /// Ranked nearest neighbours of `query`, optionally filtered by
    /// namespace and document kind (conjunctive when both are set).
    ///
    /// Equal similarities rank corrections ahead of fixes ahead of incidents.
    pub async fn search_similar(
        &self,
        query: &str,
        limit: usize,
        namespace: Option<&str>,
        kind: Option<DocKind>,
    ) -> KmResult<Vec<SearchHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embed(query).await?;
        let filter = SearchFilter {
            namespace: namespace.map(str::to_string),
            pod_name: None,
            doc_kind: kind,
        };

        let matches = bounded(self.timeout, self.store.query(&embedding, limit, &filter))
            .await
            .map_err(MemoryError::into_store)?;

        let mut hits: Vec<SearchHit> = matches.into_iter().map(into_hit).collect();
        hits.sort_by(|a, b| {
            b.similarity.total_cmp(&a.similarity).then_with(|| {
                let rank = |h: &SearchHit| h.kind().map_or(u8::MAX, |k| k.precedence());
                rank(a).cmp(&rank(b))
            })
        });
        Ok(hits)
    }

    /// Every stored incident document for one pod, newest first.
    ///
    /// Unranked, so `similarity` is fixed at 1.0.
    pub async fn incident_history(&self, pod_name: &str, namespace: &str) -> KmResult<Vec<SearchHit>> {
        let filter = SearchFilter::default()
            .namespace(namespace)
            .pod(pod_name)
            .kind(DocKind::Incident);
        let matches = bounded(self.timeout, self.store.get(&filter))
            .await
            .map_err(MemoryError::into_store)?;

        let mut hits: Vec<SearchHit> = matches
            .into_iter()
            .map(|m| SearchHit {
                source_id: m.id,
                similarity: 1.0,
                metadata: m.metadata,
                document: m.document,
            })
            .collect();
        hits.sort_by(|a, b| b.metadata.occurred_at.cmp(&a.metadata.occurred_at));
        Ok(hits)
    }

    /// Destructive reset of the whole collection.
    pub async fn clear_all(&self) -> KmResult<()> {
        warn!("Clearing vector store");
        bounded(self.timeout, self.store.reset())
            .await
            .map_err(MemoryError::into_store)
    }
}

fn fix_metadata(incident: &Incident) -> DocMetadata {
    DocMetadata {
        incident_id: Some(incident.id),
        pod_name: Some(incident.pod_name.clone()),
        namespace: Some(incident.namespace.clone()),
        incident_type: Some(incident.incident_type.to_string()),
        ..Default::default()
    }
}

fn into_hit(m: VectorMatch) -> SearchHit {
    SearchHit {
        source_id: m.id,
        similarity: similarity_from_distance(m.distance).clamp(0.0, 1.0),
        metadata: m.metadata,
        document: m.document,
    }
}

/// Short single-line excerpt of a document for prompts and tool output.
pub fn excerpt(document: &str, max_chars: usize) -> String {
    truncate_chars(document, max_chars).replace('\n', " ")
}
