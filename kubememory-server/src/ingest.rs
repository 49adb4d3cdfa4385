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

//! Incident Memory - ingestion and feedback coordinator
//!
//! Writes every incident and fix into all three memories and keeps them
//! cross-referenced.
//!
//! ```text
//! NewIncident ─► IncidentStore ─┬─► SimilaritySearch (incident doc)
//!   (dedup)                     ├─► CausalGraph (topology + incident node)
//!                               ├─► set_refs (vector id, graph ref)
//!                               └─► AnalysisPipeline ─► ai_analysis
//!
//! NewFix ─► IncidentStore ─┬─► SimilaritySearch (fix doc, correction doc)
//!                          ├─► CausalGraph (resolve when it worked)
//!                          └─► ClusterPattern recompute
//! ```
//!
//! Only the record store is authoritative. Vector, graph and analysis
//! failures are logged and listed in the outcome; the record survives.

use crate::agents::{AgentState, AnalysisPipeline};
use chrono::{DateTime, Utc};
use kubememory_core::{
    ClusterPattern, Fix, GraphRef, Incident, IncidentId, IncidentStatus, KmResult,
    KubeMemoryError, NewFix, NewIncident,
};
use kubememory_memory::{CausalGraph, IncidentStore, Inserted, MemoryError, SimilaritySearch};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of [`IncidentMemory::ingest`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Created {
        incident: Incident,
        /// `None` when analysis was skipped
        analysis: Option<AgentState>,
        /// Memory writes that failed, `"<stage>: <error>"`
        errors: Vec<String>,
    },
    /// Same pod, namespace, type and timestamp already stored
    Duplicate { incident: Incident },
}

impl IngestOutcome {
    pub fn incident(&self) -> &Incident {
        match self {
            IngestOutcome::Created { incident, .. } | IngestOutcome::Duplicate { incident } => {
                incident
            }
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestOutcome::Duplicate { .. })
    }
}

/// Result of [`IncidentMemory::submit_fix`]
#[derive(Debug, Clone, Serialize)]
pub struct FixOutcome {
    pub fix: Fix,
    pub vector_id: Option<String>,
    pub correction_id: Option<String>,
    pub resolved: bool,
    pub pattern: Option<ClusterPattern>,
    pub errors: Vec<String>,
}

pub struct IncidentMemory {
    incidents: Arc<dyn IncidentStore>,
    search: Arc<SimilaritySearch>,
    graph: Arc<CausalGraph>,
    pipeline: Arc<AnalysisPipeline>,
}

impl IncidentMemory {
    pub fn new(
        incidents: Arc<dyn IncidentStore>,
        search: Arc<SimilaritySearch>,
        graph: Arc<CausalGraph>,
        pipeline: Arc<AnalysisPipeline>,
    ) -> Self {
        Self {
            incidents,
            search,
            graph,
            pipeline,
        }
    }

    /// Store a watcher payload, index it and optionally analyse it.
    ///
    /// Duplicates are returned as-is without touching the other memories.
    pub async fn ingest(&self, new: NewIncident, analyze: bool) -> KmResult<IngestOutcome> {
        if new.pod_name.trim().is_empty() || new.namespace.trim().is_empty() {
            return Err(KubeMemoryError::Validation(
                "incident requires pod_name and namespace".into(),
            ));
        }

        let mut incident = match self
            .incidents
            .insert(new)
            .await
            .map_err(MemoryError::into_store)?
        {
            Inserted::Created(incident) => incident,
            Inserted::Duplicate(incident) => {
                debug!(incident = incident.id, "duplicate incident ignored");
                return Ok(IngestOutcome::Duplicate { incident });
            }
        };

        let mut errors = Vec::new();
        let vector_id = match self.search.store_incident(&incident).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(incident = incident.id, "incident not embedded: {}", e);
                errors.push(format!("Vector: {}", e));
                None
            }
        };
        let graph_ref = match self.graph.ingest_incident(&incident).await {
            Ok(graph_ref) => Some(graph_ref),
            Err(e) => {
                warn!(incident = incident.id, "incident not added to graph: {}", e);
                errors.push(format!("Graph: {}", e));
                None
            }
        };

        if vector_id.is_some() || graph_ref.is_some() {
            match self
                .incidents
                .set_refs(incident.id, vector_id, graph_ref)
                .await
            {
                Ok(updated) => incident = updated,
                Err(e) => {
                    warn!(incident = incident.id, "memory refs not recorded: {}", e);
                    errors.push(format!("Store: {}", e));
                }
            }
        }

        if let Err(e) = self
            .incidents
            .recompute_pattern(&incident.pod_name, &incident.namespace, incident.incident_type)
            .await
        {
            warn!(incident = incident.id, "pattern not recomputed: {}", e);
        }

        info!(
            incident = incident.id,
            pod = %incident.pod_name,
            namespace = %incident.namespace,
            incident_type = %incident.incident_type,
            vector_id = incident.vector_id.as_deref().unwrap_or("-"),
            "incident ingested"
        );

        let analysis = if analyze {
            let state = self.pipeline.analyze(&incident).await;
            match self
                .incidents
                .set_analysis(incident.id, &state.recommendation)
                .await
            {
                Ok(()) => incident.ai_analysis = Some(state.recommendation.clone()),
                Err(e) => {
                    warn!(incident = incident.id, "analysis not stored: {}", e);
                    errors.push(format!("Store: {}", e));
                }
            }
            Some(state)
        } else {
            None
        };

        Ok(IngestOutcome::Created {
            incident,
            analysis,
            errors,
        })
    }

    /// Re-run the analysis pipeline for a stored incident.
    pub async fn analyze(&self, id: IncidentId) -> KmResult<AgentState> {
        let incident = self.incident(id).await?;
        let state = self.pipeline.analyze(&incident).await;
        if let Err(e) = self.incidents.set_analysis(id, &state.recommendation).await {
            warn!(incident = id, "analysis not stored: {}", e);
        }
        Ok(state)
    }

    pub async fn incident(&self, id: IncidentId) -> KmResult<Incident> {
        self.incidents
            .get(id)
            .await
            .map_err(MemoryError::into_store)?
            .ok_or_else(|| KubeMemoryError::NotFound(format!("incident {}", id)))
    }

    /// Record a fix and feed it back into memory.
    ///
    /// A fix with `correction_of` also writes a correction document so
    /// later retrievals see the override.
    pub async fn submit_fix(&self, new: NewFix) -> KmResult<FixOutcome> {
        if new.description.trim().is_empty() {
            return Err(KubeMemoryError::Validation("fix description must not be empty".into()));
        }
        let incident = self.incident(new.incident_id).await?;
        let fix = self
            .incidents
            .insert_fix(new)
            .await
            .map_err(MemoryError::into_store)?;

        let mut errors = Vec::new();
        let vector_id = match self.search.store_fix(&incident, &fix).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(fix = fix.id, "fix not embedded: {}", e);
                errors.push(format!("Vector: {}", e));
                None
            }
        };

        let mut correction_id = None;
        if let Some(original_id) = fix.correction_of {
            match self.incidents.get_fix(original_id).await {
                Ok(Some(original)) => {
                    match self.search.store_correction(&incident, &original, &fix).await {
                        Ok(id) => {
                            info!(fix = fix.id, original = original_id, "correction recorded");
                            correction_id = Some(id);
                        }
                        Err(e) => {
                            warn!(fix = fix.id, "correction not embedded: {}", e);
                            errors.push(format!("Vector: {}", e));
                        }
                    }
                }
                Ok(None) => errors.push(format!("Store: original fix {} not found", original_id)),
                Err(e) => errors.push(format!("Store: {}", e)),
            }
        }

        let mut resolved = false;
        if fix.worked {
            if let Some(graph_ref) = &incident.graph_ref {
                if let Err(e) = self.graph.resolve_incident(graph_ref, &fix.description).await {
                    warn!(incident = incident.id, "graph incident not resolved: {}", e);
                    errors.push(format!("Graph: {}", e));
                }
            }
            match self
                .incidents
                .set_status(incident.id, IncidentStatus::Resolved)
                .await
            {
                Ok(_) => resolved = true,
                Err(e) => errors.push(format!("Store: {}", e)),
            }
        }

        let pattern = match self
            .incidents
            .recompute_pattern(&incident.pod_name, &incident.namespace, incident.incident_type)
            .await
        {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!(incident = incident.id, "pattern not recomputed: {}", e);
                errors.push(format!("Store: {}", e));
                None
            }
        };

        info!(
            fix = fix.id,
            incident = incident.id,
            worked = fix.worked,
            correction = fix.correction_of.is_some(),
            "fix submitted"
        );
        Ok(FixOutcome {
            fix,
            vector_id,
            correction_id,
            resolved,
            pattern,
            errors,
        })
    }

    pub async fn set_status(&self, id: IncidentId, status: IncidentStatus) -> KmResult<Incident> {
        self.incidents
            .set_status(id, status)
            .await
            .map_err(MemoryError::into_store)
    }

    pub async fn record_deployment(
        &self,
        service: &str,
        namespace: &str,
        version: &str,
        deployed_at: DateTime<Utc>,
    ) -> KmResult<GraphRef> {
        if service.trim().is_empty() || namespace.trim().is_empty() || version.trim().is_empty() {
            return Err(KubeMemoryError::Validation(
                "deployment requires service, namespace and version".into(),
            ));
        }
        self.graph
            .record_deployment(service, namespace, version, deployed_at)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{InferenceClient, ModelSelection, ScriptedClient};
    use kubememory_core::DocKind;
    use kubememory_memory::{
        FileIncidentStore, HashEmbedder, InMemoryGraphStore, InMemoryVectorStore, MemoryConfig,
    };
    use std::time::Duration;

    fn memory(llm: ScriptedClient) -> (IncidentMemory, Arc<SimilaritySearch>) {
        let config = MemoryConfig::default();
        let search = Arc::new(SimilaritySearch::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashEmbedder::new(64)),
            Duration::from_secs(1),
        ));
        let graph = Arc::new(CausalGraph::new(Arc::new(InMemoryGraphStore::new()), &config));
        let llm: Arc<dyn InferenceClient> = Arc::new(llm);
        let pipeline = Arc::new(AnalysisPipeline::new(
            search.clone(),
            graph.clone(),
            llm,
            ModelSelection::Model("scripted:latest".into()),
            Duration::from_secs(1),
        ));
        let memory = IncidentMemory::new(
            Arc::new(FileIncidentStore::in_memory()),
            search.clone(),
            graph,
            pipeline,
        );
        (memory, search)
    }

    fn payload() -> NewIncident {
        NewIncident {
            pod_name: "payment-api".into(),
            namespace: "prod".into(),
            node_name: "node-1".into(),
            service_name: "payment".into(),
            incident_type: "OOMKilled".into(),
            severity: "high".into(),
            description: "Container exceeded its memory limit".into(),
            raw_logs: "java.lang.OutOfMemoryError: Java heap space".into(),
            image: "payment:2.3".into(),
            restart_count: 4,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_ingest_sets_refs_and_dedups() {
        let (memory, _) = memory(ScriptedClient::new());
        let first = memory.ingest(payload(), false).await.unwrap();
        let incident = first.incident().clone();
        assert!(!first.is_duplicate());
        assert!(incident.vector_id.is_some());
        assert!(incident.graph_ref.is_some());

        let again = payload();
        let second = memory
            .ingest(NewIncident { occurred_at: incident.occurred_at, ..again }, false)
            .await
            .unwrap();
        assert!(second.is_duplicate());
        assert_eq!(second.incident().id, incident.id);
    }

    #[tokio::test]
    async fn test_ingest_stores_analysis_even_when_inference_fails() {
        let (memory, _) = memory(ScriptedClient::new().failing_completion("connection refused"));
        let outcome = memory.ingest(payload(), true).await.unwrap();
        let IngestOutcome::Created { incident, analysis, .. } = outcome else {
            panic!("expected a new incident");
        };
        let state = analysis.unwrap();
        assert!(state.errors.iter().any(|e| e.starts_with("Recommender")));
        assert_eq!(incident.ai_analysis.as_deref(), Some(state.recommendation.as_str()));
    }

    #[tokio::test]
    async fn test_correction_fix_writes_correction_doc_and_resolves() {
        let (memory, search) = memory(ScriptedClient::new());
        let incident = memory.ingest(payload(), false).await.unwrap().incident().clone();

        let original = memory
            .submit_fix(NewFix {
                incident_id: incident.id,
                description: "Restart the pod".into(),
                applied_by: "oncall".into(),
                worked: false,
                ai_suggested: true,
                correction_of: None,
            })
            .await
            .unwrap();
        assert!(!original.resolved);

        let correction = memory
            .submit_fix(NewFix {
                incident_id: incident.id,
                description: "Raise the memory limit to 1Gi".into(),
                applied_by: "oncall".into(),
                worked: true,
                ai_suggested: false,
                correction_of: Some(original.fix.id),
            })
            .await
            .unwrap();
        assert!(correction.correction_id.is_some());
        assert!(correction.resolved);
        let pattern = correction.pattern.unwrap();
        assert_eq!(pattern.best_fix.as_deref(), Some("Raise the memory limit to 1Gi"));
        assert!((pattern.fix_success_rate - 0.5).abs() < f64::EPSILON);

        let hits = search
            .search_similar("memory limit", 5, None, Some(DocKind::Correction))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].document.starts_with("CORRECTION: Raise the memory limit"));

        let stored = memory.incident(incident.id).await.unwrap();
        assert_eq!(stored.status, IncidentStatus::Resolved);
    }

    #[tokio::test]
    async fn test_fix_for_unknown_incident_is_not_found() {
        let (memory, _) = memory(ScriptedClient::new());
        let err = memory
            .submit_fix(NewFix {
                incident_id: 99,
                description: "anything".into(),
                applied_by: String::new(),
                worked: true,
                ai_suggested: false,
                correction_of: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KubeMemoryError::NotFound(_)));
    }
}
