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

//! Retrieve → Correlate → Recommend.
//!
//! Every stage is a failure boundary: errors are appended to
//! [`AgentState::errors`] and the next stage still runs on whatever partial
//! evidence exists. [`AnalysisPipeline::run`] therefore never fails.

use super::prompt::{build_prompt, parse_response};
use super::state::{AgentState, IncidentInput};
use crate::llm::{InferenceClient, LlmError, ModelSelection};
use kubememory_core::{DocKind, Incident, KubeMemoryError};
use kubememory_memory::{CausalGraph, SimilaritySearch};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SIMILAR_LIMIT: usize = 5;
const FIX_LIMIT: usize = 3;
const CORRECTION_LIMIT: usize = 5;

pub const UNAVAILABLE_RECOMMENDATION: &str = "Analysis unavailable (LLM error or timeout).";
pub const UNAVAILABLE_ROOT_CAUSE: &str = "Could not determine (pipeline error).";
const UNAVAILABLE_WARNING: &str = "No blast radius assessment available.";
const UNAVAILABLE_PREVENTION: &str = "No prevention advice available.";

pub struct AnalysisPipeline {
    search: Arc<SimilaritySearch>,
    graph: Arc<CausalGraph>,
    llm: Arc<dyn InferenceClient>,
    model: ModelSelection,
    timeout: Duration,
}

impl AnalysisPipeline {
    /// `model` is resolved once by the caller, see [`crate::llm::resolve_model`].
    pub fn new(
        search: Arc<SimilaritySearch>,
        graph: Arc<CausalGraph>,
        llm: Arc<dyn InferenceClient>,
        model: ModelSelection,
        timeout: Duration,
    ) -> Self {
        Self {
            search,
            graph,
            llm,
            model,
            timeout,
        }
    }

    pub fn model(&self) -> &ModelSelection {
        &self.model
    }

    /// Analyse a stored incident
    pub async fn analyze(&self, incident: &Incident) -> AgentState {
        self.run(AgentState::new(IncidentInput::from_incident(incident)))
            .await
    }

    /// Analyse a pod described by a caller; nothing is persisted
    pub async fn analyze_in_memory(
        &self,
        pod_name: &str,
        namespace: &str,
        incident_type: Option<&str>,
        description: &str,
        logs_excerpt: &str,
    ) -> AgentState {
        let input =
            IncidentInput::ad_hoc(pod_name, namespace, incident_type, description, logs_excerpt);
        self.run(AgentState::new(input)).await
    }

    pub async fn run(&self, state: AgentState) -> AgentState {
        let start = Instant::now();
        info!(
            pod = %state.input.pod_name,
            namespace = %state.input.namespace,
            incident_type = %state.input.incident_type,
            "analysis started"
        );

        let state = self.retrieve(state).await;
        let state = self.correlate(state).await;
        let mut state = self.recommend(state).await;

        state.processing_time_ms = start.elapsed().as_millis() as u64;
        info!(
            pod = %state.input.pod_name,
            confidence = state.confidence,
            errors = state.errors.len(),
            elapsed_ms = state.processing_time_ms,
            "analysis finished"
        );
        state
    }

    async fn retrieve(&self, mut state: AgentState) -> AgentState {
        let query = state.input.query();
        let namespace = Some(state.input.namespace.as_str()).filter(|ns| !ns.is_empty());

        let lookups = async {
            let similar = self
                .search
                .search_similar(&query, SIMILAR_LIMIT, namespace, Some(DocKind::Incident))
                .await?;
            let fixes = self
                .search
                .search_similar(&query, FIX_LIMIT, None, Some(DocKind::Fix))
                .await?;
            let corrections = self
                .search
                .search_similar(&query, CORRECTION_LIMIT, None, Some(DocKind::Correction))
                .await?;
            Ok::<_, KubeMemoryError>((similar, fixes, corrections))
        }
        .await;

        match lookups {
            Ok((similar, fixes, corrections)) => {
                debug!(
                    similar = similar.len(),
                    fixes = fixes.len(),
                    corrections = corrections.len(),
                    "retrieve stage done"
                );
                state.similar_incidents = similar;
                state.past_fixes = fixes;
                state.corrections = corrections;
            }
            Err(e) => {
                warn!(error = %e, "retrieve stage failed");
                state.similar_incidents.clear();
                state.past_fixes.clear();
                state.corrections.clear();
                state.push_error("Retriever", e);
            }
        }
        state
    }

    /// Lookups run in order and stop at the first failure; results fetched
    /// before it stay in the state.
    async fn correlate(&self, mut state: AgentState) -> AgentState {
        let pod = state.input.pod_name.clone();
        let namespace = state.input.namespace.clone();
        let graph_ref = state.input.graph_ref.clone();

        let outcome = async {
            state.causal_patterns = self.graph.find_causal_patterns(&pod, &namespace).await?;
            state.blast_radius = self.graph.find_blast_radius(&pod, &namespace).await?;
            if let Some(r) = &graph_ref {
                state.deploy_correlation = self.graph.get_deploy_correlation(r).await?;
            }
            Ok::<_, KubeMemoryError>(())
        }
        .await;

        match outcome {
            Ok(()) => debug!(
                patterns = state.causal_patterns.len(),
                blast_radius = state.blast_radius.len(),
                deploy = state.deploy_correlation.is_some(),
                "correlate stage done"
            ),
            Err(e) => {
                warn!(
                    error = %e,
                    patterns = state.causal_patterns.len(),
                    "correlate stage failed"
                );
                state.push_error("Correlator", e);
            }
        }
        state
    }

    async fn recommend(&self, mut state: AgentState) -> AgentState {
        state.sources = state
            .similar_incidents
            .iter()
            .filter_map(|hit| hit.metadata.incident_id)
            .map(|id| id.to_string())
            .collect();

        match self.infer(&state).await {
            Ok(text) => {
                let parsed = parse_response(&text);
                if parsed.root_cause.is_empty() && parsed.recommendation.is_empty() {
                    // Small models sometimes ignore the template
                    state.recommendation = text.trim().to_string();
                } else {
                    state.root_cause = parsed.root_cause;
                    state.recommendation = parsed.recommendation;
                }
                state.blast_radius_warning = parsed.blast_radius_warning;
                state.prevention_advice = parsed.prevention;
                state.confidence = parsed.confidence;
            }
            Err(e) => {
                warn!(error = %e, "recommend stage failed");
                state.push_error("Recommender", e);
                state.root_cause = UNAVAILABLE_ROOT_CAUSE.to_string();
                state.recommendation = UNAVAILABLE_RECOMMENDATION.to_string();
                state.blast_radius_warning = UNAVAILABLE_WARNING.to_string();
                state.prevention_advice = UNAVAILABLE_PREVENTION.to_string();
                state.confidence = 0.0;
            }
        }
        state
    }

    async fn infer(&self, state: &AgentState) -> Result<String, LlmError> {
        let model = self.model.model().ok_or(LlmError::NoModel)?;
        let prompt = build_prompt(state);
        match tokio::time::timeout(self.timeout, self.llm.complete(model, &prompt, self.timeout))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}
