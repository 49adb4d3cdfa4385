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

use kubememory_core::{
    truncate_chars, BlastRadiusEntry, CausalPattern, DeployCorrelation, GraphRef, Incident,
    IncidentId, IncidentType, SearchHit, Severity,
};
use serde::{Deserialize, Serialize};

/// Log excerpt kept on the state
pub const MAX_LOG_CHARS: usize = 500;

/// Incident facts fixed when a run starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentInput {
    pub incident_id: Option<IncidentId>,
    pub graph_ref: Option<GraphRef>,
    pub incident_type: IncidentType,
    pub pod_name: String,
    pub namespace: String,
    pub description: String,
    pub raw_logs: String,
    pub severity: Severity,
}

impl IncidentInput {
    pub fn from_incident(incident: &Incident) -> Self {
        Self {
            incident_id: Some(incident.id),
            graph_ref: incident.graph_ref.clone(),
            incident_type: incident.incident_type,
            pod_name: incident.pod_name.clone(),
            namespace: incident.namespace.clone(),
            description: incident.description.clone(),
            raw_logs: truncate_chars(&incident.raw_logs, MAX_LOG_CHARS).to_string(),
            severity: incident.severity,
        }
    }

    /// Pod description supplied by a tool caller; nothing is persisted
    pub fn ad_hoc(
        pod_name: &str,
        namespace: &str,
        incident_type: Option<&str>,
        description: &str,
        logs_excerpt: &str,
    ) -> Self {
        Self {
            incident_id: None,
            graph_ref: None,
            incident_type: incident_type
                .map(IncidentType::from_label)
                .unwrap_or(IncidentType::Unknown),
            pod_name: pod_name.to_string(),
            namespace: namespace.to_string(),
            description: description.to_string(),
            raw_logs: truncate_chars(logs_excerpt, MAX_LOG_CHARS).to_string(),
            severity: Severity::Medium,
        }
    }

    /// Retrieval query; never empty
    pub fn query(&self) -> String {
        let kind = match self.incident_type {
            IncidentType::Unknown => "",
            other => other.as_str(),
        };
        let query = [
            kind,
            self.pod_name.as_str(),
            self.namespace.as_str(),
            self.description.as_str(),
        ]
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
        if query.is_empty() {
            "Kubernetes incident".to_string()
        } else {
            query
        }
    }
}

/// Unit of work threaded through Retrieve → Correlate → Recommend.
///
/// Each stage takes the state by value and hands back the updated one.
/// `errors` only ever grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub input: IncidentInput,

    // Retrieve
    pub similar_incidents: Vec<SearchHit>,
    pub past_fixes: Vec<SearchHit>,
    pub corrections: Vec<SearchHit>,

    // Correlate
    pub causal_patterns: Vec<CausalPattern>,
    pub blast_radius: Vec<BlastRadiusEntry>,
    pub deploy_correlation: Option<DeployCorrelation>,

    // Recommend
    pub root_cause: String,
    pub recommendation: String,
    pub blast_radius_warning: String,
    pub prevention_advice: String,
    pub confidence: f64,
    pub sources: Vec<String>,

    pub errors: Vec<String>,
    pub processing_time_ms: u64,
}

impl AgentState {
    pub fn new(input: IncidentInput) -> Self {
        Self {
            input,
            similar_incidents: Vec::new(),
            past_fixes: Vec::new(),
            corrections: Vec::new(),
            causal_patterns: Vec::new(),
            blast_radius: Vec::new(),
            deploy_correlation: None,
            root_cause: String::new(),
            recommendation: String::new(),
            blast_radius_warning: String::new(),
            prevention_advice: String::new(),
            confidence: 0.0,
            sources: Vec::new(),
            errors: Vec::new(),
            processing_time_ms: 0,
        }
    }

    pub fn push_error(&mut self, stage: &str, error: impl std::fmt::Display) {
        self.errors.push(format!("{}: {}", stage, error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_falls_back_when_empty() {
        let mut input = IncidentInput::ad_hoc("", "", None, "", "");
        assert_eq!(input.query(), "Kubernetes incident");

        input.incident_type = IncidentType::OOMKill;
        input.pod_name = "api".into();
        input.namespace = "prod".into();
        assert_eq!(input.query(), "OOMKill api prod");
    }

    #[test]
    fn test_ad_hoc_defaults() {
        let logs = "x".repeat(900);
        let input = IncidentInput::ad_hoc("api", "prod", Some("bogus"), "", &logs);
        assert_eq!(input.severity, Severity::Medium);
        assert_eq!(input.incident_type, IncidentType::Unknown);
        assert_eq!(input.raw_logs.len(), MAX_LOG_CHARS);
        assert!(input.incident_id.is_none());
    }
}
