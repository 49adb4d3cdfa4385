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

//! Incident, Fix and ClusterPattern records.
//!
//! Incidents are created by the cluster watcher and are immutable apart from
//! the cross-reference IDs (set once after embedding and graph ingestion),
//! the stored analysis text and the status transition to `Resolved`.

use crate::graph::GraphRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type IncidentId = u64;
pub type FixId = u64;

/// Closed set of failure kinds reported by the watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IncidentType {
    CrashLoopBackOff,
    OOMKill,
    NodePressure,
    ImagePullBackOff,
    Evicted,
    Pending,
    Unknown,
}

impl IncidentType {
    pub const ALL: [IncidentType; 7] = [
        IncidentType::CrashLoopBackOff,
        IncidentType::OOMKill,
        IncidentType::NodePressure,
        IncidentType::ImagePullBackOff,
        IncidentType::Evicted,
        IncidentType::Pending,
        IncidentType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::CrashLoopBackOff => "CrashLoopBackOff",
            IncidentType::OOMKill => "OOMKill",
            IncidentType::NodePressure => "NodePressure",
            IncidentType::ImagePullBackOff => "ImagePullBackOff",
            IncidentType::Evicted => "Evicted",
            IncidentType::Pending => "Pending",
            IncidentType::Unknown => "Unknown",
        }
    }

    /// Lenient parse used on watcher payloads and tool arguments.
    /// Anything unrecognised becomes `Unknown`.
    pub fn from_label(label: &str) -> Self {
        let wanted = label.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .unwrap_or(IncidentType::Unknown)
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Unknown labels default to `Medium`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Severity::Low,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Medium,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    #[default]
    Open,
    Investigating,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Resolved => "resolved",
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, IncidentStatus::Resolved)
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw payload handed over by the cluster watcher.
///
/// Type and severity arrive as free-form labels and are normalised on
/// ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIncident {
    pub pod_name: String,
    pub namespace: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub incident_type: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub raw_logs: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub restart_count: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub pod_name: String,
    pub namespace: String,
    pub node_name: String,
    pub service_name: String,
    pub incident_type: IncidentType,
    pub severity: Severity,
    #[serde(default)]
    pub status: IncidentStatus,
    pub description: String,
    pub raw_logs: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub restart_count: u32,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Recommendation text stored by the analysis pipeline
    #[serde(default)]
    pub ai_analysis: Option<String>,
    /// Document id in the vector store
    #[serde(default)]
    pub vector_id: Option<String>,
    /// Incident-node reference in the graph store
    #[serde(default)]
    pub graph_ref: Option<GraphRef>,
}

impl Incident {
    /// Normalise a watcher payload into an incident record.
    pub fn from_new(id: IncidentId, new: NewIncident) -> Self {
        Self {
            id,
            incident_type: IncidentType::from_label(&new.incident_type),
            severity: Severity::from_label(&new.severity),
            status: IncidentStatus::Open,
            pod_name: new.pod_name,
            namespace: new.namespace,
            node_name: new.node_name,
            service_name: new.service_name,
            description: new.description,
            raw_logs: new.raw_logs,
            image: new.image,
            restart_count: new.restart_count,
            occurred_at: new.occurred_at,
            resolved_at: None,
            ai_analysis: None,
            vector_id: None,
            graph_ref: None,
        }
    }

    /// Service the pod belongs to, falling back to the pod name.
    pub fn service(&self) -> &str {
        if self.service_name.trim().is_empty() {
            &self.pod_name
        } else {
            &self.service_name
        }
    }

    /// Node the pod ran on, `unknown` when the watcher did not report it.
    pub fn node(&self) -> &str {
        if self.node_name.trim().is_empty() {
            "unknown"
        } else {
            &self.node_name
        }
    }

    /// Text embedded into the vector store for this incident.
    pub fn embedding_text(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.incident_type,
            self.pod_name,
            self.namespace,
            self.description,
            truncate_chars(&self.raw_logs, 500)
        )
    }
}

/// A remediation attempt attached to one incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub id: FixId,
    pub incident_id: IncidentId,
    pub description: String,
    pub applied_by: String,
    pub worked: bool,
    pub ai_suggested: bool,
    /// Earlier fix this one overrides
    #[serde(default)]
    pub correction_of: Option<FixId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFix {
    pub incident_id: IncidentId,
    pub description: String,
    #[serde(default)]
    pub applied_by: String,
    #[serde(default)]
    pub worked: bool,
    #[serde(default)]
    pub ai_suggested: bool,
    #[serde(default)]
    pub correction_of: Option<FixId>,
}

/// Aggregate cache keyed by (pod, namespace, incident type)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterPattern {
    pub pod_name: String,
    pub namespace: String,
    pub incident_type: IncidentType,
    pub frequency: u32,
    pub best_fix: Option<String>,
    pub fix_success_rate: f64,
    pub last_seen: DateTime<Utc>,
}

impl ClusterPattern {
    /// Recompute the aggregate from the raw history of one key.
    ///
    /// `incidents` must already be restricted to the key; `fixes` are all
    /// fixes attached to those incidents. Returns `None` without history.
    pub fn from_history(incidents: &[Incident], fixes: &[Fix]) -> Option<Self> {
        let first = incidents.first()?;
        let last_seen = incidents.iter().map(|i| i.occurred_at).max()?;

        let worked: Vec<&Fix> = fixes.iter().filter(|f| f.worked).collect();
        let best_fix = worked
            .iter()
            .max_by_key(|f| (f.created_at, f.id))
            .map(|f| f.description.clone());
        let fix_success_rate = if fixes.is_empty() {
            0.0
        } else {
            worked.len() as f64 / fixes.len() as f64
        };

        Some(Self {
            pod_name: first.pod_name.clone(),
            namespace: first.namespace.clone(),
            incident_type: first.incident_type,
            frequency: incidents.len() as u32,
            best_fix,
            fix_success_rate,
            last_seen,
        })
    }
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
