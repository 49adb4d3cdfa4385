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

//! Pre-deploy risk scoring.

use kubememory_core::{BlastRadiusEntry, DeployCrashPattern, Incident, Severity};
use serde::{Deserialize, Serialize};

const CRITICAL_WEIGHT: u32 = 40;
const HIGH_WEIGHT: u32 = 20;
const UNSTABLE_EDGE_WEIGHT: u32 = 10;
/// Co-occurrence above which a blast-radius edge counts as unstable
const UNSTABLE_CO_OCCURRENCE: u32 = 2;
const MAX_DEPLOY_HISTORY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: u32) -> Self {
        if score > 60 {
            RiskLevel::High
        } else if score > 20 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            RiskLevel::High => "Do not deploy",
            RiskLevel::Medium => "Deploy with caution and watch the blast radius",
            RiskLevel::Low => "Safe to deploy",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            RiskLevel::High => "🔴",
            RiskLevel::Medium => "🟡",
            RiskLevel::Low => "🟢",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub service: String,
    pub namespace: String,
    pub risk_level: RiskLevel,
    pub risk_score: u32,
    pub open_incidents: usize,
    pub unstable_blast_radius: Vec<BlastRadiusEntry>,
    pub deploy_crash_history: Vec<DeployCrashPattern>,
    pub recommendation: String,
}

impl RiskReport {
    /// `open` must already be restricted to unresolved incidents of the service.
    pub fn compute(
        service: &str,
        namespace: &str,
        open: &[Incident],
        blast_radius: &[BlastRadiusEntry],
        deploy_history: &[DeployCrashPattern],
    ) -> Self {
        let critical = open.iter().filter(|i| i.severity == Severity::Critical).count() as u32;
        let high = open.iter().filter(|i| i.severity == Severity::High).count() as u32;
        let unstable: Vec<BlastRadiusEntry> = blast_radius
            .iter()
            .filter(|b| b.co_occurrence > UNSTABLE_CO_OCCURRENCE)
            .cloned()
            .collect();

        let risk_score = CRITICAL_WEIGHT * critical
            + HIGH_WEIGHT * high
            + UNSTABLE_EDGE_WEIGHT * unstable.len() as u32;
        let risk_level = RiskLevel::from_score(risk_score);

        Self {
            service: service.to_string(),
            namespace: namespace.to_string(),
            risk_level,
            risk_score,
            open_incidents: open.len(),
            unstable_blast_radius: unstable,
            deploy_crash_history: deploy_history
                .iter()
                .filter(|d| d.service == service)
                .take(MAX_DEPLOY_HISTORY)
                .cloned()
                .collect(),
            recommendation: risk_level.recommendation().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kubememory_core::{IncidentType, NewIncident};

    fn open_incident(id: u64, severity: &str) -> Incident {
        Incident::from_new(
            id,
            NewIncident {
                pod_name: "payment-api".into(),
                namespace: "prod".into(),
                node_name: String::new(),
                service_name: String::new(),
                incident_type: "OOMKill".into(),
                severity: severity.into(),
                description: String::new(),
                raw_logs: String::new(),
                image: String::new(),
                restart_count: 0,
                occurred_at: Utc::now(),
            },
        )
    }

    fn edge(pod: &str, co_occurrence: u32) -> BlastRadiusEntry {
        BlastRadiusEntry {
            affected_pod: pod.into(),
            namespace: "prod".into(),
            co_occurrence,
            incident_types: vec![IncidentType::OOMKill],
        }
    }

    #[test]
    fn test_critical_plus_high_plus_unstable_edge_is_high() {
        let open = [open_incident(1, "critical"), open_incident(2, "high")];
        let blast = [edge("checkout", 1), edge("ledger", 4)];
        let report = RiskReport::compute("payment-api", "prod", &open, &blast, &[]);

        assert_eq!(report.risk_score, 70);
        assert_eq!(report.risk_level, RiskLevel::High);
        assert_eq!(report.recommendation, "Do not deploy");
        assert_eq!(report.unstable_blast_radius.len(), 1);
        assert_eq!(report.open_incidents, 2);
    }

    #[test]
    fn test_bands() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(20), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(21), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(60), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(61), RiskLevel::High);
    }

    #[test]
    fn test_deploy_history_is_capped_and_scoped() {
        let pattern = |service: &str| DeployCrashPattern {
            service: service.into(),
            crash_count: 2,
            crash_types: vec![IncidentType::CrashLoopBackOff],
            avg_minutes_to_crash: 12.0,
        };
        let history: Vec<_> = (0..5).map(|_| pattern("payment-api")).chain([pattern("other")]).collect();
        let report = RiskReport::compute("payment-api", "prod", &[], &[], &history);
        assert_eq!(report.deploy_crash_history.len(), 3);
        assert_eq!(report.risk_level, RiskLevel::Low);
    }
}
