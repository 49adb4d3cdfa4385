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

//! Plain-text renderings of tool results.
//!
//! The consumer is a language model, so output is short summary lines with
//! truncated excerpts rather than structured data.

use super::risk::RiskReport;
use crate::agents::AgentState;
use kubememory_core::{
    truncate_chars, BlastRadiusEntry, BlastRank, ClusterPattern, DeployCrashPattern, DocKind, Fix,
    GraphSnapshot, Incident, NodeLabel, SearchHit,
};
use kubememory_memory::excerpt;
use std::fmt::Write;

const DOC_EXCERPT: usize = 120;
const BEST_FIX_EXCERPT: usize = 100;
const TIMELINE_FIX_EXCERPT: usize = 60;
const MAX_DEPLOY_ROWS: usize = 5;
const MAX_CONTEXT_PODS: usize = 10;
const MAX_CONTEXT_OPEN: usize = 5;

fn risk_marker(count: u32) -> &'static str {
    if count > 5 {
        "🔴 HIGH"
    } else if count > 2 {
        "🟡 MEDIUM"
    } else {
        "🟢 LOW"
    }
}

fn percent(ratio: f64) -> String {
    format!("{:.0}%", ratio * 100.0)
}

pub fn search_results(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No similar incidents found in cluster history.".to_string();
    }

    let mut out = format!("Found {} similar incidents:\n", hits.len());
    for hit in hits {
        let meta = &hit.metadata;
        let date = meta
            .occurred_at
            .as_deref()
            .map(|ts| truncate_chars(ts, 10))
            .unwrap_or("?");
        let label = match hit.kind() {
            Some(DocKind::Correction) => "CORRECTION",
            Some(DocKind::Fix) => "FIX",
            _ => meta.incident_type.as_deref().unwrap_or("?"),
        };
        let _ = write!(
            out,
            "\n• [{}] {} on {} ({}) — severity: {} — similarity: {}\n  {}",
            date,
            label,
            meta.pod_name.as_deref().unwrap_or("?"),
            meta.namespace.as_deref().unwrap_or("?"),
            meta.severity.as_deref().unwrap_or("?"),
            percent(hit.similarity),
            excerpt(&hit.document, DOC_EXCERPT)
        );
    }
    out
}

pub fn blast_radius(pod_name: &str, entries: &[BlastRadiusEntry]) -> String {
    if entries.is_empty() {
        return format!(
            "No blast radius data found for {}. It may not have co-occurring incidents in history.",
            pod_name
        );
    }

    let mut out = format!(
        "Blast radius for {} (from {} co-occurrence patterns):\n",
        pod_name,
        entries.len()
    );
    for entry in entries {
        let types: Vec<&str> = entry.incident_types.iter().map(|t| t.as_str()).collect();
        let _ = write!(
            out,
            "\n  {} {} ({}) — co-occurred {}x {:?}",
            risk_marker(entry.co_occurrence),
            entry.affected_pod,
            entry.namespace,
            entry.co_occurrence,
            types
        );
    }
    out
}

pub fn top_blast_radius(scope: &str, ranks: &[BlastRank]) -> String {
    if ranks.is_empty() {
        return "No blast radius data in the graph yet. \
                Ingest more incidents so co-occurrence patterns can be computed."
            .to_string();
    }

    let mut out = format!(
        "Top {} services by blast radius (namespace: {}):\n",
        ranks.len(),
        scope
    );
    for (i, rank) in ranks.iter().enumerate() {
        let _ = write!(
            out,
            "\n  {}. {} {} ({}) — when it fails, ~{} other pod(s) tend to co-fail",
            i + 1,
            risk_marker(rank.blast_size),
            rank.pod_name,
            rank.namespace,
            rank.blast_size
        );
    }
    out
}

pub fn cluster_patterns(patterns: &[ClusterPattern], deploys: &[DeployCrashPattern]) -> String {
    if patterns.is_empty() && deploys.is_empty() {
        return "No recurring patterns found yet. More incidents need to be processed.".to_string();
    }

    let mut out = format!("Top {} recurring patterns:\n", patterns.len());
    for p in patterns {
        let best = p
            .best_fix
            .as_deref()
            .map(|f| excerpt(f, BEST_FIX_EXCERPT))
            .unwrap_or_else(|| "none recorded".to_string());
        let _ = write!(
            out,
            "\n• {} ({}) — {} × {} times | fix success: {}\n  Best fix: {}",
            p.pod_name,
            p.namespace,
            p.incident_type,
            p.frequency,
            percent(p.fix_success_rate),
            best
        );
    }

    if !deploys.is_empty() {
        out.push_str("\n\nDeploy → crash correlation:");
        for d in deploys.iter().take(MAX_DEPLOY_ROWS) {
            let _ = write!(
                out,
                "\n• {}: {} crashes after deploy, avg {:.1} min",
                d.service, d.crash_count, d.avg_minutes_to_crash
            );
        }
    }
    out
}

pub fn pod_timeline(pod_name: &str, namespace: &str, history: &[(Incident, Vec<Fix>)]) -> String {
    if history.is_empty() {
        return format!("No incident history found for {} in {}.", pod_name, namespace);
    }

    let mut out = format!(
        "Incident timeline for {} ({} incidents):\n",
        pod_name,
        history.len()
    );
    for (incident, fixes) in history {
        let fixed = fixes
            .iter()
            .filter(|f| f.worked)
            .max_by_key(|f| (f.created_at, f.id))
            .map(|f| format!("✓ fixed: {}", excerpt(&f.description, TIMELINE_FIX_EXCERPT)))
            .unwrap_or_else(|| "✗ no fix recorded".to_string());
        let _ = write!(
            out,
            "\n  [{}] {} — {} — {}\n  {}",
            incident.occurred_at.format("%Y-%m-%d %H:%M"),
            incident.incident_type,
            incident.severity.as_str().to_uppercase(),
            incident.status,
            fixed
        );
    }
    out
}

pub fn risk(report: &RiskReport) -> String {
    let level = report.risk_level.as_str().to_uppercase();
    let mut out = format!(
        "{} RISK LEVEL: {} (score: {})\nOpen incidents: {}\nRecommendation: {}",
        report.risk_level.emoji(),
        level,
        report.risk_score,
        report.open_incidents,
        report.recommendation
    );
    if !report.unstable_blast_radius.is_empty() {
        let pods: Vec<&str> = report
            .unstable_blast_radius
            .iter()
            .map(|b| b.affected_pod.as_str())
            .collect();
        let _ = write!(out, "\nUnstable services in blast radius: {:?}", pods);
    }
    if !report.deploy_crash_history.is_empty() {
        out.push_str("\nRecent deploy→crash history found — proceed with caution");
    }
    out
}

pub fn graph_context(scope: &str, snapshot: &GraphSnapshot) -> String {
    let pods: Vec<&str> = snapshot
        .nodes_with(NodeLabel::Pod)
        .map(|n| n.name.as_str())
        .collect();
    let services = snapshot.nodes_with(NodeLabel::Service).count();
    let incidents: Vec<_> = snapshot.nodes_with(NodeLabel::Incident).collect();
    let open: Vec<&str> = incidents
        .iter()
        .filter(|n| !n.resolved)
        .map(|n| n.name.as_str())
        .take(MAX_CONTEXT_OPEN)
        .collect();

    format!(
        "Graph context for {}:\n  {} pods tracked\n  {} services\n  {} incident nodes\n  {} causal relationships\n\nPods: {:?}\nOpen incidents: {:?}",
        scope,
        pods.len(),
        services,
        incidents.len(),
        snapshot.edges.len(),
        pods.iter().take(MAX_CONTEXT_PODS).collect::<Vec<_>>(),
        open
    )
}

pub fn analysis(state: &AgentState) -> String {
    let mut out = String::new();
    if !state.errors.is_empty() {
        let _ = write!(out, "Errors: {}\n\n", state.errors.join("; "));
    }
    let warning = if state.blast_radius_warning.is_empty() {
        let pods: Vec<&str> = state
            .blast_radius
            .iter()
            .map(|b| b.affected_pod.as_str())
            .collect();
        format!("{:?}", pods)
    } else {
        state.blast_radius_warning.clone()
    };
    let _ = write!(
        out,
        "ROOT_CAUSE: {}\n\nRECOMMENDATION: {}\n\nBLAST_RADIUS_WARNING: {}\n\nPREVENTION: {}\n\nCONFIDENCE: {:.2}",
        state.root_cause, state.recommendation, warning, state.prevention_advice, state.confidence
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_registry::risk::RiskLevel;
    use kubememory_core::{DocMetadata, IncidentType};

    #[test]
    fn test_empty_results_have_guidance_text() {
        assert_eq!(search_results(&[]), "No similar incidents found in cluster history.");
        assert!(blast_radius("api", &[]).starts_with("No blast radius data found for api."));
        assert!(top_blast_radius("all", &[]).starts_with("No blast radius data in the graph yet."));
        assert!(cluster_patterns(&[], &[]).starts_with("No recurring patterns found yet."));
    }

    #[test]
    fn test_search_line_shape() {
        let hit = SearchHit {
            source_id: "incident_3_abcdef12".into(),
            similarity: 0.874,
            metadata: DocMetadata {
                doc_type: Some(DocKind::Incident),
                pod_name: Some("payment-api".into()),
                namespace: Some("prod".into()),
                incident_type: Some("OOMKill".into()),
                severity: Some("high".into()),
                occurred_at: Some("2025-03-01T10:00:00+00:00".into()),
                ..Default::default()
            },
            document: "OOMKill payment-api prod\nheap exhausted".into(),
        };
        let text = search_results(&[hit]);
        assert!(text.starts_with("Found 1 similar incidents:"));
        assert!(text.contains("• [2025-03-01] OOMKill on payment-api (prod) — severity: high — similarity: 87%"));
        assert!(text.contains("OOMKill payment-api prod heap exhausted"));
    }

    #[test]
    fn test_blast_markers() {
        let entry = |co| BlastRadiusEntry {
            affected_pod: format!("pod-{}", co),
            namespace: "prod".into(),
            co_occurrence: co,
            incident_types: vec![IncidentType::Evicted],
        };
        let text = blast_radius("api", &[entry(6), entry(3), entry(1)]);
        assert!(text.contains("🔴 HIGH pod-6 (prod) — co-occurred 6x"));
        assert!(text.contains("🟡 MEDIUM pod-3"));
        assert!(text.contains("🟢 LOW pod-1"));
    }

    #[test]
    fn test_risk_lines() {
        let report = RiskReport {
            service: "payment-api".into(),
            namespace: "prod".into(),
            risk_level: RiskLevel::High,
            risk_score: 70,
            open_incidents: 2,
            unstable_blast_radius: vec![],
            deploy_crash_history: vec![],
            recommendation: "Do not deploy".into(),
        };
        let text = risk(&report);
        assert!(text.starts_with("🔴 RISK LEVEL: HIGH (score: 70)"));
        assert!(text.contains("Recommendation: Do not deploy"));
        assert!(!text.contains("Unstable"));
    }
}
