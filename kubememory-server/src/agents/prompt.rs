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

//! Recommend-stage prompt and response parsing.

use super::state::AgentState;
use kubememory_core::truncate_chars;
use regex::Regex;
use std::fmt::Write;
use std::sync::OnceLock;

const PROMPT_LOG_CHARS: usize = 300;
const EVIDENCE_CHARS: usize = 200;

const LABELS: [&str; 5] = [
    "ROOT_CAUSE",
    "RECOMMENDATION",
    "BLAST_RADIUS_WARNING",
    "PREVENTION",
    "CONFIDENCE",
];

/// Sections of a model answer; missing labels stay empty
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedAnalysis {
    pub root_cause: String,
    pub recommendation: String,
    pub blast_radius_warning: String,
    pub prevention: String,
    pub confidence: f64,
}

fn or_placeholder(text: String, placeholder: &str) -> String {
    if text.is_empty() {
        placeholder.to_string()
    } else {
        text
    }
}

pub fn build_prompt(state: &AgentState) -> String {
    let input = &state.input;

    let similar = state
        .similar_incidents
        .iter()
        .map(|hit| {
            format!(
                "- [{}] {} on {}: {}",
                hit.metadata.occurred_at.as_deref().unwrap_or("unknown"),
                hit.metadata.incident_type.as_deref().unwrap_or(""),
                hit.metadata.pod_name.as_deref().unwrap_or(""),
                truncate_chars(&hit.document, EVIDENCE_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let fixes = state
        .past_fixes
        .iter()
        .map(|hit| format!("- {}", truncate_chars(&hit.document, EVIDENCE_CHARS)))
        .collect::<Vec<_>>()
        .join("\n");

    let corrections = state
        .corrections
        .iter()
        .map(|hit| {
            format!(
                "- CORRECTION OVERRIDE: {}",
                truncate_chars(&hit.document, EVIDENCE_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let patterns = state
        .causal_patterns
        .iter()
        .map(|p| {
            format!(
                "- {}: occurred {} times. Fixes that worked: {:?}",
                p.incident_type, p.frequency, p.fixes_that_worked
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let blast = state
        .blast_radius
        .iter()
        .map(|b| format!("{} (co-occurred {}x)", b.affected_pod, b.co_occurrence))
        .collect::<Vec<_>>()
        .join(", ");

    let deploy = match &state.deploy_correlation {
        Some(d) => format!(
            "DEPLOY DETECTED: {} v{} was deployed {:.0} minutes before this crash.",
            d.service, d.version, d.minutes_before_crash
        ),
        None => "No recent deployment detected.".to_string(),
    };

    let mut prompt = String::new();
    let _ = write!(
        prompt,
        "You are a senior SRE analyzing a Kubernetes incident.
You have access to THIS CLUSTER'S actual incident history.
Base your analysis on the cluster history below, not on generic advice.

=== CURRENT INCIDENT ===
Type: {}
Pod: {} in {}
Severity: {}
Description: {}
Logs (excerpt): {}

=== SIMILAR INCIDENTS FROM THIS CLUSTER ===
{}

=== FIXES THAT WORKED IN THIS CLUSTER ===
{}

=== ENGINEER CORRECTIONS (these override earlier fixes) ===
{}

=== CAUSAL PATTERNS ===
{}

=== BLAST RADIUS (pods that historically fail at the same time) ===
{}

=== DEPLOYMENT CORRELATION ===
{}

Answer in this EXACT format:

ROOT_CAUSE: [one sentence referencing this cluster's history]
RECOMMENDATION: [specific fix steps, reference what worked before]
BLAST_RADIUS_WARNING: [which services to check]
PREVENTION: [preventive action based on recurring patterns]
CONFIDENCE: [0.0-1.0, higher when similar incidents were found]
",
        input.incident_type,
        input.pod_name,
        input.namespace,
        input.severity,
        input.description,
        truncate_chars(&input.raw_logs, PROMPT_LOG_CHARS),
        or_placeholder(similar, "No similar incidents found in history."),
        or_placeholder(fixes, "No fix history available."),
        or_placeholder(corrections, "No corrections recorded."),
        or_placeholder(patterns, "No historical patterns found."),
        or_placeholder(blast, "No blast radius detected."),
        deploy,
    );
    prompt
}

fn label_regex() -> Option<&'static Regex> {
    static LABEL_RE: OnceLock<Option<Regex>> = OnceLock::new();
    LABEL_RE
        .get_or_init(|| {
            Regex::new(r"(?i)\b(ROOT_CAUSE|RECOMMENDATION|BLAST_RADIUS_WARNING|PREVENTION|CONFIDENCE)\s*:")
                .ok()
        })
        .as_ref()
}

fn number_regex() -> Option<&'static Regex> {
    static NUMBER_RE: OnceLock<Option<Regex>> = OnceLock::new();
    NUMBER_RE
        .get_or_init(|| Regex::new(r"[0-9]*\.?[0-9]+").ok())
        .as_ref()
}

/// Missing or unreadable confidence is 0.0; anything else is clamped to [0, 1].
pub fn parse_confidence(text: &str) -> f64 {
    number_regex()
        .and_then(|re| re.find(text))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

/// Split a model answer on its labels. Each section runs up to the next
/// label or the end of text; the first occurrence of a label wins.
pub fn parse_response(text: &str) -> ParsedAnalysis {
    let mut parsed = ParsedAnalysis::default();
    let Some(re) = label_regex() else {
        return parsed;
    };

    let marks: Vec<(String, usize, usize)> = re
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let label = caps.get(1)?.as_str().to_ascii_uppercase();
            Some((label, whole.start(), whole.end()))
        })
        .collect();

    let mut seen = [false; LABELS.len()];
    for (i, (label, _, value_start)) in marks.iter().enumerate() {
        let Some(slot) = LABELS.iter().position(|l| l == label) else {
            continue;
        };
        if seen[slot] {
            continue;
        }
        seen[slot] = true;

        let value_end = marks.get(i + 1).map_or(text.len(), |next| next.1);
        let value = text[*value_start..value_end].trim().to_string();
        match slot {
            0 => parsed.root_cause = value,
            1 => parsed.recommendation = value,
            2 => parsed.blast_radius_warning = value,
            3 => parsed.prevention = value,
            _ => parsed.confidence = parse_confidence(&value),
        }
    }
    parsed
}
