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

//! Markdown runbook generated from a finished analysis.

use super::state::AgentState;
use crate::llm::{InferenceClient, LlmError, ModelSelection};
use kubememory_core::truncate_chars;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const FIX_EXCERPT_CHARS: usize = 300;
const MAX_FIXES: usize = 5;
const MAX_BLAST: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runbook {
    pub markdown: String,
    /// `false` when the document is the offline stub
    pub generated: bool,
}

pub struct RunbookGenerator {
    llm: Arc<dyn InferenceClient>,
    model: ModelSelection,
    timeout: Duration,
}

impl RunbookGenerator {
    pub fn new(llm: Arc<dyn InferenceClient>, model: ModelSelection, timeout: Duration) -> Self {
        Self {
            llm,
            model,
            timeout,
        }
    }

    /// Never fails; inference trouble yields [`stub`].
    pub async fn generate(&self, state: &AgentState) -> Runbook {
        match self.request(state).await {
            Ok(markdown) if !markdown.trim().is_empty() => {
                info!(pod = %state.input.pod_name, "runbook generated");
                Runbook {
                    markdown,
                    generated: true,
                }
            }
            Ok(_) => {
                warn!(pod = %state.input.pod_name, "empty runbook response, using stub");
                Runbook {
                    markdown: stub(state),
                    generated: false,
                }
            }
            Err(e) => {
                warn!(pod = %state.input.pod_name, error = %e, "runbook generation failed");
                Runbook {
                    markdown: stub(state),
                    generated: false,
                }
            }
        }
    }

    async fn request(&self, state: &AgentState) -> Result<String, LlmError> {
        let model = self.model.model().ok_or(LlmError::NoModel)?;
        let prompt = runbook_prompt(state);
        tokio::time::timeout(self.timeout, self.llm.complete(model, &prompt, self.timeout))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_millis() as u64))?
    }
}

fn runbook_prompt(state: &AgentState) -> String {
    let input = &state.input;
    let fixes = if state.past_fixes.is_empty() {
        "No fixes recorded yet.".to_string()
    } else {
        state
            .past_fixes
            .iter()
            .take(MAX_FIXES)
            .map(|f| format!("- {}", truncate_chars(&f.document, FIX_EXCERPT_CHARS)))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let blast = if state.blast_radius.is_empty() {
        "None identified.".to_string()
    } else {
        state
            .blast_radius
            .iter()
            .take(MAX_BLAST)
            .map(|b| format!("{} ({}x)", b.affected_pod, b.co_occurrence))
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "Generate a production runbook for this incident type.
Base it on this cluster's actual history, not generic advice.

Incident: {kind} on {pod}
Root Cause (from analysis): {root_cause}
Fixes that worked in this cluster: {fixes}
Blast radius (co-occurring services): {blast}

Write the runbook in this EXACT Markdown format:

# Runbook: {kind} on {pod}

## Symptoms
- [what the on-call engineer will see]

## Immediate Actions (< 5 minutes)
1. [first thing to do]
2. [second thing]

## Root Cause Investigation
- Check: [specific command]

## Fix Steps
1. [step with actual commands]

## Blast Radius
- [service]: [what to check]

## Prevention
- [specific preventive action]

## Escalation
- If unresolved after 30 min: [who to page]
",
        kind = input.incident_type,
        pod = input.pod_name,
        root_cause = state.root_cause,
    )
}

/// Runbook assembled from what the analysis already knows
pub fn stub(state: &AgentState) -> String {
    let symptoms = if state.root_cause.trim().is_empty() {
        "See incident description."
    } else {
        state.root_cause.as_str()
    };
    let steps = if state.recommendation.trim().is_empty() {
        "No recommendation available."
    } else {
        state.recommendation.as_str()
    };
    format!(
        "# Runbook: {} on {}\n\n## Symptoms\n- {}\n\n## Fix Steps\n{}\n\n---\n*Runbook stub (inference endpoint unavailable for full generation)*\n",
        state.input.incident_type, state.input.pod_name, symptoms, steps
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::state::IncidentInput;
    use crate::llm::ScriptedClient;

    fn state() -> AgentState {
        let mut state = AgentState::new(IncidentInput::ad_hoc(
            "worker",
            "batch",
            Some("CrashLoopBackOff"),
            "exit code 1",
            "",
        ));
        state.root_cause = "missing config map".into();
        state.recommendation = "recreate the config map".into();
        state
    }

    #[tokio::test]
    async fn test_failure_yields_stub() {
        let generator = RunbookGenerator::new(
            Arc::new(ScriptedClient::new().failing_completion("connection refused")),
            ModelSelection::Model("m".into()),
            Duration::from_secs(1),
        );
        let runbook = generator.generate(&state()).await;

        assert!(!runbook.generated);
        assert!(runbook.markdown.starts_with("# Runbook: CrashLoopBackOff on worker"));
        assert!(runbook.markdown.contains("- missing config map"));
        assert!(runbook.markdown.contains("recreate the config map"));
    }

    #[tokio::test]
    async fn test_generated_markdown_is_returned() {
        let client = Arc::new(ScriptedClient::new().completion("# Runbook: CrashLoopBackOff on worker\n"));
        let generator = RunbookGenerator::new(
            client.clone(),
            ModelSelection::Model("m".into()),
            Duration::from_secs(1),
        );
        let runbook = generator.generate(&state()).await;

        assert!(runbook.generated);
        assert!(client.prompts()[0].contains("Root Cause (from analysis): missing config map"));
    }
}
