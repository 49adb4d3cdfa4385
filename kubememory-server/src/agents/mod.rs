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

//! Incident analysis: the three-stage pipeline, its prompt and the runbook
//! companion step.

mod pipeline;
mod prompt;
mod runbook;
mod state;

pub use pipeline::{AnalysisPipeline, UNAVAILABLE_RECOMMENDATION, UNAVAILABLE_ROOT_CAUSE};
pub use prompt::{build_prompt, parse_confidence, parse_response, ParsedAnalysis};
pub use runbook::{stub as runbook_stub, Runbook, RunbookGenerator};
pub use state::{AgentState, IncidentInput, MAX_LOG_CHARS};
