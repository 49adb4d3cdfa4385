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

//! Tool Registry
//!
//! The fixed set of evidence lookups a model may call during chat, also
//! exposed verbatim over MCP.
//!
//! ```text
//! ┌──────────────┐  name + JSON args   ┌──────────────────────────────┐
//! │ Chat agent / │ ──────────────────▶ │ ToolRegistry::execute        │
//! │ MCP client   │                     │  inject session namespace    │
//! └──────────────┘ ◀────────────────── │  specific-pod guard          │
//!                    ToolOutcome text   │  JSON schema validation      │
//!                                      │  dispatch ─┬─ SimilaritySearch
//!                                      └────────────┼─ CausalGraph
//!                                                   ├─ IncidentStore
//!                                                   └─ AnalysisPipeline
//! ```
//!
//! Results are short plain text meant to be read by a language model.
//! Lookup failures come back as text too, never as errors.

mod args;
mod registry;
mod render;
mod risk;

pub use args::ToolName;
pub use registry::{ToolError, ToolOutcome, ToolRegistry};
pub use risk::{RiskLevel, RiskReport};
