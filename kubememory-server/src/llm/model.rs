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

//! Chat model resolution against the models the endpoint actually serves.

use super::InferenceClient;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelection {
    Model(String),
    Unavailable,
}

impl ModelSelection {
    pub fn model(&self) -> Option<&str> {
        match self {
            ModelSelection::Model(name) => Some(name),
            ModelSelection::Unavailable => None,
        }
    }
}

/// Tags come back as `name` or `name:tag`
fn name_matches(a: &str, b: &str) -> bool {
    a == b
        || a.strip_prefix(b).map_or(false, |rest| rest.starts_with(':'))
        || b.strip_prefix(a).map_or(false, |rest| rest.starts_with(':'))
}

/// Preferred model, then the first present fallback, then the first model
/// that does not look like an embedding model.
pub fn select_model(available: &[String], preferred: &str, fallbacks: &[String]) -> ModelSelection {
    let preferred = preferred.trim();
    let present = |wanted: &str| available.iter().any(|m| name_matches(m, wanted));

    if !preferred.is_empty() && present(preferred) {
        return ModelSelection::Model(preferred.to_string());
    }
    if let Some(fallback) = fallbacks.iter().find(|f| present(f)) {
        info!(model = %fallback, preferred, "Using fallback chat model");
        return ModelSelection::Model(fallback.clone());
    }
    match available
        .iter()
        .find(|m| !m.to_lowercase().contains("embed"))
    {
        Some(first) => {
            info!(model = %first, preferred, "Using first available chat model");
            ModelSelection::Model(first.clone())
        }
        None => ModelSelection::Unavailable,
    }
}

/// Query the endpoint once and pick a chat model.
pub async fn resolve_model(
    client: &dyn InferenceClient,
    preferred: &str,
    fallbacks: &[String],
    timeout: Duration,
) -> ModelSelection {
    match client.list_models(timeout).await {
        Ok(available) if !available.is_empty() => select_model(&available, preferred, fallbacks),
        Ok(_) => {
            warn!(endpoint = client.name(), "No models listed; pull a model first");
            ModelSelection::Unavailable
        }
        Err(e) => {
            warn!(endpoint = client.name(), "Could not list models: {}", e);
            ModelSelection::Unavailable
        }
    }
}
