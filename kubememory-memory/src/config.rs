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

//! Memory system configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the memory layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Data directory for persistent storage
    pub data_dir: PathBuf,

    /// Half-width of the symmetric co-occurrence window
    pub blast_radius_window_secs: i64,

    /// How long after a deployment an incident is still linked to it
    pub deploy_link_window_secs: i64,

    /// Upper bound on a single graph or vector query
    pub store_timeout_secs: u64,

    /// Rows kept by causal-pattern and blast-radius queries
    pub max_rows: usize,

    /// Fix descriptions attached to each causal-pattern row
    pub sample_fixes: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kubememory");

        Self {
            data_dir,
            blast_radius_window_secs: 300,
            deploy_link_window_secs: 7200,
            store_timeout_secs: 5,
            max_rows: 10,
            sample_fixes: 3,
        }
    }
}

impl MemoryConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn blast_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.blast_radius_window_secs)
    }

    pub fn deploy_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.deploy_link_window_secs)
    }
}
