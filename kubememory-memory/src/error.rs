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

//! Memory system error types

use kubememory_core::KubeMemoryError;
use thiserror::Error;

/// Result type for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors raised by the store adapters.
///
/// Components translate these into the core taxonomy at their boundary via
/// [`MemoryError::into_graph`], [`MemoryError::into_store`] and friends.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Record lookup failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend rejected the request or returned an error payload
    #[error("Backend error: {0}")]
    Backend(String),

    /// Transport-level failure talking to a remote store
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Embedding error
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Call exceeded the configured bound
    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Serialization(e.to_string())
    }
}

impl MemoryError {
    pub fn into_graph(self) -> KubeMemoryError {
        match self {
            MemoryError::NotFound(what) => KubeMemoryError::NotFound(what),
            other => KubeMemoryError::GraphUnavailable(other.to_string()),
        }
    }

    pub fn into_store(self) -> KubeMemoryError {
        match self {
            MemoryError::NotFound(what) => KubeMemoryError::NotFound(what),
            MemoryError::Embedding(msg) => KubeMemoryError::EmbeddingUnavailable(msg),
            other => KubeMemoryError::StoreUnavailable(other.to_string()),
        }
    }
}

/// Run a store future under a deadline, mapping expiry to [`MemoryError::Timeout`].
pub async fn bounded<T, F>(timeout: std::time::Duration, fut: F) -> MemoryResult<T>
where
    F: std::future::Future<Output = MemoryResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(MemoryError::Timeout(timeout.as_millis() as u64)),
    }
}
