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

//! Error taxonomy shared by every KubeMemory crate.
//!
//! The variants map one-to-one onto the degradation policy: store and
//! inference failures are recoverable and turn into empty evidence or stub
//! text at the component boundary, validation failures become guidance text,
//! and `NotFound` is surfaced to callers as a structured result.

use thiserror::Error;

/// Result alias for core operations
pub type KmResult<T> = Result<T, KubeMemoryError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum KubeMemoryError {
    /// Relational or vector store unreachable
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Property graph unreachable or query failed
    #[error("graph unavailable: {0}")]
    GraphUnavailable(String),

    /// Embedding endpoint failed, distinct from "no matches"
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Inference endpoint unreachable, errored or timed out
    #[error("inference unavailable: {0}")]
    InferenceUnavailable(String),

    /// Malformed tool arguments or incident payload
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for KubeMemoryError {
    fn from(e: serde_json::Error) -> Self {
        KubeMemoryError::Serialization(e.to_string())
    }
}
