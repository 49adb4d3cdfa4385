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

//! Vector-store document model.

use crate::incident::{FixId, IncidentId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind tag stored with every embedded document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Incident,
    Fix,
    Correction,
}

impl DocKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Incident => "incident",
            DocKind::Fix => "fix",
            DocKind::Correction => "correction",
        }
    }

    /// Tie-break rank in combined rankings: corrections first.
    pub fn precedence(&self) -> u8 {
        match self {
            DocKind::Correction => 0,
            DocKind::Fix => 1,
            DocKind::Incident => 2,
        }
    }
}

impl fmt::Display for DocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat metadata map stored next to each embedding.
///
/// Kept flat (scalar fields only) so it maps directly onto vector stores
/// that reject nested metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<DocKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<IncidentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// RFC 3339 timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_id: Option<FixId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_fix_id: Option<FixId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction_fix_id: Option<FixId>,
}

/// Conjunctive filter applied to vector queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub namespace: Option<String>,
    pub pod_name: Option<String>,
    pub doc_kind: Option<DocKind>,
}

impl SearchFilter {
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn pod(mut self, pod_name: impl Into<String>) -> Self {
        self.pod_name = Some(pod_name.into());
        self
    }

    pub fn kind(mut self, kind: DocKind) -> Self {
        self.doc_kind = Some(kind);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.namespace.is_none() && self.pod_name.is_none() && self.doc_kind.is_none()
    }

    pub fn matches(&self, meta: &DocMetadata) -> bool {
        let ns_ok = self
            .namespace
            .as_ref()
            .map_or(true, |ns| meta.namespace.as_ref() == Some(ns));
        let pod_ok = self
            .pod_name
            .as_ref()
            .map_or(true, |p| meta.pod_name.as_ref() == Some(p));
        let kind_ok = self.doc_kind.map_or(true, |k| meta.doc_type == Some(k));
        ns_ok && pod_ok && kind_ok
    }
}

/// One ranked retrieval result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub source_id: String,
    /// Normalised to [0, 1], higher is closer
    pub similarity: f64,
    pub metadata: DocMetadata,
    pub document: String,
}

impl SearchHit {
    pub fn kind(&self) -> Option<DocKind> {
        self.metadata.doc_type
    }
}

/// Map a cosine distance in [0, 2] onto a similarity in [0, 1].
pub fn similarity_from_distance(distance: f64) -> f64 {
    1.0 - distance / 2.0
}
