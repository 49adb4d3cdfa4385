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

//! Vector store adapters
//!
//! Both adapters speak cosine distance in [0, 2]; conversion to a similarity
//! score happens once, in [`crate::similarity::SimilaritySearch`].

mod chroma;
mod memory;

pub use chroma::ChromaVectorStore;
pub use memory::InMemoryVectorStore;

use crate::error::MemoryResult;
use async_trait::async_trait;
use kubememory_core::{DocMetadata, SearchFilter};

#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: DocMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub distance: f64,
    pub document: String,
    pub metadata: DocMetadata,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add(&self, records: Vec<VectorRecord>) -> MemoryResult<()>;

    /// Nearest neighbours, closest first
    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> MemoryResult<Vec<VectorMatch>>;

    /// All records matching the filter, without ranking
    async fn get(&self, filter: &SearchFilter) -> MemoryResult<Vec<VectorMatch>>;

    /// Drop and recreate the collection
    async fn reset(&self) -> MemoryResult<()>;

    async fn heartbeat(&self) -> MemoryResult<()>;
}

/// Cosine distance, 1 - cos(a, b); zero vectors are maximally distant from
/// everything but themselves.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return if norm_a == norm_b { 0.0 } else { 1.0 };
    }
    let cos = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    1.0 - cos
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cosine_distance_extremes() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-9);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-9);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_cosine_distance_in_range(
            a in proptest::collection::vec(-10.0f32..10.0, 4),
            b in proptest::collection::vec(-10.0f32..10.0, 4),
        ) {
            let d = cosine_distance(&a, &b);
            prop_assert!((0.0..=2.0).contains(&d));
        }
    }
}
