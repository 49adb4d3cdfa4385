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

//! In-process vector store, linear scan.

use super::{cosine_distance, VectorMatch, VectorRecord, VectorStore};
use crate::error::MemoryResult;
use async_trait::async_trait;
use kubememory_core::SearchFilter;
use parking_lot::RwLock;

#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

fn to_match(record: &VectorRecord, distance: f64) -> VectorMatch {
    VectorMatch {
        id: record.id.clone(),
        distance,
        document: record.document.clone(),
        metadata: record.metadata.clone(),
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add(&self, records: Vec<VectorRecord>) -> MemoryResult<()> {
        let mut guard = self.records.write();
        for record in records {
            // add() upserts on id
            guard.retain(|r| r.id != record.id);
            guard.push(record);
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> MemoryResult<Vec<VectorMatch>> {
        let guard = self.records.read();
        let mut matches: Vec<VectorMatch> = guard
            .iter()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| to_match(r, cosine_distance(embedding, &r.embedding)))
            .collect();
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(k);
        Ok(matches)
    }

    async fn get(&self, filter: &SearchFilter) -> MemoryResult<Vec<VectorMatch>> {
        let guard = self.records.read();
        Ok(guard
            .iter()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| to_match(r, 0.0))
            .collect())
    }

    async fn reset(&self) -> MemoryResult<()> {
        self.records.write().clear();
        Ok(())
    }

    async fn heartbeat(&self) -> MemoryResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubememory_core::{DocKind, DocMetadata};

    fn record(id: &str, embedding: Vec<f32>, kind: DocKind) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            embedding,
            document: id.to_string(),
            metadata: DocMetadata {
                doc_type: Some(kind),
                namespace: Some("prod".into()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_query_orders_by_distance_and_filters() {
        let store = InMemoryVectorStore::new();
        store
            .add(vec![
                record("far", vec![0.0, 1.0], DocKind::Incident),
                record("near", vec![1.0, 0.1], DocKind::Incident),
                record("fix", vec![1.0, 0.0], DocKind::Fix),
            ])
            .await
            .unwrap();

        let all = store
            .query(&[1.0, 0.0], 10, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(all[0].id, "fix");
        assert_eq!(all[1].id, "near");

        let incidents = store
            .query(&[1.0, 0.0], 10, &SearchFilter::default().kind(DocKind::Incident))
            .await
            .unwrap();
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].id, "near");

        store.reset().await.unwrap();
        assert!(store.is_empty());
    }
}
