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

//! Chroma HTTP adapter (REST API v1).

use super::{VectorMatch, VectorRecord, VectorStore};
use crate::error::{MemoryError, MemoryResult};
use async_trait::async_trait;
use kubememory_core::{DocMetadata, SearchFilter};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

pub struct ChromaVectorStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    collection_id: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<DocMetadata>>>>,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<DocMetadata>>>,
}

impl ChromaVectorStore {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            collection_id: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn collection_id(&self) -> MemoryResult<String> {
        if let Some(id) = self.collection_id.read().clone() {
            return Ok(id);
        }

        let body = json!({
            "name": self.collection,
            "metadata": {"hnsw:space": "cosine"},
            "get_or_create": true,
        });
        let response = self
            .client
            .post(self.url("/collections"))
            .json(&body)
            .send()
            .await?;
        let created: CollectionResponse = checked(response).await?.json().await?;
        info!(collection = %self.collection, id = %created.id, "Chroma collection ready");

        *self.collection_id.write() = Some(created.id.clone());
        Ok(created.id)
    }

    async fn post(&self, op: &str, body: Value) -> MemoryResult<reqwest::Response> {
        let id = self.collection_id().await?;
        let response = self
            .client
            .post(self.url(&format!("/collections/{}/{}", id, op)))
            .json(&body)
            .send()
            .await?;
        checked(response).await
    }
}

async fn checked(response: reqwest::Response) -> MemoryResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(MemoryError::Backend(format!("chroma returned {}: {}", status, body)))
}

/// Translate a filter into Chroma's `where` clause.
pub(crate) fn where_clause(filter: &SearchFilter) -> Option<Value> {
    let mut clauses = Vec::new();
    if let Some(ns) = &filter.namespace {
        clauses.push(json!({"namespace": {"$eq": ns}}));
    }
    if let Some(pod) = &filter.pod_name {
        clauses.push(json!({"pod_name": {"$eq": pod}}));
    }
    if let Some(kind) = filter.doc_kind {
        clauses.push(json!({"doc_type": {"$eq": kind.as_str()}}));
    }
    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(json!({"$and": clauses})),
    }
}

#[async_trait]
impl VectorStore for ChromaVectorStore {
    async fn add(&self, records: Vec<VectorRecord>) -> MemoryResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut ids = Vec::with_capacity(records.len());
        let mut embeddings = Vec::with_capacity(records.len());
        let mut documents = Vec::with_capacity(records.len());
        let mut metadatas = Vec::with_capacity(records.len());
        for record in records {
            ids.push(record.id);
            embeddings.push(record.embedding);
            documents.push(record.document);
            metadatas.push(serde_json::to_value(&record.metadata)?);
        }
        self.post(
            "add",
            json!({
                "ids": ids,
                "embeddings": embeddings,
                "documents": documents,
                "metadatas": metadatas,
            }),
        )
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> MemoryResult<Vec<VectorMatch>> {
        let mut body = json!({
            "query_embeddings": [embedding],
            "n_results": k,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(clause) = where_clause(filter) {
            body["where"] = clause;
        }
        let response: QueryResponse = self.post("query", body).await?.json().await?;

        let ids = response.ids.into_iter().next().unwrap_or_default();
        let distances = response
            .distances
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default();
        let documents = response
            .documents
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default();
        let metadatas = response
            .metadatas
            .and_then(|m| m.into_iter().next())
            .unwrap_or_default();

        debug!(hits = ids.len(), "chroma query");
        Ok(ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| VectorMatch {
                id,
                distance: distances.get(i).copied().unwrap_or(2.0),
                document: documents.get(i).cloned().flatten().unwrap_or_default(),
                metadata: metadatas.get(i).cloned().flatten().unwrap_or_default(),
            })
            .collect())
    }

    async fn get(&self, filter: &SearchFilter) -> MemoryResult<Vec<VectorMatch>> {
        let mut body = json!({"include": ["documents", "metadatas"]});
        if let Some(clause) = where_clause(filter) {
            body["where"] = clause;
        }
        let response: GetResponse = self.post("get", body).await?.json().await?;
        let documents = response.documents.unwrap_or_default();
        let metadatas = response.metadatas.unwrap_or_default();

        Ok(response
            .ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| VectorMatch {
                id,
                distance: 0.0,
                document: documents.get(i).cloned().flatten().unwrap_or_default(),
                metadata: metadatas.get(i).cloned().flatten().unwrap_or_default(),
            })
            .collect())
    }

    async fn reset(&self) -> MemoryResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/collections/{}", self.collection)))
            .send()
            .await?;
        // Missing collection is already reset
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            checked(response).await?;
        }
        *self.collection_id.write() = None;
        self.collection_id().await?;
        Ok(())
    }

    async fn heartbeat(&self) -> MemoryResult<()> {
        let response = self.client.get(self.url("/heartbeat")).send().await?;
        checked(response).await?;
        Ok(())
    }
}
