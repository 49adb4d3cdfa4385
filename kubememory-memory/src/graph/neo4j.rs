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

//! Neo4j adapter over the HTTP transactional Cypher endpoint.
//!
//! Every call is a single auto-commit transaction, so the connection is
//! released when the request completes, error path included. Timestamps are
//! stored as Cypher `datetime` values and read back as epoch seconds.

use super::{GraphStore, IncidentQuery};
use crate::error::{MemoryError, MemoryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kubememory_core::{
    DeploymentNode, FixNode, GraphRef, GraphSnapshot, Incident, IncidentNode, IncidentType,
    NodeLabel, RelationType, Severity, SnapshotEdge, SnapshotNode, Topology,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const INCIDENT_FIELDS: &str = "elementId(i), i.db_id, i.pod_name, i.namespace, i.service, \
     i.type, i.severity, i.occurred_at.epochSeconds, i.resolved";
const DEPLOYMENT_FIELDS: &str =
    "elementId(d), d.service, d.namespace, d.version, d.deployed_at.epochSeconds";

pub struct Neo4jGraphStore {
    client: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

impl Neo4jGraphStore {
    pub fn new(
        base_url: impl Into<String>,
        database: &str,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let base = base_url.into();
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/db/{}/tx/commit", base.trim_end_matches('/'), database),
            user: user.into(),
            password: password.into(),
        }
    }

    async fn run(&self, statement: &str, parameters: Value) -> MemoryResult<Vec<Vec<Value>>> {
        let body = json!({
            "statements": [{"statement": statement, "parameters": parameters}]
        });
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MemoryError::Backend(format!("neo4j returned {}: {}", status, text)));
        }

        let tx: TxResponse = response.json().await?;
        if let Some(err) = tx.errors.first() {
            return Err(MemoryError::Backend(format!("{}: {}", err.code, err.message)));
        }
        let rows: Vec<Vec<Value>> = tx
            .results
            .into_iter()
            .next()
            .map(|r| r.data.into_iter().map(|d| d.row).collect())
            .unwrap_or_default();
        debug!(rows = rows.len(), "cypher");
        Ok(rows)
    }
}

fn text(row: &[Value], idx: usize) -> String {
    row.get(idx)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn timestamp(row: &[Value], idx: usize) -> MemoryResult<DateTime<Utc>> {
    row.get(idx)
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| MemoryError::Serialization(format!("missing timestamp in column {}", idx)))
}

fn incident_from_row(row: &[Value]) -> MemoryResult<IncidentNode> {
    Ok(IncidentNode {
        graph_ref: GraphRef::new(text(row, 0)),
        incident_id: row.get(1).and_then(Value::as_u64).unwrap_or_default(),
        pod_name: text(row, 2),
        namespace: text(row, 3),
        service_name: text(row, 4),
        incident_type: IncidentType::from_label(&text(row, 5)),
        severity: Severity::from_label(&text(row, 6)),
        occurred_at: timestamp(row, 7)?,
        resolved: row.get(8).and_then(Value::as_bool).unwrap_or(false),
    })
}

fn deployment_from_row(row: &[Value]) -> MemoryResult<DeploymentNode> {
    Ok(DeploymentNode {
        graph_ref: GraphRef::new(text(row, 0)),
        service: text(row, 1),
        namespace: text(row, 2),
        version: text(row, 3),
        deployed_at: timestamp(row, 4)?,
    })
}

fn label_from(name: &str) -> Option<NodeLabel> {
    match name {
        "Pod" => Some(NodeLabel::Pod),
        "Service" => Some(NodeLabel::Service),
        "Node" => Some(NodeLabel::Node),
        "Incident" => Some(NodeLabel::Incident),
        "Fix" => Some(NodeLabel::Fix),
        "Deployment" => Some(NodeLabel::Deployment),
        _ => None,
    }
}

fn relation_from(name: &str) -> Option<RelationType> {
    match name {
        "BELONGS_TO" => Some(RelationType::BelongsTo),
        "RUNS_ON" => Some(RelationType::RunsOn),
        "AFFECTED" => Some(RelationType::Affected),
        "RESOLVED_BY" => Some(RelationType::ResolvedBy),
        "TRIGGERED" => Some(RelationType::Triggered),
        _ => None,
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn ping(&self) -> MemoryResult<()> {
        self.run("RETURN 1", json!({})).await.map(|_| ())
    }

    async fn merge_topology(&self, t: &Topology) -> MemoryResult<()> {
        self.run(
            "MERGE (p:Pod {name: $pod_name, namespace: $namespace}) \
             SET p.image = $image, p.restart_count = $restart_count \
             MERGE (svc:Service {name: $service_name, namespace: $namespace}) \
             MERGE (n:Node {name: $node_name}) \
             MERGE (p)-[:BELONGS_TO]->(svc) \
             MERGE (p)-[:RUNS_ON]->(n)",
            json!({
                "pod_name": t.pod_name,
                "namespace": t.namespace,
                "image": t.image,
                "restart_count": t.restart_count,
                "service_name": t.service_name,
                "node_name": t.node_name,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn create_incident(&self, incident: &Incident) -> MemoryResult<GraphRef> {
        let rows = self
            .run(
                "MERGE (p:Pod {name: $pod_name, namespace: $namespace}) \
                 CREATE (i:Incident { \
                     db_id: $db_id, pod_name: $pod_name, namespace: $namespace, \
                     service: $service, type: $type, severity: $severity, \
                     description: $description, occurred_at: datetime($occurred_at), \
                     resolved: false }) \
                 MERGE (i)-[:AFFECTED]->(p) \
                 RETURN elementId(i)",
                json!({
                    "pod_name": incident.pod_name,
                    "namespace": incident.namespace,
                    "db_id": incident.id,
                    "service": incident.service(),
                    "type": incident.incident_type.as_str(),
                    "severity": incident.severity.as_str(),
                    "description": kubememory_core::truncate_chars(&incident.description, 10_000),
                    "occurred_at": incident.occurred_at.to_rfc3339(),
                }),
            )
            .await?;
        rows.first()
            .map(|row| GraphRef::new(text(row, 0)))
            .ok_or_else(|| MemoryError::Backend("CREATE returned no incident".into()))
    }

    async fn create_deployment(
        &self,
        service: &str,
        namespace: &str,
        version: &str,
        deployed_at: DateTime<Utc>,
    ) -> MemoryResult<GraphRef> {
        let rows = self
            .run(
                "CREATE (d:Deployment {service: $service, namespace: $namespace, \
                 version: $version, deployed_at: datetime($deployed_at)}) \
                 RETURN elementId(d)",
                json!({
                    "service": service,
                    "namespace": namespace,
                    "version": version,
                    "deployed_at": deployed_at.to_rfc3339(),
                }),
            )
            .await?;
        rows.first()
            .map(|row| GraphRef::new(text(row, 0)))
            .ok_or_else(|| MemoryError::Backend("CREATE returned no deployment".into()))
    }

    async fn deployments(&self, service: &str, namespace: &str) -> MemoryResult<Vec<DeploymentNode>> {
        let rows = self
            .run(
                &format!(
                    "MATCH (d:Deployment {{service: $service, namespace: $namespace}}) \
                     RETURN {} ORDER BY d.deployed_at",
                    DEPLOYMENT_FIELDS
                ),
                json!({"service": service, "namespace": namespace}),
            )
            .await?;
        rows.iter().map(|r| deployment_from_row(r)).collect()
    }

    async fn link_triggered(&self, deployment: &GraphRef, incident: &GraphRef) -> MemoryResult<()> {
        let rows = self
            .run(
                "MATCH (d:Deployment) WHERE elementId(d) = $deployment \
                 MATCH (i:Incident) WHERE elementId(i) = $incident \
                 MERGE (d)-[:TRIGGERED]->(i) \
                 RETURN elementId(i)",
                json!({"deployment": deployment.as_str(), "incident": incident.as_str()}),
            )
            .await?;
        if rows.is_empty() {
            return Err(MemoryError::NotFound(format!(
                "deployment {} or incident {}",
                deployment, incident
            )));
        }
        Ok(())
    }

    async fn incident(&self, incident: &GraphRef) -> MemoryResult<Option<IncidentNode>> {
        let rows = self
            .run(
                &format!(
                    "MATCH (i:Incident) WHERE elementId(i) = $ref RETURN {}",
                    INCIDENT_FIELDS
                ),
                json!({"ref": incident.as_str()}),
            )
            .await?;
        rows.first().map(|r| incident_from_row(r)).transpose()
    }

    async fn incidents(&self, query: &IncidentQuery) -> MemoryResult<Vec<IncidentNode>> {
        let rows = self
            .run(
                &format!(
                    "MATCH (i:Incident) \
                     WHERE ($pod IS NULL OR i.pod_name = $pod) \
                       AND ($namespace IS NULL OR i.namespace = $namespace) \
                       AND ($service IS NULL OR i.service = $service) \
                       AND ($from IS NULL OR i.occurred_at >= datetime($from)) \
                       AND ($to IS NULL OR i.occurred_at <= datetime($to)) \
                     RETURN {} ORDER BY i.occurred_at",
                    INCIDENT_FIELDS
                ),
                json!({
                    "pod": query.pod_name,
                    "namespace": query.namespace,
                    "service": query.service,
                    "from": query.from.map(|t| t.to_rfc3339()),
                    "to": query.to.map(|t| t.to_rfc3339()),
                }),
            )
            .await?;
        rows.iter().map(|r| incident_from_row(r)).collect()
    }

    async fn fixes_for(&self, incident: &GraphRef) -> MemoryResult<Vec<FixNode>> {
        let rows = self
            .run(
                "MATCH (i:Incident)-[:RESOLVED_BY]->(f:Fix) WHERE elementId(i) = $ref \
                 RETURN elementId(f), f.description, f.resolved_at.epochSeconds",
                json!({"ref": incident.as_str()}),
            )
            .await?;
        rows.iter()
            .map(|r| {
                Ok(FixNode {
                    graph_ref: GraphRef::new(text(r, 0)),
                    description: text(r, 1),
                    resolved_at: timestamp(r, 2)?,
                })
            })
            .collect()
    }

    async fn trigger_for(&self, incident: &GraphRef) -> MemoryResult<Option<DeploymentNode>> {
        let rows = self
            .run(
                &format!(
                    "MATCH (d:Deployment)-[:TRIGGERED]->(i:Incident) WHERE elementId(i) = $ref \
                     RETURN {} ORDER BY d.deployed_at DESC LIMIT 1",
                    DEPLOYMENT_FIELDS
                ),
                json!({"ref": incident.as_str()}),
            )
            .await?;
        rows.first().map(|r| deployment_from_row(r)).transpose()
    }

    async fn triggered_pairs(&self) -> MemoryResult<Vec<(DeploymentNode, IncidentNode)>> {
        let rows = self
            .run(
                &format!(
                    "MATCH (d:Deployment)-[:TRIGGERED]->(i:Incident) RETURN {}, {}",
                    DEPLOYMENT_FIELDS, INCIDENT_FIELDS
                ),
                json!({}),
            )
            .await?;
        rows.iter()
            .map(|r| {
                if r.len() < 14 {
                    return Err(MemoryError::Serialization(format!(
                        "expected 14 columns, got {}",
                        r.len()
                    )));
                }
                let (deployment, incident) = r.split_at(5);
                Ok((deployment_from_row(deployment)?, incident_from_row(incident)?))
            })
            .collect()
    }

    async fn resolve_incident(
        &self,
        incident: &GraphRef,
        fix_description: &str,
        resolved_at: DateTime<Utc>,
    ) -> MemoryResult<()> {
        let rows = self
            .run(
                "MATCH (i:Incident) WHERE elementId(i) = $ref \
                 SET i.resolved = true \
                 CREATE (f:Fix {description: $description, resolved_at: datetime($resolved_at)}) \
                 MERGE (i)-[:RESOLVED_BY]->(f) \
                 RETURN elementId(i)",
                json!({
                    "ref": incident.as_str(),
                    "description": fix_description,
                    "resolved_at": resolved_at.to_rfc3339(),
                }),
            )
            .await?;
        if rows.is_empty() {
            return Err(MemoryError::NotFound(format!("incident {}", incident)));
        }
        Ok(())
    }

    async fn snapshot(&self, namespace: Option<&str>) -> MemoryResult<GraphSnapshot> {
        let rows = self
            .run(
                "MATCH (n) \
                 WHERE (n:Pod OR n:Service OR n:Incident OR n:Deployment) \
                       AND ($namespace IS NULL OR n.namespace = $namespace) \
                    OR n:Node AND EXISTS { MATCH (p:Pod)-[:RUNS_ON]->(n) \
                       WHERE $namespace IS NULL OR p.namespace = $namespace } \
                    OR n:Fix AND EXISTS { MATCH (i:Incident)-[:RESOLVED_BY]->(n) \
                       WHERE $namespace IS NULL OR i.namespace = $namespace } \
                 RETURN elementId(n), labels(n)[0], \
                   CASE WHEN n:Incident THEN n.type + ' on ' + n.pod_name \
                        WHEN n:Deployment THEN n.service + '@' + n.version \
                        WHEN n:Fix THEN n.description \
                        ELSE n.name END, \
                   n.namespace, coalesce(n.resolved, false)",
                json!({"namespace": namespace}),
            )
            .await?;

        let nodes: Vec<SnapshotNode> = rows
            .iter()
            .filter_map(|r| {
                Some(SnapshotNode {
                    id: GraphRef::new(text(r, 0)),
                    label: label_from(&text(r, 1))?,
                    name: text(r, 2),
                    namespace: r.get(3).and_then(Value::as_str).map(str::to_string),
                    resolved: r.get(4).and_then(Value::as_bool).unwrap_or(false),
                })
            })
            .collect();
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

        let edge_rows = self
            .run(
                "MATCH (a)-[r]->(b) WHERE elementId(a) IN $ids AND elementId(b) IN $ids \
                 RETURN elementId(a), elementId(b), type(r)",
                json!({"ids": ids}),
            )
            .await?;
        let edges = edge_rows
            .iter()
            .filter_map(|r| {
                Some(SnapshotEdge {
                    from: GraphRef::new(text(r, 0)),
                    to: GraphRef::new(text(r, 1)),
                    relation: relation_from(&text(r, 2))?,
                })
            })
            .collect();

        Ok(GraphSnapshot { nodes, edges })
    }

    async fn clear(&self) -> MemoryResult<()> {
        self.run(
            "MATCH (n) WHERE n:Pod OR n:Service OR n:Node OR n:Incident OR n:Fix OR n:Deployment \
             DETACH DELETE n",
            json!({}),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incident_row_decoding() {
        let row = vec![
            json!("4:abc:12"),
            json!(7),
            json!("payment-api"),
            json!("prod"),
            json!("payments"),
            json!("OOMKill"),
            json!("critical"),
            json!(1_740_830_400),
            json!(false),
        ];
        let node = incident_from_row(&row).unwrap();
        assert_eq!(node.graph_ref.as_str(), "4:abc:12");
        assert_eq!(node.incident_id, 7);
        assert_eq!(node.incident_type, IncidentType::OOMKill);
        assert_eq!(node.severity, Severity::Critical);
        assert_eq!(node.occurred_at.timestamp(), 1_740_830_400);
    }

    #[test]
    fn test_missing_timestamp_is_an_error() {
        let row = vec![json!("1"), json!("svc"), json!("ns"), json!("v1"), Value::Null];
        assert!(deployment_from_row(&row).is_err());
    }

    #[test]
    fn test_endpoint_shape() {
        let store = Neo4jGraphStore::new("http://localhost:7474/", "neo4j", "neo4j", "secret");
        assert_eq!(store.endpoint, "http://localhost:7474/db/neo4j/tx/commit");
    }
}
