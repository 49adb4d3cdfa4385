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

//! Graph analytics: causal patterns, blast radius and deploy correlation.

use super::{GraphStore, IncidentQuery};
use crate::config::MemoryConfig;
use crate::error::{bounded, MemoryResult};
use chrono::{DateTime, Utc};
use kubememory_core::{
    BlastRadiusEntry, BlastRank, CausalPattern, DeployCorrelation, DeployCrashPattern, FixNode,
    GraphRef, GraphSnapshot, Incident, IncidentNode, IncidentType, KmResult, Topology,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Causal/temporal graph over a pluggable [`GraphStore`].
///
/// Every method is bounded by the store timeout and reports store trouble as
/// `GraphUnavailable`; an empty result always means "no history".
pub struct CausalGraph {
    store: Arc<dyn GraphStore>,
    blast_window: chrono::Duration,
    deploy_window: chrono::Duration,
    timeout: Duration,
    max_rows: usize,
    sample_fixes: usize,
}

impl CausalGraph {
    pub fn new(store: Arc<dyn GraphStore>, config: &MemoryConfig) -> Self {
        Self {
            store,
            blast_window: config.blast_window(),
            deploy_window: config.deploy_window(),
            timeout: config.store_timeout(),
            max_rows: config.max_rows,
            sample_fixes: config.sample_fixes,
        }
    }

    async fn guarded<T, F>(&self, op: &'static str, fut: F) -> KmResult<T>
    where
        F: Future<Output = MemoryResult<T>>,
    {
        bounded(self.timeout, fut).await.map_err(|e| {
            warn!(op, error = %e, "graph operation failed");
            e.into_graph()
        })
    }

    /// Log whether the graph store answers; never fails.
    pub async fn check_connectivity(&self) -> bool {
        match self.guarded("ping", self.store.ping()).await {
            Ok(()) => {
                info!("Graph store reachable");
                true
            }
            Err(e) => {
                warn!("Graph store unreachable: {}", e);
                false
            }
        }
    }

    /// Merge Pod/Service/Node, append a new Incident-node and link the most
    /// recent deployment of the same service inside the trailing window.
    pub async fn ingest_incident(&self, incident: &Incident) -> KmResult<GraphRef> {
        let topology = Topology {
            pod_name: incident.pod_name.clone(),
            namespace: incident.namespace.clone(),
            service_name: incident.service().to_string(),
            node_name: incident.node().to_string(),
            image: incident.image.clone(),
            restart_count: incident.restart_count,
        };
        self.guarded("merge_topology", self.store.merge_topology(&topology))
            .await?;
        let graph_ref = self
            .guarded("create_incident", self.store.create_incident(incident))
            .await?;

        // Deployment linking is opportunistic; the incident node already exists
        match self
            .guarded(
                "deployments",
                self.store.deployments(incident.service(), &incident.namespace),
            )
            .await
        {
            Ok(deployments) => {
                let trigger = deployments
                    .into_iter()
                    .filter(|d| self.within_deploy_window(d.deployed_at, incident.occurred_at))
                    .max_by_key(|d| d.deployed_at);
                if let Some(d) = trigger {
                    if let Err(e) = self
                        .guarded("link_triggered", self.store.link_triggered(&d.graph_ref, &graph_ref))
                        .await
                    {
                        warn!(incident = incident.id, "deploy link skipped: {}", e);
                    } else {
                        debug!(incident = incident.id, version = %d.version, "linked deployment");
                    }
                }
            }
            Err(e) => warn!(incident = incident.id, "deploy lookup skipped: {}", e),
        }

        info!(
            incident = incident.id,
            pod = %incident.pod_name,
            namespace = %incident.namespace,
            graph_ref = %graph_ref,
            "incident ingested into graph"
        );
        Ok(graph_ref)
    }

    fn within_deploy_window(&self, deployed_at: DateTime<Utc>, occurred_at: DateTime<Utc>) -> bool {
        deployed_at <= occurred_at && occurred_at - deployed_at <= self.deploy_window
    }

    /// Record a deployment and link it to incidents of the same service that
    /// happened inside the following window.
    pub async fn record_deployment(
        &self,
        service: &str,
        namespace: &str,
        version: &str,
        deployed_at: DateTime<Utc>,
    ) -> KmResult<GraphRef> {
        let deployment = self
            .guarded(
                "create_deployment",
                self.store.create_deployment(service, namespace, version, deployed_at),
            )
            .await?;

        let query = IncidentQuery {
            namespace: Some(namespace.to_string()),
            service: Some(service.to_string()),
            from: Some(deployed_at),
            to: Some(deployed_at + self.deploy_window),
            ..Default::default()
        };
        let incidents = self.guarded("incidents", self.store.incidents(&query)).await?;
        for incident in &incidents {
            self.guarded(
                "link_triggered",
                self.store.link_triggered(&deployment, &incident.graph_ref),
            )
            .await?;
        }

        info!(service, namespace, version, linked = incidents.len(), "deployment recorded");
        Ok(deployment)
    }

    /// Per-type history of one pod, most frequent first.
    pub async fn find_causal_patterns(&self, pod_name: &str, namespace: &str) -> KmResult<Vec<CausalPattern>> {
        let incidents = self
            .guarded(
                "incidents",
                self.store.incidents(&IncidentQuery::for_pod(pod_name, namespace)),
            )
            .await?;

        let mut by_type: BTreeMap<IncidentType, Vec<IncidentNode>> = BTreeMap::new();
        for incident in incidents {
            by_type.entry(incident.incident_type).or_default().push(incident);
        }

        let mut patterns = Vec::with_capacity(by_type.len());
        for (incident_type, group) in by_type {
            let mut fixes: Vec<FixNode> = Vec::new();
            let mut deploy_versions: Vec<String> = Vec::new();
            for incident in &group {
                fixes.extend(
                    self.guarded("fixes_for", self.store.fixes_for(&incident.graph_ref))
                        .await?,
                );
                if let Some(d) = self
                    .guarded("trigger_for", self.store.trigger_for(&incident.graph_ref))
                    .await?
                {
                    if !deploy_versions.contains(&d.version) {
                        deploy_versions.push(d.version);
                    }
                }
            }

            fixes.sort_by(|a, b| b.resolved_at.cmp(&a.resolved_at));
            let mut seen = HashSet::new();
            let fixes_that_worked: Vec<String> = fixes
                .into_iter()
                .map(|f| f.description)
                .filter(|d| seen.insert(d.clone()))
                .take(self.sample_fixes)
                .collect();

            let last_seen = group
                .iter()
                .map(|i| i.occurred_at)
                .max()
                .unwrap_or_else(Utc::now);

            patterns.push(CausalPattern {
                incident_type,
                frequency: group.len() as u32,
                fixes_that_worked,
                deploy_versions,
                last_seen,
            });
        }

        patterns.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
        });
        patterns.truncate(self.max_rows);
        Ok(patterns)
    }

    /// Pods whose incidents fall inside the symmetric window around any
    /// incident of `pod_name`. The pod itself is never part of the result.
    pub async fn find_blast_radius(&self, pod_name: &str, namespace: &str) -> KmResult<Vec<BlastRadiusEntry>> {
        let own = self
            .guarded(
                "incidents",
                self.store.incidents(&IncidentQuery::for_pod(pod_name, namespace)),
            )
            .await?;
        let (Some(first), Some(last)) = (own.first(), own.last()) else {
            return Ok(Vec::new());
        };

        let nearby = self
            .guarded(
                "incidents",
                self.store.incidents(&IncidentQuery::between(
                    first.occurred_at - self.blast_window,
                    last.occurred_at + self.blast_window,
                )),
            )
            .await?;

        let mut counts: HashMap<(String, String), (u32, BTreeSet<IncidentType>)> = HashMap::new();
        for anchor in &own {
            for other in co_occurring(&nearby, anchor.occurred_at, self.blast_window) {
                if other.pod_name == pod_name && other.namespace == namespace {
                    continue;
                }
                let entry = counts
                    .entry((other.namespace.clone(), other.pod_name.clone()))
                    .or_default();
                entry.0 += 1;
                entry.1.insert(other.incident_type);
            }
        }

        let mut entries: Vec<BlastRadiusEntry> = counts
            .into_iter()
            .map(|((ns, pod), (co_occurrence, types))| BlastRadiusEntry {
                affected_pod: pod,
                namespace: ns,
                co_occurrence,
                incident_types: types.into_iter().collect(),
            })
            .collect();
        entries.sort_by(|a, b| {
            b.co_occurrence
                .cmp(&a.co_occurrence)
                .then_with(|| a.affected_pod.cmp(&b.affected_pod))
                .then_with(|| a.namespace.cmp(&b.namespace))
        });
        entries.truncate(self.max_rows);
        Ok(entries)
    }

    /// Cluster-wide ranking by number of distinct co-failing pods.
    pub async fn find_top_blast_radius_pods(
        &self,
        namespace: Option<&str>,
        limit: usize,
    ) -> KmResult<Vec<BlastRank>> {
        let all = self
            .guarded("incidents", self.store.incidents(&IncidentQuery::default()))
            .await?;

        let mut partners: HashMap<(String, String), HashSet<(String, String)>> = HashMap::new();
        for anchor in all
            .iter()
            .filter(|i| namespace.map_or(true, |ns| i.namespace == ns))
        {
            let key = (anchor.namespace.clone(), anchor.pod_name.clone());
            let set = partners.entry(key.clone()).or_default();
            for other in co_occurring(&all, anchor.occurred_at, self.blast_window) {
                let other_key = (other.namespace.clone(), other.pod_name.clone());
                if other_key != key {
                    set.insert(other_key);
                }
            }
        }

        let mut ranks: Vec<BlastRank> = partners
            .into_iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|((ns, pod), set)| BlastRank {
                pod_name: pod,
                namespace: ns,
                blast_size: set.len() as u32,
            })
            .collect();
        ranks.sort_by(|a, b| {
            b.blast_size
                .cmp(&a.blast_size)
                .then_with(|| a.pod_name.cmp(&b.pod_name))
        });
        ranks.truncate(limit);
        Ok(ranks)
    }

    /// The deployment that TRIGGERED one incident, if any.
    pub async fn get_deploy_correlation(&self, incident: &GraphRef) -> KmResult<Option<DeployCorrelation>> {
        let Some(node) = self
            .guarded("incident", self.store.incident(incident))
            .await?
        else {
            return Ok(None);
        };
        let trigger = self
            .guarded("trigger_for", self.store.trigger_for(incident))
            .await?;

        Ok(trigger.map(|d| DeployCorrelation {
            minutes_before_crash: minutes_between(d.deployed_at, node.occurred_at),
            service: d.service,
            version: d.version,
        }))
    }

    /// Aggregate over every TRIGGERED edge, most crashes first.
    pub async fn find_deploy_to_crash_correlation(&self) -> KmResult<Vec<DeployCrashPattern>> {
        let pairs = self
            .guarded("triggered_pairs", self.store.triggered_pairs())
            .await?;

        let mut by_service: BTreeMap<String, (u32, BTreeSet<IncidentType>, f64)> = BTreeMap::new();
        for (deployment, incident) in pairs {
            let entry = by_service.entry(deployment.service.clone()).or_default();
            entry.0 += 1;
            entry.1.insert(incident.incident_type);
            entry.2 += minutes_between(deployment.deployed_at, incident.occurred_at);
        }

        let mut patterns: Vec<DeployCrashPattern> = by_service
            .into_iter()
            .map(|(service, (count, types, total))| DeployCrashPattern {
                service,
                crash_count: count,
                crash_types: types.into_iter().collect(),
                avg_minutes_to_crash: total / f64::from(count.max(1)),
            })
            .collect();
        patterns.sort_by(|a, b| b.crash_count.cmp(&a.crash_count));
        Ok(patterns)
    }

    pub async fn resolve_incident(&self, incident: &GraphRef, fix_text: &str) -> KmResult<()> {
        self.guarded(
            "resolve_incident",
            self.store.resolve_incident(incident, fix_text, Utc::now()),
        )
        .await
    }

    pub async fn namespace_snapshot(&self, namespace: Option<&str>) -> KmResult<GraphSnapshot> {
        self.guarded("snapshot", self.store.snapshot(namespace)).await
    }

    /// Destructive full reset, for cluster disconnect flows only.
    pub async fn clear_all(&self) -> KmResult<()> {
        warn!("Clearing graph store");
        self.guarded("clear", self.store.clear()).await
    }
}

/// Incidents of a time-sorted slice within `window` of `at`, bounds inclusive.
fn co_occurring<'a>(
    sorted: &'a [IncidentNode],
    at: DateTime<Utc>,
    window: chrono::Duration,
) -> impl Iterator<Item = &'a IncidentNode> {
    let start = sorted.partition_point(|i| i.occurred_at < at - window);
    sorted[start..]
        .iter()
        .take_while(move |i| i.occurred_at <= at + window)
}

fn minutes_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_seconds() as f64 / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraphStore;
    use chrono::TimeZone;
    use kubememory_core::{KubeMemoryError, NewIncident};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn incident(id: u64, pod: &str, kind: &str, at: DateTime<Utc>) -> Incident {
        Incident::from_new(
            id,
            NewIncident {
                pod_name: pod.into(),
                namespace: "prod".into(),
                node_name: "node-a".into(),
                service_name: String::new(),
                incident_type: kind.into(),
                severity: "high".into(),
                description: String::new(),
                raw_logs: String::new(),
                image: String::new(),
                restart_count: 0,
                occurred_at: at,
            },
        )
    }

    fn graph() -> (Arc<InMemoryGraphStore>, CausalGraph) {
        let store = Arc::new(InMemoryGraphStore::new());
        let graph = CausalGraph::new(store.clone(), &MemoryConfig::default());
        (store, graph)
    }

    #[tokio::test]
    async fn test_oomkill_patterns_list_worked_fixes_newest_first() {
        let (store, graph) = graph();
        let mut refs = Vec::new();
        for (id, hours) in [(1, 0), (2, 24), (3, 48)] {
            let inc = incident(id, "payment-api", "OOMKill", t0() + chrono::Duration::hours(hours));
            refs.push(graph.ingest_incident(&inc).await.unwrap());
        }
        store
            .resolve_incident(&refs[0], "raise limit to 512Mi", t0() + chrono::Duration::hours(1))
            .await
            .unwrap();
        store
            .resolve_incident(&refs[1], "raise limit to 1Gi", t0() + chrono::Duration::hours(25))
            .await
            .unwrap();

        let patterns = graph.find_causal_patterns("payment-api", "prod").await.unwrap();
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.incident_type, IncidentType::OOMKill);
        assert_eq!(p.frequency, 3);
        assert_eq!(
            p.fixes_that_worked,
            vec!["raise limit to 1Gi".to_string(), "raise limit to 512Mi".to_string()]
        );
        assert!(p.deploy_versions.is_empty());
        assert_eq!(p.last_seen, t0() + chrono::Duration::hours(48));
    }

    #[tokio::test]
    async fn test_patterns_ordered_by_frequency_and_empty_without_history() {
        let (_, graph) = graph();
        graph
            .ingest_incident(&incident(1, "api", "Evicted", t0()))
            .await
            .unwrap();
        for id in 2..4 {
            graph
                .ingest_incident(&incident(id, "api", "CrashLoopBackOff", t0()))
                .await
                .unwrap();
        }
        let patterns = graph.find_causal_patterns("api", "prod").await.unwrap();
        assert_eq!(patterns[0].incident_type, IncidentType::CrashLoopBackOff);
        assert_eq!(patterns[1].frequency, 1);

        assert!(graph.find_causal_patterns("ghost", "prod").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blast_radius_window() {
        let (_, graph) = graph();
        let secs = chrono::Duration::seconds;
        graph.ingest_incident(&incident(1, "X", "OOMKill", t0())).await.unwrap();
        graph
            .ingest_incident(&incident(2, "Y", "CrashLoopBackOff", t0() + secs(250)))
            .await
            .unwrap();
        graph
            .ingest_incident(&incident(3, "Z", "CrashLoopBackOff", t0() + secs(400)))
            .await
            .unwrap();
        // X again, inside its own window: must not count itself
        graph
            .ingest_incident(&incident(4, "X", "OOMKill", t0() + secs(100)))
            .await
            .unwrap();

        let blast = graph.find_blast_radius("X", "prod").await.unwrap();
        assert!(blast.iter().all(|e| e.affected_pod != "X"));
        let y = blast.iter().find(|e| e.affected_pod == "Y").unwrap();
        // Y at +250 co-occurs with X@0 and X@+100
        assert_eq!(y.co_occurrence, 2);
        assert_eq!(y.incident_types, vec![IncidentType::CrashLoopBackOff]);
        // Z at +400 co-occurs only with X@+100 (300s away)
        let z = blast.iter().find(|e| e.affected_pod == "Z").unwrap();
        assert_eq!(z.co_occurrence, 1);
    }

    #[tokio::test]
    async fn test_blast_radius_excludes_outside_window() {
        let (_, graph) = graph();
        let secs = chrono::Duration::seconds;
        graph.ingest_incident(&incident(1, "X", "OOMKill", t0())).await.unwrap();
        graph
            .ingest_incident(&incident(2, "Y", "OOMKill", t0() + secs(250)))
            .await
            .unwrap();
        graph
            .ingest_incident(&incident(3, "Z", "OOMKill", t0() + secs(400)))
            .await
            .unwrap();

        let blast = graph.find_blast_radius("X", "prod").await.unwrap();
        assert_eq!(blast.len(), 1);
        assert_eq!(blast[0].affected_pod, "Y");
        assert_eq!(blast[0].co_occurrence, 1);
    }

    #[tokio::test]
    async fn test_top_blast_radius_ranking() {
        let (_, graph) = graph();
        let secs = chrono::Duration::seconds;
        graph.ingest_incident(&incident(1, "db", "OOMKill", t0())).await.unwrap();
        graph.ingest_incident(&incident(2, "api", "CrashLoopBackOff", t0() + secs(30))).await.unwrap();
        graph.ingest_incident(&incident(3, "web", "CrashLoopBackOff", t0() + secs(60))).await.unwrap();
        graph
            .ingest_incident(&incident(4, "lonely", "Pending", t0() + chrono::Duration::hours(5)))
            .await
            .unwrap();

        let ranks = graph.find_top_blast_radius_pods(Some("prod"), 10).await.unwrap();
        assert_eq!(ranks.len(), 3);
        assert!(ranks.iter().all(|r| r.blast_size == 2));
        assert_eq!(ranks[0].pod_name, "api");
        assert_eq!(graph.find_top_blast_radius_pods(Some("prod"), 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deploy_correlation_inside_and_outside_window() {
        let (_, graph) = graph();
        graph
            .record_deployment("payment-api", "prod", "2.3", t0())
            .await
            .unwrap();

        let crash = incident(1, "payment-api", "CrashLoopBackOff", t0() + chrono::Duration::minutes(45));
        let r = graph.ingest_incident(&crash).await.unwrap();
        let correlation = graph.get_deploy_correlation(&r).await.unwrap().unwrap();
        assert_eq!(
            correlation,
            DeployCorrelation {
                service: "payment-api".into(),
                version: "2.3".into(),
                minutes_before_crash: 45.0,
            }
        );

        let late = incident(2, "payment-api", "CrashLoopBackOff", t0() + chrono::Duration::hours(3));
        let r = graph.ingest_incident(&late).await.unwrap();
        assert!(graph.get_deploy_correlation(&r).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_deployment_links_later_incidents() {
        let (_, graph) = graph();
        let crash = incident(1, "payment-api", "OOMKill", t0() + chrono::Duration::minutes(30));
        let r = graph.ingest_incident(&crash).await.unwrap();
        assert!(graph.get_deploy_correlation(&r).await.unwrap().is_none());

        graph
            .record_deployment("payment-api", "prod", "2.4", t0())
            .await
            .unwrap();
        let correlation = graph.get_deploy_correlation(&r).await.unwrap().unwrap();
        assert_eq!(correlation.version, "2.4");

        let crashes = graph.find_deploy_to_crash_correlation().await.unwrap();
        assert_eq!(crashes.len(), 1);
        assert_eq!(crashes[0].crash_count, 1);
        assert!((crashes[0].avg_minutes_to_crash - 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_resolve_unknown_incident_is_not_found() {
        let (_, graph) = graph();
        let err = graph
            .resolve_incident(&GraphRef::new("404"), "anything")
            .await
            .unwrap_err();
        assert!(matches!(err, KubeMemoryError::NotFound(_)));
    }

    proptest! {
        #[test]
        fn prop_blast_radius_never_contains_pod(offsets in proptest::collection::vec(0i64..900, 1..12)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let (_, graph) = graph();
                for (i, offset) in offsets.iter().enumerate() {
                    let pod = ["X", "Y", "Z"][i % 3];
                    let at = t0() + chrono::Duration::seconds(*offset);
                    graph.ingest_incident(&incident(i as u64, pod, "OOMKill", at)).await.unwrap();
                }
                let blast = graph.find_blast_radius("X", "prod").await.unwrap();
                assert!(blast.iter().all(|e| !(e.affected_pod == "X" && e.namespace == "prod")));
                assert!(blast.len() <= 10);
            });
        }
    }
}
