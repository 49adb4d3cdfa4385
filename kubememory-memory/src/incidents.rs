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

//! Relational records: incidents, fixes and cluster patterns
//!
//! One JSON file per record under `incidents/`, `fixes/` and `patterns/`,
//! loaded into memory on open. Without a path the store is purely in-memory.

use crate::error::{MemoryError, MemoryResult};
use async_trait::async_trait;
use chrono::Utc;
use kubememory_core::{
    ClusterPattern, Fix, FixId, GraphRef, Incident, IncidentId, IncidentStatus, IncidentType,
    NewFix, NewIncident,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

const INCIDENTS_DIR: &str = "incidents";
const FIXES_DIR: &str = "fixes";
const PATTERNS_DIR: &str = "patterns";

/// Filter for [`IncidentStore::list`]; results are newest first
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub namespace: Option<String>,
    pub pod_name: Option<String>,
    pub status: Option<IncidentStatus>,
    pub limit: Option<usize>,
}

impl IncidentFilter {
    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    pub fn pod(mut self, pod: impl Into<String>) -> Self {
        self.pod_name = Some(pod.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Outcome of [`IncidentStore::insert`]
#[derive(Debug, Clone, PartialEq)]
pub enum Inserted {
    Created(Incident),
    /// Same pod, namespace, type and timestamp already stored
    Duplicate(Incident),
}

#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn insert(&self, new: NewIncident) -> MemoryResult<Inserted>;

    async fn get(&self, id: IncidentId) -> MemoryResult<Option<Incident>>;

    /// Record memory identifiers; ids already set are left untouched
    async fn set_refs(
        &self,
        id: IncidentId,
        vector_id: Option<String>,
        graph_ref: Option<GraphRef>,
    ) -> MemoryResult<Incident>;

    async fn set_analysis(&self, id: IncidentId, analysis: &str) -> MemoryResult<()>;

    /// Moving to `Resolved` stamps `resolved_at`
    async fn set_status(&self, id: IncidentId, status: IncidentStatus) -> MemoryResult<Incident>;

    async fn list(&self, filter: &IncidentFilter) -> MemoryResult<Vec<Incident>>;

    async fn insert_fix(&self, new: NewFix) -> MemoryResult<Fix>;

    async fn get_fix(&self, id: FixId) -> MemoryResult<Option<Fix>>;

    /// Oldest first
    async fn fixes_for(&self, incident: IncidentId) -> MemoryResult<Vec<Fix>>;

    /// Rebuild the aggregate for one (pod, namespace, type) key
    async fn recompute_pattern(
        &self,
        pod_name: &str,
        namespace: &str,
        incident_type: IncidentType,
    ) -> MemoryResult<Option<ClusterPattern>>;

    /// Most frequent first
    async fn patterns(&self, namespace: Option<&str>) -> MemoryResult<Vec<ClusterPattern>>;
}

/// File-backed [`IncidentStore`]
#[derive(Debug)]
pub struct FileIncidentStore {
    path: Option<PathBuf>,
    incidents: RwLock<HashMap<IncidentId, Incident>>,
    fixes: RwLock<HashMap<FixId, Fix>>,
    patterns: RwLock<HashMap<String, ClusterPattern>>,
    next_incident: AtomicU64,
    next_fix: AtomicU64,
}

fn pattern_key(pod_name: &str, namespace: &str, incident_type: IncidentType) -> String {
    format!("{}__{}__{}", namespace, pod_name, incident_type.as_str())
}

impl FileIncidentStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            incidents: RwLock::new(HashMap::new()),
            fixes: RwLock::new(HashMap::new()),
            patterns: RwLock::new(HashMap::new()),
            next_incident: AtomicU64::new(1),
            next_fix: AtomicU64::new(1),
        }
    }

    /// Open (or create) a store rooted at `path`
    pub async fn open(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let mut store = Self::in_memory();
        store.path = Some(path);
        store.load_from_disk().await?;
        Ok(store)
    }

    async fn load_from_disk(&self) -> MemoryResult<()> {
        let Some(root) = &self.path else {
            return Ok(());
        };

        let incidents: Vec<Incident> = read_records(&root.join(INCIDENTS_DIR))?;
        let fixes: Vec<Fix> = read_records(&root.join(FIXES_DIR))?;
        let patterns: Vec<ClusterPattern> = read_records(&root.join(PATTERNS_DIR))?;

        let max_incident = incidents.iter().map(|i| i.id).max().unwrap_or(0);
        let max_fix = fixes.iter().map(|f| f.id).max().unwrap_or(0);
        self.next_incident.store(max_incident + 1, Ordering::SeqCst);
        self.next_fix.store(max_fix + 1, Ordering::SeqCst);

        debug!(
            incidents = incidents.len(),
            fixes = fixes.len(),
            patterns = patterns.len(),
            "loaded incident records"
        );

        self.incidents
            .write()
            .await
            .extend(incidents.into_iter().map(|i| (i.id, i)));
        self.fixes
            .write()
            .await
            .extend(fixes.into_iter().map(|f| (f.id, f)));
        self.patterns.write().await.extend(
            patterns
                .into_iter()
                .map(|p| (pattern_key(&p.pod_name, &p.namespace, p.incident_type), p)),
        );
        Ok(())
    }

    fn persist<T: Serialize>(&self, dir: &str, name: &str, record: &T) -> MemoryResult<()> {
        let Some(root) = &self.path else {
            return Ok(());
        };
        let dir = root.join(dir);
        std::fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(record)?;
        std::fs::write(dir.join(format!("{}.json", name)), content)?;
        Ok(())
    }

    async fn update<F>(&self, id: IncidentId, apply: F) -> MemoryResult<Incident>
    where
        F: FnOnce(&mut Incident),
    {
        let updated = {
            let mut incidents = self.incidents.write().await;
            let incident = incidents
                .get_mut(&id)
                .ok_or_else(|| MemoryError::NotFound(format!("incident {}", id)))?;
            apply(incident);
            incident.clone()
        };
        self.persist(INCIDENTS_DIR, &id.to_string(), &updated)?;
        Ok(updated)
    }
}

fn read_records<T: serde::de::DeserializeOwned>(dir: &Path) -> MemoryResult<Vec<T>> {
    let mut records = Vec::new();
    if !dir.exists() {
        return Ok(records);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().extension().map(|e| e == "json").unwrap_or(false) {
            let content = std::fs::read_to_string(entry.path())?;
            if let Ok(record) = serde_json::from_str::<T>(&content) {
                records.push(record);
            }
        }
    }
    Ok(records)
}

#[async_trait]
impl IncidentStore for FileIncidentStore {
    async fn insert(&self, new: NewIncident) -> MemoryResult<Inserted> {
        let incident = {
            let mut incidents = self.incidents.write().await;
            let candidate_type = IncidentType::from_label(&new.incident_type);
            if let Some(existing) = incidents.values().find(|i| {
                i.pod_name == new.pod_name
                    && i.namespace == new.namespace
                    && i.occurred_at == new.occurred_at
                    && i.incident_type == candidate_type
            }) {
                return Ok(Inserted::Duplicate(existing.clone()));
            }

            let id = self.next_incident.fetch_add(1, Ordering::SeqCst);
            let incident = Incident::from_new(id, new);
            incidents.insert(id, incident.clone());
            incident
        };

        self.persist(INCIDENTS_DIR, &incident.id.to_string(), &incident)?;
        Ok(Inserted::Created(incident))
    }

    async fn get(&self, id: IncidentId) -> MemoryResult<Option<Incident>> {
        Ok(self.incidents.read().await.get(&id).cloned())
    }

    async fn set_refs(
        &self,
        id: IncidentId,
        vector_id: Option<String>,
        graph_ref: Option<GraphRef>,
    ) -> MemoryResult<Incident> {
        self.update(id, |incident| {
            if incident.vector_id.is_none() {
                incident.vector_id = vector_id;
            }
            if incident.graph_ref.is_none() {
                incident.graph_ref = graph_ref;
            }
        })
        .await
    }

    async fn set_analysis(&self, id: IncidentId, analysis: &str) -> MemoryResult<()> {
        self.update(id, |incident| incident.ai_analysis = Some(analysis.to_string()))
            .await
            .map(|_| ())
    }

    async fn set_status(&self, id: IncidentId, status: IncidentStatus) -> MemoryResult<Incident> {
        self.update(id, |incident| {
            incident.status = status;
            if status == IncidentStatus::Resolved && incident.resolved_at.is_none() {
                incident.resolved_at = Some(Utc::now());
            }
        })
        .await
    }

    async fn list(&self, filter: &IncidentFilter) -> MemoryResult<Vec<Incident>> {
        let incidents = self.incidents.read().await;
        let mut results: Vec<Incident> = incidents
            .values()
            .filter(|i| filter.namespace.as_ref().map_or(true, |ns| &i.namespace == ns))
            .filter(|i| filter.pod_name.as_ref().map_or(true, |p| &i.pod_name == p))
            .filter(|i| filter.status.map_or(true, |s| i.status == s))
            .cloned()
            .collect();

        results.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn insert_fix(&self, new: NewFix) -> MemoryResult<Fix> {
        if !self.incidents.read().await.contains_key(&new.incident_id) {
            return Err(MemoryError::NotFound(format!("incident {}", new.incident_id)));
        }

        let fix = {
            let mut fixes = self.fixes.write().await;
            if let Some(original) = new.correction_of {
                if !fixes.contains_key(&original) {
                    return Err(MemoryError::NotFound(format!("fix {}", original)));
                }
            }
            let id = self.next_fix.fetch_add(1, Ordering::SeqCst);
            let fix = Fix {
                id,
                incident_id: new.incident_id,
                description: new.description,
                applied_by: new.applied_by,
                worked: new.worked,
                ai_suggested: new.ai_suggested,
                correction_of: new.correction_of,
                created_at: Utc::now(),
            };
            fixes.insert(id, fix.clone());
            fix
        };

        self.persist(FIXES_DIR, &fix.id.to_string(), &fix)?;
        Ok(fix)
    }

    async fn get_fix(&self, id: FixId) -> MemoryResult<Option<Fix>> {
        Ok(self.fixes.read().await.get(&id).cloned())
    }

    async fn fixes_for(&self, incident: IncidentId) -> MemoryResult<Vec<Fix>> {
        let mut fixes: Vec<Fix> = self
            .fixes
            .read()
            .await
            .values()
            .filter(|f| f.incident_id == incident)
            .cloned()
            .collect();
        fixes.sort_by_key(|f| (f.created_at, f.id));
        Ok(fixes)
    }

    async fn recompute_pattern(
        &self,
        pod_name: &str,
        namespace: &str,
        incident_type: IncidentType,
    ) -> MemoryResult<Option<ClusterPattern>> {
        let history: Vec<Incident> = self
            .incidents
            .read()
            .await
            .values()
            .filter(|i| {
                i.pod_name == pod_name && i.namespace == namespace && i.incident_type == incident_type
            })
            .cloned()
            .collect();
        let fixes: Vec<Fix> = {
            let fixes = self.fixes.read().await;
            fixes
                .values()
                .filter(|f| history.iter().any(|i| i.id == f.incident_id))
                .cloned()
                .collect()
        };

        let key = pattern_key(pod_name, namespace, incident_type);
        let Some(pattern) = ClusterPattern::from_history(&history, &fixes) else {
            return Ok(None);
        };
        self.patterns.write().await.insert(key.clone(), pattern.clone());
        self.persist(PATTERNS_DIR, &key, &pattern)?;
        Ok(Some(pattern))
    }

    async fn patterns(&self, namespace: Option<&str>) -> MemoryResult<Vec<ClusterPattern>> {
        let mut patterns: Vec<ClusterPattern> = self
            .patterns
            .read()
            .await
            .values()
            .filter(|p| namespace.map_or(true, |ns| p.namespace == ns))
            .cloned()
            .collect();
        patterns.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
        });
        Ok(patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use tempfile::tempdir;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, minute, 0).unwrap()
    }

    fn new_incident(pod: &str, kind: &str, occurred_at: DateTime<Utc>) -> NewIncident {
        NewIncident {
            pod_name: pod.into(),
            namespace: "prod".into(),
            node_name: String::new(),
            service_name: String::new(),
            incident_type: kind.into(),
            severity: "critical".into(),
            description: "container exceeded memory limit".into(),
            raw_logs: String::new(),
            image: String::new(),
            restart_count: 3,
            occurred_at,
        }
    }

    fn created(inserted: Inserted) -> Incident {
        match inserted {
            Inserted::Created(i) => i,
            Inserted::Duplicate(i) => panic!("unexpected duplicate {}", i.id),
        }
    }

    #[tokio::test]
    async fn test_duplicate_ingestion_is_detected() {
        let store = FileIncidentStore::in_memory();
        let first = created(store.insert(new_incident("api", "OOMKill", at(0))).await.unwrap());
        let again = store.insert(new_incident("api", "OOMKill", at(0))).await.unwrap();
        assert_eq!(again, Inserted::Duplicate(first.clone()));

        // Different timestamp is a new incident
        let second = created(store.insert(new_incident("api", "OOMKill", at(1))).await.unwrap());
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_refs_are_set_once() {
        let store = FileIncidentStore::in_memory();
        let incident = created(store.insert(new_incident("api", "OOMKill", at(0))).await.unwrap());

        store
            .set_refs(incident.id, Some("incident_1_abc".into()), Some(GraphRef::new("7")))
            .await
            .unwrap();
        let updated = store
            .set_refs(incident.id, Some("other".into()), Some(GraphRef::new("8")))
            .await
            .unwrap();
        assert_eq!(updated.vector_id.as_deref(), Some("incident_1_abc"));
        assert_eq!(updated.graph_ref, Some(GraphRef::new("7")));
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_filtered() {
        let store = FileIncidentStore::in_memory();
        store.insert(new_incident("api", "OOMKill", at(0))).await.unwrap();
        store.insert(new_incident("api", "CrashLoopBackOff", at(5))).await.unwrap();
        store.insert(new_incident("web", "OOMKill", at(9))).await.unwrap();

        let api = store
            .list(&IncidentFilter::default().namespace("prod").pod("api"))
            .await
            .unwrap();
        assert_eq!(api.len(), 2);
        assert_eq!(api[0].occurred_at, at(5));

        let limited = store.list(&IncidentFilter::default().limit(1)).await.unwrap();
        assert_eq!(limited[0].pod_name, "web");
    }

    #[tokio::test]
    async fn test_fix_requires_known_incident_and_original() {
        let store = FileIncidentStore::in_memory();
        let incident = created(store.insert(new_incident("api", "OOMKill", at(0))).await.unwrap());

        let missing = store
            .insert_fix(NewFix {
                incident_id: 99,
                description: "x".into(),
                applied_by: String::new(),
                worked: true,
                ai_suggested: false,
                correction_of: None,
            })
            .await;
        assert!(matches!(missing, Err(MemoryError::NotFound(_))));

        let bad_correction = store
            .insert_fix(NewFix {
                incident_id: incident.id,
                description: "x".into(),
                applied_by: String::new(),
                worked: true,
                ai_suggested: false,
                correction_of: Some(42),
            })
            .await;
        assert!(matches!(bad_correction, Err(MemoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_pattern_recompute_and_persistence() {
        let dir = tempdir().unwrap();
        {
            let store = FileIncidentStore::open(dir.path()).await.unwrap();
            let a = created(store.insert(new_incident("api", "OOMKill", at(0))).await.unwrap());
            created(store.insert(new_incident("api", "OOMKill", at(30))).await.unwrap());
            for (description, worked) in [("restart pod", false), ("raise memory limit", true)] {
                store
                    .insert_fix(NewFix {
                        incident_id: a.id,
                        description: description.into(),
                        applied_by: "oncall".into(),
                        worked,
                        ai_suggested: false,
                        correction_of: None,
                    })
                    .await
                    .unwrap();
            }
            let pattern = store
                .recompute_pattern("api", "prod", IncidentType::OOMKill)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(pattern.frequency, 2);
            assert_eq!(pattern.best_fix.as_deref(), Some("raise memory limit"));
            assert!((pattern.fix_success_rate - 0.5).abs() < 1e-9);
            assert_eq!(pattern.last_seen, at(30));
        }

        let reopened = FileIncidentStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.list(&IncidentFilter::default()).await.unwrap().len(), 2);
        assert_eq!(reopened.patterns(Some("prod")).await.unwrap().len(), 1);
        // Ids continue after the highest persisted one
        let next = created(reopened.insert(new_incident("web", "Evicted", at(40))).await.unwrap());
        assert_eq!(next.id, 3);
    }

    #[tokio::test]
    async fn test_resolve_stamps_resolved_at() {
        let store = FileIncidentStore::in_memory();
        let incident = created(store.insert(new_incident("api", "OOMKill", at(0))).await.unwrap());
        let resolved = store
            .set_status(incident.id, IncidentStatus::Resolved)
            .await
            .unwrap();
        assert!(resolved.resolved_at.is_some());
        assert!(store.set_status(77, IncidentStatus::Resolved).await.is_err());
    }
}
