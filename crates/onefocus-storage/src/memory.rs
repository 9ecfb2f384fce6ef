//! In-process [`SnapshotStore`] with the same upsert, idempotency and rollback
//! semantics as the Postgres store. Used by tests across the workspace.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use onefocus_core::{
    BucketFilter, MetricDaily, NewSnapshot, NormalizedProject, NormalizedTask, ProjectRecord,
    SnapshotRecord, SnapshotTaskRecord, SnapshotTaskRow, TaskRecord,
};
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::repo::{SnapshotStore, SnapshotWrite, StoreError};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    projects: Vec<ProjectRecord>,
    tasks: Vec<TaskRecord>,
    snapshots: Vec<(SnapshotRecord, JsonValue)>,
    snapshot_tasks: Vec<(Uuid, SnapshotTaskRow)>,
    metrics: Vec<MetricDaily>,
    fail_snapshot_tasks: bool,
}

impl MemoryState {
    fn project_bucket_matches(&self, project_id: Option<Uuid>, filter: BucketFilter) -> bool {
        match filter.bucket() {
            None => true,
            Some(bucket) => project_id
                .and_then(|id| self.projects.iter().find(|p| p.id == id))
                .is_some_and(|p| p.bucket == bucket),
        }
    }

    fn snapshots_newest_first(&self, filter: BucketFilter) -> Vec<&SnapshotRecord> {
        let mut matching: Vec<&SnapshotRecord> = self
            .snapshots
            .iter()
            .map(|(s, _)| s)
            .filter(|s| self.project_bucket_matches(s.project_id, filter))
            .collect();
        matching.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        matching
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_metric(&self, metric: MetricDaily) {
        let mut state = self.state.lock().await;
        state.metrics.retain(|m| m.day != metric.day);
        state.metrics.push(metric);
    }

    /// Makes every following `insert_snapshot_tasks` call fail.
    pub async fn fail_snapshot_task_inserts(&self, fail: bool) {
        self.state.lock().await.fail_snapshot_tasks = fail;
    }

    pub async fn projects(&self) -> Vec<ProjectRecord> {
        self.state.lock().await.projects.clone()
    }

    pub async fn tasks(&self) -> Vec<TaskRecord> {
        self.state.lock().await.tasks.clone()
    }

    pub async fn snapshots(&self) -> Vec<SnapshotRecord> {
        self.state
            .lock()
            .await
            .snapshots
            .iter()
            .map(|(s, _)| s.clone())
            .collect()
    }

    pub async fn raw_for(&self, snapshot_id: Uuid) -> Option<JsonValue> {
        self.state
            .lock()
            .await
            .snapshots
            .iter()
            .find(|(s, _)| s.id == snapshot_id)
            .map(|(_, raw)| raw.clone())
    }

    pub async fn snapshot_task_count(&self, snapshot_id: Uuid) -> usize {
        self.state
            .lock()
            .await
            .snapshot_tasks
            .iter()
            .filter(|(id, _)| *id == snapshot_id)
            .count()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn SnapshotWrite>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let backup = guard.clone();
        Ok(Box::new(MemoryWrite {
            guard,
            backup: Some(backup),
        }))
    }

    async fn find_latest_snapshot(
        &self,
        filter: BucketFilter,
    ) -> Result<Option<SnapshotRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.snapshots_newest_first(filter).first().map(|s| (*s).clone()))
    }

    async fn find_previous_snapshot(
        &self,
        filter: BucketFilter,
        before: DateTime<Utc>,
    ) -> Result<Option<SnapshotRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots_newest_first(filter)
            .into_iter()
            .find(|s| s.captured_at < before)
            .cloned())
    }

    async fn find_projects(&self, filter: BucketFilter) -> Result<Vec<ProjectRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut projects: Vec<ProjectRecord> = state
            .projects
            .iter()
            .filter(|p| filter.matches(p.bucket))
            .cloned()
            .collect();
        projects.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(projects)
    }

    async fn find_snapshot_tasks(
        &self,
        snapshot_id: Uuid,
        project_ids: &[Uuid],
    ) -> Result<Vec<SnapshotTaskRecord>, StoreError> {
        let state = self.state.lock().await;
        let rows = state
            .snapshot_tasks
            .iter()
            .filter(|(id, _)| *id == snapshot_id)
            .filter_map(|(id, row)| {
                let task = state.tasks.iter().find(|t| t.id == row.task_id)?;
                let project_id = task.project_id?;
                project_ids.contains(&project_id).then(|| SnapshotTaskRecord {
                    snapshot_id: *id,
                    task_id: row.task_id,
                    project_id: Some(project_id),
                    status: row.status.clone(),
                    due_date: row.due_date,
                    nominal_estimate_min: row.nominal_estimate_min,
                    tags: row.tags.clone(),
                })
            })
            .collect();
        Ok(rows)
    }

    async fn find_metric_by_day(&self, day: NaiveDate) -> Result<Option<MetricDaily>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.metrics.iter().find(|m| m.day == day).cloned())
    }

    async fn find_recent_metrics(&self, limit: usize) -> Result<Vec<MetricDaily>, StoreError> {
        let state = self.state.lock().await;
        let mut metrics = state.metrics.clone();
        metrics.sort_by(|a, b| b.day.cmp(&a.day));
        metrics.truncate(limit);
        Ok(metrics)
    }
}

/// Holds the store lock for the whole unit of work; restores the prior state on drop
/// unless committed.
pub struct MemoryWrite {
    guard: OwnedMutexGuard<MemoryState>,
    backup: Option<MemoryState>,
}

impl Drop for MemoryWrite {
    fn drop(&mut self) {
        if let Some(backup) = self.backup.take() {
            *self.guard = backup;
        }
    }
}

#[async_trait]
impl SnapshotWrite for MemoryWrite {
    async fn upsert_project(
        &mut self,
        project: &NormalizedProject,
    ) -> Result<ProjectRecord, StoreError> {
        let now = Utc::now();
        let state = &mut *self.guard;
        if let Some(existing) = state.projects.iter_mut().find(|p| {
            p.external_type == project.external_type && p.external_id == project.external_id
        }) {
            existing.name = project.name.clone();
            existing.bucket = project.bucket;
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let record = ProjectRecord {
            id: Uuid::new_v4(),
            external_type: project.external_type.clone(),
            external_id: project.external_id.clone(),
            name: project.name.clone(),
            bucket: project.bucket,
            created_at: now,
            updated_at: now,
        };
        state.projects.push(record.clone());
        Ok(record)
    }

    async fn upsert_task(
        &mut self,
        task: &NormalizedTask,
        project_id: Option<Uuid>,
    ) -> Result<TaskRecord, StoreError> {
        let now = Utc::now();
        let state = &mut *self.guard;
        if let Some(existing) = state
            .tasks
            .iter_mut()
            .find(|t| t.external_id == task.external_id)
        {
            if project_id.is_some() {
                existing.project_id = project_id;
            }
            existing.title = task.title.clone();
            existing.status = task.status.clone();
            existing.tags = task.tags.clone();
            existing.due_date = task.due_at;
            existing.nominal_estimate_min = task.nominal_estimate_min;
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let record = TaskRecord {
            id: Uuid::new_v4(),
            external_id: task.external_id.clone(),
            project_id,
            title: task.title.clone(),
            status: task.status.clone(),
            tags: task.tags.clone(),
            due_date: task.due_at,
            nominal_estimate_min: task.nominal_estimate_min,
            updated_at: now,
        };
        state.tasks.push(record.clone());
        Ok(record)
    }

    async fn create_snapshot(&mut self, snapshot: &NewSnapshot) -> Result<SnapshotRecord, StoreError> {
        let record = SnapshotRecord {
            id: Uuid::new_v4(),
            source: snapshot.source.clone(),
            project_id: snapshot.project_id,
            captured_at: snapshot.captured_at,
        };
        self.guard
            .snapshots
            .push((record.clone(), snapshot.raw.clone()));
        Ok(record)
    }

    async fn insert_snapshot_tasks(
        &mut self,
        snapshot_id: Uuid,
        rows: &[SnapshotTaskRow],
    ) -> Result<u64, StoreError> {
        let state = &mut *self.guard;
        if state.fail_snapshot_tasks {
            return Err(StoreError::Corrupt("snapshot task insert rejected".to_string()));
        }
        let mut inserted = 0u64;
        for row in rows {
            let exists = state
                .snapshot_tasks
                .iter()
                .any(|(id, r)| *id == snapshot_id && r.task_id == row.task_id);
            if !exists {
                state.snapshot_tasks.push((snapshot_id, row.clone()));
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.backup = None;
        Ok(())
    }
}
