//! Persists one normalized snapshot as a single unit of work.

use std::sync::Arc;

use onefocus_core::{NewSnapshot, NormalizedSnapshot, PersistedSnapshot, SnapshotTaskRow};
use onefocus_storage::SnapshotStore;
use tracing::debug;

use crate::error::SyncError;

#[derive(Clone)]
pub struct SnapshotWriter {
    store: Arc<dyn SnapshotStore>,
}

impl SnapshotWriter {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// Project upsert, task upserts, snapshot row, then frozen task rows. Nothing is
    /// visible unless all four steps succeed.
    #[tracing::instrument(
        skip_all,
        fields(list_id = %snapshot.project.external_id, tasks = snapshot.tasks.len())
    )]
    pub async fn persist(&self, snapshot: &NormalizedSnapshot) -> Result<PersistedSnapshot, SyncError> {
        let mut tx = self.store.begin().await?;

        let project = tx.upsert_project(&snapshot.project).await?;

        let mut rows = Vec::with_capacity(snapshot.tasks.len());
        for task in &snapshot.tasks {
            let record = tx.upsert_task(task, Some(project.id)).await?;
            rows.push(SnapshotTaskRow {
                task_id: record.id,
                status: task.status.clone(),
                due_date: task.due_at,
                nominal_estimate_min: task.nominal_estimate_min,
                tags: task.tags.clone(),
            });
        }

        let created = tx
            .create_snapshot(&NewSnapshot {
                source: snapshot.source.clone(),
                project_id: Some(project.id),
                captured_at: snapshot.captured_at,
                raw: snapshot.raw.clone(),
            })
            .await?;

        let inserted = tx.insert_snapshot_tasks(created.id, &rows).await?;
        tx.commit().await?;
        debug!(snapshot_id = %created.id, inserted, "snapshot persisted");

        Ok(PersistedSnapshot {
            project_id: project.id,
            snapshot_id: created.id,
            task_count: snapshot.tasks.len(),
        })
    }
}
