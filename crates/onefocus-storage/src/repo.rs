//! Typed repository operations over the relational store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use onefocus_core::{
    BucketFilter, ErrorKind, MetricDaily, NewSnapshot, NormalizedProject, NormalizedTask,
    ProjectRecord, SnapshotRecord, SnapshotTaskRecord, SnapshotTaskRow, TaskRecord,
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error while {context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn database(context: &'static str, source: sqlx::Error) -> Self {
        StoreError::Database { context, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Database {
                source: sqlx::Error::PoolTimedOut | sqlx::Error::Io(_),
                ..
            } => ErrorKind::Transient,
            _ => ErrorKind::NonRetryable,
        }
    }
}

/// Read side of the store plus the entry point for an atomic write unit.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Opens a unit of work. Dropping it without [`SnapshotWrite::commit`] discards every write.
    async fn begin(&self) -> Result<Box<dyn SnapshotWrite>, StoreError>;

    async fn find_latest_snapshot(
        &self,
        filter: BucketFilter,
    ) -> Result<Option<SnapshotRecord>, StoreError>;

    /// Most recent snapshot captured strictly before `before`.
    async fn find_previous_snapshot(
        &self,
        filter: BucketFilter,
        before: DateTime<Utc>,
    ) -> Result<Option<SnapshotRecord>, StoreError>;

    /// Projects in the filter, most recently updated first.
    async fn find_projects(&self, filter: BucketFilter) -> Result<Vec<ProjectRecord>, StoreError>;

    /// Frozen rows of one snapshot whose task currently belongs to one of `project_ids`.
    async fn find_snapshot_tasks(
        &self,
        snapshot_id: Uuid,
        project_ids: &[Uuid],
    ) -> Result<Vec<SnapshotTaskRecord>, StoreError>;

    async fn find_metric_by_day(&self, day: NaiveDate) -> Result<Option<MetricDaily>, StoreError>;

    /// Newest first.
    async fn find_recent_metrics(&self, limit: usize) -> Result<Vec<MetricDaily>, StoreError>;
}

#[async_trait]
pub trait SnapshotWrite: Send {
    /// Keyed by `(external_type, external_id)`; updates name and bucket when present.
    async fn upsert_project(&mut self, project: &NormalizedProject)
        -> Result<ProjectRecord, StoreError>;

    /// Keyed by external id with a full field overwrite. The project link is only
    /// replaced when `project_id` is known.
    async fn upsert_task(
        &mut self,
        task: &NormalizedTask,
        project_id: Option<Uuid>,
    ) -> Result<TaskRecord, StoreError>;

    async fn create_snapshot(&mut self, snapshot: &NewSnapshot) -> Result<SnapshotRecord, StoreError>;

    /// Inserts frozen rows, silently skipping `(snapshot_id, task_id)` pairs that already exist.
    /// Returns the number of rows actually inserted.
    async fn insert_snapshot_tasks(
        &mut self,
        snapshot_id: Uuid,
        rows: &[SnapshotTaskRow],
    ) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
