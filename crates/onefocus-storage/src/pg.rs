//! Postgres-backed [`SnapshotStore`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use onefocus_core::{
    Bucket, BucketFilter, MetricDaily, NewSnapshot, NormalizedProject, NormalizedTask,
    ProjectRecord, SnapshotRecord, SnapshotTaskRecord, SnapshotTaskRow, TaskRecord,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;

use crate::repo::{SnapshotStore, SnapshotWrite, StoreError};

const SCHEMA: &str = include_str!("../sql/schema.sql");

// Six binds per row keeps each statement well under the protocol's bind limit.
const SNAPSHOT_TASK_CHUNK: usize = 1000;

const PROJECT_COLUMNS: &str = "id, external_type, external_id, name, bucket, created_at, updated_at";
const TASK_COLUMNS: &str =
    "id, external_id, project_id, title, status, tags, due_date, nominal_estimate_min, updated_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::database("connecting to postgres", e))?;
        Ok(Self { pool })
    }

    /// Builds the pool without touching the network; the first query connects.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)
            .map_err(|e| StoreError::database("configuring postgres pool", e))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates any missing tables and indexes. Safe to run repeatedly.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::database("applying schema", e))?;
        Ok(())
    }
}

fn bucket_from_row(row: &PgRow) -> Result<Bucket, StoreError> {
    let raw: String = row
        .try_get("bucket")
        .map_err(|e| StoreError::database("reading bucket", e))?;
    raw.parse()
        .map_err(|e: onefocus_core::UnknownBucket| StoreError::Corrupt(e.to_string()))
}

fn project_from_row(row: &PgRow) -> Result<ProjectRecord, StoreError> {
    let get = |e| StoreError::database("reading project row", e);
    Ok(ProjectRecord {
        id: row.try_get("id").map_err(get)?,
        external_type: row.try_get("external_type").map_err(get)?,
        external_id: row.try_get("external_id").map_err(get)?,
        name: row.try_get("name").map_err(get)?,
        bucket: bucket_from_row(row)?,
        created_at: row.try_get("created_at").map_err(get)?,
        updated_at: row.try_get("updated_at").map_err(get)?,
    })
}

fn task_from_row(row: &PgRow) -> Result<TaskRecord, StoreError> {
    let get = |e| StoreError::database("reading task row", e);
    Ok(TaskRecord {
        id: row.try_get("id").map_err(get)?,
        external_id: row.try_get("external_id").map_err(get)?,
        project_id: row.try_get("project_id").map_err(get)?,
        title: row.try_get("title").map_err(get)?,
        status: row.try_get("status").map_err(get)?,
        tags: row.try_get("tags").map_err(get)?,
        due_date: row.try_get("due_date").map_err(get)?,
        nominal_estimate_min: row.try_get("nominal_estimate_min").map_err(get)?,
        updated_at: row.try_get("updated_at").map_err(get)?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<SnapshotRecord, StoreError> {
    let get = |e| StoreError::database("reading snapshot row", e);
    Ok(SnapshotRecord {
        id: row.try_get("id").map_err(get)?,
        source: row.try_get("source").map_err(get)?,
        project_id: row.try_get("project_id").map_err(get)?,
        captured_at: row.try_get("captured_at").map_err(get)?,
    })
}

fn snapshot_task_from_row(row: &PgRow) -> Result<SnapshotTaskRecord, StoreError> {
    let get = |e| StoreError::database("reading snapshot task row", e);
    Ok(SnapshotTaskRecord {
        snapshot_id: row.try_get("snapshot_id").map_err(get)?,
        task_id: row.try_get("task_id").map_err(get)?,
        project_id: row.try_get("project_id").map_err(get)?,
        status: row.try_get("status").map_err(get)?,
        due_date: row.try_get("due_date").map_err(get)?,
        nominal_estimate_min: row.try_get("nominal_estimate_min").map_err(get)?,
        tags: row.try_get("tags").map_err(get)?,
    })
}

fn metric_from_row(row: &PgRow) -> Result<MetricDaily, StoreError> {
    let get = |e| StoreError::database("reading metric row", e);
    Ok(MetricDaily {
        day: row.try_get("day").map_err(get)?,
        score: row.try_get("score").map_err(get)?,
        by_project: row.try_get("by_project").map_err(get)?,
        by_tag: row.try_get("by_tag").map_err(get)?,
        by_dow: row.try_get("by_dow").map_err(get)?,
        sample_counts: row.try_get("sample_counts").map_err(get)?,
        confidence: row.try_get("confidence").map_err(get)?,
    })
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn SnapshotWrite>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::database("opening transaction", e))?;
        Ok(Box::new(PgWrite { tx }))
    }

    async fn find_latest_snapshot(
        &self,
        filter: BucketFilter,
    ) -> Result<Option<SnapshotRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT s.id, s.source, s.project_id, s.captured_at
              FROM snapshots s
              LEFT JOIN projects p ON p.id = s.project_id
             WHERE ($1::text IS NULL OR p.bucket = $1)
             ORDER BY s.captured_at DESC
             LIMIT 1
            "#,
        )
        .bind(filter.bucket().map(|b| b.as_str()))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database("finding latest snapshot", e))?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn find_previous_snapshot(
        &self,
        filter: BucketFilter,
        before: DateTime<Utc>,
    ) -> Result<Option<SnapshotRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT s.id, s.source, s.project_id, s.captured_at
              FROM snapshots s
              LEFT JOIN projects p ON p.id = s.project_id
             WHERE ($1::text IS NULL OR p.bucket = $1)
               AND s.captured_at < $2
             ORDER BY s.captured_at DESC
             LIMIT 1
            "#,
        )
        .bind(filter.bucket().map(|b| b.as_str()))
        .bind(before)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database("finding previous snapshot", e))?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn find_projects(&self, filter: BucketFilter) -> Result<Vec<ProjectRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PROJECT_COLUMNS}
              FROM projects
             WHERE ($1::text IS NULL OR bucket = $1)
             ORDER BY updated_at DESC
            "#
        ))
        .bind(filter.bucket().map(|b| b.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::database("listing projects", e))?;
        rows.iter().map(project_from_row).collect()
    }

    async fn find_snapshot_tasks(
        &self,
        snapshot_id: Uuid,
        project_ids: &[Uuid],
    ) -> Result<Vec<SnapshotTaskRecord>, StoreError> {
        if project_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT st.snapshot_id, st.task_id, t.project_id, st.status, st.due_date,
                   st.nominal_estimate_min, st.tags
              FROM snapshot_tasks st
              JOIN tasks t ON t.id = st.task_id
             WHERE st.snapshot_id = $1
               AND t.project_id = ANY($2)
            "#,
        )
        .bind(snapshot_id)
        .bind(project_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::database("loading snapshot tasks", e))?;
        rows.iter().map(snapshot_task_from_row).collect()
    }

    async fn find_metric_by_day(&self, day: NaiveDate) -> Result<Option<MetricDaily>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT day, score, by_project, by_tag, by_dow, sample_counts, confidence
              FROM metric_daily
             WHERE day = $1
            "#,
        )
        .bind(day)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database("loading daily metric", e))?;
        row.as_ref().map(metric_from_row).transpose()
    }

    async fn find_recent_metrics(&self, limit: usize) -> Result<Vec<MetricDaily>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT day, score, by_project, by_tag, by_dow, sample_counts, confidence
              FROM metric_daily
             ORDER BY day DESC
             LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::database("loading recent metrics", e))?;
        rows.iter().map(metric_from_row).collect()
    }
}

/// One snapshot pass inside a single Postgres transaction.
pub struct PgWrite {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SnapshotWrite for PgWrite {
    async fn upsert_project(
        &mut self,
        project: &NormalizedProject,
    ) -> Result<ProjectRecord, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO projects (id, external_type, external_id, name, bucket, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            ON CONFLICT (external_type, external_id) DO UPDATE
               SET name = EXCLUDED.name,
                   bucket = EXCLUDED.bucket,
                   updated_at = NOW()
            RETURNING {PROJECT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&project.external_type)
        .bind(&project.external_id)
        .bind(&project.name)
        .bind(project.bucket.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::database("upserting project", e))?;
        project_from_row(&row)
    }

    async fn upsert_task(
        &mut self,
        task: &NormalizedTask,
        project_id: Option<Uuid>,
    ) -> Result<TaskRecord, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO tasks (id, external_id, project_id, title, status, tags, due_date,
                               nominal_estimate_min, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            ON CONFLICT (external_id) DO UPDATE
               SET project_id = COALESCE(EXCLUDED.project_id, tasks.project_id),
                   title = EXCLUDED.title,
                   status = EXCLUDED.status,
                   tags = EXCLUDED.tags,
                   due_date = EXCLUDED.due_date,
                   nominal_estimate_min = EXCLUDED.nominal_estimate_min,
                   updated_at = NOW()
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&task.external_id)
        .bind(project_id)
        .bind(&task.title)
        .bind(&task.status)
        .bind(&task.tags)
        .bind(task.due_at)
        .bind(task.nominal_estimate_min)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::database("upserting task", e))?;
        task_from_row(&row)
    }

    async fn create_snapshot(&mut self, snapshot: &NewSnapshot) -> Result<SnapshotRecord, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO snapshots (id, source, project_id, captured_at, raw)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, source, project_id, captured_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&snapshot.source)
        .bind(snapshot.project_id)
        .bind(snapshot.captured_at)
        .bind(&snapshot.raw)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::database("creating snapshot", e))?;
        snapshot_from_row(&row)
    }

    async fn insert_snapshot_tasks(
        &mut self,
        snapshot_id: Uuid,
        rows: &[SnapshotTaskRow],
    ) -> Result<u64, StoreError> {
        let mut inserted = 0u64;
        for chunk in rows.chunks(SNAPSHOT_TASK_CHUNK) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO snapshot_tasks (snapshot_id, task_id, status, due_date, nominal_estimate_min, tags) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(snapshot_id)
                    .push_bind(row.task_id)
                    .push_bind(row.status.clone())
                    .push_bind(row.due_date)
                    .push_bind(row.nominal_estimate_min)
                    .push_bind(row.tags.clone());
            });
            builder.push(" ON CONFLICT (snapshot_id, task_id) DO NOTHING");

            let result = builder
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(|e| StoreError::database("inserting snapshot tasks", e))?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::database("committing snapshot", e))
    }
}
