//! Snapshot orchestration: single-list capture, workspace crawl, context packs and
//! the optional cron schedule.

pub mod config;
pub mod context_pack;
pub mod crawler;
pub mod error;
#[cfg(test)]
mod fakes;
pub mod pool;
pub mod writer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use onefocus_adapters::{fetch_all_tasks, normalize, ClickUpApi, WorkspaceApi};
use onefocus_core::{
    Bucket, BucketFilter, ContextPack, NormalizedSnapshot, PersistedSnapshot,
    WorkspaceSnapshotResult,
};
use onefocus_storage::{PgStore, SnapshotStore};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::config::DEFAULT_DB_POOL_SIZE;

pub use config::{BucketRegistry, SyncConfig};
pub use context_pack::{ContextPackBuilder, ContextPackOptions};
pub use crawler::{ListSnapshotter, WorkspaceCrawler};
pub use error::SyncError;
pub use pool::WorkerPool;
pub use writer::SnapshotWriter;

pub const CRATE_NAME: &str = "onefocus-sync";

#[derive(Debug, Clone, Serialize)]
pub struct ListSnapshotOutcome {
    pub normalized: NormalizedSnapshot,
    pub persisted: PersistedSnapshot,
}

/// Fetch, normalize and persist one list.
#[derive(Clone)]
pub struct SnapshotService {
    api: Arc<dyn WorkspaceApi>,
    writer: SnapshotWriter,
    buckets: BucketRegistry,
}

impl SnapshotService {
    pub fn new(api: Arc<dyn WorkspaceApi>, writer: SnapshotWriter, buckets: BucketRegistry) -> Self {
        Self {
            api,
            writer,
            buckets,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn snapshot_one_list(
        &self,
        list_id: &str,
        bucket: Option<Bucket>,
    ) -> Result<ListSnapshotOutcome, SyncError> {
        let list = self.api.list(list_id).await?;
        let raw_tasks = fetch_all_tasks(self.api.as_ref(), list_id).await?;
        let bucket = self.buckets.resolve(list_id, bucket);

        let normalized = normalize(&list, &raw_tasks, Some(bucket));
        let persisted = self.writer.persist(&normalized).await?;
        info!(
            snapshot_id = %persisted.snapshot_id,
            tasks = persisted.task_count,
            %bucket,
            "list snapshot stored"
        );
        Ok(ListSnapshotOutcome {
            normalized,
            persisted,
        })
    }
}

#[async_trait]
impl ListSnapshotter for SnapshotService {
    async fn snapshot_list(&self, list_id: &str) -> Result<(), SyncError> {
        self.snapshot_one_list(list_id, None).await.map(|_| ())
    }
}

/// Resets the overlap flag when the crawl ends, however it ends.
struct CrawlGuard<'a>(&'a AtomicBool);

impl Drop for CrawlGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncPipeline {
    config: SyncConfig,
    store: Arc<dyn SnapshotStore>,
    api: Option<Arc<dyn WorkspaceApi>>,
    buckets: BucketRegistry,
    crawl_running: AtomicBool,
}

impl SyncPipeline {
    /// Postgres-backed pipeline. The pool connects on first use; the remote client is
    /// only built when a token is configured.
    pub fn new(config: SyncConfig) -> Result<Self> {
        let store = PgStore::connect_lazy(&config.database_url, DEFAULT_DB_POOL_SIZE)
            .context("configuring database pool")?;
        let api: Option<Arc<dyn WorkspaceApi>> = match &config.api_token {
            Some(_) => Some(Arc::new(
                ClickUpApi::from_config(config.client_config()).context("building API client")?,
            )),
            None => None,
        };
        let buckets = config.load_bucket_registry()?;
        Ok(Self::with_parts(config, Arc::new(store), api, buckets))
    }

    pub fn with_parts(
        config: SyncConfig,
        store: Arc<dyn SnapshotStore>,
        api: Option<Arc<dyn WorkspaceApi>>,
        buckets: BucketRegistry,
    ) -> Self {
        Self {
            config,
            store,
            api,
            buckets,
            crawl_running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn api(&self) -> Result<Arc<dyn WorkspaceApi>, SyncError> {
        self.api.clone().ok_or_else(|| {
            SyncError::Precondition("an API token is required (CLICKUP_API_TOKEN)".to_string())
        })
    }

    pub fn snapshot_service(&self) -> Result<SnapshotService, SyncError> {
        Ok(SnapshotService::new(
            self.api()?,
            SnapshotWriter::new(self.store.clone()),
            self.buckets.clone(),
        ))
    }

    pub async fn snapshot_one_list(
        &self,
        list_id: &str,
        bucket: Option<Bucket>,
    ) -> Result<ListSnapshotOutcome, SyncError> {
        self.snapshot_service()?
            .snapshot_one_list(list_id, bucket)
            .await
    }

    pub async fn snapshot_workspace(&self) -> Result<WorkspaceSnapshotResult, SyncError> {
        let service = self.snapshot_service()?;
        let crawler = WorkspaceCrawler::new(
            self.api()?,
            self.config.workspace_id.clone(),
            self.config.snapshot_concurrency,
        );
        crawler.snapshot_workspace(&service).await
    }

    /// Options from config, evaluated at `now`.
    pub fn context_options(&self, now: DateTime<Utc>) -> ContextPackOptions {
        ContextPackOptions {
            now,
            due_soon_days: self.config.due_soon_days,
            lookback: self.config.lookback,
        }
    }

    pub async fn build_context_pack(
        &self,
        filter: BucketFilter,
        options: ContextPackOptions,
    ) -> Result<ContextPack, SyncError> {
        ContextPackBuilder::new(self.store.clone())
            .build(filter, options)
            .await
    }

    /// One scheduled crawl. Skips the tick while a previous crawl is still running and
    /// logs failures instead of returning them.
    pub async fn run_scheduled_crawl(&self) -> Option<WorkspaceSnapshotResult> {
        if self.crawl_running.swap(true, Ordering::SeqCst) {
            warn!("previous workspace crawl still running; skipping this tick");
            return None;
        }
        let _guard = CrawlGuard(&self.crawl_running);

        match self.snapshot_workspace().await {
            Ok(report) => {
                info!(
                    total = report.total_lists,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    "scheduled crawl finished"
                );
                Some(report)
            }
            Err(err) => {
                error!(error = %err, kind = ?err.kind(), "scheduled crawl failed");
                None
            }
        }
    }

    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let timezone = self.config.snapshot_timezone()?;
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.snapshot_cron.clone();
        let pipeline = Arc::clone(self);
        let job = Job::new_async_tz(cron.as_str(), timezone, move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                pipeline.run_scheduled_crawl().await;
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        info!(%cron, %timezone, "snapshot schedule registered");
        Ok(Some(sched))
    }
}

pub fn pipeline_from_env() -> Result<SyncPipeline> {
    SyncPipeline::new(SyncConfig::from_env())
}

pub async fn snapshot_workspace_from_env() -> Result<WorkspaceSnapshotResult> {
    Ok(pipeline_from_env()?.snapshot_workspace().await?)
}

/// Connects eagerly and applies the bootstrap schema.
pub async fn init_schema_from_env() -> Result<()> {
    let config = SyncConfig::from_env();
    let store = PgStore::connect(&config.database_url, DEFAULT_DB_POOL_SIZE)
        .await
        .context("connecting to database")?;
    store.ensure_schema().await.context("applying schema")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeWorkspace;
    use chrono::TimeZone;
    use onefocus_core::{ErrorKind, RiskCode};
    use onefocus_storage::memory::MemoryStore;
    use serde_json::json;

    fn config(workspace_id: Option<&str>) -> SyncConfig {
        let mut config = SyncConfig::from_lookup(|_| None);
        config.workspace_id = workspace_id.map(str::to_string);
        config
    }

    fn workspace() -> FakeWorkspace {
        FakeWorkspace::default()
            .with_space("S1")
            .with_space_list("S1", "L1")
            .with_space_list("S1", "L2")
            .with_space_list("S1", "L-missing")
            .with_tasks(
                "L1",
                "Launch",
                vec![
                    vec![json!({"id": "a", "name": "A", "status": "open"})],
                    vec![json!({"id": "b", "name": "B", "status": {"status": "done"}})],
                ],
            )
            .with_tasks("L2", "Errands", vec![vec![json!({"id": "c", "tags": ["home"]})]])
    }

    fn pipeline(
        store: Arc<MemoryStore>,
        api: Arc<FakeWorkspace>,
        buckets: BucketRegistry,
    ) -> SyncPipeline {
        SyncPipeline::with_parts(config(Some("T1")), store, Some(api), buckets)
    }

    #[tokio::test]
    async fn one_list_is_fetched_across_pages_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let buckets = BucketRegistry::from_yaml_str("lists:\n  - list_id: L1\n    bucket: primary_work\n").unwrap();
        let pipeline = pipeline(store.clone(), Arc::new(workspace()), buckets);

        let outcome = pipeline.snapshot_one_list("L1", None).await.unwrap();

        assert_eq!(outcome.normalized.tasks.len(), 2);
        assert_eq!(outcome.normalized.project.bucket, Bucket::PrimaryWork);
        assert_eq!(outcome.persisted.task_count, 2);
        assert_eq!(store.snapshot_task_count(outcome.persisted.snapshot_id).await, 2);
        let raw = store.raw_for(outcome.persisted.snapshot_id).await.unwrap();
        assert_eq!(raw["list"], json!({"id": "L1", "name": "Launch"}));
        assert_eq!(raw["tasks"].as_array().map(Vec::len), Some(2));

        let explicit = pipeline
            .snapshot_one_list("L1", Some(Bucket::PrimaryPersonal))
            .await
            .unwrap();
        assert_eq!(explicit.normalized.project.bucket, Bucket::PrimaryPersonal);
    }

    #[tokio::test]
    async fn workspace_crawl_reports_failed_lists_and_keeps_the_rest() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store.clone(), Arc::new(workspace()), BucketRegistry::default());

        let report = pipeline.snapshot_workspace().await.unwrap();

        assert_eq!(report.total_lists, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].list_id, "L-missing");
        assert!(report.failures[0].error.contains("404"));
        assert_eq!(store.snapshots().await.len(), 2);

        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let pack = pipeline
            .build_context_pack(BucketFilter::All, pipeline.context_options(now))
            .await
            .unwrap();
        assert!(pack.latest_snapshot.is_some());
        assert!(pack.risks.iter().all(|r| r.code != RiskCode::NoSnapshot));
    }

    #[tokio::test]
    async fn missing_token_is_a_precondition_failure() {
        let store = Arc::new(MemoryStore::new());
        let pipeline =
            SyncPipeline::with_parts(config(Some("T1")), store, None, BucketRegistry::default());

        let err = pipeline.snapshot_workspace().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FatalPrecondition);
        let err = pipeline.snapshot_one_list("L1", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FatalPrecondition);
    }

    #[tokio::test]
    async fn scheduled_crawl_skips_while_one_is_running() {
        let api = Arc::new(workspace());
        let pipeline = pipeline(Arc::new(MemoryStore::new()), api.clone(), BucketRegistry::default());

        pipeline.crawl_running.store(true, Ordering::SeqCst);
        assert!(pipeline.run_scheduled_crawl().await.is_none());
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);

        pipeline.crawl_running.store(false, Ordering::SeqCst);
        let report = pipeline.run_scheduled_crawl().await.expect("report");
        assert_eq!(report.total_lists, 3);
        assert!(!pipeline.crawl_running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn scheduled_crawl_swallows_errors() {
        let pipeline = SyncPipeline::with_parts(
            config(None),
            Arc::new(MemoryStore::new()),
            Some(Arc::new(workspace())),
            BucketRegistry::default(),
        );
        assert!(pipeline.run_scheduled_crawl().await.is_none());
        assert!(!pipeline.crawl_running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn scheduler_rejects_an_unknown_timezone() {
        let mut config = config(Some("T1"));
        config.scheduler_enabled = true;
        config.snapshot_tz = "Nowhere/Special".to_string();
        let pipeline = Arc::new(SyncPipeline::with_parts(
            config,
            Arc::new(MemoryStore::new()),
            None,
            BucketRegistry::default(),
        ));

        let Err(err) = pipeline.maybe_build_scheduler().await else {
            panic!("an unknown zone must not build a scheduler");
        };
        assert!(err.to_string().contains("Nowhere/Special"));
    }

    #[tokio::test]
    async fn scheduler_is_not_built_when_disabled() {
        let pipeline = Arc::new(SyncPipeline::with_parts(
            config(Some("T1")),
            Arc::new(MemoryStore::new()),
            None,
            BucketRegistry::default(),
        ));
        assert!(pipeline.maybe_build_scheduler().await.unwrap().is_none());
    }
}
