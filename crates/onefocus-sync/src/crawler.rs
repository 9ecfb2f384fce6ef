//! Whole-workspace discovery and per-list fan-out.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use onefocus_adapters::{ClickUpList, WorkspaceApi};
use onefocus_core::{ListFailure, WorkspaceSnapshotResult};
use tracing::{info, warn};

use crate::error::SyncError;
use crate::pool::WorkerPool;

/// What the crawler does with each discovered list.
#[async_trait]
pub trait ListSnapshotter: Send + Sync {
    async fn snapshot_list(&self, list_id: &str) -> Result<(), SyncError>;
}

pub struct WorkspaceCrawler {
    api: Arc<dyn WorkspaceApi>,
    workspace_id: Option<String>,
    pool: WorkerPool,
}

fn push_new(ids: &mut Vec<String>, seen: &mut HashSet<String>, lists: Vec<ClickUpList>) {
    for list in lists {
        if seen.insert(list.id.clone()) {
            ids.push(list.id);
        }
    }
}

impl WorkspaceCrawler {
    pub fn new(api: Arc<dyn WorkspaceApi>, workspace_id: Option<String>, concurrency: usize) -> Self {
        Self {
            api,
            workspace_id,
            pool: WorkerPool::new(concurrency),
        }
    }

    fn require_workspace_id(&self) -> Result<&str, SyncError> {
        self.workspace_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                SyncError::Precondition(
                    "a workspace id is required for a workspace crawl (CLICKUP_WORKSPACE_ID)"
                        .to_string(),
                )
            })
    }

    /// Every list reachable from the workspace's spaces, directly or through a
    /// folder, de-duplicated in first-seen order.
    pub async fn discover_lists(&self, workspace_id: &str) -> Result<Vec<String>, SyncError> {
        let mut ids = Vec::new();
        let mut seen = HashSet::new();

        for space in self.api.spaces(workspace_id).await? {
            let (folders, space_lists) = futures::try_join!(
                self.api.folders(&space.id),
                self.api.space_lists(&space.id)
            )?;
            push_new(&mut ids, &mut seen, space_lists);
            for folder in folders {
                let lists = self.api.folder_lists(&folder.id).await?;
                push_new(&mut ids, &mut seen, lists);
            }
        }
        Ok(ids)
    }

    /// Discovers lists and snapshots each through `snapshotter`. Per-list failures are
    /// collected into the report; only discovery errors abort the run.
    #[tracing::instrument(skip_all, fields(workspace_id = ?self.workspace_id))]
    pub async fn snapshot_workspace(
        &self,
        snapshotter: &dyn ListSnapshotter,
    ) -> Result<WorkspaceSnapshotResult, SyncError> {
        let workspace_id = self.require_workspace_id()?;
        let started_at = Utc::now();

        let list_ids = self.discover_lists(workspace_id).await?;
        info!(lists = list_ids.len(), concurrency = self.pool.concurrency(), "crawling lists");

        let results = self
            .pool
            .run(&list_ids, move |list_id: String| async move {
                snapshotter.snapshot_list(&list_id).await
            })
            .await;

        let failures: Vec<ListFailure> = list_ids
            .iter()
            .zip(results)
            .filter_map(|(list_id, result)| {
                let err = result.err()?;
                warn!(list_id = %list_id, error = %err, kind = ?err.kind(), "list snapshot failed");
                Some(ListFailure {
                    list_id: list_id.clone(),
                    error: err.to_string(),
                })
            })
            .collect();

        let total_lists = list_ids.len();
        let failed = failures.len();
        Ok(WorkspaceSnapshotResult {
            started_at,
            finished_at: Utc::now(),
            total_lists,
            succeeded: total_lists - failed,
            failed,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeWorkspace;
    use onefocus_core::ErrorKind;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSnapshotter {
        fail: HashSet<String>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ListSnapshotter for RecordingSnapshotter {
        async fn snapshot_list(&self, list_id: &str) -> Result<(), SyncError> {
            self.seen.lock().unwrap().push(list_id.to_string());
            if self.fail.contains(list_id) {
                return Err(SyncError::Precondition(format!("cannot snapshot {list_id}")));
            }
            Ok(())
        }
    }

    fn workspace() -> FakeWorkspace {
        FakeWorkspace::default()
            .with_space("S1")
            .with_space("S2")
            .with_space_list("S1", "L1")
            .with_space_list("S1", "L2")
            .with_folder("S1", "F1")
            .with_folder_list("F1", "L3")
            .with_folder_list("F1", "L1")
            .with_space_list("S2", "L4")
    }

    #[tokio::test]
    async fn discovery_walks_spaces_and_folders_without_duplicates() {
        let api = Arc::new(workspace());
        let crawler = WorkspaceCrawler::new(api, Some("T1".into()), 2);
        let ids = crawler.discover_lists("T1").await.unwrap();
        assert_eq!(ids, vec!["L1", "L2", "L3", "L4"]);
    }

    #[tokio::test]
    async fn partial_failures_are_reported_not_raised() {
        let api = Arc::new(workspace());
        let crawler = WorkspaceCrawler::new(api, Some("T1".into()), 2);
        let snapshotter = RecordingSnapshotter {
            fail: ["L2".to_string(), "L4".to_string()].into(),
            ..Default::default()
        };

        let report = crawler.snapshot_workspace(&snapshotter).await.unwrap();

        assert_eq!(report.total_lists, 4);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.succeeded + report.failed, report.total_lists);
        let failed: Vec<&str> = report.failures.iter().map(|f| f.list_id.as_str()).collect();
        assert_eq!(failed, vec!["L2", "L4"]);
        assert!(report.failures[0].error.contains("cannot snapshot L2"));
        assert!(report.finished_at >= report.started_at);

        let mut seen = snapshotter.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["L1", "L2", "L3", "L4"]);
    }

    #[tokio::test]
    async fn missing_workspace_id_fails_before_any_request() {
        let api = Arc::new(workspace());
        let crawler = WorkspaceCrawler::new(api.clone(), Some("  ".into()), 2);

        let err = crawler
            .snapshot_workspace(&RecordingSnapshotter::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::FatalPrecondition);
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn discovery_errors_abort_the_crawl() {
        let api = Arc::new(FakeWorkspace {
            fail_spaces: true,
            ..workspace()
        });
        let crawler = WorkspaceCrawler::new(api, Some("T1".into()), 2);
        let err = crawler
            .snapshot_workspace(&RecordingSnapshotter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Api(_)));
    }
}
