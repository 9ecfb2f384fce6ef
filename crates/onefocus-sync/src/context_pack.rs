//! Read-only aggregation of the latest snapshot into a context pack.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use onefocus_core::{
    BucketFilter, ContextPack, Deltas, MetricDaily, ProductivityCapsule, ProductivityTrend,
    ProjectSummary, RiskCode, RiskItem, Severity, SnapshotRef, SnapshotTaskRecord, TaskCounters,
    Totals, TrendPoint,
};
use onefocus_storage::SnapshotStore;
use uuid::Uuid;

use crate::error::SyncError;

const CLOSED_MARKERS: [&str; 3] = ["done", "closed", "complete"];

const OVERDUE_HIGH_DELTA: i64 = 5;
const MISSING_ESTIMATE_MIN: u32 = 10;
const MISSING_ESTIMATE_HIGH: u32 = 25;
const DUE_SOON_MIN: u32 = 10;
const DUE_SOON_HIGH: u32 = 25;

#[derive(Debug, Clone, Copy)]
pub struct ContextPackOptions {
    pub now: DateTime<Utc>,
    /// Upcoming days, today excluded, that count as "due soon".
    pub due_soon_days: u32,
    /// Number of daily metric rows in the productivity trend.
    pub lookback: usize,
}

impl ContextPackOptions {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            due_soon_days: 7,
            lookback: 5,
        }
    }
}

pub fn is_closed_status(status: &str) -> bool {
    let status = status.to_lowercase();
    CLOSED_MARKERS.iter().any(|marker| status.contains(marker))
}

/// Exclusive upper bound of the due-soon window: start of `now`'s UTC day plus `days + 1`.
/// Saturates at the latest representable instant.
pub fn due_soon_cutoff(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    let start_of_day = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    Duration::try_days(i64::from(days) + 1)
        .and_then(|window| start_of_day.checked_add_signed(window))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn count_row(row: &SnapshotTaskRecord, now: DateTime<Utc>, cutoff: DateTime<Utc>) -> TaskCounters {
    let mut counters = TaskCounters::default();
    if is_closed_status(&row.status) {
        counters.tasks_closed = 1;
        return counters;
    }
    counters.tasks_open = 1;
    if let Some(due) = row.due_date {
        if due < now {
            counters.overdue = 1;
        }
        if due < cutoff {
            counters.due_soon = 1;
        }
    }
    if row.nominal_estimate_min.map_or(true, |min| min <= 0) {
        counters.missing_estimate = 1;
    }
    counters
}

/// Per-project counters for one snapshot's rows. Rows without a project are ignored.
pub fn aggregate(
    rows: &[SnapshotTaskRecord],
    now: DateTime<Utc>,
    cutoff: DateTime<Utc>,
) -> HashMap<Uuid, TaskCounters> {
    let mut by_project: HashMap<Uuid, TaskCounters> = HashMap::new();
    for row in rows {
        let Some(project_id) = row.project_id else {
            continue;
        };
        by_project
            .entry(project_id)
            .or_default()
            .add(&count_row(row, now, cutoff));
    }
    by_project
}

pub fn evaluate_risks(latest: &TaskCounters, deltas: &Deltas) -> Vec<RiskItem> {
    let mut risks = Vec::new();

    if deltas.overdue_delta > 0 {
        let severity = if deltas.overdue_delta >= OVERDUE_HIGH_DELTA {
            Severity::High
        } else {
            Severity::Medium
        };
        risks.push(RiskItem::new(
            RiskCode::OverdueIncreasing,
            severity,
            format!(
                "Overdue tasks increased by {} vs previous snapshot.",
                deltas.overdue_delta
            ),
        ));
    }

    if latest.missing_estimate >= MISSING_ESTIMATE_MIN {
        let severity = if latest.missing_estimate >= MISSING_ESTIMATE_HIGH {
            Severity::High
        } else {
            Severity::Medium
        };
        risks.push(RiskItem::new(
            RiskCode::ManyMissingEstimates,
            severity,
            format!(
                "There are {} open tasks without a nominal estimate.",
                latest.missing_estimate
            ),
        ));
    }

    if deltas.due_soon_delta > 0 && latest.due_soon >= DUE_SOON_MIN {
        let severity = if latest.due_soon >= DUE_SOON_HIGH {
            Severity::High
        } else {
            Severity::Medium
        };
        risks.push(RiskItem::new(
            RiskCode::DueSoonSpike,
            severity,
            format!(
                "Due-soon tasks are {} (delta +{}).",
                latest.due_soon, deltas.due_soon_delta
            ),
        ));
    }

    risks
}

fn trend_from(recent_desc: Vec<MetricDaily>) -> ProductivityTrend {
    let values: Vec<TrendPoint> = recent_desc
        .into_iter()
        .rev()
        .map(|m| TrendPoint {
            day: m.day,
            score: m.score,
        })
        .collect();
    let first = values.first().and_then(|p| p.score);
    let last = values.last().and_then(|p| p.score);
    let delta_from_first_to_last = match (first, last) {
        (Some(first), Some(last)) => Some(last - first),
        _ => None,
    };
    ProductivityTrend {
        last_n: values.len(),
        values,
        delta_from_first_to_last,
    }
}

#[derive(Clone)]
pub struct ContextPackBuilder {
    store: Arc<dyn SnapshotStore>,
}

impl ContextPackBuilder {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, options), fields(now = %options.now))]
    pub async fn build(
        &self,
        filter: BucketFilter,
        options: ContextPackOptions,
    ) -> Result<ContextPack, SyncError> {
        let now = options.now;

        let Some(latest) = self.store.find_latest_snapshot(filter).await? else {
            return Ok(ContextPack::empty(
                now,
                filter,
                RiskItem::new(
                    RiskCode::NoSnapshot,
                    Severity::High,
                    "No snapshots found for selected bucket.",
                ),
            ));
        };
        let previous = self
            .store
            .find_previous_snapshot(filter, latest.captured_at)
            .await?;

        let projects = self.store.find_projects(filter).await?;
        if projects.is_empty() {
            let mut pack = ContextPack::empty(
                now,
                filter,
                RiskItem::new(
                    RiskCode::NoProjects,
                    Severity::High,
                    "No projects found for selected bucket.",
                ),
            );
            pack.latest_snapshot = Some(SnapshotRef::from(&latest));
            pack.previous_snapshot = previous.as_ref().map(SnapshotRef::from);
            return Ok(pack);
        }

        let project_ids: Vec<Uuid> = projects.iter().map(|p| p.id).collect();
        let cutoff = due_soon_cutoff(now, options.due_soon_days);

        let latest_rows = self
            .store
            .find_snapshot_tasks(latest.id, &project_ids)
            .await?;
        let previous_rows = match &previous {
            Some(prev) => self.store.find_snapshot_tasks(prev.id, &project_ids).await?,
            None => Vec::new(),
        };
        let latest_by_project = aggregate(&latest_rows, now, cutoff);
        let previous_by_project = aggregate(&previous_rows, now, cutoff);

        let mut totals = Totals::default();
        let mut previous_totals = TaskCounters::default();
        let summaries: Vec<ProjectSummary> = projects
            .iter()
            .map(|project| {
                let counters = latest_by_project
                    .get(&project.id)
                    .copied()
                    .unwrap_or_default();
                totals.projects += 1;
                totals.counters.add(&counters);
                if let Some(prev) = previous_by_project.get(&project.id) {
                    previous_totals.add(prev);
                }
                ProjectSummary {
                    project_id: project.id,
                    name: project.name.clone(),
                    bucket: project.bucket,
                    counters,
                }
            })
            .collect();

        let deltas = Deltas::between(&totals.counters, &previous_totals);
        let risks = evaluate_risks(&totals.counters, &deltas);
        let productivity = self.productivity(now, options.lookback).await?;

        Ok(ContextPack {
            generated_at: now,
            bucket: filter,
            latest_snapshot: Some(SnapshotRef::from(&latest)),
            previous_snapshot: previous.as_ref().map(SnapshotRef::from),
            projects: summaries,
            totals,
            deltas,
            risks,
            productivity,
        })
    }

    async fn productivity(
        &self,
        now: DateTime<Utc>,
        lookback: usize,
    ) -> Result<Option<ProductivityCapsule>, SyncError> {
        let Some(today) = self.store.find_metric_by_day(now.date_naive()).await? else {
            return Ok(None);
        };
        let recent = self.store.find_recent_metrics(lookback).await?;
        Ok(Some(ProductivityCapsule {
            score: today.score,
            trend: trend_from(recent),
            by_project: today.by_project,
            by_tag: today.by_tag,
            by_dow: today.by_dow,
            sample_counts: today.sample_counts,
            confidence: today.confidence,
        }))
    }
}
