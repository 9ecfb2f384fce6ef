//! Core domain model for the OneFocus workspace mirror.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const CRATE_NAME: &str = "onefocus-core";

/// Snapshot source tag for captures taken from the remote workspace API.
pub const SOURCE_CLICKUP: &str = "clickup";

/// Remote resource kind a project is mirrored from.
pub const EXTERNAL_TYPE_LIST: &str = "list";

/// Fixed three-way project classification used to scope crawls and aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    PrimaryWork,
    PrimaryPersonal,
    #[default]
    EverythingElse,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [
        Bucket::PrimaryWork,
        Bucket::PrimaryPersonal,
        Bucket::EverythingElse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::PrimaryWork => "primary_work",
            Bucket::PrimaryPersonal => "primary_personal",
            Bucket::EverythingElse => "everything_else",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBucket(pub String);

impl fmt::Display for UnknownBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown bucket `{}` (expected primary_work, primary_personal, everything_else or all)",
            self.0
        )
    }
}

impl std::error::Error for UnknownBucket {}

impl FromStr for Bucket {
    type Err = UnknownBucket;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Bucket::ALL
            .into_iter()
            .find(|b| b.as_str() == s.trim())
            .ok_or_else(|| UnknownBucket(s.to_string()))
    }
}

/// Bucket selection for reads: `all` means no filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BucketFilter {
    #[default]
    All,
    Only(Bucket),
}

impl BucketFilter {
    pub fn bucket(&self) -> Option<Bucket> {
        match self {
            BucketFilter::All => None,
            BucketFilter::Only(bucket) => Some(*bucket),
        }
    }

    pub fn matches(&self, bucket: Bucket) -> bool {
        self.bucket().map_or(true, |b| b == bucket)
    }
}

impl fmt::Display for BucketFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketFilter::All => f.write_str("all"),
            BucketFilter::Only(bucket) => bucket.fmt(f),
        }
    }
}

impl FromStr for BucketFilter {
    type Err = UnknownBucket;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(BucketFilter::All)
        } else {
            s.parse().map(BucketFilter::Only)
        }
    }
}

impl TryFrom<String> for BucketFilter {
    type Error = UnknownBucket;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BucketFilter> for String {
    fn from(value: BucketFilter) -> Self {
        value.to_string()
    }
}

impl From<Bucket> for BucketFilter {
    fn from(value: Bucket) -> Self {
        BucketFilter::Only(value)
    }
}

/// Closed classification every error in the workspace maps onto, so callers
/// branch on kind instead of on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 429, 5xx or transport failure; worth retrying later.
    Transient,
    /// Any other remote rejection or local failure; retrying will not help.
    NonRetryable,
    /// Missing required configuration or a runaway remote; aborts the operation.
    FatalPrecondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedProject {
    pub external_type: String,
    pub external_id: String,
    pub name: String,
    pub bucket: Bucket,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTask {
    pub external_id: String,
    pub title: String,
    pub status: String,
    pub tags: Vec<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub nominal_estimate_min: Option<i32>,
}

/// Canonical shape of one list capture, handed from the normalizer to the writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSnapshot {
    pub source: String,
    pub captured_at: DateTime<Utc>,
    pub project: NormalizedProject,
    pub tasks: Vec<NormalizedTask>,
    /// Untouched remote payload kept for audit/replay.
    pub raw: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub external_type: String,
    pub external_id: String,
    pub name: String,
    pub bucket: Bucket,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub external_id: String,
    pub project_id: Option<Uuid>,
    pub title: String,
    pub status: String,
    pub tags: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub nominal_estimate_min: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

/// Input for an append-only snapshot row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSnapshot {
    pub source: String,
    pub project_id: Option<Uuid>,
    pub captured_at: DateTime<Utc>,
    pub raw: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: Uuid,
    pub source: String,
    pub project_id: Option<Uuid>,
    pub captured_at: DateTime<Utc>,
}

/// Task facts as observed at capture time, frozen onto one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTaskRow {
    pub task_id: Uuid,
    pub status: String,
    pub due_date: Option<DateTime<Utc>>,
    pub nominal_estimate_min: Option<i32>,
    pub tags: Vec<String>,
}

/// A stored snapshot-task row joined with the owning task's project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTaskRecord {
    pub snapshot_id: Uuid,
    pub task_id: Uuid,
    pub project_id: Option<Uuid>,
    pub status: String,
    pub due_date: Option<DateTime<Utc>>,
    pub nominal_estimate_min: Option<i32>,
    pub tags: Vec<String>,
}

/// Precomputed productivity metrics for one UTC day. Produced elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDaily {
    pub day: NaiveDate,
    pub score: Option<f64>,
    pub by_project: Option<JsonValue>,
    pub by_tag: Option<JsonValue>,
    pub by_dow: Option<JsonValue>,
    pub sample_counts: Option<JsonValue>,
    pub confidence: Option<JsonValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub project_id: Uuid,
    pub snapshot_id: Uuid,
    pub task_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFailure {
    pub list_id: String,
    pub error: String,
}

/// Report of one full crawl. `succeeded + failed == total_lists` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSnapshotResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_lists: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<ListFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskCode {
    NoSnapshot,
    NoProjects,
    OverdueIncreasing,
    ManyMissingEstimates,
    DueSoonSpike,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskItem {
    pub code: RiskCode,
    pub severity: Severity,
    pub message: String,
}

impl RiskItem {
    pub fn new(code: RiskCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub source: String,
}

impl From<&SnapshotRecord> for SnapshotRef {
    fn from(value: &SnapshotRecord) -> Self {
        Self {
            id: value.id,
            captured_at: value.captured_at,
            source: value.source.clone(),
        }
    }
}

/// The five per-snapshot task counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskCounters {
    pub tasks_open: u32,
    pub tasks_closed: u32,
    pub overdue: u32,
    pub due_soon: u32,
    pub missing_estimate: u32,
}

impl TaskCounters {
    pub fn add(&mut self, other: &TaskCounters) {
        self.tasks_open += other.tasks_open;
        self.tasks_closed += other.tasks_closed;
        self.overdue += other.overdue;
        self.due_soon += other.due_soon;
        self.missing_estimate += other.missing_estimate;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_id: Uuid,
    pub name: String,
    pub bucket: Bucket,
    #[serde(flatten)]
    pub counters: TaskCounters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub projects: u32,
    #[serde(flatten)]
    pub counters: TaskCounters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Deltas {
    pub tasks_open_delta: i64,
    pub overdue_delta: i64,
    pub due_soon_delta: i64,
    pub missing_estimate_delta: i64,
}

impl Deltas {
    /// `latest - previous` for the counters that drive risk rules.
    pub fn between(latest: &TaskCounters, previous: &TaskCounters) -> Self {
        let diff = |a: u32, b: u32| i64::from(a) - i64::from(b);
        Self {
            tasks_open_delta: diff(latest.tasks_open, previous.tasks_open),
            overdue_delta: diff(latest.overdue, previous.overdue),
            due_soon_delta: diff(latest.due_soon, previous.due_soon),
            missing_estimate_delta: diff(latest.missing_estimate, previous.missing_estimate),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub day: NaiveDate,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductivityTrend {
    pub last_n: usize,
    /// Oldest to newest.
    pub values: Vec<TrendPoint>,
    pub delta_from_first_to_last: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductivityCapsule {
    pub score: Option<f64>,
    pub trend: ProductivityTrend,
    pub by_project: Option<JsonValue>,
    pub by_tag: Option<JsonValue>,
    pub by_dow: Option<JsonValue>,
    pub sample_counts: Option<JsonValue>,
    pub confidence: Option<JsonValue>,
}

/// Aggregated, delta'd, risk-annotated summary of the latest snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPack {
    pub generated_at: DateTime<Utc>,
    pub bucket: BucketFilter,
    pub latest_snapshot: Option<SnapshotRef>,
    pub previous_snapshot: Option<SnapshotRef>,
    pub projects: Vec<ProjectSummary>,
    pub totals: Totals,
    pub deltas: Deltas,
    pub risks: Vec<RiskItem>,
    pub productivity: Option<ProductivityCapsule>,
}

impl ContextPack {
    /// A pack with zeroed totals carrying a single explanatory risk.
    pub fn empty(generated_at: DateTime<Utc>, bucket: BucketFilter, risk: RiskItem) -> Self {
        Self {
            generated_at,
            bucket,
            latest_snapshot: None,
            previous_snapshot: None,
            projects: Vec::new(),
            totals: Totals::default(),
            deltas: Deltas::default(),
            risks: vec![risk],
            productivity: None,
        }
    }
}
