//! Remote workspace API, task pagination, payload normalization and webhook signatures.

pub mod api;
pub mod fixtures;
pub mod normalizer;
pub mod pagination;
pub mod types;
pub mod webhook;

pub use api::{ClickUpApi, WorkspaceApi};
pub use fixtures::{load_list_fixture, ListFixture};
pub use normalizer::{normalize, normalize_at, normalize_task};
pub use pagination::{fetch_all_pages, fetch_all_tasks, Page, MAX_TASK_PAGES};
pub use types::{
    ClickUpFolder, ClickUpList, ClickUpSpace, ClickUpTeam, CreateTaskInput, ListPayload,
    TasksPage, UpdateTaskInput,
};
pub use webhook::{verify_clickup_signature, verify_github_signature};

pub const CRATE_NAME: &str = "onefocus-adapters";
