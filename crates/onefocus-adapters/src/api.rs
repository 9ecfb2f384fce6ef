//! Remote workspace endpoints, reached only through [`RetryingClient`].

use async_trait::async_trait;
use onefocus_storage::{ApiError, ClientConfig, HttpMethod, RetryingClient};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};

use crate::types::{
    ClickUpFolder, ClickUpList, ClickUpSpace, ClickUpTeam, CreateTaskInput, ListPayload,
    TasksPage, UpdateTaskInput,
};

/// The read surface the crawler and snapshot service depend on.
#[async_trait]
pub trait WorkspaceApi: Send + Sync {
    async fn teams(&self) -> Result<Vec<ClickUpTeam>, ApiError>;
    async fn spaces(&self, team_id: &str) -> Result<Vec<ClickUpSpace>, ApiError>;
    async fn folders(&self, space_id: &str) -> Result<Vec<ClickUpFolder>, ApiError>;
    async fn space_lists(&self, space_id: &str) -> Result<Vec<ClickUpList>, ApiError>;
    async fn folder_lists(&self, folder_id: &str) -> Result<Vec<ClickUpList>, ApiError>;
    async fn list(&self, list_id: &str) -> Result<ListPayload, ApiError>;
    /// Zero-based page of a list's tasks, closed tasks and subtasks included.
    async fn tasks_page(&self, list_id: &str, page: u32) -> Result<TasksPage, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ClickUpApi {
    client: RetryingClient,
}

fn not_archived() -> [(&'static str, Option<String>); 1] {
    [("archived", Some("false".to_string()))]
}

/// Accepts either a bare array or an object wrapping the array under `key`.
fn unwrap_collection<T: DeserializeOwned>(
    path: &str,
    key: &str,
    value: JsonValue,
) -> Result<Vec<T>, ApiError> {
    let items = match value {
        JsonValue::Array(_) => value,
        JsonValue::Object(mut map) => map.remove(key).ok_or_else(|| ApiError::Decode {
            path: path.to_string(),
            message: format!("response has no `{key}` field"),
        })?,
        other => {
            return Err(ApiError::Decode {
                path: path.to_string(),
                message: format!("expected a {key} collection, got {other}"),
            })
        }
    };
    serde_json::from_value(items).map_err(|e| ApiError::Decode {
        path: path.to_string(),
        message: e.to_string(),
    })
}

/// A task page arrives as `{"tasks": [...], "last_page": ..}` or as a bare array.
/// Missing or null `tasks` reads as an empty page.
fn tasks_page_from(path: &str, value: JsonValue) -> Result<TasksPage, ApiError> {
    let decode_err = |message: String| ApiError::Decode {
        path: path.to_string(),
        message,
    };
    match value {
        JsonValue::Array(tasks) => Ok(TasksPage {
            tasks,
            last_page: None,
        }),
        JsonValue::Object(mut map) => {
            let last_page = map.get("last_page").and_then(JsonValue::as_bool);
            let tasks = match map.remove("tasks") {
                None | Some(JsonValue::Null) => Vec::new(),
                Some(JsonValue::Array(tasks)) => tasks,
                Some(other) => return Err(decode_err(format!("expected a tasks array, got {other}"))),
            };
            Ok(TasksPage { tasks, last_page })
        }
        other => Err(decode_err(format!("expected a tasks page, got {other}"))),
    }
}

impl ClickUpApi {
    pub fn new(client: RetryingClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: ClientConfig) -> Result<Self, ApiError> {
        Ok(Self::new(RetryingClient::with_reqwest(config)?))
    }

    pub fn client(&self) -> &RetryingClient {
        &self.client
    }

    async fn get_collection<T: DeserializeOwned>(
        &self,
        path: &str,
        key: &str,
    ) -> Result<Vec<T>, ApiError> {
        let value = self
            .client
            .request(HttpMethod::Get, path, &not_archived(), None)
            .await?;
        unwrap_collection(path, key, value)
    }

    /// Returns the created task as sent back by the remote.
    pub async fn create_task(
        &self,
        list_id: &str,
        input: &CreateTaskInput,
    ) -> Result<JsonValue, ApiError> {
        let path = format!("/list/{list_id}/task");
        let body = to_body(&path, input)?;
        self.client
            .request(HttpMethod::Post, &path, &[], Some(&body))
            .await
    }

    pub async fn update_task(
        &self,
        task_id: &str,
        input: &UpdateTaskInput,
    ) -> Result<JsonValue, ApiError> {
        let path = format!("/task/{task_id}");
        let body = to_body(&path, input)?;
        self.client
            .request(HttpMethod::Patch, &path, &[], Some(&body))
            .await
    }

    pub async fn add_comment(&self, task_id: &str, comment_text: &str) -> Result<JsonValue, ApiError> {
        let path = format!("/task/{task_id}/comment");
        let body = json!({ "comment_text": comment_text });
        self.client
            .request(HttpMethod::Post, &path, &[], Some(&body))
            .await
    }
}

fn to_body<T: serde::Serialize>(path: &str, input: &T) -> Result<JsonValue, ApiError> {
    serde_json::to_value(input).map_err(|e| ApiError::Decode {
        path: path.to_string(),
        message: format!("serializing request body: {e}"),
    })
}

#[async_trait]
impl WorkspaceApi for ClickUpApi {
    async fn teams(&self) -> Result<Vec<ClickUpTeam>, ApiError> {
        let value = self.client.request(HttpMethod::Get, "/team", &[], None).await?;
        unwrap_collection("/team", "teams", value)
    }

    async fn spaces(&self, team_id: &str) -> Result<Vec<ClickUpSpace>, ApiError> {
        self.get_collection(&format!("/team/{team_id}/space"), "spaces")
            .await
    }

    async fn folders(&self, space_id: &str) -> Result<Vec<ClickUpFolder>, ApiError> {
        self.get_collection(&format!("/space/{space_id}/folder"), "folders")
            .await
    }

    async fn space_lists(&self, space_id: &str) -> Result<Vec<ClickUpList>, ApiError> {
        self.get_collection(&format!("/space/{space_id}/list"), "lists")
            .await
    }

    async fn folder_lists(&self, folder_id: &str) -> Result<Vec<ClickUpList>, ApiError> {
        self.get_collection(&format!("/folder/{folder_id}/list"), "lists")
            .await
    }

    async fn list(&self, list_id: &str) -> Result<ListPayload, ApiError> {
        self.client
            .request_json(HttpMethod::Get, &format!("/list/{list_id}"), &[], None)
            .await
    }

    async fn tasks_page(&self, list_id: &str, page: u32) -> Result<TasksPage, ApiError> {
        let query = [
            ("page", Some(page.to_string())),
            ("include_closed", Some("true".to_string())),
            ("subtasks", Some("true".to_string())),
        ];
        let path = format!("/list/{list_id}/task");
        let value = self
            .client
            .request(HttpMethod::Get, &path, &query, None)
            .await?;
        tasks_page_from(&path, value)
    }
}
