use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use onefocus_adapters::{
    ClickUpFolder, ClickUpList, ClickUpSpace, ClickUpTeam, ListPayload, TasksPage, WorkspaceApi,
};
use onefocus_storage::{ApiError, HttpMethod};
use serde_json::{json, Value as JsonValue};

pub fn list(id: &str, name: &str) -> ClickUpList {
    ClickUpList {
        id: id.to_string(),
        name: name.to_string(),
        archived: false,
        extra: Default::default(),
    }
}

/// In-memory workspace tree with scripted task pages.
#[derive(Default)]
pub struct FakeWorkspace {
    pub spaces: Vec<ClickUpSpace>,
    pub folders: HashMap<String, Vec<ClickUpFolder>>,
    pub space_lists: HashMap<String, Vec<ClickUpList>>,
    pub folder_lists: HashMap<String, Vec<ClickUpList>>,
    pub lists: HashMap<String, ListPayload>,
    pub pages: HashMap<String, Vec<TasksPage>>,
    pub fail_spaces: bool,
    pub calls: AtomicUsize,
}

fn not_found(path: String) -> ApiError {
    ApiError::Http {
        method: HttpMethod::Get,
        path,
        status: 404,
        body: json!({"err": "not found"}),
    }
}

impl FakeWorkspace {
    pub fn with_space(mut self, id: &str) -> Self {
        self.spaces.push(ClickUpSpace {
            id: id.to_string(),
            name: format!("space {id}"),
            archived: false,
        });
        self
    }

    pub fn with_folder(mut self, space_id: &str, folder_id: &str) -> Self {
        self.folders
            .entry(space_id.to_string())
            .or_default()
            .push(ClickUpFolder {
                id: folder_id.to_string(),
                name: format!("folder {folder_id}"),
                hidden: false,
                archived: false,
            });
        self
    }

    pub fn with_space_list(mut self, space_id: &str, list_id: &str) -> Self {
        self.space_lists
            .entry(space_id.to_string())
            .or_default()
            .push(list(list_id, &format!("list {list_id}")));
        self
    }

    pub fn with_folder_list(mut self, folder_id: &str, list_id: &str) -> Self {
        self.folder_lists
            .entry(folder_id.to_string())
            .or_default()
            .push(list(list_id, &format!("list {list_id}")));
        self
    }

    /// Registers list metadata plus its task pages, one `Vec` of raw tasks per page.
    pub fn with_tasks(mut self, list_id: &str, name: &str, pages: Vec<Vec<JsonValue>>) -> Self {
        let payload = ListPayload::try_from(json!({"id": list_id, "name": name}))
            .expect("list payload");
        self.lists.insert(list_id.to_string(), payload);
        let count = pages.len();
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, tasks)| TasksPage {
                tasks,
                last_page: Some(i + 1 == count),
            })
            .collect();
        self.pages.insert(list_id.to_string(), pages);
        self
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkspaceApi for FakeWorkspace {
    async fn teams(&self) -> Result<Vec<ClickUpTeam>, ApiError> {
        self.hit();
        Ok(Vec::new())
    }

    async fn spaces(&self, team_id: &str) -> Result<Vec<ClickUpSpace>, ApiError> {
        self.hit();
        if self.fail_spaces {
            return Err(not_found(format!("/team/{team_id}/space")));
        }
        Ok(self.spaces.clone())
    }

    async fn folders(&self, space_id: &str) -> Result<Vec<ClickUpFolder>, ApiError> {
        self.hit();
        Ok(self.folders.get(space_id).cloned().unwrap_or_default())
    }

    async fn space_lists(&self, space_id: &str) -> Result<Vec<ClickUpList>, ApiError> {
        self.hit();
        Ok(self.space_lists.get(space_id).cloned().unwrap_or_default())
    }

    async fn folder_lists(&self, folder_id: &str) -> Result<Vec<ClickUpList>, ApiError> {
        self.hit();
        Ok(self.folder_lists.get(folder_id).cloned().unwrap_or_default())
    }

    async fn list(&self, list_id: &str) -> Result<ListPayload, ApiError> {
        self.hit();
        self.lists
            .get(list_id)
            .cloned()
            .ok_or_else(|| not_found(format!("/list/{list_id}")))
    }

    async fn tasks_page(&self, list_id: &str, page: u32) -> Result<TasksPage, ApiError> {
        self.hit();
        Ok(self
            .pages
            .get(list_id)
            .and_then(|pages| pages.get(page as usize))
            .cloned()
            .unwrap_or_default())
    }
}
