//! Recorded list payloads used for offline normalization checks.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::{ListPayload, TasksPage};

/// One list's metadata plus every task page exactly as the remote returned them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFixture {
    pub list: ListPayload,
    pub pages: Vec<TasksPage>,
}

impl ListFixture {
    pub fn raw_tasks(&self) -> Vec<JsonValue> {
        self.pages
            .iter()
            .flat_map(|page| page.tasks.iter().cloned())
            .collect()
    }
}

pub fn load_list_fixture(path: impl AsRef<Path>) -> Result<ListFixture> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}
