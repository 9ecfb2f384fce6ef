//! Wire shapes of the remote workspace API.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Remote ids arrive as strings on most endpoints and as numbers on a few.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("expected string or number id, got {other}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickUpTeam {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickUpSpace {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickUpFolder {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub archived: bool,
}

/// List metadata. Fields the mirror does not read are kept in `extra` so the
/// stored raw payload stays complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickUpList {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// One list as received: decoded metadata next to the untouched response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JsonValue", into = "JsonValue")]
pub struct ListPayload {
    pub list: ClickUpList,
    pub raw: JsonValue,
}

impl TryFrom<JsonValue> for ListPayload {
    type Error = serde_json::Error;

    fn try_from(raw: JsonValue) -> Result<Self, Self::Error> {
        Ok(Self {
            list: serde_json::from_value(raw.clone())?,
            raw,
        })
    }
}

impl From<ListPayload> for JsonValue {
    fn from(payload: ListPayload) -> Self {
        payload.raw
    }
}

/// One page of a list's tasks. Tasks stay untyped until the normalizer sees them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TasksPage {
    #[serde(default)]
    pub tasks: Vec<JsonValue>,
    #[serde(default)]
    pub last_page: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskInput {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    /// Epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,
    /// Milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_estimate: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Partial update; only populated fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateTaskInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_estimate: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_ids_become_strings() {
        let team: ClickUpTeam = serde_json::from_value(json!({"id": 9001, "name": "Acme"})).unwrap();
        assert_eq!(team.id, "9001");
    }

    #[test]
    fn list_keeps_unknown_fields() {
        let list: ClickUpList = serde_json::from_value(json!({
            "id": "L1",
            "name": "Inbox",
            "task_count": 4,
            "folder": {"id": "F1"}
        }))
        .unwrap();
        assert_eq!(list.extra.get("task_count"), Some(&json!(4)));
        let back = serde_json::to_value(&list).unwrap();
        assert_eq!(back["folder"]["id"], "F1");
    }

    #[test]
    fn list_payload_keeps_the_body_as_received() {
        let body = json!({"id": 901200345_u64, "name": "Inbox", "task_count": 4});
        let payload: ListPayload = serde_json::from_value(body.clone()).unwrap();

        assert_eq!(payload.list.id, "901200345");
        assert!(!payload.list.archived);
        assert_eq!(payload.raw, body);
        assert_eq!(serde_json::to_value(&payload).unwrap(), body);
        assert!(serde_json::from_value::<ListPayload>(json!({"name": "no id"})).is_err());
    }

    #[test]
    fn update_input_omits_unset_fields() {
        let input = UpdateTaskInput {
            status: Some("done".to_string()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&input).unwrap(), json!({"status": "done"}));
    }
}
