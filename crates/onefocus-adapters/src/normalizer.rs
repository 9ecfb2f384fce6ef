//! Maps one remote list and its raw tasks onto the canonical snapshot shape.
//!
//! All tolerance for variant payload shapes lives here: status as a string or
//! an object, tags as strings or `{name}` objects, due dates as numeric or
//! string epoch milliseconds. Everything downstream sees [`NormalizedTask`].

use chrono::{DateTime, TimeZone, Utc};
use onefocus_core::{
    Bucket, NormalizedProject, NormalizedSnapshot, NormalizedTask, EXTERNAL_TYPE_LIST,
    SOURCE_CLICKUP,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::warn;

use crate::types::ListPayload;

const UNKNOWN_STATUS: &str = "unknown";
const MS_PER_MINUTE: f64 = 60_000.0;
const MS_PER_MINUTE_INT: i64 = 60_000;

#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(default)]
    id: Option<RawScalar>,
    #[serde(default)]
    name: Option<RawScalar>,
    #[serde(default)]
    status: Option<RawStatus>,
    #[serde(default)]
    tags: Option<RawTags>,
    #[serde(default)]
    due_date: Option<RawScalar>,
    #[serde(default)]
    time_estimate: Option<RawScalar>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Number(serde_json::Number),
    Text(String),
    Other(JsonValue),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStatus {
    Plain(String),
    Object {
        #[serde(default)]
        status: Option<JsonValue>,
    },
    Other(JsonValue),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTags {
    List(Vec<RawTag>),
    Other(JsonValue),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTag {
    Name(String),
    Object {
        #[serde(default)]
        name: Option<JsonValue>,
    },
    Other(JsonValue),
}

impl RawScalar {
    fn as_text(&self) -> Option<String> {
        match self {
            RawScalar::Text(s) => Some(s.clone()),
            RawScalar::Number(n) if n.is_f64() => {
                let f = n.as_f64()?;
                Some(if f.fract() == 0.0 { format!("{f:.0}") } else { f.to_string() })
            }
            RawScalar::Number(n) => Some(n.to_string()),
            RawScalar::Other(_) => None,
        }
    }

    /// Exact integer reading, for ids-sized values that `f64` would round.
    fn as_integer(&self) -> Option<i64> {
        match self {
            RawScalar::Number(n) => n.as_i64(),
            RawScalar::Text(s) => s.trim().parse().ok(),
            RawScalar::Other(_) => None,
        }
    }

    fn as_number(&self) -> Option<f64> {
        let n = match self {
            RawScalar::Number(n) => n.as_f64()?,
            RawScalar::Text(s) if !s.trim().is_empty() => s.trim().parse().ok()?,
            _ => return None,
        };
        n.is_finite().then_some(n)
    }
}

fn status_of(raw: Option<RawStatus>) -> String {
    let status = match raw {
        Some(RawStatus::Plain(s)) => Some(s),
        Some(RawStatus::Object {
            status: Some(JsonValue::String(s)),
        }) => Some(s),
        _ => None,
    };
    status.unwrap_or_else(|| UNKNOWN_STATUS.to_string())
}

fn tags_of(raw: Option<RawTags>) -> Vec<String> {
    let Some(RawTags::List(tags)) = raw else {
        return Vec::new();
    };
    tags.into_iter()
        .filter_map(|tag| match tag {
            RawTag::Name(name) => Some(name),
            RawTag::Object {
                name: Some(JsonValue::String(name)),
            } => Some(name),
            _ => None,
        })
        .filter(|name| !name.is_empty())
        .collect()
}

/// Epoch milliseconds (numeric or numeric string), falling back to RFC 3339 text.
fn due_of(raw: Option<&RawScalar>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    if let Some(ms) = raw.as_integer() {
        return Utc.timestamp_millis_opt(ms).single();
    }
    if let Some(ms) = raw.as_number() {
        return Utc.timestamp_millis_opt(ms.round() as i64).single();
    }
    match raw {
        RawScalar::Text(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        _ => None,
    }
}

fn estimate_minutes(raw: Option<&RawScalar>) -> Option<i32> {
    let raw = raw?;
    if let Some(ms) = raw.as_integer() {
        if ms <= 0 {
            return None;
        }
        let round_up = ms % MS_PER_MINUTE_INT >= MS_PER_MINUTE_INT / 2;
        let minutes = ms / MS_PER_MINUTE_INT + i64::from(round_up);
        return i32::try_from(minutes).ok();
    }
    let ms = raw.as_number()?;
    if ms <= 0.0 {
        return None;
    }
    let minutes = (ms / MS_PER_MINUTE).round();
    (minutes <= f64::from(i32::MAX)).then_some(minutes as i32)
}

/// Decodes one raw task. Returns `None` when the record has no usable id.
pub fn normalize_task(raw: &JsonValue) -> Option<NormalizedTask> {
    let task = match RawTask::deserialize(raw) {
        Ok(task) => task,
        Err(err) => {
            warn!(error = %err, "dropping task record with unexpected shape");
            return None;
        }
    };
    let external_id = task
        .id
        .as_ref()
        .and_then(RawScalar::as_text)
        .filter(|id| !id.trim().is_empty());
    let Some(external_id) = external_id else {
        warn!("dropping task record without an id");
        return None;
    };

    Some(NormalizedTask {
        external_id,
        title: task.name.as_ref().and_then(RawScalar::as_text).unwrap_or_default(),
        due_at: due_of(task.due_date.as_ref()),
        nominal_estimate_min: estimate_minutes(task.time_estimate.as_ref()),
        status: status_of(task.status),
        tags: tags_of(task.tags),
    })
}

pub fn normalize(
    list: &ListPayload,
    raw_tasks: &[JsonValue],
    bucket: Option<Bucket>,
) -> NormalizedSnapshot {
    normalize_at(list, raw_tasks, bucket, Utc::now())
}

/// [`normalize`] with an explicit capture time.
pub fn normalize_at(
    payload: &ListPayload,
    raw_tasks: &[JsonValue],
    bucket: Option<Bucket>,
    captured_at: DateTime<Utc>,
) -> NormalizedSnapshot {
    let tasks = raw_tasks.iter().filter_map(normalize_task).collect();
    NormalizedSnapshot {
        source: SOURCE_CLICKUP.to_string(),
        captured_at,
        project: NormalizedProject {
            external_type: EXTERNAL_TYPE_LIST.to_string(),
            external_id: payload.list.id.clone(),
            name: payload.list.name.clone(),
            bucket: bucket.unwrap_or_default(),
        },
        tasks,
        raw: json!({ "list": payload.raw, "tasks": raw_tasks }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> ListPayload {
        ListPayload::try_from(json!({"id": "L1", "name": "Inbox"})).unwrap()
    }

    #[test]
    fn status_shapes() {
        let plain = normalize_task(&json!({"id": "1", "status": "in progress"})).unwrap();
        let object = normalize_task(&json!({"id": "1", "status": {"status": "done", "type": "closed"}})).unwrap();
        let absent = normalize_task(&json!({"id": "1"})).unwrap();
        let odd = normalize_task(&json!({"id": "1", "status": {"status": 3}})).unwrap();

        assert_eq!(plain.status, "in progress");
        assert_eq!(object.status, "done");
        assert_eq!(absent.status, "unknown");
        assert_eq!(odd.status, "unknown");
    }

    #[test]
    fn tag_shapes_normalize_identically() {
        let objects = normalize_task(&json!({"id": "1", "tags": [{"name": "a"}, {"name": "b"}]})).unwrap();
        let strings = normalize_task(&json!({"id": "1", "tags": ["a", "b"]})).unwrap();
        let mixed = normalize_task(&json!({"id": "1", "tags": ["a", {"name": ""}, 7, {"color": "red"}]})).unwrap();

        assert_eq!(objects.tags, vec!["a", "b"]);
        assert_eq!(strings.tags, objects.tags);
        assert_eq!(mixed.tags, vec!["a"]);
    }

    #[test]
    fn due_dates_from_string_or_number_millis() {
        let expected = Utc.timestamp_millis_opt(1_700_000_000_000).single();
        let text = normalize_task(&json!({"id": "1", "due_date": "1700000000000"})).unwrap();
        let number = normalize_task(&json!({"id": "1", "due_date": 1_700_000_000_000_i64})).unwrap();
        let null = normalize_task(&json!({"id": "1", "due_date": null})).unwrap();
        let junk = normalize_task(&json!({"id": "1", "due_date": "soon"})).unwrap();

        assert_eq!(text.due_at, expected);
        assert_eq!(number.due_at, expected);
        assert_eq!(null.due_at, None);
        assert_eq!(junk.due_at, None);
    }

    #[test]
    fn estimates_round_to_minutes_and_drop_non_positive() {
        let est = |v: JsonValue| {
            normalize_task(&json!({"id": "1", "time_estimate": v}))
                .unwrap()
                .nominal_estimate_min
        };
        assert_eq!(est(json!(5_400_000)), Some(90));
        assert_eq!(est(json!(89_999)), Some(1));
        assert_eq!(est(json!(29_999)), Some(0));
        assert_eq!(est(json!(0)), None);
        assert_eq!(est(json!(-60_000)), None);
        assert_eq!(est(json!(90_000.0)), Some(2));
        assert_eq!(est(json!("5400000")), Some(90));
        assert_eq!(est(json!(i64::MAX)), None);
        assert_eq!(est(JsonValue::Null), None);
    }

    #[test]
    fn records_without_an_id_are_dropped() {
        assert!(normalize_task(&json!({"name": "orphan"})).is_none());
        assert!(normalize_task(&json!({})).is_none());
        assert!(normalize_task(&json!("not an object")).is_none());

        let big = normalize_task(&json!({"id": 9_007_199_254_740_993_u64})).unwrap();
        assert_eq!(big.external_id, "9007199254740993");
        let float = normalize_task(&json!({"id": 42.0})).unwrap();
        assert_eq!(float.external_id, "42");

        let untitled = normalize_task(&json!({"id": 42})).unwrap();
        assert_eq!(untitled.external_id, "42");
        assert_eq!(untitled.title, "");
    }

    #[test]
    fn snapshot_carries_project_bucket_and_raw_payload() {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let raw_tasks = vec![json!({"id": "1", "name": "a"}), json!({"name": "no id"})];

        let snap = normalize_at(&list(), &raw_tasks, Some(Bucket::PrimaryWork), at);
        assert_eq!(snap.source, "clickup");
        assert_eq!(snap.captured_at, at);
        assert_eq!(snap.project.external_type, "list");
        assert_eq!(snap.project.external_id, "L1");
        assert_eq!(snap.project.bucket, Bucket::PrimaryWork);
        assert_eq!(snap.tasks.len(), 1);
        assert_eq!(snap.raw["tasks"].as_array().map(Vec::len), Some(2));
        assert_eq!(snap.raw["list"]["name"], "Inbox");

        let numeric = json!({"id": 901200345_u64, "name": "Launch"});
        let payload = ListPayload::try_from(numeric.clone()).unwrap();
        let exact = normalize_at(&payload, &[], None, at);
        assert_eq!(exact.raw["list"], numeric);
        assert_eq!(exact.project.external_id, "901200345");

        let default_bucket = normalize_at(&list(), &[], None, at);
        assert_eq!(default_bucket.project.bucket, Bucket::EverythingElse);
    }
}
