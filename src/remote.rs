//! Remote collaborator seams
//!
//! The core needs two things from the outside world: a way to fetch a named
//! resource, and a way to turn one raw payload record into a
//! `(type, id, fields)` triple. Transport, retry and wire-format adapters
//! live behind these traits.

use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::path::PathBuf;

/// Record type of the sentinel carrying paging metadata
pub const PAGE_META_TYPE: &str = "__page__";

/// Field the bundled sources compare against `FetchParams::since`
pub const CHANGED_FIELD: &str = "modified";

/// Parameters of one fetch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchParams {
    /// Only records changed after this checkpoint
    pub since: Option<String>,
    /// Page cursor from the previous page's metadata record
    pub cursor: Option<String>,
    /// Equality filters, `field = value`
    pub filter: Vec<(String, String)>,
}

impl FetchParams {
    pub fn since(mut self, checkpoint: impl Into<String>) -> Self {
        self.since = Some(checkpoint.into());
        self
    }

    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.push((field.into(), value.into()));
        self
    }
}

/// One page of raw records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    #[serde(default)]
    pub records: Vec<JsonValue>,
    /// Total number of data records across all pages, when the server knows it
    #[serde(default, alias = "total", skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

impl FetchResponse {
    pub fn new(records: Vec<JsonValue>) -> Self {
        Self {
            records,
            total_count: None,
        }
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total_count = Some(total);
        self
    }
}

/// A converted payload record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub type_name: String,
    pub id: String,
    pub fields: Map<String, JsonValue>,
}

impl Record {
    pub fn is_page_meta(&self) -> bool {
        self.type_name == PAGE_META_TYPE
    }

    /// Cursor of the next page. Absent on the last page.
    pub fn next_resource(&self) -> Option<&str> {
        self.fields
            .get("next_resource")
            .or_else(|| self.fields.get("next"))
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Key used to recognize redelivered records
    pub fn key(&self) -> String {
        format!("{}/{}", self.type_name, self.id)
    }
}

/// Fetches a named resource
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch(&self, resource: &str, params: &FetchParams) -> Result<FetchResponse>;
}

/// Converts one raw payload record into a `Record`
pub trait RecordConverter: Send + Sync {
    fn convert(&self, raw: &JsonValue) -> Result<Record>;
}

/// Records shaped `{"type": .., "id": .., <field>: ..}` or with the
/// fields nested under `"fields"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecordConverter;

impl RecordConverter for JsonRecordConverter {
    fn convert(&self, raw: &JsonValue) -> Result<Record> {
        let object = raw
            .as_object()
            .ok_or_else(|| Error::InvalidSchema(format!("Record is not an object: {}", raw)))?;

        let type_name = object
            .get("type")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::InvalidSchema("Record has no type".to_string()))?
            .to_string();

        let id = match object.get("id") {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Number(n)) => n.to_string(),
            _ if type_name == PAGE_META_TYPE => String::new(),
            _ => return Err(Error::InvalidSchema(format!("{} record has no id", type_name))),
        };

        let fields = match object.get("fields") {
            Some(JsonValue::Object(nested)) => nested.clone(),
            _ => object
                .iter()
                .filter(|(k, _)| k.as_str() != "type" && k.as_str() != "id")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        Ok(Record { type_name, id, fields })
    }
}

/// Page-metadata record pointing at `next`, or marking the end when `None`
pub fn page_meta(next: Option<&str>) -> JsonValue {
    match next {
        Some(next) => serde_json::json!({"type": PAGE_META_TYPE, "next_resource": next}),
        None => serde_json::json!({"type": PAGE_META_TYPE}),
    }
}

fn field_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Object(map) => map.get("id").and_then(field_text),
        _ => None,
    }
}

fn field_matches(value: Option<&JsonValue>, expected: &str) -> bool {
    match value {
        Some(JsonValue::Array(items)) => items.iter().any(|item| field_matches(Some(item), expected)),
        Some(other) => field_text(other).as_deref() == Some(expected),
        None => false,
    }
}

/// Apply `since` and equality filters to a page the way a server would.
/// Page-metadata records always pass.
pub fn apply_params(response: FetchResponse, params: &FetchParams) -> FetchResponse {
    if params.since.is_none() && params.filter.is_empty() {
        return response;
    }
    let records = response
        .records
        .into_iter()
        .filter(|record| {
            if record.get("type").and_then(JsonValue::as_str) == Some(PAGE_META_TYPE) {
                return true;
            }
            let fields = record.get("fields").unwrap_or(record);
            let changed = match (&params.since, fields.get(CHANGED_FIELD).and_then(JsonValue::as_str)) {
                (Some(since), Some(modified)) => modified > since.as_str(),
                _ => true,
            };
            changed
                && params
                    .filter
                    .iter()
                    .all(|(field, value)| field_matches(fields.get(field), value))
        })
        .collect();
    FetchResponse {
        records,
        total_count: response.total_count,
    }
}

// ========== In-Memory Source ==========

/// Canned pages keyed by resource and cursor, with a log of every fetch
#[derive(Debug, Default)]
pub struct MemorySource {
    pages: Mutex<HashMap<(String, Option<String>), FetchResponse>>,
    failures: Mutex<HashMap<String, u16>>,
    calls: Mutex<Vec<(String, FetchParams)>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource: &str, cursor: Option<&str>, response: FetchResponse) {
        self.pages
            .lock()
            .insert((resource.to_string(), cursor.map(str::to_string)), response);
    }

    /// Add one page of records followed by its paging metadata record
    pub fn add_page(
        &self,
        resource: &str,
        cursor: Option<&str>,
        mut records: Vec<JsonValue>,
        next: Option<&str>,
        total: Option<u64>,
    ) {
        records.push(page_meta(next));
        self.insert(resource, cursor, FetchResponse { records, total_count: total });
    }

    /// Make every fetch of `resource` fail with `status`
    pub fn fail(&self, resource: &str, status: u16) {
        self.failures.lock().insert(resource.to_string(), status);
    }

    pub fn recover(&self, resource: &str) {
        self.failures.lock().remove(resource);
    }

    pub fn calls(&self) -> Vec<(String, FetchParams)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, resource: &str) -> usize {
        self.calls.lock().iter().filter(|(r, _)| r == resource).count()
    }
}

#[async_trait]
impl RemoteSource for MemorySource {
    async fn fetch(&self, resource: &str, params: &FetchParams) -> Result<FetchResponse> {
        self.calls.lock().push((resource.to_string(), params.clone()));
        if let Some(status) = self.failures.lock().get(resource) {
            return Err(Error::transport(*status, format!("{} unavailable", resource)));
        }
        let page = self
            .pages
            .lock()
            .get(&(resource.to_string(), params.cursor.clone()))
            .cloned()
            .ok_or_else(|| Error::transport(404, format!("No such resource: {}", resource)))?;
        Ok(apply_params(page, params))
    }
}

// ========== File-Backed Source ==========

/// Resource `R` is `<dir>/R.json`; with cursor `C` it is `<dir>/R@C.json`.
/// Each file holds `{"total": n, "records": [...]}`.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    dir: PathBuf,
}

impl JsonDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, resource: &str, cursor: Option<&str>) -> PathBuf {
        let stem = resource.replace('/', "_");
        match cursor {
            Some(cursor) => self.dir.join(format!("{}@{}.json", stem, cursor)),
            None => self.dir.join(format!("{}.json", stem)),
        }
    }
}

#[async_trait]
impl RemoteSource for JsonDirSource {
    async fn fetch(&self, resource: &str, params: &FetchParams) -> Result<FetchResponse> {
        let path = self.path_for(resource, params.cursor.as_deref());
        tracing::debug!("Fetching {} from {}", resource, path.display());
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::transport(404, format!("No such resource: {}", resource)));
            }
            Err(e) => return Err(e.into()),
        };
        let response: FetchResponse = serde_json::from_str(&content)?;
        Ok(apply_params(response, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_converter_flat_and_nested() {
        let converter = JsonRecordConverter;
        let flat = converter.convert(&json!({"type": "Task", "id": 7, "title": "x"})).unwrap();
        assert_eq!(flat.id, "7");
        assert_eq!(flat.fields.get("title"), Some(&json!("x")));

        let nested = converter
            .convert(&json!({"type": "Task", "id": "t1", "fields": {"title": "y"}}))
            .unwrap();
        assert_eq!(nested.key(), "Task/t1");
        assert_eq!(nested.fields.len(), 1);

        let meta = converter.convert(&page_meta(Some("p2"))).unwrap();
        assert!(meta.is_page_meta());
        assert_eq!(meta.next_resource(), Some("p2"));
        assert!(converter.convert(&json!({"id": 1})).is_err());
    }

    #[test]
    fn test_apply_params_filters_and_since() {
        let page = FetchResponse::new(vec![
            json!({"type": "Task", "id": "a", "project": "p1", "modified": "2024-01-02T00:00:00"}),
            json!({"type": "Task", "id": "b", "project": {"id": "p2"}, "modified": "2024-01-03T00:00:00"}),
            page_meta(None),
        ]);

        let filtered = apply_params(page.clone(), &FetchParams::default().with_filter("project", "p2"));
        assert_eq!(filtered.records.len(), 2);
        assert_eq!(filtered.records[0]["id"], json!("b"));

        let changed = apply_params(page, &FetchParams::default().since("2024-01-02T00:00:00"));
        assert_eq!(changed.records.len(), 2);
        assert_eq!(changed.records[0]["id"], json!("b"));
    }

    #[tokio::test]
    async fn test_memory_source_failures_and_log() {
        let source = MemorySource::new();
        source.add_page("Task", None, vec![json!({"type": "Task", "id": "a"})], None, Some(1));

        let page = source.fetch("Task", &FetchParams::default()).await.unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.total_count, Some(1));

        source.fail("Task", 503);
        let err = source.fetch("Task", &FetchParams::default()).await.unwrap_err();
        assert!(matches!(err, Error::Transport { status: 503, .. }));
        assert!(matches!(
            source.fetch("Missing", &FetchParams::default()).await,
            Err(Error::Transport { status: 404, .. })
        ));
        assert_eq!(source.call_count("Task"), 2);
    }

    #[tokio::test]
    async fn test_json_dir_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Task.json"),
            r#"{"total": 2, "records": [{"type": "Task", "id": "a"}, {"type": "__page__", "next_resource": "2"}]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("Task@2.json"),
            r#"{"records": [{"type": "Task", "id": "b"}, {"type": "__page__"}]}"#,
        )
        .unwrap();

        let source = JsonDirSource::new(dir.path());
        let first = source.fetch("Task", &FetchParams::default()).await.unwrap();
        assert_eq!(first.total_count, Some(2));
        let second = source.fetch("Task", &FetchParams::default().cursor("2")).await.unwrap();
        assert_eq!(second.records[0]["id"], json!("b"));
        assert!(source.fetch("User", &FetchParams::default()).await.is_err());
    }
}
