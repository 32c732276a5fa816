//! Raw entries: the canonical property representation shared by wire and store

use crate::schema::{ItemKind, PropertyKind};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One raw entry of a property value.
///
/// `value == None` is the explicit empty marker. References carry the target
/// `type_name`/`id`; map entries carry their `key`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl RawEntry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn scalar(value: impl Into<JsonValue>) -> Self {
        let value = value.into();
        if value.is_null() {
            return Self::empty();
        }
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    pub fn reference(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            value: Some(JsonValue::String(id.clone())),
            type_name: Some(type_name.into()),
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn keyed(key: impl Into<String>, mut entry: RawEntry) -> Self {
        entry.key = Some(key.into());
        entry
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Plain JSON rendering: references become their id, empty becomes null
    pub fn to_json(&self) -> JsonValue {
        self.value.clone().unwrap_or(JsonValue::Null)
    }
}

/// True for the single explicit-empty entry set
pub fn is_empty_set(entries: &[RawEntry]) -> bool {
    entries.iter().all(RawEntry::is_empty)
}

/// Convert one wire field into raw entries for a property of `kind`.
///
/// An explicit `null` yields a single empty entry; callers treat a field that
/// is absent altogether differently (see `TypedValue::instantiate`).
pub fn entries_from_wire(kind: &PropertyKind, wire: &JsonValue) -> Vec<RawEntry> {
    if wire.is_null() {
        return vec![RawEntry::empty()];
    }

    match kind {
        PropertyKind::Scalar(_) | PropertyKind::Calculated => vec![RawEntry::scalar(wire.clone())],
        PropertyKind::Blob => match wire {
            JsonValue::String(href) => vec![RawEntry::empty().with_href(href.clone())],
            JsonValue::Object(map) => {
                let mut entry = RawEntry::empty();
                entry.href = map.get("href").and_then(JsonValue::as_str).map(str::to_string);
                entry.value = map.get("value").filter(|v| !v.is_null()).cloned();
                vec![entry]
            }
            other => vec![RawEntry::scalar(other.clone())],
        },
        PropertyKind::Reference { target } => vec![reference_from_wire(target, wire)],
        PropertyKind::BackReference { target, .. } => items_of(wire)
            .into_iter()
            .map(|item| reference_from_wire(target, item))
            .collect(),
        PropertyKind::List { item } => items_of(wire)
            .into_iter()
            .map(|value| item_from_wire(item, value))
            .collect(),
        PropertyKind::Map { item } => match wire {
            JsonValue::Object(map) => map
                .iter()
                .map(|(key, value)| RawEntry::keyed(key.clone(), item_from_wire(item, value)))
                .collect(),
            JsonValue::Array(pairs) => pairs
                .iter()
                .filter_map(|pair| {
                    let key = pair.get("key")?.as_str()?;
                    let value = pair.get("value").unwrap_or(&JsonValue::Null);
                    Some(RawEntry::keyed(key, item_from_wire(item, value)))
                })
                .collect(),
            _ => Vec::new(),
        },
    }
}

fn items_of(wire: &JsonValue) -> Vec<&JsonValue> {
    match wire {
        JsonValue::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

/// A list or map item, typed as a reference when the item kind is an entity type
pub fn item_from_wire(item: &ItemKind, wire: &JsonValue) -> RawEntry {
    match item {
        ItemKind::Entity(target) => reference_from_wire(target, wire),
        ItemKind::Scalar(_) => RawEntry::scalar(wire.clone()),
    }
}

fn reference_from_wire(default_type: &str, wire: &JsonValue) -> RawEntry {
    match wire {
        JsonValue::String(id) => RawEntry::reference(default_type, id.clone()),
        JsonValue::Number(n) => RawEntry::reference(default_type, n.to_string()),
        JsonValue::Object(map) => {
            let id = match map.get("id") {
                Some(JsonValue::String(s)) => s.clone(),
                Some(JsonValue::Number(n)) => n.to_string(),
                _ => return RawEntry::empty(),
            };
            let type_name = map
                .get("type")
                .and_then(JsonValue::as_str)
                .unwrap_or(default_type);
            let mut entry = RawEntry::reference(type_name, id);
            entry.href = map.get("href").and_then(JsonValue::as_str).map(str::to_string);
            entry
        }
        _ => RawEntry::empty(),
    }
}
