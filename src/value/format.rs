//! Canonical in-memory formatting and storage conversion per property kind

use super::raw::RawEntry;
use crate::schema::{ItemKind, PropertyKind, ScalarKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Timestamp layout used in storage and for sync checkpoints.
/// Fixed width, UTC, so that string order equals time order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse the timestamp shapes the remote is known to send
pub fn parse_timestamp(raw: &JsonValue) -> Option<NaiveDateTime> {
    match raw {
        JsonValue::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|dt| dt.naive_utc()),
        JsonValue::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc).naive_utc());
            }
            for layout in [TIMESTAMP_FORMAT, "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, layout) {
                    return Some(dt);
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        }
        _ => None,
    }
}

fn parse_bool(raw: &JsonValue) -> Option<bool> {
    match raw {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0),
        JsonValue::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" | "t" | "y" => Some(true),
            "false" | "0" | "no" | "off" | "f" | "n" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_i64(raw: &JsonValue) -> Option<i64> {
    match raw {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        JsonValue::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn parse_f64(raw: &JsonValue) -> Option<f64> {
    match raw {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_of(raw: &JsonValue) -> String {
    match raw {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Canonical in-memory representation of one entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Canonical {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
    Timestamp(NaiveDateTime),
    Reference { entity: String, id: String },
    Blob { href: Option<String> },
}

fn format_scalar(kind: ScalarKind, raw: &JsonValue) -> Canonical {
    let formatted = match kind {
        ScalarKind::Integer => parse_i64(raw).map(Canonical::Integer),
        ScalarKind::Float => parse_f64(raw).map(Canonical::Float),
        ScalarKind::Boolean => parse_bool(raw).map(Canonical::Boolean),
        ScalarKind::Timestamp => parse_timestamp(raw).map(Canonical::Timestamp),
        ScalarKind::Text => Some(Canonical::Text(text_of(raw))),
    };
    formatted.unwrap_or_else(|| Canonical::Text(text_of(raw)))
}

fn format_reference(default_type: &str, entry: &RawEntry) -> Canonical {
    match (&entry.id, &entry.value) {
        (Some(id), _) => Canonical::Reference {
            entity: entry.type_name.clone().unwrap_or_else(|| default_type.to_string()),
            id: id.clone(),
        },
        (None, Some(value)) => Canonical::Reference {
            entity: entry.type_name.clone().unwrap_or_else(|| default_type.to_string()),
            id: text_of(value),
        },
        (None, None) => Canonical::Null,
    }
}

fn scalar_to_sql(kind: ScalarKind, raw: &JsonValue) -> SqlValue {
    match format_scalar(kind, raw) {
        Canonical::Integer(i) => SqlValue::Integer(i),
        Canonical::Float(f) => SqlValue::Real(f),
        Canonical::Boolean(b) => SqlValue::Integer(i64::from(b)),
        Canonical::Timestamp(t) => SqlValue::Text(t.format(TIMESTAMP_FORMAT).to_string()),
        Canonical::Text(s) => SqlValue::Text(s),
        _ => SqlValue::Null,
    }
}

impl ItemKind {
    pub fn format(&self, entry: &RawEntry) -> Canonical {
        match self {
            ItemKind::Entity(target) => format_reference(target, entry),
            ItemKind::Scalar(kind) => match &entry.value {
                Some(raw) => format_scalar(*kind, raw),
                None => Canonical::Null,
            },
        }
    }

    pub fn to_storage_value(&self, entry: &RawEntry) -> SqlValue {
        match self {
            ItemKind::Entity(_) => match &entry.id {
                Some(id) => SqlValue::Text(id.clone()),
                None => SqlValue::Null,
            },
            ItemKind::Scalar(kind) => match &entry.value {
                Some(raw) => scalar_to_sql(*kind, raw),
                None => SqlValue::Null,
            },
        }
    }

    /// Rebuild an entry from an auxiliary-table value (and optional value type)
    pub fn entry_from_storage(&self, value: SqlValue, value_type: Option<String>) -> RawEntry {
        match self {
            ItemKind::Entity(target) => match value {
                SqlValue::Null => RawEntry::empty(),
                other => RawEntry::reference(value_type.unwrap_or_else(|| target.clone()), sql_text(other)),
            },
            ItemKind::Scalar(kind) => scalar_entry_from_storage(*kind, value),
        }
    }
}

impl PropertyKind {
    /// Canonical representation of one entry of this kind
    pub fn format(&self, entry: &RawEntry) -> Canonical {
        match self {
            PropertyKind::Scalar(kind) => match &entry.value {
                Some(raw) => format_scalar(*kind, raw),
                None => Canonical::Null,
            },
            PropertyKind::Calculated => match &entry.value {
                Some(raw) => format_scalar(ScalarKind::Text, raw),
                None => Canonical::Null,
            },
            PropertyKind::Blob => Canonical::Blob {
                href: entry.href.clone(),
            },
            PropertyKind::Reference { target } | PropertyKind::BackReference { target, .. } => {
                format_reference(target, entry)
            }
            PropertyKind::List { item } | PropertyKind::Map { item } => item.format(entry),
        }
    }

    /// Value written to the primary-table column; `Null` for unstored kinds
    pub fn to_storage_value(&self, entry: &RawEntry) -> SqlValue {
        match self {
            PropertyKind::Scalar(kind) => match &entry.value {
                Some(raw) => scalar_to_sql(*kind, raw),
                None => SqlValue::Null,
            },
            PropertyKind::Blob => entry.href.clone().map(SqlValue::Text).unwrap_or(SqlValue::Null),
            PropertyKind::Reference { .. } => entry.id.clone().map(SqlValue::Text).unwrap_or(SqlValue::Null),
            PropertyKind::List { item } | PropertyKind::Map { item } => item.to_storage_value(entry),
            PropertyKind::BackReference { .. } | PropertyKind::Calculated => SqlValue::Null,
        }
    }
}

fn sql_text(value: SqlValue) -> String {
    match value {
        SqlValue::Text(s) => s,
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
        SqlValue::Null => String::new(),
    }
}

/// Rebuild a scalar entry from a primary-table column value
pub fn scalar_entry_from_storage(kind: ScalarKind, value: SqlValue) -> RawEntry {
    match (kind, value) {
        (_, SqlValue::Null) => RawEntry::empty(),
        (ScalarKind::Boolean, SqlValue::Integer(i)) => RawEntry::scalar(i != 0),
        (_, SqlValue::Integer(i)) => RawEntry::scalar(i),
        (_, SqlValue::Real(f)) => RawEntry::scalar(f),
        (_, SqlValue::Text(s)) => RawEntry::scalar(s),
        (_, SqlValue::Blob(b)) => RawEntry::scalar(String::from_utf8_lossy(&b).into_owned()),
    }
}
