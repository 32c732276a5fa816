//! Entity instances
//!
//! An instance is an id, its entity type and one `TypedValue` per property.
//! Instances are materialized either from a converted remote record or from a
//! primary-table row of the local store.

use crate::query::{Column, ColumnRole};
use crate::remote::Record;
use crate::schema::{EntityType, PropertyKind};
use crate::value::{RawEntry, TypedValue, entries_from_wire, scalar_entry_from_storage};
use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
pub struct EntityInstance {
    pub id: String,
    pub entity: Arc<EntityType>,
    values: HashMap<String, TypedValue>,
}

impl EntityInstance {
    /// A fresh instance with every property at its default state
    pub fn new(entity: Arc<EntityType>, id: impl Into<String>) -> Self {
        let values = entity
            .properties
            .iter()
            .map(|p| (p.name.clone(), TypedValue::instantiate(p, None)))
            .collect();
        Self {
            id: id.into(),
            entity,
            values,
        }
    }

    /// Materialize from a remote record. Multi-valued fields the record does
    /// not carry stay unloaded, so a write leaves their stored rows alone.
    pub fn from_record(entity: Arc<EntityType>, record: &Record) -> Result<Self> {
        if record.type_name != entity.name {
            return Err(Error::InvalidSchema(format!(
                "Record {} is not a {}",
                record.key(),
                entity.name
            )));
        }
        let values = entity
            .properties
            .iter()
            .map(|p| {
                let value = match record.fields.get(&p.name) {
                    Some(wire) => TypedValue::instantiate(p, Some(entries_from_wire(&p.kind, wire))),
                    None if p.kind.is_multi_valued() => TypedValue::unloaded(),
                    None => TypedValue::instantiate(p, None),
                };
                (p.name.clone(), value)
            })
            .collect();
        Ok(Self {
            id: record.id.clone(),
            entity,
            values,
        })
    }

    /// Materialize from a primary-table row whose columns are `columns`
    pub fn from_row(entity: Arc<EntityType>, columns: &[Column], row: Vec<SqlValue>) -> Result<Self> {
        let mut id = None;
        let mut by_property: HashMap<&str, (Option<SqlValue>, Option<SqlValue>)> = HashMap::new();
        for (column, value) in columns.iter().zip(row) {
            match (column.role, column.property.as_deref()) {
                (ColumnRole::Id, _) => id = Some(value),
                (ColumnRole::Value, Some(prop)) => by_property.entry(prop).or_default().0 = Some(value),
                (ColumnRole::ValueType, Some(prop)) => by_property.entry(prop).or_default().1 = Some(value),
                _ => {}
            }
        }
        let id = match id {
            Some(SqlValue::Text(id)) => id,
            Some(SqlValue::Integer(i)) => i.to_string(),
            _ => return Err(Error::InvalidQuery(format!("{} row has no id", entity.name))),
        };

        let values = entity
            .properties
            .iter()
            .map(|p| {
                let stored = by_property.remove(p.name.as_str());
                let value = match (&p.kind, stored) {
                    (PropertyKind::Scalar(kind), Some((Some(v), _))) => {
                        TypedValue::instantiate(p, Some(vec![scalar_entry_from_storage(*kind, v)]))
                    }
                    (PropertyKind::Reference { target }, Some((Some(SqlValue::Text(ref_id)), type_name))) => {
                        let type_name = match type_name {
                            Some(SqlValue::Text(t)) => t,
                            _ => target.clone(),
                        };
                        TypedValue::instantiate(p, Some(vec![RawEntry::reference(type_name, ref_id)]))
                    }
                    (PropertyKind::Blob, Some((Some(SqlValue::Text(href)), _))) => {
                        TypedValue::instantiate(p, Some(vec![RawEntry::empty().with_href(href)]))
                    }
                    (kind, _) if kind.is_multi_valued() || kind.is_deferred() => TypedValue::unloaded(),
                    _ => TypedValue::instantiate(p, None),
                };
                (p.name.clone(), value)
            })
            .collect();

        Ok(Self { id, entity, values })
    }

    pub fn value(&self, property: &str) -> Result<&TypedValue> {
        self.values
            .get(property)
            .ok_or_else(|| Error::not_found("Property", format!("{}.{}", self.entity.name, property)))
    }

    /// Assign a property's entries
    pub fn set(&self, property: &str, entries: Vec<RawEntry>) -> Result<()> {
        self.value(property)?.set(entries);
        Ok(())
    }

    /// Plain JSON of the loaded properties. Unloaded properties are omitted.
    pub fn to_json(&self) -> JsonValue {
        let mut object = Map::new();
        object.insert("id".to_string(), JsonValue::String(self.id.clone()));
        object.insert("type".to_string(), JsonValue::String(self.entity.name.clone()));
        for prop in &self.entity.properties {
            if let Some(entries) = self.values.get(&prop.name).and_then(TypedValue::peek) {
                object.insert(prop.name.clone(), entries_json(&prop.kind, &entries));
            }
        }
        JsonValue::Object(object)
    }
}

/// JSON of one property's entries: an array for lists, an object for maps,
/// the first entry otherwise
pub fn entries_json(kind: &PropertyKind, entries: &[RawEntry]) -> JsonValue {
    match kind {
        PropertyKind::List { .. } | PropertyKind::BackReference { .. } => {
            JsonValue::Array(entries.iter().filter(|e| !e.is_empty()).map(RawEntry::to_json).collect())
        }
        PropertyKind::Map { .. } => JsonValue::Object(
            entries
                .iter()
                .filter_map(|e| Some((e.key.clone()?, e.to_json())))
                .collect(),
        ),
        _ => entries.first().map(RawEntry::to_json).unwrap_or(JsonValue::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Catalog;
    use crate::remote::{JsonRecordConverter, RecordConverter};
    use crate::test_support::sample_registry;
    use serde_json::json;

    #[test]
    fn test_from_record() {
        let registry = sample_registry();
        let task = registry.lookup("Task").unwrap();
        let record = JsonRecordConverter
            .convert(&json!({"type": "Task", "id": "t1", "title": "Write", "tags": ["a", "b"], "project": "p1", "attachment": "files/t1"}))
            .unwrap();

        let instance = EntityInstance::from_record(task, &record).unwrap();
        assert_eq!(instance.value("tags").unwrap().peek().unwrap().len(), 2);
        assert!(!instance.value("meta").unwrap().is_loaded());
        assert!(!instance.value("attachment").unwrap().is_loaded());
        assert_eq!(instance.value("attachment").unwrap().href(), Some("files/t1"));
        assert!(instance.value("done").unwrap().is_empty());
        assert_eq!(instance.to_json()["project"], json!("p1"));
        assert!(instance.value("missing").is_err());
    }

    #[test]
    fn test_record_type_must_match() {
        let registry = sample_registry();
        let record = JsonRecordConverter.convert(&json!({"type": "User", "id": "u1"})).unwrap();
        assert!(EntityInstance::from_record(registry.lookup("Task").unwrap(), &record).is_err());
    }

    #[test]
    fn test_from_row() {
        let registry = sample_registry();
        let catalog = Catalog::build(&registry);
        let table = catalog.table(catalog.primary("Task").unwrap());
        let row = vec![
            SqlValue::Text("t1".into()),
            SqlValue::Text("Write".into()),
            SqlValue::Text("p1".into()),
            SqlValue::Text("Project".into()),
            SqlValue::Null,
            SqlValue::Integer(1),
        ];

        let instance = EntityInstance::from_row(registry.lookup("Task").unwrap(), &table.columns, row).unwrap();
        assert_eq!(instance.id, "t1");
        assert_eq!(
            instance.value("project").unwrap().peek().unwrap(),
            vec![RawEntry::reference("Project", "p1")]
        );
        assert_eq!(instance.value("done").unwrap().peek().unwrap(), vec![RawEntry::scalar(true)]);
        assert!(!instance.value("tags").unwrap().is_loaded());
        assert_eq!(instance.to_json()["done"], json!(true));
    }
}
