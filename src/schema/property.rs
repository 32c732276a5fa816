//! Property definitions and the closed set of property kinds
//!
//! Every property kind maps to exactly one storage shape:
//! - scalars and blobs: one column on the primary table
//! - references: a value column plus a sibling `__type` column
//! - lists and maps: an auxiliary table keyed by owner id
//! - back-references and calculated values: not stored

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Single-valued kinds that fit in one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Integer,
    Float,
    Boolean,
    Text,
    Timestamp,
}

impl ScalarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::Integer => "integer",
            ScalarKind::Float => "float",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Text => "text",
            ScalarKind::Timestamp => "timestamp",
        }
    }

    /// SQLite column affinity used for this kind
    pub fn sql_type(&self) -> &'static str {
        match self {
            ScalarKind::Integer | ScalarKind::Boolean => "INTEGER",
            ScalarKind::Float => "REAL",
            ScalarKind::Text | ScalarKind::Timestamp => "TEXT",
        }
    }

    pub fn all() -> &'static [ScalarKind] {
        &[
            ScalarKind::Integer,
            ScalarKind::Float,
            ScalarKind::Boolean,
            ScalarKind::Text,
            ScalarKind::Timestamp,
        ]
    }
}

impl FromStr for ScalarKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "integer" | "int" => Ok(ScalarKind::Integer),
            "float" | "double" | "real" => Ok(ScalarKind::Float),
            "boolean" | "bool" => Ok(ScalarKind::Boolean),
            "text" | "string" => Ok(ScalarKind::Text),
            "timestamp" | "datetime" | "date" => Ok(ScalarKind::Timestamp),
            _ => Err(Error::InvalidSchema(format!("Unknown scalar kind: {}", s))),
        }
    }
}

/// Kind of the items held by a list, map or back-reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Scalar(ScalarKind),
    /// Items are references to instances of another entity type
    Entity(String),
}

impl ItemKind {
    /// Scalar names win; anything else names an entity type.
    pub fn parse(s: &str) -> Self {
        match ScalarKind::from_str(s) {
            Ok(kind) => ItemKind::Scalar(kind),
            Err(_) => ItemKind::Entity(s.to_string()),
        }
    }

    pub fn entity(&self) -> Option<&str> {
        match self {
            ItemKind::Entity(name) => Some(name),
            ItemKind::Scalar(_) => None,
        }
    }

    pub fn sql_type(&self) -> &'static str {
        match self {
            ItemKind::Scalar(kind) => kind.sql_type(),
            ItemKind::Entity(_) => "TEXT",
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ItemKind::Scalar(kind) => kind.as_str(),
            ItemKind::Entity(name) => name,
        }
    }
}

/// Closed set of property kinds. Behavior is dispatched by matching on the tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Scalar(ScalarKind),
    /// Opaque binary content, loaded remotely on demand
    Blob,
    Reference {
        target: String,
    },
    List {
        item: ItemKind,
    },
    Map {
        item: ItemKind,
    },
    /// Reverse side of `via` on `target` (a reference or entity list pointing here)
    BackReference {
        target: String,
        via: String,
    },
    Calculated,
}

/// How a property is laid out in the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageShape {
    Column,
    ReferenceColumns,
    ListTable,
    MapTable,
    NotStored,
}

impl PropertyKind {
    /// Build a kind from its wire tag and optional item / via attributes.
    pub fn from_parts(kind: &str, item: Option<&str>, via: Option<&str>) -> Result<Self> {
        let need_item = || {
            item.ok_or_else(|| Error::InvalidSchema(format!("Property kind '{}' requires an item kind", kind)))
        };

        match kind.to_lowercase().as_str() {
            "blob" | "binary" => Ok(PropertyKind::Blob),
            "calculated" | "computed" => Ok(PropertyKind::Calculated),
            "reference" | "ref" => Ok(PropertyKind::Reference {
                target: need_item()?.to_string(),
            }),
            "list" => Ok(PropertyKind::List {
                item: ItemKind::parse(need_item()?),
            }),
            "map" | "dict" => Ok(PropertyKind::Map {
                item: ItemKind::parse(need_item()?),
            }),
            "query" | "backref" => {
                let via = via.ok_or_else(|| {
                    Error::InvalidSchema("Back-reference property requires 'via'".to_string())
                })?;
                Ok(PropertyKind::BackReference {
                    target: need_item()?.to_string(),
                    via: via.to_string(),
                })
            }
            other => Ok(PropertyKind::Scalar(ScalarKind::from_str(other)?)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKind::Scalar(kind) => kind.as_str(),
            PropertyKind::Blob => "blob",
            PropertyKind::Reference { .. } => "reference",
            PropertyKind::List { .. } => "list",
            PropertyKind::Map { .. } => "map",
            PropertyKind::BackReference { .. } => "query",
            PropertyKind::Calculated => "calculated",
        }
    }

    pub fn is_multi_valued(&self) -> bool {
        matches!(self, PropertyKind::List { .. } | PropertyKind::Map { .. })
    }

    /// Deferred kinds are never materialized from a record; they load on demand.
    pub fn is_deferred(&self) -> bool {
        matches!(
            self,
            PropertyKind::Blob | PropertyKind::BackReference { .. } | PropertyKind::Calculated
        )
    }

    /// Entity type this kind points at, if any
    pub fn referenced_entity(&self) -> Option<&str> {
        match self {
            PropertyKind::Reference { target } | PropertyKind::BackReference { target, .. } => {
                Some(target)
            }
            PropertyKind::List { item } | PropertyKind::Map { item } => item.entity(),
            _ => None,
        }
    }

    pub fn storage_shape(&self) -> StorageShape {
        match self {
            PropertyKind::Scalar(_) | PropertyKind::Blob => StorageShape::Column,
            PropertyKind::Reference { .. } => StorageShape::ReferenceColumns,
            PropertyKind::List { .. } => StorageShape::ListTable,
            PropertyKind::Map { .. } => StorageShape::MapTable,
            PropertyKind::BackReference { .. } | PropertyKind::Calculated => StorageShape::NotStored,
        }
    }
}

impl std::fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyKind::Reference { target } => write!(f, "reference<{}>", target),
            PropertyKind::List { item } => write!(f, "list<{}>", item.as_str()),
            PropertyKind::Map { item } => write!(f, "map<{}>", item.as_str()),
            PropertyKind::BackReference { target, via } => write!(f, "query<{}.{}>", target, via),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// One named, typed field of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
    pub name: String,
    pub kind: PropertyKind,
    pub readable: bool,
    pub writable: bool,
    /// Whether the server allows the value to be kept locally
    pub storable: bool,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            readable: true,
            writable: true,
            storable: true,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn not_storable(mut self) -> Self {
        self.storable = false;
        self
    }

    /// Storage shape, taking the storability flag into account
    pub fn storage_shape(&self) -> StorageShape {
        if !self.storable {
            return StorageShape::NotStored;
        }
        self.kind.storage_shape()
    }

    pub fn is_stored(&self) -> bool {
        self.storage_shape() != StorageShape::NotStored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_kind_roundtrip() {
        for kind in ScalarKind::all() {
            let parsed: ScalarKind = kind.as_str().parse().unwrap();
            assert_eq!(*kind, parsed);
        }
    }

    #[test]
    fn test_item_kind_prefers_scalars() {
        assert_eq!(ItemKind::parse("text"), ItemKind::Scalar(ScalarKind::Text));
        assert_eq!(ItemKind::parse("User"), ItemKind::Entity("User".to_string()));
    }

    #[test]
    fn test_kind_from_parts() {
        let kind = PropertyKind::from_parts("list", Some("Tag"), None).unwrap();
        assert_eq!(kind, PropertyKind::List { item: ItemKind::Entity("Tag".into()) });
        assert!(kind.is_multi_valued());

        let kind = PropertyKind::from_parts("query", Some("Task"), Some("project")).unwrap();
        assert!(kind.is_deferred());
        assert_eq!(kind.storage_shape(), StorageShape::NotStored);

        assert!(PropertyKind::from_parts("reference", None, None).is_err());
        assert!(PropertyKind::from_parts("query", Some("Task"), None).is_err());
        assert!(PropertyKind::from_parts("nonsense", None, None).is_err());
    }

    #[test]
    fn test_non_storable_is_not_stored() {
        let prop = PropertyDef::new("score", PropertyKind::Scalar(ScalarKind::Float)).not_storable();
        assert_eq!(prop.storage_shape(), StorageShape::NotStored);
        assert!(!prop.is_stored());
    }
}
