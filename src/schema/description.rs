//! Wire form of the remote schema description

use super::entity::EntityType;
use super::property::{PropertyDef, PropertyKind};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_true() -> bool {
    true
}

/// Schema as served by the remote: `{ "types": [...] }`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaDescription {
    pub types: Vec<TypeDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDescription {
    pub name: String,
    #[serde(default = "default_true")]
    pub local: bool,
    #[serde(default)]
    pub properties: Vec<PropertyDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDescription {
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
    #[serde(default = "default_true")]
    pub readable: bool,
    #[serde(default = "default_true")]
    pub writable: bool,
    #[serde(default = "default_true")]
    pub storable: bool,
}

impl SchemaDescription {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Convert every type description into an (unregistered) entity type
    pub fn to_entity_types(&self) -> Result<Vec<EntityType>> {
        self.types.iter().map(TypeDescription::to_entity_type).collect()
    }
}

impl TypeDescription {
    pub fn to_entity_type(&self) -> Result<EntityType> {
        let properties = self
            .properties
            .iter()
            .map(PropertyDescription::to_property)
            .collect::<Result<Vec<_>>>()?;
        Ok(EntityType::new(self.name.clone(), self.local, properties))
    }
}

impl PropertyDescription {
    pub fn to_property(&self) -> Result<PropertyDef> {
        let kind = PropertyKind::from_parts(&self.kind, self.item.as_deref(), self.via.as_deref())?;
        Ok(PropertyDef {
            name: self.name.clone(),
            kind,
            readable: self.readable,
            writable: self.writable,
            storable: self.storable,
        })
    }
}
