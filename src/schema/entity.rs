//! Entity type definitions

use super::property::PropertyDef;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// A server-defined record schema: a name plus ordered property definitions.
///
/// Immutable after registration except for the local-availability flag, which
/// the storage engine clears while a drifted type is being rebuilt.
#[derive(Debug)]
pub struct EntityType {
    pub name: String,
    pub properties: Vec<PropertyDef>,
    local: AtomicBool,
}

impl EntityType {
    pub fn new(name: impl Into<String>, local: bool, properties: Vec<PropertyDef>) -> Self {
        Self {
            name: name.into(),
            properties,
            local: AtomicBool::new(local),
        }
    }

    /// Look up a property by name
    pub fn property(&self, name: &str) -> Result<&PropertyDef> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::not_found("Property", format!("{}.{}", self.name, name)))
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p.name == name)
    }

    /// Whether instances of this type are synchronized into the local store
    pub fn is_local(&self) -> bool {
        self.local.load(Ordering::SeqCst)
    }

    pub fn set_local(&self, local: bool) {
        self.local.store(local, Ordering::SeqCst);
    }

    /// Properties that occupy a column or auxiliary table
    pub fn stored_properties(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties.iter().filter(|p| p.is_stored())
    }
}

impl Clone for EntityType {
    fn clone(&self) -> Self {
        Self::new(self.name.clone(), self.is_local(), self.properties.clone())
    }
}
