//! Metadata Registry - entity types and their typed properties
//!
//! Pure in-memory data, populated once from the remote schema description.

pub mod description;
pub mod entity;
pub mod property;
pub mod registry;

pub use description::{PropertyDescription, SchemaDescription, TypeDescription};
pub use entity::EntityType;
pub use property::{ItemKind, PropertyDef, PropertyKind, ScalarKind, StorageShape};
pub use registry::{Registry, DEFAULT_CACHE_TTL};
