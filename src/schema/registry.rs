//! Metadata registry
//!
//! Types are registered in batches. Item kinds of references and lists are
//! validated once the whole batch is known, and back-references are resolved
//! in a second pass because they point at properties of other types.

use super::description::SchemaDescription;
use super::entity::EntityType;
use super::property::{PropertyDef, PropertyKind};
use crate::object::EntityInstance;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default lifetime of a cached instance
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);

struct CacheEntry {
    instance: Arc<EntityInstance>,
    stored_at: Instant,
}

/// Registry of entity types plus a short-lived per-type instance cache
pub struct Registry {
    types: HashMap<String, Arc<EntityType>>,
    order: Vec<String>,
    cache: Mutex<HashMap<String, HashMap<String, CacheEntry>>>,
    cache_ttl: Duration,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl Registry {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            types: HashMap::new(),
            order: Vec::new(),
            cache: Mutex::new(HashMap::new()),
            cache_ttl,
        }
    }

    /// Build a registry from a remote schema description
    pub fn from_description(desc: &SchemaDescription, cache_ttl: Duration) -> Result<Self> {
        let mut registry = Self::new(cache_ttl);
        registry.define_types(desc.to_entity_types()?)?;
        Ok(registry)
    }

    /// Register a single type. Item kinds must already be known.
    pub fn define_type(
        &mut self,
        name: impl Into<String>,
        local: bool,
        properties: Vec<PropertyDef>,
    ) -> Result<()> {
        self.define_types(vec![EntityType::new(name, local, properties)])
    }

    /// Register a batch of types that may reference each other.
    pub fn define_types(&mut self, batch: Vec<EntityType>) -> Result<()> {
        let mut pending: Vec<EntityType> = Vec::with_capacity(batch.len());
        for entity in batch {
            if self.types.contains_key(&entity.name) || pending.iter().any(|p| p.name == entity.name) {
                return Err(Error::InvalidSchema(format!("Duplicate entity type: {}", entity.name)));
            }
            pending.push(entity);
        }

        // Pass 1: references and list/map items must name a known type
        for entity in &pending {
            for prop in &entity.properties {
                if matches!(prop.kind, PropertyKind::BackReference { .. }) {
                    continue;
                }
                if let Some(target) = prop.kind.referenced_entity() {
                    if !self.is_known(target, &pending) {
                        return Err(Error::not_found(
                            "Entity type",
                            format!("{} (item kind of {}.{})", target, entity.name, prop.name),
                        ));
                    }
                }
            }
        }

        // Pass 2: back-references, now that every referenced column exists
        let mut unresolved: Vec<(usize, String)> = Vec::new();
        for (index, entity) in pending.iter().enumerate() {
            for prop in &entity.properties {
                let PropertyKind::BackReference { target, via } = &prop.kind else {
                    continue;
                };
                let Some(target_type) = self.find_definition(target, &pending) else {
                    tracing::warn!(
                        "Skipping back-reference {}.{}: entity type {} is not defined",
                        entity.name,
                        prop.name,
                        target
                    );
                    unresolved.push((index, prop.name.clone()));
                    continue;
                };
                let via_prop = target_type.property(via)?;
                let points_back = match &via_prop.kind {
                    PropertyKind::Reference { target } => target == &entity.name,
                    PropertyKind::List { item } => item.entity() == Some(entity.name.as_str()),
                    _ => false,
                };
                if !points_back {
                    return Err(Error::InvalidSchema(format!(
                        "{}.{} cannot reverse {}.{} ({})",
                        entity.name, prop.name, target, via, via_prop.kind
                    )));
                }
            }
        }
        for (index, name) in unresolved {
            pending[index].properties.retain(|p| p.name != name);
        }

        for entity in pending {
            tracing::debug!("Registered entity type {} ({} properties)", entity.name, entity.properties.len());
            self.order.push(entity.name.clone());
            self.types.insert(entity.name.clone(), Arc::new(entity));
        }
        Ok(())
    }

    fn is_known(&self, name: &str, pending: &[EntityType]) -> bool {
        self.types.contains_key(name) || pending.iter().any(|p| p.name == name)
    }

    fn find_definition<'a>(&'a self, name: &str, pending: &'a [EntityType]) -> Option<&'a EntityType> {
        pending
            .iter()
            .find(|p| p.name == name)
            .or_else(|| self.types.get(name).map(|t| t.as_ref()))
    }

    /// Look up an entity type by name
    pub fn lookup(&self, name: &str) -> Result<Arc<EntityType>> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("Entity type", name))
    }

    /// All types in registration order
    pub fn types(&self) -> impl Iterator<Item = &Arc<EntityType>> {
        self.order.iter().filter_map(|name| self.types.get(name))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    // ========== Instance Cache ==========

    /// Cached instance, if it was stored less than the TTL ago
    pub fn cache_get(&self, entity: &str, id: &str) -> Option<Arc<EntityInstance>> {
        let mut cache = self.cache.lock();
        let per_type = cache.get_mut(entity)?;
        match per_type.get(id) {
            Some(entry) if entry.stored_at.elapsed() < self.cache_ttl => Some(entry.instance.clone()),
            Some(_) => {
                per_type.remove(id);
                None
            }
            None => None,
        }
    }

    pub fn cache_put(&self, instance: Arc<EntityInstance>) {
        let mut cache = self.cache.lock();
        cache
            .entry(instance.entity.name.clone())
            .or_default()
            .insert(
                instance.id.clone(),
                CacheEntry {
                    instance,
                    stored_at: Instant::now(),
                },
            );
    }

    pub fn cache_evict(&self, entity: &str, id: &str) {
        if let Some(per_type) = self.cache.lock().get_mut(entity) {
            per_type.remove(id);
        }
    }

    /// Drop every cached instance of one type
    pub fn cache_clear_type(&self, entity: &str) {
        self.cache.lock().remove(entity);
    }

    /// Drop expired entries, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        let mut removed = 0;
        let mut cache = self.cache.lock();
        for per_type in cache.values_mut() {
            let before = per_type.len();
            per_type.retain(|_, entry| entry.stored_at.elapsed() < self.cache_ttl);
            removed += before - per_type.len();
        }
        removed
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::property::{ItemKind, ScalarKind};

    fn text(name: &str) -> PropertyDef {
        PropertyDef::new(name, PropertyKind::Scalar(ScalarKind::Text))
    }

    #[test]
    fn test_batch_allows_forward_references() {
        let mut registry = Registry::default();
        registry
            .define_types(vec![
                EntityType::new(
                    "Project",
                    true,
                    vec![
                        text("title"),
                        PropertyDef::new(
                            "tasks",
                            PropertyKind::BackReference { target: "Task".into(), via: "project".into() },
                        ),
                    ],
                ),
                EntityType::new(
                    "Task",
                    true,
                    vec![text("title"), PropertyDef::new("project", PropertyKind::Reference { target: "Project".into() })],
                ),
            ])
            .unwrap();

        assert_eq!(registry.len(), 2);
        let names: Vec<_> = registry.types().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["Project", "Task"]);
        assert!(registry.lookup("Project").unwrap().has_property("tasks"));
    }

    #[test]
    fn test_single_definition_rejects_unknown_item_kind() {
        let mut registry = Registry::default();
        let err = registry
            .define_type(
                "Task",
                true,
                vec![PropertyDef::new("labels", PropertyKind::List { item: ItemKind::Entity("Label".into()) })],
            )
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(registry.lookup("Task").is_err());
    }

    #[test]
    fn test_back_reference_to_missing_type_is_skipped() {
        let mut registry = Registry::default();
        registry
            .define_type(
                "Project",
                true,
                vec![
                    text("title"),
                    PropertyDef::new("tasks", PropertyKind::BackReference { target: "Ghost".into(), via: "project".into() }),
                ],
            )
            .unwrap();
        let project = registry.lookup("Project").unwrap();
        assert!(!project.has_property("tasks"));
        assert!(project.has_property("title"));
    }

    #[test]
    fn test_back_reference_to_missing_property_fails() {
        let mut registry = Registry::default();
        registry.define_type("Task", true, vec![text("title")]).unwrap();
        let err = registry
            .define_type(
                "Project",
                true,
                vec![PropertyDef::new("tasks", PropertyKind::BackReference { target: "Task".into(), via: "project".into() })],
            )
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_lookup_unknown_type() {
        let registry = Registry::default();
        assert!(matches!(registry.lookup("Nope"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_cache_expires() {
        let mut registry = Registry::new(Duration::from_millis(0));
        registry.define_type("Note", true, vec![text("body")]).unwrap();
        let note = registry.lookup("Note").unwrap();

        registry.cache_put(Arc::new(EntityInstance::new(note, "n1")));
        assert!(registry.cache_get("Note", "n1").is_none());
        assert_eq!(registry.evict_expired(), 0);
    }

    #[test]
    fn test_cache_hit_within_ttl() {
        let mut registry = Registry::default();
        registry.define_type("Note", true, vec![text("body")]).unwrap();
        let note = registry.lookup("Note").unwrap();

        registry.cache_put(Arc::new(EntityInstance::new(note, "n1")));
        assert!(registry.cache_get("Note", "n1").is_some());
        registry.cache_evict("Note", "n1");
        assert!(registry.cache_get("Note", "n1").is_none());
    }
}
