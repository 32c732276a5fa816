//! Session context
//!
//! One `Session` owns everything the components share: the registry (with
//! its instance cache), the table catalog, the local store and the remote
//! collaborators. It is created explicitly after the schema is known and torn
//! down explicitly; there is no ambient global state.

use crate::object::{EntityInstance, entries_json};
use crate::query::{Catalog, FilterTriple, Query};
use crate::remote::{FetchParams, JsonRecordConverter, PAGE_META_TYPE, RecordConverter, RemoteSource};
use crate::schema::{DEFAULT_CACHE_TTL, EntityType, Registry, SchemaDescription, StorageShape, TypeDescription};
use crate::storage::{PrepareReport, SqliteStore, StoreStats};
use crate::stream::{DEFAULT_PAGE_DELAY, DEFAULT_QUEUE_CAPACITY};
use crate::sync::CheckpointPolicy;
use crate::value::{PropertyLoader, RawEntry};
use crate::Result;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Resource the schema description is fetched from
pub const SCHEMA_RESOURCE: &str = "schema";

/// Tunables shared by the components of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub cache_ttl: Duration,
    /// Streaming queue capacity, i.e. records per delivered batch
    pub page_size: usize,
    /// Pause between consecutive page fetches
    pub page_delay: Duration,
    pub checkpoint_policy: CheckpointPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            page_size: DEFAULT_QUEUE_CAPACITY,
            page_delay: DEFAULT_PAGE_DELAY,
            checkpoint_policy: CheckpointPolicy::default(),
        }
    }
}

pub struct Session {
    options: SessionOptions,
    registry: Registry,
    catalog: Catalog,
    store: Mutex<SqliteStore>,
    remote: Arc<dyn RemoteSource>,
    converter: Arc<dyn RecordConverter>,
}

impl Session {
    pub fn new(registry: Registry, store: SqliteStore, remote: Arc<dyn RemoteSource>, options: SessionOptions) -> Self {
        let catalog = Catalog::build(&registry);
        Self {
            options,
            registry,
            catalog,
            store: Mutex::new(store),
            remote,
            converter: Arc::new(JsonRecordConverter),
        }
    }

    /// Session over an already parsed schema description
    pub fn from_description(
        description: &SchemaDescription,
        store: SqliteStore,
        remote: Arc<dyn RemoteSource>,
        options: SessionOptions,
    ) -> Result<Self> {
        let registry = Registry::from_description(description, options.cache_ttl)?;
        Ok(Self::new(registry, store, remote, options))
    }

    /// Fetch the schema description from the remote and build a session.
    /// Each record of the schema resource describes one entity type.
    pub async fn bootstrap(store: SqliteStore, remote: Arc<dyn RemoteSource>, options: SessionOptions) -> Result<Self> {
        let response = remote.fetch(SCHEMA_RESOURCE, &FetchParams::default()).await?;
        let types = response
            .records
            .into_iter()
            .filter(|record| record.get("type").and_then(JsonValue::as_str) != Some(PAGE_META_TYPE))
            .map(serde_json::from_value::<TypeDescription>)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        tracing::info!("Fetched schema with {} types", types.len());
        Self::from_description(&SchemaDescription { types }, store, remote, options)
    }

    pub fn with_converter(mut self, converter: Arc<dyn RecordConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn remote(&self) -> Arc<dyn RemoteSource> {
        self.remote.clone()
    }

    pub fn converter(&self) -> Arc<dyn RecordConverter> {
        self.converter.clone()
    }

    pub fn lookup(&self, entity: &str) -> Result<Arc<EntityType>> {
        self.registry.lookup(entity)
    }

    /// Exclusive access to the local store; one transaction at a time
    pub async fn store(&self) -> MutexGuard<'_, SqliteStore> {
        self.store.lock().await
    }

    /// Create or verify local tables, resetting drifted types
    pub async fn prepare(&self) -> Result<PrepareReport> {
        let report = self.store().await.prepare(&self.registry, &self.catalog)?;
        for entity in &report.reset {
            self.registry.cache_clear_type(entity);
        }
        Ok(report)
    }

    // ========== Read Operations ==========

    /// One instance by id, from the cache or the local store
    pub async fn get(&self, entity: &str, id: &str) -> Result<Option<Arc<EntityInstance>>> {
        if let Some(cached) = self.registry.cache_get(entity, id) {
            return Ok(Some(cached));
        }
        let triples = [FilterTriple::new("id", crate::query::Op::Eq, id)];
        Ok(self.find(entity, &triples, Some(1)).await?.into_iter().next())
    }

    /// Stored instances matching all filters, at most one per id
    pub async fn find(&self, entity: &str, filters: &[FilterTriple], limit: Option<u64>) -> Result<Vec<Arc<EntityInstance>>> {
        let entity_type = self.registry.lookup(entity)?;
        let mut query = self.query_for(entity, filters)?;
        if let Some(limit) = limit {
            query = query.limit(limit, 0);
        }
        let rendered = query.render(&self.catalog)?;
        let loaded = self.store().await.load_instances(&self.catalog, &entity_type, &rendered)?;

        Ok(loaded
            .into_iter()
            .map(|instance| match self.registry.cache_get(entity, &instance.id) {
                Some(cached) => cached,
                None => {
                    let instance = Arc::new(instance);
                    self.registry.cache_put(instance.clone());
                    instance
                }
            })
            .collect())
    }

    /// Number of distinct stored instances matching all filters
    pub async fn count(&self, entity: &str, filters: &[FilterTriple]) -> Result<u64> {
        let rendered = self.query_for(entity, filters)?.render_count(&self.catalog)?;
        self.store().await.count(&rendered)
    }

    /// Rows of an arbitrary query as JSON objects
    pub async fn select(&self, query: &Query) -> Result<Vec<Map<String, JsonValue>>> {
        let rendered = query.render(&self.catalog)?;
        self.store().await.select(&rendered)
    }

    /// Query over the stored instances of `entity`, ordered by id
    pub fn query_for(&self, entity: &str, filters: &[FilterTriple]) -> Result<Query> {
        let table = self.catalog.primary(entity)?;
        Query::table(table)
            .follow_references(true)
            .order_by(self.catalog.id_column(table), false)
            .filter_triples(&self.catalog, table, filters)
    }

    /// Data of one property, loading it on first use. Concurrent callers for
    /// the same instance and property share one load.
    pub async fn value(&self, instance: &EntityInstance, property: &str) -> Result<Vec<RawEntry>> {
        let prop = instance.entity.property(property)?;
        instance
            .value(property)?
            .value(|| PropertyLoader::new(self, instance, prop).load())
            .await
    }

    /// JSON of an instance as the local store holds it. Lists and maps not
    /// loaded yet are read from their auxiliary tables; properties that are
    /// not stored locally stay omitted.
    pub async fn stored_json(&self, instance: &EntityInstance) -> Result<JsonValue> {
        let mut json = instance.to_json();
        let store = self.store().await;
        for prop in &instance.entity.properties {
            if !matches!(prop.storage_shape(), StorageShape::ListTable | StorageShape::MapTable) {
                continue;
            }
            let entries = match instance.value(&prop.name)?.peek() {
                Some(entries) => entries,
                None => store.read_multi(&self.catalog, &instance.entity.name, prop, &instance.id)?,
            };
            if let Some(object) = json.as_object_mut() {
                object.insert(prop.name.clone(), entries_json(&prop.kind, &entries));
            }
        }
        Ok(json)
    }

    // ========== Write Operations ==========

    pub async fn write(&self, instance: &EntityInstance) -> Result<()> {
        self.store().await.write(&self.catalog, instance)?;
        self.registry.cache_evict(&instance.entity.name, &instance.id);
        Ok(())
    }

    pub async fn delete(&self, entity: &str, id: &str) -> Result<()> {
        self.store().await.delete(&self.catalog, entity, id)?;
        self.registry.cache_evict(entity, id);
        Ok(())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store().await.stats(&self.registry, &self.catalog)
    }

    /// End of the session: cached instances are dropped and no type is
    /// considered locally available any more
    pub fn teardown(&self) {
        self.registry.clear_cache();
        for entity in self.registry.types() {
            entity.set_local(false);
        }
        tracing::debug!("Session torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Op;
    use crate::remote::MemorySource;
    use crate::test_support::sample_registry;
    use serde_json::json;

    async fn session() -> (Session, Arc<MemorySource>) {
        let remote = Arc::new(MemorySource::new());
        let session = Session::new(
            sample_registry(),
            SqliteStore::open_in_memory().unwrap(),
            remote.clone(),
            SessionOptions::default(),
        );
        session.prepare().await.unwrap();
        (session, remote)
    }

    fn task(session: &Session, id: &str, title: &str, tags: &[&str]) -> EntityInstance {
        let instance = EntityInstance::new(session.lookup("Task").unwrap(), id);
        instance.set("title", vec![RawEntry::scalar(title)]).unwrap();
        instance.set("tags", tags.iter().map(|t| RawEntry::scalar(*t)).collect()).unwrap();
        instance
    }

    #[tokio::test]
    async fn test_bootstrap_from_remote_schema() {
        let remote = Arc::new(MemorySource::new());
        remote.add_page(
            SCHEMA_RESOURCE,
            None,
            vec![json!({"name": "Note", "properties": [{"name": "body", "kind": "text"}]})],
            None,
            None,
        );
        let session = Session::bootstrap(SqliteStore::open_in_memory().unwrap(), remote, SessionOptions::default())
            .await
            .unwrap();
        assert!(session.lookup("Note").unwrap().has_property("body"));
        assert_eq!(session.prepare().await.unwrap().created, vec!["Note".to_string()]);

        let broken = Arc::new(MemorySource::new());
        broken.add_page(SCHEMA_RESOURCE, None, vec![json!({"properties": []})], None, None);
        assert!(
            Session::bootstrap(SqliteStore::open_in_memory().unwrap(), broken, SessionOptions::default())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_find_count_and_cache() {
        let (session, _) = session().await;
        session.write(&task(&session, "t1", "alpha", &["x", "y"])).await.unwrap();
        session.write(&task(&session, "t2", "beta", &["x"])).await.unwrap();

        let filters = [FilterTriple::new("tags", Op::Eq, json!(["x", "y"]))];
        let found = session.find("Task", &filters, None).await.unwrap();
        assert_eq!(found.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["t1", "t2"]);
        assert_eq!(session.count("Task", &filters).await.unwrap(), 2);

        let first = session.get("Task", "t1").await.unwrap().unwrap();
        let again = session.get("Task", "t1").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(session.get("Task", "nope").await.unwrap().is_none());

        session.teardown();
        assert!(!session.lookup("Task").unwrap().is_local());
    }

    #[tokio::test]
    async fn test_local_list_value_loads_from_store() {
        let (session, remote) = session().await;
        session.lookup("Task").unwrap().set_local(true);
        session.write(&task(&session, "t1", "alpha", &["a", "b"])).await.unwrap();

        let instance = session.get("Task", "t1").await.unwrap().unwrap();
        assert!(!instance.value("tags").unwrap().is_loaded());
        let tags = session.value(&instance, "tags").await.unwrap();
        assert_eq!(tags, vec![RawEntry::scalar("a"), RawEntry::scalar("b")]);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stored_json_includes_lists_and_maps() {
        let (session, remote) = session().await;
        let stored = task(&session, "t1", "alpha", &["a", "b"]);
        stored.set("meta", vec![RawEntry::keyed("priority", RawEntry::scalar(3))]).unwrap();
        session.write(&stored).await.unwrap();

        let instance = session.get("Task", "t1").await.unwrap().unwrap();
        assert!(instance.to_json().get("tags").is_none());

        let json = session.stored_json(&instance).await.unwrap();
        assert_eq!(json["title"], json!("alpha"));
        assert_eq!(json["tags"], json!(["a", "b"]));
        assert_eq!(json["meta"], json!({"priority": 3}));
        assert_eq!(json["watchers"], json!([]));
        assert!(!instance.value("tags").unwrap().is_loaded());
        assert!(remote.calls().is_empty());
    }
}
