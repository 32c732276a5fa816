//! Kind-dispatched property loaders
//!
//! Lists and maps of a locally synchronized type come from their auxiliary
//! table, references from the primary row, back-references from the table
//! they reverse. Everything else, and anything not held locally, is fetched
//! from the remote.

use super::raw::{RawEntry, entries_from_wire};
use crate::object::EntityInstance;
use crate::remote::{FetchParams, FetchResponse, PAGE_META_TYPE};
use crate::schema::{PropertyDef, PropertyKind};
use crate::session::Session;
use crate::Result;
use serde_json::Value as JsonValue;

pub struct PropertyLoader<'a> {
    session: &'a Session,
    instance: &'a EntityInstance,
    property: &'a PropertyDef,
}

impl<'a> PropertyLoader<'a> {
    pub fn new(session: &'a Session, instance: &'a EntityInstance, property: &'a PropertyDef) -> Self {
        Self {
            session,
            instance,
            property,
        }
    }

    fn is_local(&self) -> bool {
        self.instance.entity.is_local() && self.property.storable
    }

    /// Remote resource of this property: the href the record named, or
    /// `<type>/<id>/<property>`
    pub fn resource(&self) -> String {
        self.instance
            .value(&self.property.name)
            .ok()
            .and_then(|v| v.href().map(str::to_string))
            .unwrap_or_else(|| format!("{}/{}/{}", self.instance.entity.name, self.instance.id, self.property.name))
    }

    pub async fn load(self) -> Result<Vec<RawEntry>> {
        let catalog = self.session.catalog();
        let entity = &self.instance.entity.name;

        match &self.property.kind {
            PropertyKind::List { .. } | PropertyKind::Map { .. } if self.is_local() => {
                tracing::debug!("Loading {}.{} of {} locally", entity, self.property.name, self.instance.id);
                let store = self.session.store().await;
                store.read_multi(catalog, entity, self.property, &self.instance.id)
            }
            PropertyKind::Reference { .. } if self.is_local() => {
                let store = self.session.store().await;
                store.read_reference(catalog, entity, &self.property.name, &self.instance.id)
            }
            PropertyKind::BackReference { target, via } => {
                let target_local = self.session.lookup(target)?.is_local();
                if target_local && catalog.back_reference(entity, &self.property.name).is_ok() {
                    let store = self.session.store().await;
                    store.read_back_reference(catalog, entity, self.property, &self.instance.id)
                } else {
                    self.load_remote_back_reference(target, via).await
                }
            }
            _ => self.load_remote().await,
        }
    }

    async fn load_remote(&self) -> Result<Vec<RawEntry>> {
        let resource = self.resource();
        tracing::debug!("Loading {} remotely", resource);
        let response = self
            .session
            .remote()
            .fetch(&resource, &FetchParams::default())
            .await
            .inspect_err(|e| tracing::error!("Failed to load {}: {}", resource, e))?;

        let mut entries = entries_from_response(self.property, &response);
        if matches!(self.property.kind, PropertyKind::Blob) {
            let href = self.instance.value(&self.property.name)?.href().map(str::to_string);
            for entry in entries.iter_mut().filter(|e| e.href.is_none()) {
                entry.href = href.clone();
            }
        }
        Ok(entries)
    }

    /// Instances of `target` whose `via` points at this instance
    async fn load_remote_back_reference(&self, target: &str, via: &str) -> Result<Vec<RawEntry>> {
        let params = FetchParams::default().with_filter(via, self.instance.id.clone());
        let response = self.session.remote().fetch(target, &params).await?;
        let converter = self.session.converter();

        let mut entries = Vec::new();
        for raw in &response.records {
            let record = converter.convert(raw)?;
            if !record.is_page_meta() {
                entries.push(RawEntry::reference(record.type_name, record.id));
            }
        }
        Ok(entries)
    }
}

/// Entries of one property out of a property fetch. The first data record
/// carries the value under the property name, under `value`, or (for blobs)
/// as `{href, value}` itself.
fn entries_from_response(property: &PropertyDef, response: &FetchResponse) -> Vec<RawEntry> {
    let Some(record) = response
        .records
        .iter()
        .find(|r| r.get("type").and_then(JsonValue::as_str) != Some(PAGE_META_TYPE))
    else {
        return Vec::new();
    };
    let fields = record.get("fields").unwrap_or(record);
    let wire = fields.get(&property.name).or_else(|| match property.kind {
        PropertyKind::Blob => Some(fields),
        _ => fields.get("value"),
    });
    match wire {
        Some(wire) => entries_from_wire(&property.kind, wire),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemorySource;
    use crate::session::SessionOptions;
    use crate::storage::SqliteStore;
    use crate::test_support::sample_registry;
    use serde_json::json;
    use std::sync::Arc;

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

    #[tokio::test]
    async fn test_non_local_list_loads_remotely() {
        let (session, remote) = session().await;
        remote.insert("Task/t1/tags", None, FetchResponse::new(vec![json!({"type": "Task", "id": "t1", "tags": ["r"]})]));

        let instance = EntityInstance::new(session.lookup("Task").unwrap(), "t1");
        instance.value("tags").unwrap().invalidate();
        let tags = session.value(&instance, "tags").await.unwrap();
        assert_eq!(tags, vec![RawEntry::scalar("r")]);
        assert_eq!(remote.call_count("Task/t1/tags"), 1);
    }

    #[tokio::test]
    async fn test_blob_loads_from_href() {
        let (session, remote) = session().await;
        remote.insert("files/9", None, FetchResponse::new(vec![json!({"type": "File", "id": "9", "value": "Zm9v"})]));

        let record = session
            .converter()
            .convert(&json!({"type": "Task", "id": "t1", "attachment": "files/9"}))
            .unwrap();
        let instance = EntityInstance::from_record(session.lookup("Task").unwrap(), &record).unwrap();
        let blob = session.value(&instance, "attachment").await.unwrap();
        assert_eq!(blob[0].value, Some(json!("Zm9v")));
        assert_eq!(blob[0].href.as_deref(), Some("files/9"));
    }

    #[tokio::test]
    async fn test_back_reference_local_and_remote() {
        let (session, remote) = session().await;
        let project = EntityInstance::new(session.lookup("Project").unwrap(), "p1");

        remote.add_page(
            "Task",
            None,
            vec![
                json!({"type": "Task", "id": "t1", "project": "p1"}),
                json!({"type": "Task", "id": "t2", "project": "p2"}),
            ],
            None,
            Some(2),
        );
        let tasks = session.value(&project, "tasks").await.unwrap();
        assert_eq!(tasks, vec![RawEntry::reference("Task", "t1")]);

        // once Task is local the store answers, and an empty answer is explicit
        session.lookup("Task").unwrap().set_local(true);
        let other = EntityInstance::new(session.lookup("Project").unwrap(), "p2");
        let tasks = session.value(&other, "tasks").await.unwrap();
        assert_eq!(tasks, vec![RawEntry::empty()]);
        assert_eq!(remote.call_count("Task"), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let (session, remote) = session().await;
        remote.fail("Task/t1/meta", 500);
        let instance = EntityInstance::new(session.lookup("Task").unwrap(), "t1");
        instance.value("meta").unwrap().invalidate();
        assert!(session.value(&instance, "meta").await.is_err());
        assert!(!instance.value("meta").unwrap().is_loaded());
    }
}
