//! SQLite storage implementation

use super::schema;
use crate::object::EntityInstance;
use crate::query::catalog::{ColumnRole, Table, quote_ident};
use crate::query::{Catalog, Expr, Projection, Query, Rendered};
use crate::schema::{EntityType, PropertyDef, PropertyKind, Registry};
use crate::value::RawEntry;
use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Outcome of `prepare`, one entity type name per entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrepareReport {
    /// Tables did not exist and were created
    pub created: Vec<String>,
    /// Tables disagreed with the definition and were dropped and recreated
    pub reset: Vec<String>,
    pub unchanged: Vec<String>,
}

impl PrepareReport {
    pub fn has_drift(&self) -> bool {
        !self.reset.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityStats {
    pub entity: String,
    pub table: String,
    pub local: bool,
    pub rows: usize,
    pub auxiliary_tables: usize,
    pub checkpoint: Option<String>,
}

/// Database statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub entities: Vec<EntityStats>,
}

impl StoreStats {
    pub fn total_rows(&self) -> usize {
        self.entities.iter().map(|e| e.rows).sum()
    }
}

/// SQLite-backed local mirror
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the fixed part of the schema
    fn initialize_schema(&self) -> Result<()> {
        for stmt in schema::all_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    // ========== Schema Operations ==========

    /// Create or verify the tables of every registered entity type.
    ///
    /// A type whose existing tables disagree with the catalog, in column set or
    /// order, is marked not local and has all of its tables dropped and
    /// recreated along with its checkpoint. Other types are left alone.
    pub fn prepare(&mut self, registry: &Registry, catalog: &Catalog) -> Result<PrepareReport> {
        let mut report = PrepareReport::default();
        let known: HashSet<String> = catalog.tables().map(|(_, t)| t.name.clone()).collect();
        let tx = self.conn.transaction()?;

        for entity in registry.types() {
            let tables: Vec<&Table> = catalog
                .tables_for(&entity.name)
                .into_iter()
                .map(|id| catalog.table(id))
                .collect();
            let Some(primary) = tables.first() else {
                continue;
            };
            let owned = owned_tables(&tx, &primary.name)?;
            let stale: Vec<&String> = owned.iter().filter(|name| !known.contains(*name)).collect();

            match table_columns(&tx, &primary.name)? {
                None => {
                    // Leftover auxiliary tables cannot be trusted without their owner
                    for name in &owned {
                        drop_table(&tx, name)?;
                    }
                    clear_checkpoint(&tx, &entity.name)?;
                    create_tables(&tx, &tables)?;
                    entity.set_local(false);
                    tracing::debug!("Created tables for {}", entity.name);
                    report.created.push(entity.name.clone());
                }
                Some(_) => {
                    let mut drifted = !stale.is_empty();
                    for table in &tables {
                        if drifted {
                            break;
                        }
                        drifted = table_columns(&tx, &table.name)?.as_ref() != Some(&table.column_names());
                    }

                    if drifted {
                        tracing::warn!("{}", Error::SchemaDrift { entity: entity.name.clone() });
                        entity.set_local(false);
                        for table in &tables {
                            drop_table(&tx, &table.name)?;
                        }
                        for name in &stale {
                            drop_table(&tx, name)?;
                        }
                        clear_checkpoint(&tx, &entity.name)?;
                        create_tables(&tx, &tables)?;
                        report.reset.push(entity.name.clone());
                    } else {
                        entity.set_local(read_checkpoint(&tx, &entity.name)?.is_some());
                        report.unchanged.push(entity.name.clone());
                    }
                }
            }
        }

        tx.commit()?;
        if report.has_drift() {
            tracing::info!("Reset drifted types: {}", report.reset.join(", "));
        }
        Ok(report)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Actual column names of a table, in order; `None` if it does not exist
    pub fn table_columns(&self, table: &str) -> Result<Option<Vec<String>>> {
        Ok(table_columns(&self.conn, table)?)
    }

    /// Drop every table of one entity type, including auxiliary tables no
    /// longer in the catalog. Returns how many tables were dropped.
    pub fn drop_entity_tables(&mut self, catalog: &Catalog, entity: &str) -> Result<usize> {
        let primary = catalog.table(catalog.primary(entity)?).name.clone();
        let tx = self.conn.transaction()?;
        let mut names = owned_tables(&tx, &primary)?;
        if table_columns(&tx, &primary)?.is_some() {
            names.push(primary);
        }
        for name in &names {
            drop_table(&tx, name)?;
        }
        tx.commit()?;
        tracing::info!("Dropped {} tables of {}", names.len(), entity);
        Ok(names.len())
    }

    // ========== Write Operations ==========

    /// Upsert the primary row, then replace the auxiliary rows of every loaded
    /// multi-valued property. Unloaded multi-valued properties keep their rows.
    pub fn write(&mut self, catalog: &Catalog, instance: &EntityInstance) -> Result<()> {
        let wrap = |source: rusqlite::Error| Error::StorageWrite {
            entity: instance.entity.name.clone(),
            id: instance.id.clone(),
            source,
        };
        let tx = self.conn.transaction().map_err(wrap)?;
        write_instance(&tx, catalog, instance)?.map_err(wrap)?;
        tx.commit().map_err(wrap)?;
        Ok(())
    }

    /// Remove an instance and its auxiliary rows
    pub fn delete(&mut self, catalog: &Catalog, entity: &str, id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        for table_id in catalog.tables_for(entity) {
            let table = catalog.table(table_id);
            let key = &table.columns[catalog.id_column(table_id).index].name;
            tx.execute(
                &format!("DELETE FROM {} WHERE {} = ?1", quote_ident(&table.name), quote_ident(key)),
                [id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ========== Read Operations ==========

    /// Entries of a list or map property, in insertion order
    pub fn read_multi(&self, catalog: &Catalog, entity: &str, prop: &PropertyDef, owner_id: &str) -> Result<Vec<RawEntry>> {
        let (item, keyed) = match &prop.kind {
            PropertyKind::List { item } => (item, false),
            PropertyKind::Map { item } => (item, true),
            other => {
                return Err(Error::InvalidQuery(format!("{}.{} is a {}, not a list or map", entity, prop.name, other)));
            }
        };
        let table = catalog.table(catalog.auxiliary(entity, &prop.name)?);
        let position = |role| table.columns.iter().position(|c| c.role == role);
        let (key_at, value_at, type_at) = (position(ColumnRole::Key), position(ColumnRole::Value), position(ColumnRole::ValueType));

        let sql = format!(
            "SELECT {} FROM {} WHERE \"owner_id\" = ?1 ORDER BY rowid",
            quoted_columns(table),
            quote_ident(&table.name)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([owner_id], |row| {
            let value: SqlValue = match value_at {
                Some(i) => row.get(i)?,
                None => SqlValue::Null,
            };
            let value_type: Option<String> = match type_at {
                Some(i) => row.get(i)?,
                None => None,
            };
            let key: Option<String> = match key_at {
                Some(i) => row.get(i)?,
                None => None,
            };
            Ok((key, value, value_type))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (key, value, value_type) = row?;
            let entry = item.entry_from_storage(value, value_type);
            entries.push(match (keyed, key) {
                (true, Some(key)) => RawEntry::keyed(key, entry),
                _ => entry,
            });
        }
        Ok(entries)
    }

    /// The stored target of a reference property; empty when unset or unknown
    pub fn read_reference(&self, catalog: &Catalog, entity: &str, prop: &str, id: &str) -> Result<Vec<RawEntry>> {
        let table = catalog.primary(entity)?;
        let query = Query::new([
            Projection::Column(catalog.column(table, prop)?),
            Projection::Column(catalog.type_column(table, prop)?),
        ])
        .filter(Expr::eq(catalog.id_column(table), id));
        let rendered = query.render(catalog)?;

        let row: Option<(Option<String>, Option<String>)> = self
            .conn
            .query_row(&rendered.sql, params_from_iter(rendered.params.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;
        Ok(match row {
            Some((Some(target_id), Some(type_name))) => vec![RawEntry::reference(type_name, target_id)],
            _ => vec![RawEntry::empty()],
        })
    }

    /// Instances of the referencing type whose `via` points at `id`
    pub fn read_back_reference(&self, catalog: &Catalog, entity: &str, prop: &PropertyDef, id: &str) -> Result<Vec<RawEntry>> {
        let PropertyKind::BackReference { target, .. } = &prop.kind else {
            return Err(Error::InvalidQuery(format!("{}.{} is not a back-reference", entity, prop.name)));
        };
        let query = match catalog.back_reference(entity, &prop.name)? {
            crate::query::BackRefLink::Column { table, column } => {
                Query::new([Projection::Column(catalog.id_column(table))])
                    .filter(Expr::eq(crate::query::ColumnRef { table, index: column }, id))
                    .order_by(catalog.id_column(table), false)
            }
            crate::query::BackRefLink::Auxiliary { table } => {
                let owner = catalog.id_column(table);
                Query::new([Projection::Column(owner)])
                    .filter(Expr::eq(catalog.column(table, "value")?, id))
                    .group_by(owner)
                    .order_by(owner, false)
            }
        };
        let rendered = query.render(catalog)?;
        let ids = self.query_strings(&rendered)?;
        Ok(ids.into_iter().map(|id| RawEntry::reference(target.clone(), id)).collect())
    }

    /// Instances matching a query that projects exactly the type's primary
    /// table with references followed, as `Query::table(..).follow_references(true)`
    pub fn load_instances(&self, catalog: &Catalog, entity: &Arc<EntityType>, rendered: &Rendered) -> Result<Vec<EntityInstance>> {
        let table = catalog.table(catalog.primary(&entity.name)?);
        let rows = self.query_rows(rendered)?;
        rows.into_iter()
            .map(|row| EntityInstance::from_row(entity.clone(), &table.columns, row))
            .collect()
    }

    /// Raw rows of a rendered query
    pub fn query_rows(&self, rendered: &Rendered) -> Result<Vec<Vec<SqlValue>>> {
        let mut stmt = self.conn.prepare(&rendered.sql)?;
        let width = stmt.column_count();
        let rows = stmt
            .query_map(params_from_iter(rendered.params.iter()), |row| {
                (0..width).map(|i| row.get::<_, SqlValue>(i)).collect::<rusqlite::Result<Vec<_>>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn query_strings(&self, rendered: &Rendered) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&rendered.sql)?;
        let values = stmt
            .query_map(params_from_iter(rendered.params.iter()), |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(values)
    }

    /// Rows of a rendered query as JSON objects keyed by column name
    pub fn select(&self, rendered: &Rendered) -> Result<Vec<Map<String, JsonValue>>> {
        let mut stmt = self.conn.prepare(&rendered.sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let rows = stmt
            .query_map(params_from_iter(rendered.params.iter()), |row| {
                let mut object = Map::new();
                for (i, name) in names.iter().enumerate() {
                    object.insert(name.clone(), sql_to_json(row.get(i)?));
                }
                Ok(object)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Single integer result, e.g. of `Query::render_count`
    pub fn count(&self, rendered: &Rendered) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(&rendered.sql, params_from_iter(rendered.params.iter()), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    // ========== Checkpoint Operations ==========

    /// Last recorded checkpoint of a sync scope
    pub fn checkpoint(&self, scope: &str) -> Result<Option<String>> {
        Ok(read_checkpoint(&self.conn, scope)?)
    }

    pub fn set_checkpoint(&self, scope: &str, checkpoint: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO _mirror_checkpoints (scope, checkpoint) VALUES (?1, ?2)",
            params![scope, checkpoint],
        )?;
        Ok(())
    }

    pub fn clear_checkpoint(&self, scope: &str) -> Result<()> {
        clear_checkpoint(&self.conn, scope)?;
        Ok(())
    }

    // ========== Statistics ==========

    /// Per-type row counts and checkpoints
    pub fn stats(&self, registry: &Registry, catalog: &Catalog) -> Result<StoreStats> {
        let mut entities = Vec::new();
        for entity in registry.types() {
            let table_ids = catalog.tables_for(&entity.name);
            let Some(primary) = table_ids.first().map(|id| catalog.table(*id)) else {
                continue;
            };
            let rows = if table_columns(&self.conn, &primary.name)?.is_some() {
                let count: i64 = self.conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", quote_ident(&primary.name)),
                    [],
                    |row| row.get(0),
                )?;
                count as usize
            } else {
                0
            };
            entities.push(EntityStats {
                entity: entity.name.clone(),
                table: primary.name.clone(),
                local: entity.is_local(),
                rows,
                auxiliary_tables: table_ids.len() - 1,
                checkpoint: self.checkpoint(&entity.name)?,
            });
        }
        Ok(StoreStats { entities })
    }
}

// ========== Helpers ==========

fn quoted_columns(table: &Table) -> String {
    table
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Option<Vec<String>>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let columns = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(if columns.is_empty() { None } else { Some(columns) })
}

/// Existing auxiliary tables named after a primary table
fn owned_tables(conn: &Connection, primary: &str) -> rusqlite::Result<Vec<String>> {
    let prefix = format!("{}__", primary);
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND substr(name, 1, ?1) = ?2 ORDER BY name",
    )?;
    let names = stmt
        .query_map(params![prefix.len() as i64, prefix], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn drop_table(conn: &Connection, name: &str) -> rusqlite::Result<()> {
    conn.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)), [])?;
    Ok(())
}

fn create_tables(conn: &Connection, tables: &[&Table]) -> rusqlite::Result<()> {
    for table in tables {
        conn.execute(&schema::create_table_sql(table), [])?;
        if let Some(index) = schema::create_index_sql(table) {
            conn.execute(&index, [])?;
        }
    }
    Ok(())
}

fn read_checkpoint(conn: &Connection, scope: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT checkpoint FROM _mirror_checkpoints WHERE scope = ?1",
        [scope],
        |row| row.get(0),
    )
    .optional()
}

fn clear_checkpoint(conn: &Connection, scope: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM _mirror_checkpoints WHERE scope = ?1", [scope])?;
    Ok(())
}

/// Primary-table values of an instance, in catalog column order
fn primary_values(table: &Table, instance: &EntityInstance) -> Result<Vec<SqlValue>> {
    let mut values = Vec::with_capacity(table.columns.len());
    for column in &table.columns {
        let value = match (column.role, column.property.as_deref()) {
            (ColumnRole::Id, _) => SqlValue::Text(instance.id.clone()),
            (ColumnRole::Value, Some(name)) => {
                let prop = instance.entity.property(name)?;
                let typed = instance.value(name)?;
                let first = typed.peek().and_then(|entries| entries.into_iter().next());
                match (&prop.kind, first) {
                    (PropertyKind::Blob, entry) => entry
                        .and_then(|e| e.href)
                        .or_else(|| typed.href().map(str::to_string))
                        .map(SqlValue::Text)
                        .unwrap_or(SqlValue::Null),
                    (kind, Some(entry)) => kind.to_storage_value(&entry),
                    (_, None) => SqlValue::Null,
                }
            }
            (ColumnRole::ValueType, Some(name)) => instance
                .value(name)?
                .peek()
                .and_then(|entries| entries.into_iter().next())
                .filter(|entry| entry.id.is_some())
                .and_then(|entry| entry.type_name)
                .map(SqlValue::Text)
                .unwrap_or(SqlValue::Null),
            _ => SqlValue::Null,
        };
        values.push(value);
    }
    Ok(values)
}

/// Outer `Result` is a schema mismatch, inner one a storage failure
fn write_instance(tx: &Transaction<'_>, catalog: &Catalog, instance: &EntityInstance) -> Result<rusqlite::Result<()>> {
    let entity = &instance.entity;
    let tables = catalog.tables_for(&entity.name);
    let Some(primary) = tables.first().map(|id| catalog.table(*id)) else {
        return Err(Error::not_found("Table", &entity.name));
    };

    let values = primary_values(primary, instance)?;
    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
    let upsert = format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        quote_ident(&primary.name),
        quoted_columns(primary),
        placeholders.join(", ")
    );
    if let Err(e) = tx.execute(&upsert, params_from_iter(values.iter())) {
        return Ok(Err(e));
    }

    for table_id in tables.iter().skip(1) {
        let table = catalog.table(*table_id);
        let Some(prop_name) = table.columns.first().and_then(|c| c.property.as_deref()) else {
            continue;
        };
        let prop = entity.property(prop_name)?;
        let Some(entries) = instance.value(prop_name)?.peek() else {
            continue;
        };
        if let Err(e) = replace_entries(tx, table, prop, &instance.id, &entries) {
            return Ok(Err(e));
        }
    }
    Ok(Ok(()))
}

/// Delete-then-insert the rows of one multi-valued property
fn replace_entries(tx: &Transaction<'_>, table: &Table, prop: &PropertyDef, owner_id: &str, entries: &[RawEntry]) -> rusqlite::Result<()> {
    let item = match &prop.kind {
        PropertyKind::List { item } | PropertyKind::Map { item } => item,
        _ => return Ok(()),
    };
    tx.execute(
        &format!("DELETE FROM {} WHERE \"owner_id\" = ?1", quote_ident(&table.name)),
        [owner_id],
    )?;

    let placeholders: Vec<String> = (1..=table.columns.len()).map(|i| format!("?{}", i)).collect();
    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&table.name),
        quoted_columns(table),
        placeholders.join(", ")
    );
    let mut stmt = tx.prepare(&insert)?;
    for entry in entries.iter().filter(|e| !e.is_empty()) {
        let row: Vec<SqlValue> = table
            .columns
            .iter()
            .map(|column| match column.role {
                ColumnRole::Owner => SqlValue::Text(owner_id.to_string()),
                ColumnRole::Key => entry.key.clone().map(SqlValue::Text).unwrap_or(SqlValue::Null),
                ColumnRole::ValueType => entry.type_name.clone().map(SqlValue::Text).unwrap_or(SqlValue::Null),
                _ => item.to_storage_value(entry),
            })
            .collect();
        stmt.execute(params_from_iter(row.iter()))?;
    }
    Ok(())
}

fn sql_to_json(value: SqlValue) -> JsonValue {
    match value {
        SqlValue::Null => JsonValue::Null,
        SqlValue::Integer(i) => JsonValue::from(i),
        SqlValue::Real(f) => serde_json::Number::from_f64(f).map(JsonValue::Number).unwrap_or(JsonValue::Null),
        SqlValue::Text(s) => JsonValue::String(s),
        SqlValue::Blob(b) => JsonValue::String(String::from_utf8_lossy(&b).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::FilterTriple;
    use crate::query::Op;
    use crate::test_support::sample_registry;
    use serde_json::json;

    fn prepared() -> (SqliteStore, Registry, Catalog) {
        let registry = sample_registry();
        let catalog = Catalog::build(&registry);
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.prepare(&registry, &catalog).unwrap();
        (store, registry, catalog)
    }

    fn task(registry: &Registry, id: &str, tags: &[&str]) -> EntityInstance {
        let instance = EntityInstance::new(registry.lookup("Task").unwrap(), id);
        instance.set("title", vec![RawEntry::scalar(format!("task {}", id))]).unwrap();
        instance
            .set("tags", tags.iter().map(|t| RawEntry::scalar(*t)).collect())
            .unwrap();
        instance
    }

    #[test]
    fn test_prepare_creates_then_is_idempotent() {
        let (mut store, registry, catalog) = prepared();
        assert_eq!(
            store.table_columns("e_task__watchers").unwrap(),
            Some(vec!["owner_id".to_string(), "value".to_string(), "value_type".to_string()])
        );

        store.write(&catalog, &task(&registry, "t1", &["a"])).unwrap();
        let report = store.prepare(&registry, &catalog).unwrap();
        assert!(!report.has_drift());
        assert_eq!(report.unchanged.len(), 3);
        assert_eq!(store.stats(&registry, &catalog).unwrap().total_rows(), 1);
    }

    #[test]
    fn test_column_order_change_is_drift() {
        let (mut store, registry, catalog) = prepared();
        store.write(&catalog, &task(&registry, "t1", &[])).unwrap();
        store.conn.execute("DROP TABLE e_project", []).unwrap();
        store.conn.execute("CREATE TABLE e_project (title TEXT, id TEXT PRIMARY KEY)", []).unwrap();

        let report = store.prepare(&registry, &catalog).unwrap();
        assert_eq!(report.reset, vec!["Project".to_string()]);
        assert!(!registry.lookup("Project").unwrap().is_local());
        assert_eq!(store.table_columns("e_project").unwrap().unwrap(), vec!["id", "title"]);
        assert_eq!(store.stats(&registry, &catalog).unwrap().total_rows(), 1);
    }

    #[test]
    fn test_stale_auxiliary_table_is_drift() {
        let (mut store, registry, catalog) = prepared();
        store.conn.execute("CREATE TABLE e_user__aliases (owner_id TEXT, value TEXT)", []).unwrap();
        let report = store.prepare(&registry, &catalog).unwrap();
        assert_eq!(report.reset, vec!["User".to_string()]);
        assert!(store.table_columns("e_user__aliases").unwrap().is_none());
    }

    #[test]
    fn test_orphaned_auxiliary_table_is_recreated() {
        let registry = sample_registry();
        let catalog = Catalog::build(&registry);
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.conn.execute("CREATE TABLE e_task__tags (owner_id TEXT NOT NULL)", []).unwrap();

        let report = store.prepare(&registry, &catalog).unwrap();
        assert!(report.created.contains(&"Task".to_string()));
        assert_eq!(
            store.table_columns("e_task__tags").unwrap(),
            Some(vec!["owner_id".to_string(), "value".to_string()])
        );
        store.write(&catalog, &task(&registry, "t1", &["a"])).unwrap();
    }

    #[test]
    fn test_list_rewrite_leaves_no_stale_rows() {
        let (mut store, registry, catalog) = prepared();
        let tags = registry.lookup("Task").unwrap().property("tags").unwrap().clone();

        store.write(&catalog, &task(&registry, "t1", &["a", "b", "c"])).unwrap();
        let read = store.read_multi(&catalog, "Task", &tags, "t1").unwrap();
        assert_eq!(read, vec![RawEntry::scalar("a"), RawEntry::scalar("b"), RawEntry::scalar("c")]);

        store.write(&catalog, &task(&registry, "t1", &["a", "c"])).unwrap();
        let read = store.read_multi(&catalog, "Task", &tags, "t1").unwrap();
        assert_eq!(read, vec![RawEntry::scalar("a"), RawEntry::scalar("c")]);
    }

    #[test]
    fn test_map_and_entity_list_roundtrip() {
        let (mut store, registry, catalog) = prepared();
        let entity = registry.lookup("Task").unwrap();
        let instance = EntityInstance::new(entity.clone(), "t1");
        instance
            .set("meta", vec![RawEntry::keyed("size", RawEntry::scalar(3)), RawEntry::keyed("rank", RawEntry::scalar(1))])
            .unwrap();
        instance.set("watchers", vec![RawEntry::reference("User", "u1")]).unwrap();
        store.write(&catalog, &instance).unwrap();

        let meta = store.read_multi(&catalog, "Task", entity.property("meta").unwrap(), "t1").unwrap();
        assert_eq!(meta[0], RawEntry::keyed("size", RawEntry::scalar(3)));
        let watchers = store.read_multi(&catalog, "Task", entity.property("watchers").unwrap(), "t1").unwrap();
        assert_eq!(watchers, vec![RawEntry::reference("User", "u1")]);
    }

    #[test]
    fn test_references_and_back_references() {
        let (mut store, registry, catalog) = prepared();
        let project = registry.lookup("Project").unwrap();
        for id in ["t1", "t2"] {
            let instance = task(&registry, id, &[]);
            instance.set("project", vec![RawEntry::reference("Project", "p1")]).unwrap();
            instance.set("watchers", vec![RawEntry::reference("User", "u1")]).unwrap();
            store.write(&catalog, &instance).unwrap();
        }

        assert_eq!(
            store.read_reference(&catalog, "Task", "project", "t1").unwrap(),
            vec![RawEntry::reference("Project", "p1")]
        );
        assert_eq!(
            store.read_reference(&catalog, "Task", "project", "missing").unwrap(),
            vec![RawEntry::empty()]
        );

        let tasks = store
            .read_back_reference(&catalog, "Project", project.property("tasks").unwrap(), "p1")
            .unwrap();
        assert_eq!(tasks, vec![RawEntry::reference("Task", "t1"), RawEntry::reference("Task", "t2")]);

        let user = registry.lookup("User").unwrap();
        let watching = store
            .read_back_reference(&catalog, "User", user.property("watching").unwrap(), "u1")
            .unwrap();
        assert_eq!(watching.len(), 2);
        assert!(
            store
                .read_back_reference(&catalog, "Project", project.property("tasks").unwrap(), "p9")
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_query_dedup_and_distinct_count() {
        let (mut store, registry, catalog) = prepared();
        store.write(&catalog, &task(&registry, "t1", &["x", "x", "y"])).unwrap();
        store.write(&catalog, &task(&registry, "t2", &["x"])).unwrap();
        store.write(&catalog, &task(&registry, "t3", &["z"])).unwrap();

        let table = catalog.primary("Task").unwrap();
        let triples = vec![FilterTriple::new("tags", Op::Eq, json!(["x", "y"]))];
        let query = Query::table(table).filter_triples(&catalog, table, &triples).unwrap();

        let rows = store.select(&query.render(&catalog).unwrap()).unwrap();
        let ids: Vec<&str> = rows.iter().filter_map(|r| r["id"].as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"t1") && ids.contains(&"t2"));
        assert_eq!(store.count(&query.render_count(&catalog).unwrap()).unwrap(), 2);
    }

    #[test]
    fn test_load_instances_and_delete() {
        let (mut store, registry, catalog) = prepared();
        let entity = registry.lookup("Task").unwrap();
        let instance = task(&registry, "t1", &["a"]);
        instance.set("done", vec![RawEntry::scalar(true)]).unwrap();
        store.write(&catalog, &instance).unwrap();

        let table = catalog.primary("Task").unwrap();
        let rendered = Query::table(table).follow_references(true).render(&catalog).unwrap();
        let loaded = store.load_instances(&catalog, &entity, &rendered).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].value("done").unwrap().peek().unwrap(), vec![RawEntry::scalar(true)]);

        store.delete(&catalog, "Task", "t1").unwrap();
        assert!(store.load_instances(&catalog, &entity, &rendered).unwrap().is_empty());
        assert!(store.read_multi(&catalog, "Task", entity.property("tags").unwrap(), "t1").unwrap().is_empty());
    }

    #[test]
    fn test_checkpoints() {
        let (mut store, _registry, catalog) = prepared();
        assert!(store.checkpoint("Task").unwrap().is_none());
        store.set_checkpoint("Task", "2024-01-01T00:00:00").unwrap();
        store.set_checkpoint("Task", "2024-01-02T00:00:00").unwrap();
        assert_eq!(store.checkpoint("Task").unwrap().as_deref(), Some("2024-01-02T00:00:00"));

        assert_eq!(store.drop_entity_tables(&catalog, "Task").unwrap(), 4);
        store.clear_checkpoint("Task").unwrap();
        assert!(store.checkpoint("Task").unwrap().is_none());
    }
}
