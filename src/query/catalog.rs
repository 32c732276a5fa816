//! Table catalog - interned tables and columns derived from the registry
//!
//! Tables and columns are addressed by handles (`TableId`, `ColumnRef`) into
//! one arena, so joins are de-duplicated by handle rather than by name.

use crate::schema::{EntityType, ItemKind, PropertyKind, Registry, ScalarKind, StorageShape};
use crate::{Error, Result};
use std::collections::HashMap;

/// Handle of a table in a `Catalog`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub(crate) usize);

/// Handle of a column: owning table plus position in that table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: TableId,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Id,
    Value,
    /// Entity type of a reference value
    ValueType,
    /// Owner id in an auxiliary table
    Owner,
    /// Key in a map table
    Key,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Storage column name
    pub name: String,
    /// Logical property name, if the column stores one
    pub property: Option<String>,
    pub role: ColumnRole,
    pub sql_type: &'static str,
    /// Blob-backed; skipped when a table is expanded unless references are followed
    pub deferred: bool,
    /// Scalar kind of the stored value; filter literals are converted with it
    pub scalar_kind: Option<ScalarKind>,
}

impl Column {
    fn new(name: impl Into<String>, property: Option<&str>, role: ColumnRole, sql_type: &'static str) -> Self {
        Self {
            name: name.into(),
            property: property.map(str::to_string),
            role,
            sql_type,
            deferred: false,
            scalar_kind: None,
        }
    }

    fn with_kind(mut self, kind: ScalarKind) -> Self {
        self.scalar_kind = Some(kind);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRole {
    Primary,
    List { owner: TableId, property: String },
    Map { owner: TableId, property: String },
}

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    /// Entity type this table belongs to
    pub entity: String,
    pub role: TableRole,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn is_auxiliary(&self) -> bool {
        !matches!(self.role, TableRole::Primary)
    }

    /// Owning primary table of an auxiliary table
    pub fn owner(&self) -> Option<TableId> {
        match &self.role {
            TableRole::Primary => None,
            TableRole::List { owner, .. } | TableRole::Map { owner, .. } => Some(*owner),
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn position(&self, role: ColumnRole) -> Option<usize> {
        self.columns.iter().position(|c| c.role == role)
    }
}

/// Where a back-reference is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackRefLink {
    /// `via` is a reference column on the target's primary table
    Column { table: TableId, column: usize },
    /// `via` is an entity list; the owner column of its table holds the answer
    Auxiliary { table: TableId },
}

/// Deterministic ASCII transliteration of a schema name
pub fn transliterate(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if c.is_ascii() {
            out.push('_');
        } else {
            out.push_str(&format!("x{:x}", c as u32));
        }
    }
    out
}

/// Primary table name of an entity type
pub fn primary_table_name(entity: &str) -> String {
    format!("e_{}", transliterate(entity))
}

/// Auxiliary table name: owner table plus property
pub fn auxiliary_table_name(owner_table: &str, property: &str) -> String {
    format!("{}__{}", owner_table, transliterate(property))
}

fn property_column_name(property: &str) -> String {
    let name = transliterate(property);
    if name == "id" { "id_".to_string() } else { name }
}

/// Arena of every table the local store holds
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: Vec<Table>,
    primary: HashMap<String, TableId>,
    auxiliary: HashMap<(String, String), TableId>,
    backrefs: HashMap<(String, String), BackRefLink>,
}

impl Catalog {
    /// Derive the tables of every registered entity type
    pub fn build(registry: &Registry) -> Self {
        let mut catalog = Catalog::default();
        for entity in registry.types() {
            catalog.add_entity(entity);
        }
        // Back-references point at columns of other types, so link them last
        for entity in registry.types() {
            for prop in &entity.properties {
                if let PropertyKind::BackReference { target, via } = &prop.kind {
                    match catalog.link_back_reference(target, via) {
                        Some(link) => {
                            catalog.backrefs.insert((entity.name.clone(), prop.name.clone()), link);
                        }
                        None => tracing::debug!(
                            "Back-reference {}.{} has no local column to reverse",
                            entity.name,
                            prop.name
                        ),
                    }
                }
            }
        }
        catalog
    }

    fn push(&mut self, table: Table) -> TableId {
        let id = TableId(self.tables.len());
        self.tables.push(table);
        id
    }

    fn add_entity(&mut self, entity: &EntityType) {
        let table_name = primary_table_name(&entity.name);
        let mut columns = vec![Column::new("id", None, ColumnRole::Id, "TEXT")];
        let mut multi = Vec::new();

        for prop in &entity.properties {
            match prop.storage_shape() {
                StorageShape::Column => {
                    let sql_type = match &prop.kind {
                        PropertyKind::Scalar(kind) => kind.sql_type(),
                        _ => "TEXT",
                    };
                    let mut column = Column::new(property_column_name(&prop.name), Some(&prop.name), ColumnRole::Value, sql_type);
                    column.deferred = matches!(prop.kind, PropertyKind::Blob);
                    if let PropertyKind::Scalar(kind) = &prop.kind {
                        column = column.with_kind(*kind);
                    }
                    columns.push(column);
                }
                StorageShape::ReferenceColumns => {
                    let name = property_column_name(&prop.name);
                    columns.push(Column::new(name.clone(), Some(&prop.name), ColumnRole::Value, "TEXT"));
                    columns.push(Column::new(format!("{}__type", name), Some(&prop.name), ColumnRole::ValueType, "TEXT"));
                }
                StorageShape::ListTable | StorageShape::MapTable => multi.push(prop),
                StorageShape::NotStored => {}
            }
        }

        let owner = self.push(Table {
            name: table_name.clone(),
            entity: entity.name.clone(),
            role: TableRole::Primary,
            columns,
        });
        self.primary.insert(entity.name.clone(), owner);

        for prop in multi {
            let name = auxiliary_table_name(&table_name, &prop.name);
            let (role, item) = match &prop.kind {
                PropertyKind::List { item } => (TableRole::List { owner, property: prop.name.clone() }, item),
                PropertyKind::Map { item } => (TableRole::Map { owner, property: prop.name.clone() }, item),
                _ => continue,
            };
            let mut columns = vec![Column::new("owner_id", Some(&prop.name), ColumnRole::Owner, "TEXT")];
            if matches!(role, TableRole::Map { .. }) {
                columns.push(Column::new("key", Some(&prop.name), ColumnRole::Key, "TEXT"));
            }
            let value = Column::new("value", Some(&prop.name), ColumnRole::Value, item.sql_type());
            columns.push(match item {
                ItemKind::Scalar(kind) => value.with_kind(*kind),
                ItemKind::Entity(_) => value,
            });
            if matches!((&role, item), (TableRole::List { .. }, ItemKind::Entity(_))) {
                columns.push(Column::new("value_type", Some(&prop.name), ColumnRole::ValueType, "TEXT"));
            }
            let id = self.push(Table {
                name,
                entity: entity.name.clone(),
                role,
                columns,
            });
            self.auxiliary.insert((entity.name.clone(), prop.name.clone()), id);
        }
    }

    fn link_back_reference(&self, target: &str, via: &str) -> Option<BackRefLink> {
        if let Some(aux) = self.auxiliary.get(&(target.to_string(), via.to_string())) {
            return Some(BackRefLink::Auxiliary { table: *aux });
        }
        let table_id = *self.primary.get(target)?;
        let column = self.tables[table_id.0]
            .columns
            .iter()
            .position(|c| c.property.as_deref() == Some(via) && c.role == ColumnRole::Value)?;
        Some(BackRefLink::Column { table: table_id, column })
    }

    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[id.0]
    }

    pub fn tables(&self) -> impl Iterator<Item = (TableId, &Table)> {
        self.tables.iter().enumerate().map(|(i, t)| (TableId(i), t))
    }

    pub fn column_def(&self, column: ColumnRef) -> &Column {
        &self.tables[column.table.0].columns[column.index]
    }

    /// `"table"."column"`
    pub fn qualified(&self, column: ColumnRef) -> String {
        let table = self.table(column.table);
        format!("{}.{}", quote_ident(&table.name), quote_ident(&table.columns[column.index].name))
    }

    /// Primary table of an entity type
    pub fn primary(&self, entity: &str) -> Result<TableId> {
        self.primary
            .get(entity)
            .copied()
            .ok_or_else(|| Error::not_found("Table", entity))
    }

    /// Auxiliary table of a list or map property
    pub fn auxiliary(&self, entity: &str, property: &str) -> Result<TableId> {
        self.auxiliary
            .get(&(entity.to_string(), property.to_string()))
            .copied()
            .ok_or_else(|| Error::not_found("Auxiliary table", format!("{}.{}", entity, property)))
    }

    /// Primary table followed by its auxiliary tables
    pub fn tables_for(&self, entity: &str) -> Vec<TableId> {
        self.tables()
            .filter(|(_, t)| t.entity == entity)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn back_reference(&self, entity: &str, property: &str) -> Result<BackRefLink> {
        self.backrefs
            .get(&(entity.to_string(), property.to_string()))
            .copied()
            .ok_or_else(|| Error::not_found("Back-reference link", format!("{}.{}", entity, property)))
    }

    /// Id column of a primary table, owner column of an auxiliary one
    pub fn id_column(&self, table: TableId) -> ColumnRef {
        let t = self.table(table);
        let role = if t.is_auxiliary() { ColumnRole::Owner } else { ColumnRole::Id };
        ColumnRef {
            table,
            index: t.position(role).unwrap_or(0),
        }
    }

    /// Resolve a logical name against a table.
    ///
    /// On a primary table, list and map properties resolve to the value column
    /// of their auxiliary table, which makes the query join it.
    pub fn column(&self, table: TableId, name: &str) -> Result<ColumnRef> {
        let t = self.table(table);
        if name == "id" {
            return Ok(self.id_column(table));
        }
        if let Some(index) = t
            .columns
            .iter()
            .position(|c| c.property.as_deref() == Some(name) && c.role == ColumnRole::Value)
        {
            return Ok(ColumnRef { table, index });
        }
        if let Some(index) = t.columns.iter().position(|c| c.name == name) {
            return Ok(ColumnRef { table, index });
        }
        if !t.is_auxiliary() {
            if let Ok(aux) = self.auxiliary(&t.entity, name) {
                return self.role_column(aux, ColumnRole::Value);
            }
        }
        Err(Error::not_found("Column", format!("{}.{}", t.entity, name)))
    }

    /// Key column of a map property
    pub fn key_column(&self, table: TableId, property: &str) -> Result<ColumnRef> {
        let aux = self.auxiliary(&self.table(table).entity, property)?;
        self.role_column(aux, ColumnRole::Key)
    }

    /// Entity-type column of a reference property or entity list
    pub fn type_column(&self, table: TableId, property: &str) -> Result<ColumnRef> {
        let t = self.table(table);
        if let Some(index) = t
            .columns
            .iter()
            .position(|c| c.property.as_deref() == Some(property) && c.role == ColumnRole::ValueType)
        {
            return Ok(ColumnRef { table, index });
        }
        let aux = self.auxiliary(&t.entity, property)?;
        self.role_column(aux, ColumnRole::ValueType)
    }

    fn role_column(&self, table: TableId, role: ColumnRole) -> Result<ColumnRef> {
        let t = self.table(table);
        t.position(role)
            .map(|index| ColumnRef { table, index })
            .ok_or_else(|| Error::not_found("Column", format!("{} ({:?})", t.name, role)))
    }
}

/// Double-quote an identifier for SQLite
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_registry;

    #[test]
    fn test_transliteration() {
        assert_eq!(transliterate("Work Item"), "work_item");
        assert_eq!(primary_table_name("Café"), "e_cafxe9");
        assert_eq!(auxiliary_table_name("e_task", "Tags"), "e_task__tags");
    }

    #[test]
    fn test_primary_layout() {
        let catalog = Catalog::build(&sample_registry());
        let task = catalog.table(catalog.primary("Task").unwrap());
        assert_eq!(
            task.column_names(),
            vec!["id", "title", "project", "project__type", "attachment", "done"]
        );
        assert!(task.columns[4].deferred);
    }

    #[test]
    fn test_auxiliary_layout() {
        let catalog = Catalog::build(&sample_registry());
        let tags = catalog.table(catalog.auxiliary("Task", "tags").unwrap());
        assert_eq!(tags.name, "e_task__tags");
        assert_eq!(tags.column_names(), vec!["owner_id", "value"]);

        let meta = catalog.table(catalog.auxiliary("Task", "meta").unwrap());
        assert_eq!(meta.column_names(), vec!["owner_id", "key", "value"]);
    }

    #[test]
    fn test_list_property_resolves_to_auxiliary_value() {
        let catalog = Catalog::build(&sample_registry());
        let task = catalog.primary("Task").unwrap();
        let tags = catalog.column(task, "tags").unwrap();
        assert_eq!(tags.table, catalog.auxiliary("Task", "tags").unwrap());
        assert_eq!(catalog.qualified(tags), "\"e_task__tags\".\"value\"");
        assert!(catalog.column(task, "missing").is_err());
    }

    #[test]
    fn test_back_reference_link() {
        let catalog = Catalog::build(&sample_registry());
        let link = catalog.back_reference("Project", "tasks").unwrap();
        let task = catalog.primary("Task").unwrap();
        assert_eq!(link, BackRefLink::Column { table: task, column: 2 });

        let link = catalog.back_reference("User", "watching").unwrap();
        let watchers = catalog.auxiliary("Task", "watchers").unwrap();
        assert_eq!(link, BackRefLink::Auxiliary { table: watchers });
        assert_eq!(catalog.table(watchers).column_names(), vec!["owner_id", "value", "value_type"]);
    }
}
