//! Database schema definitions
//!
//! Entity tables are derived from the catalog; only the checkpoint table is
//! fixed.

use crate::query::catalog::{Table, TableRole, quote_ident};

/// Name of the table holding per-scope sync checkpoints
pub const CHECKPOINTS_TABLE: &str = "_mirror_checkpoints";

/// SQL to create the checkpoints table
pub const CREATE_CHECKPOINTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _mirror_checkpoints (
    scope TEXT PRIMARY KEY,
    checkpoint TEXT NOT NULL
)
"#;

/// All fixed schema statements
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![CREATE_CHECKPOINTS_TABLE]
}

/// `CREATE TABLE` for a catalog table. Primary tables key on `id`;
/// auxiliary tables get a non-unique owner column.
pub fn create_table_sql(table: &Table) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let mut def = format!("{} {}", quote_ident(&column.name), column.sql_type);
            match table.role {
                TableRole::Primary if i == 0 => def.push_str(" PRIMARY KEY"),
                TableRole::List { .. } | TableRole::Map { .. } if i == 0 => def.push_str(" NOT NULL"),
                _ => {}
            }
            def
        })
        .collect();
    format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_ident(&table.name), columns.join(", "))
}

/// Owner-id index of an auxiliary table
pub fn create_index_sql(table: &Table) -> Option<String> {
    let owner = table.columns.first().filter(|_| table.is_auxiliary())?;
    Some(format!(
        "CREATE INDEX IF NOT EXISTS {} ON {}({})",
        quote_ident(&format!("idx_{}_owner", table.name)),
        quote_ident(&table.name),
        quote_ident(&owner.name)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Catalog;
    use crate::test_support::sample_registry;

    #[test]
    fn test_primary_ddl() {
        let catalog = Catalog::build(&sample_registry());
        let project = catalog.table(catalog.primary("Project").unwrap());
        assert_eq!(
            create_table_sql(project),
            "CREATE TABLE IF NOT EXISTS \"e_project\" (\"id\" TEXT PRIMARY KEY, \"title\" TEXT)"
        );
        assert!(create_index_sql(project).is_none());
    }

    #[test]
    fn test_auxiliary_ddl() {
        let catalog = Catalog::build(&sample_registry());
        let meta = catalog.table(catalog.auxiliary("Task", "meta").unwrap());
        assert_eq!(
            create_table_sql(meta),
            "CREATE TABLE IF NOT EXISTS \"e_task__meta\" (\"owner_id\" TEXT NOT NULL, \"key\" TEXT, \"value\" INTEGER)"
        );
        assert_eq!(
            create_index_sql(meta).unwrap(),
            "CREATE INDEX IF NOT EXISTS \"idx_e_task__meta_owner\" ON \"e_task__meta\"(\"owner_id\")"
        );
    }
}
