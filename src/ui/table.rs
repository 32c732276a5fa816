use crate::storage::StoreStats;
use serde_json::{Map, Value as JsonValue};
use tabled::builder::Builder;
use tabled::{Table, Tabled, settings::Style};

#[derive(Tabled)]
pub struct EntityRow {
    #[tabled(rename = "Type")]
    pub entity: String,
    #[tabled(rename = "Table")]
    pub table: String,
    #[tabled(rename = "Local")]
    pub local: String,
    #[tabled(rename = "Rows")]
    pub rows: usize,
    #[tabled(rename = "Aux tables")]
    pub auxiliary_tables: usize,
    #[tabled(rename = "Checkpoint")]
    pub checkpoint: String,
}

pub fn stats_table(stats: &StoreStats) -> String {
    let rows: Vec<EntityRow> = stats
        .entities
        .iter()
        .map(|e| EntityRow {
            entity: e.entity.clone(),
            table: e.table.clone(),
            local: if e.local { "yes" } else { "no" }.to_string(),
            rows: e.rows,
            auxiliary_tables: e.auxiliary_tables,
            checkpoint: e.checkpoint.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    if rows.is_empty() {
        return String::new();
    }
    Table::new(&rows).with(Style::rounded()).to_string()
}

/// Query results with one column per key of the first row
pub fn rows_table(rows: &[Map<String, JsonValue>]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let columns: Vec<String> = first.keys().cloned().collect();

    let mut builder = Builder::default();
    builder.push_record(columns.clone());
    for row in rows {
        builder.push_record(columns.iter().map(|c| cell(row.get(c))));
    }
    builder.build().with(Style::rounded()).to_string()
}

fn cell(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EntityStats;
    use serde_json::json;

    #[test]
    fn test_stats_table() {
        let stats = StoreStats {
            entities: vec![EntityStats {
                entity: "Task".into(),
                table: "e_task".into(),
                local: true,
                rows: 3,
                auxiliary_tables: 2,
                checkpoint: None,
            }],
        };
        let table = stats_table(&stats);
        assert!(table.contains("Aux tables"));
        assert!(table.contains("e_task"));
        assert!(stats_table(&StoreStats::default()).is_empty());
    }

    #[test]
    fn test_rows_table() {
        let mut row = Map::new();
        row.insert("id".into(), json!("t1"));
        row.insert("title".into(), JsonValue::Null);
        let table = rows_table(&[row]);
        assert!(table.contains("id"));
        assert!(table.contains("t1"));
        assert!(rows_table(&[]).is_empty());
    }
}
