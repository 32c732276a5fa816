//! Filter normalization
//!
//! Filters arrive either as a field -> value mapping (implicit equality) or as
//! explicit `[field, operator, value]` triples. Both normalize to triples.

use super::catalog::{Catalog, TableId};
use super::expr::{Expr, Literal, Op};
use crate::schema::{ItemKind, ScalarKind};
use crate::value::RawEntry;
use crate::{Error, Result};
use serde_json::{Map, Value as JsonValue};

#[derive(Debug, Clone, PartialEq)]
pub struct FilterTriple {
    pub field: String,
    pub op: Op,
    pub value: JsonValue,
}

impl FilterTriple {
    pub fn new(field: impl Into<String>, op: Op, value: impl Into<JsonValue>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Parse `field<op>value`, e.g. `title=Groceries` or `priority>=3`.
    /// The value is read as JSON when it parses, as text otherwise.
    pub fn parse(input: &str) -> Result<Self> {
        const OPS: [&str; 8] = ["!=", "<>", ">=", "<=", "!~", "=", "<", ">"];
        let (pos, op) = OPS
            .iter()
            .filter_map(|op| input.find(op).map(|pos| (pos, *op)))
            .min_by_key(|(pos, op)| (*pos, std::cmp::Reverse(op.len())))
            .ok_or_else(|| Error::InvalidQuery(format!("No operator in filter '{}'", input)))?;

        let field = input[..pos].trim();
        if field.is_empty() {
            return Err(Error::InvalidQuery(format!("No field in filter '{}'", input)));
        }
        let raw = input[pos + op.len()..].trim();
        let value = serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()));
        Ok(Self::new(field, op.parse()?, value))
    }

    /// Build the comparison against the column this field resolves to on `table`.
    /// Literals are converted the way the column's values are stored, except
    /// for pattern operators.
    pub fn to_expr(&self, catalog: &Catalog, table: TableId) -> Result<Expr> {
        let column = catalog.column(table, &self.field)?;
        let kind = match self.op {
            Op::Like | Op::NotLike => None,
            _ => catalog.column_def(column).scalar_kind,
        };
        let literal = |value: &JsonValue| storage_literal(kind, value);
        Ok(match (&self.value, self.op) {
            (JsonValue::Null, Op::Eq) => Expr::is_null(column),
            (JsonValue::Null, Op::Ne) => Expr::is_not_null(column),
            (JsonValue::Array(items), Op::Eq) => Expr::in_list(column, items.iter().map(literal)),
            (JsonValue::Array(items), Op::Ne) => Expr::In {
                expr: Box::new(Expr::Column(column)),
                values: items.iter().map(literal).collect(),
                negated: true,
            },
            (value, op) => Expr::compare(column, op, literal(value)),
        })
    }
}

fn storage_literal(kind: Option<ScalarKind>, value: &JsonValue) -> Literal {
    match kind {
        Some(kind) if !value.is_null() => Literal(ItemKind::Scalar(kind).to_storage_value(&RawEntry::scalar(value.clone()))),
        _ => Literal::from_json(value),
    }
}

/// A field -> value mapping is shorthand for equality triples
pub fn normalize(map: &Map<String, JsonValue>) -> Vec<FilterTriple> {
    map.iter()
        .map(|(field, value)| FilterTriple::new(field.clone(), Op::Eq, value.clone()))
        .collect()
}

/// Normalize any accepted filter shape: an object, or an array of
/// `[field, op, value]` / `[field, value]` arrays.
pub fn normalize_json(filter: &JsonValue) -> Result<Vec<FilterTriple>> {
    match filter {
        JsonValue::Object(map) => Ok(normalize(map)),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| match item.as_array().map(Vec::as_slice) {
                Some([JsonValue::String(field), JsonValue::String(op), value]) => {
                    Ok(FilterTriple::new(field.clone(), op.parse()?, value.clone()))
                }
                Some([JsonValue::String(field), value]) => Ok(FilterTriple::new(field.clone(), Op::Eq, value.clone())),
                _ => Err(Error::InvalidQuery(format!("Malformed filter entry: {}", item))),
            })
            .collect(),
        JsonValue::Null => Ok(Vec::new()),
        other => Err(Error::InvalidQuery(format!("Unsupported filter: {}", other))),
    }
}
