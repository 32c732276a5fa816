//! Expressions
//!
//! An expression renders to SQL text and, in the same pass, appends the
//! literals it needs bound. Literals are never inlined into the text.

use super::catalog::{Catalog, ColumnRef, TableId, quote_ident};
use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// A value that will be bound as a parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Literal(pub SqlValue);

impl Literal {
    /// JSON scalars map onto the storage encoding (booleans as 0/1)
    pub fn from_json(value: &JsonValue) -> Self {
        Literal(match value {
            JsonValue::Null => SqlValue::Null,
            JsonValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        })
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal(SqlValue::Text(s.to_string()))
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal(SqlValue::Text(s))
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal(SqlValue::Integer(i))
    }
}

impl From<i32> for Literal {
    fn from(i: i32) -> Self {
        Literal(SqlValue::Integer(i64::from(i)))
    }
}

impl From<f64> for Literal {
    fn from(f: f64) -> Self {
        Literal(SqlValue::Real(f))
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal(SqlValue::Integer(i64::from(b)))
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
}

impl Op {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Like => "LIKE",
            Op::NotLike => "NOT LIKE",
        }
    }
}

impl FromStr for Op {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "=" | "==" | "eq" => Ok(Op::Eq),
            "!=" | "<>" | "ne" => Ok(Op::Ne),
            "<" | "lt" => Ok(Op::Lt),
            "<=" | "le" => Ok(Op::Le),
            ">" | "gt" => Ok(Op::Gt),
            ">=" | "ge" => Ok(Op::Ge),
            "like" | "~" => Ok(Op::Like),
            "not like" | "!~" => Ok(Op::NotLike),
            other => Err(Error::InvalidQuery(format!("Unknown operator: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Param(Literal),
    Compare {
        left: Box<Expr>,
        op: Op,
        right: Box<Expr>,
    },
    In {
        expr: Box<Expr>,
        values: Vec<Literal>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Count {
        expr: Box<Expr>,
        distinct: bool,
    },
    /// `owner` is among the owners of rows of auxiliary `table` matching
    /// `condition`. The auxiliary table stays inside the subquery.
    OwnedBy {
        owner: ColumnRef,
        table: TableId,
        condition: Box<Expr>,
    },
}

impl From<ColumnRef> for Expr {
    fn from(column: ColumnRef) -> Self {
        Expr::Column(column)
    }
}

impl Expr {
    pub fn col(column: ColumnRef) -> Self {
        Expr::Column(column)
    }

    pub fn param(value: impl Into<Literal>) -> Self {
        Expr::Param(value.into())
    }

    pub fn compare(left: impl Into<Expr>, op: Op, value: impl Into<Literal>) -> Self {
        Expr::Compare {
            left: Box::new(left.into()),
            op,
            right: Box::new(Expr::Param(value.into())),
        }
    }

    pub fn eq(left: impl Into<Expr>, value: impl Into<Literal>) -> Self {
        Self::compare(left, Op::Eq, value)
    }

    /// Column-to-column comparison, e.g. a join condition
    pub fn columns_eq(left: ColumnRef, right: ColumnRef) -> Self {
        Expr::Compare {
            left: Box::new(Expr::Column(left)),
            op: Op::Eq,
            right: Box::new(Expr::Column(right)),
        }
    }

    pub fn in_list(left: impl Into<Expr>, values: impl IntoIterator<Item = Literal>) -> Self {
        Expr::In {
            expr: Box::new(left.into()),
            values: values.into_iter().collect(),
            negated: false,
        }
    }

    pub fn is_null(left: impl Into<Expr>) -> Self {
        Expr::IsNull {
            expr: Box::new(left.into()),
            negated: false,
        }
    }

    pub fn is_not_null(left: impl Into<Expr>) -> Self {
        Expr::IsNull {
            expr: Box::new(left.into()),
            negated: true,
        }
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Self {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Or(exprs.into_iter().collect())
    }

    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    pub fn count_distinct(expr: impl Into<Expr>) -> Self {
        Expr::Count {
            expr: Box::new(expr.into()),
            distinct: true,
        }
    }

    /// Tables referenced by this expression, in order of first appearance
    pub fn tables(&self, out: &mut Vec<TableId>) {
        match self {
            Expr::Column(c) => {
                if !out.contains(&c.table) {
                    out.push(c.table);
                }
            }
            Expr::Param(_) => {}
            Expr::Compare { left, right, .. } => {
                left.tables(out);
                right.tables(out);
            }
            Expr::In { expr, .. } | Expr::IsNull { expr, .. } | Expr::Not(expr) | Expr::Count { expr, .. } => {
                expr.tables(out)
            }
            Expr::And(items) | Expr::Or(items) => items.iter().for_each(|e| e.tables(out)),
            Expr::OwnedBy { owner, .. } => Expr::Column(*owner).tables(out),
        }
    }

    /// Append SQL text to `sql` and the bound values, in text order, to `params`
    pub fn render(&self, catalog: &Catalog, sql: &mut String, params: &mut Vec<SqlValue>) {
        match self {
            Expr::Column(c) => sql.push_str(&catalog.qualified(*c)),
            Expr::Param(Literal(value)) => {
                sql.push('?');
                params.push(value.clone());
            }
            Expr::Compare { left, op, right } => {
                left.render(catalog, sql, params);
                sql.push(' ');
                sql.push_str(op.as_sql());
                sql.push(' ');
                right.render(catalog, sql, params);
            }
            Expr::In { expr, values, negated } => {
                if values.is_empty() {
                    // IN () is not valid SQLite
                    sql.push_str(if *negated { "1 = 1" } else { "1 = 0" });
                    return;
                }
                expr.render(catalog, sql, params);
                sql.push_str(if *negated { " NOT IN (" } else { " IN (" });
                for (i, Literal(value)) in values.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    sql.push('?');
                    params.push(value.clone());
                }
                sql.push(')');
            }
            Expr::IsNull { expr, negated } => {
                expr.render(catalog, sql, params);
                sql.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Expr::And(items) => render_joined(catalog, items, " AND ", "1 = 1", sql, params),
            Expr::Or(items) => render_joined(catalog, items, " OR ", "1 = 0", sql, params),
            Expr::Not(expr) => {
                sql.push_str("NOT (");
                expr.render(catalog, sql, params);
                sql.push(')');
            }
            Expr::Count { expr, distinct } => {
                sql.push_str(if *distinct { "COUNT(DISTINCT " } else { "COUNT(" });
                expr.render(catalog, sql, params);
                sql.push(')');
            }
            Expr::OwnedBy { owner, table, condition } => {
                sql.push_str(&catalog.qualified(*owner));
                sql.push_str(" IN (SELECT ");
                sql.push_str(&catalog.qualified(catalog.id_column(*table)));
                sql.push_str(" FROM ");
                sql.push_str(&quote_ident(&catalog.table(*table).name));
                sql.push_str(" WHERE ");
                condition.render(catalog, sql, params);
                sql.push(')');
            }
        }
    }
}

fn render_joined(
    catalog: &Catalog,
    items: &[Expr],
    joiner: &str,
    empty: &str,
    sql: &mut String,
    params: &mut Vec<SqlValue>,
) {
    if items.is_empty() {
        sql.push_str(empty);
        return;
    }
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            sql.push_str(joiner);
        }
        sql.push('(');
        item.render(catalog, sql, params);
        sql.push(')');
    }
}
