//! Query assembly and rendering
//!
//! A `Query` collects projections, filters and clauses over catalog handles.
//! Every table a projection or expression touches is registered as an implicit
//! join target exactly once. Rendering produces SQL text with `?` placeholders
//! and the values to bind, in text order.

use super::catalog::{Catalog, ColumnRef, TableId, quote_ident};
use super::expr::Expr;
use super::filter::FilterTriple;
use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;

/// Something the query projects
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// A whole table, expanded to its declared columns with `id` first
    Table(TableId),
    Column(ColumnRef),
    Expr(Expr, Option<String>),
}

impl From<TableId> for Projection {
    fn from(table: TableId) -> Self {
        Projection::Table(table)
    }
}

impl From<ColumnRef> for Projection {
    fn from(column: ColumnRef) -> Self {
        Projection::Column(column)
    }
}

impl From<Expr> for Projection {
    fn from(expr: Expr) -> Self {
        Projection::Expr(expr, None)
    }
}

impl Projection {
    fn tables(&self, out: &mut Vec<TableId>) {
        match self {
            Projection::Table(t) => {
                if !out.contains(t) {
                    out.push(*t);
                }
            }
            Projection::Column(c) => Expr::Column(*c).tables(out),
            Projection::Expr(e, _) => e.tables(out),
        }
    }
}

/// Rendered SQL plus the values bound to its placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    projections: Vec<Projection>,
    joins: Vec<TableId>,
    filters: Vec<Expr>,
    left_joins: Vec<(TableId, Vec<Expr>)>,
    group_by: Vec<Expr>,
    order_by: Vec<(Expr, bool)>,
    limit: Option<(u64, u64)>,
    follow_references: bool,
}

impl Query {
    /// Start a query projecting the given tables, columns or expressions
    pub fn new(items: impl IntoIterator<Item = Projection>) -> Self {
        items.into_iter().fold(Query::default(), Query::select)
    }

    /// Query every stored column of one table
    pub fn table(table: TableId) -> Self {
        Query::new([Projection::Table(table)])
    }

    fn is_left_joined(&self, table: TableId) -> bool {
        self.left_joins.iter().any(|(t, _)| *t == table)
    }

    fn register(&mut self, tables: Vec<TableId>) {
        for table in tables {
            if !self.joins.contains(&table) && !self.is_left_joined(table) {
                self.joins.push(table);
            }
        }
    }

    fn register_expr(&mut self, expr: &Expr) {
        let mut tables = Vec::new();
        expr.tables(&mut tables);
        self.register(tables);
    }

    pub fn select(mut self, item: impl Into<Projection>) -> Self {
        let item = item.into();
        let mut tables = Vec::new();
        item.tables(&mut tables);
        self.register(tables);
        self.projections.push(item);
        self
    }

    /// Project an expression under an alias
    pub fn select_as(self, expr: Expr, alias: impl Into<String>) -> Self {
        self.select(Projection::Expr(expr, Some(alias.into())))
    }

    /// AND-append a filter
    pub fn filter(mut self, expr: Expr) -> Self {
        self.register_expr(&expr);
        self.filters.push(expr);
        self
    }

    /// Outer-join `table`. The table is no longer an implicit inner join.
    /// With no conditions, an auxiliary table joins on its owner.
    pub fn left_join(mut self, table: TableId, on: impl IntoIterator<Item = Expr>) -> Self {
        self.joins.retain(|t| *t != table);
        let on: Vec<Expr> = on.into_iter().collect();
        match self.left_joins.iter_mut().find(|(t, _)| *t == table) {
            Some((_, existing)) => existing.extend(on.iter().cloned()),
            None => self.left_joins.push((table, on.clone())),
        }
        for expr in &on {
            self.register_expr(expr);
        }
        self
    }

    pub fn group_by(mut self, expr: impl Into<Expr>) -> Self {
        let expr = expr.into();
        self.register_expr(&expr);
        self.group_by.push(expr);
        self
    }

    pub fn order_by(mut self, expr: impl Into<Expr>, descending: bool) -> Self {
        let expr = expr.into();
        self.register_expr(&expr);
        self.order_by.push((expr, descending));
        self
    }

    pub fn limit(mut self, limit: u64, offset: u64) -> Self {
        self.limit = Some((limit, offset));
        self
    }

    /// Include deferred (blob-backed) columns when expanding tables
    pub fn follow_references(mut self, follow: bool) -> Self {
        self.follow_references = follow;
        self
    }

    /// Apply normalized filter triples against `base`.
    ///
    /// The first triple on a list or map property joins its auxiliary table.
    /// Later triples on the same property match through their own subquery,
    /// so each can be satisfied by a different entry.
    pub fn filter_triples(mut self, catalog: &Catalog, base: TableId, triples: &[FilterTriple]) -> Result<Self> {
        let mut joined: Vec<TableId> = Vec::new();
        for triple in triples {
            let expr = triple.to_expr(catalog, base)?;
            let mut tables = Vec::new();
            expr.tables(&mut tables);
            tables.retain(|t| catalog.table(*t).is_auxiliary());

            let repeated = tables.iter().find(|t| joined.contains(*t)).copied();
            self = match repeated.and_then(|aux| Some((aux, catalog.table(aux).owner()?))) {
                Some((aux, owner)) => self.filter(Expr::OwnedBy {
                    owner: catalog.id_column(owner),
                    table: aux,
                    condition: Box::new(expr),
                }),
                None => {
                    joined.extend(tables);
                    self.filter(expr)
                }
            };
        }
        Ok(self)
    }

    /// Tables in the FROM clause: registered joins plus the owner of every
    /// auxiliary table among them
    fn from_tables(&self, catalog: &Catalog) -> Vec<TableId> {
        let mut tables = self.joins.clone();
        for table in &self.joins {
            if let Some(owner) = catalog.table(*table).owner() {
                if !tables.contains(&owner) && !self.is_left_joined(owner) {
                    tables.push(owner);
                }
            }
        }
        tables
    }

    /// The primary table the query is about: the first projected primary
    /// table, or the owner of the first auxiliary table
    fn base(&self, catalog: &Catalog, from: &[TableId]) -> Option<TableId> {
        let mut projected = Vec::new();
        self.projections.iter().for_each(|p| p.tables(&mut projected));
        projected
            .iter()
            .chain(from.iter())
            .map(|t| catalog.table(*t).owner().unwrap_or(*t))
            .next()
    }

    fn correlations(catalog: &Catalog, from: &[TableId]) -> Vec<Expr> {
        from.iter()
            .filter_map(|t| {
                let owner = catalog.table(*t).owner()?;
                Some(Expr::columns_eq(catalog.id_column(*t), catalog.id_column(owner)))
            })
            .collect()
    }

    /// Owner ids to group on: one per filtered-but-not-projected auxiliary table
    fn implicit_group_by(&self, catalog: &Catalog, from: &[TableId]) -> Vec<Expr> {
        if !self.group_by.is_empty() {
            return Vec::new();
        }
        let mut projected = Vec::new();
        self.projections.iter().for_each(|p| p.tables(&mut projected));

        let mut owners = Vec::new();
        for table in from {
            if projected.contains(table) {
                continue;
            }
            if let Some(owner) = catalog.table(*table).owner() {
                if !owners.contains(&owner) {
                    owners.push(owner);
                }
            }
        }
        owners
            .into_iter()
            .map(|owner| Expr::Column(catalog.id_column(owner)))
            .collect()
    }

    fn render_projection(&self, catalog: &Catalog, projection: &Projection, sql: &mut String, params: &mut Vec<SqlValue>) {
        match projection {
            Projection::Table(table) => {
                let id = catalog.id_column(*table);
                let t = catalog.table(*table);
                let mut columns = vec![id];
                columns.extend(
                    (0..t.columns.len())
                        .filter(|i| *i != id.index)
                        .filter(|i| self.follow_references || !t.columns[*i].deferred)
                        .map(|index| ColumnRef { table: *table, index }),
                );
                let rendered: Vec<String> = columns.iter().map(|c| catalog.qualified(*c)).collect();
                sql.push_str(&rendered.join(", "));
            }
            Projection::Column(column) => sql.push_str(&catalog.qualified(*column)),
            Projection::Expr(expr, alias) => {
                expr.render(catalog, sql, params);
                if let Some(alias) = alias {
                    sql.push_str(" AS ");
                    sql.push_str(&quote_ident(alias));
                }
            }
        }
    }

    fn render_from(&self, catalog: &Catalog, from: &[TableId], sql: &mut String, params: &mut Vec<SqlValue>) {
        sql.push_str(" FROM ");
        let names: Vec<String> = from.iter().map(|t| quote_ident(&catalog.table(*t).name)).collect();
        sql.push_str(&names.join(", "));

        for (table, on) in &self.left_joins {
            sql.push_str(" LEFT JOIN ");
            sql.push_str(&quote_ident(&catalog.table(*table).name));
            let conditions = if on.is_empty() {
                Self::correlations(catalog, &[*table])
            } else {
                on.clone()
            };
            if !conditions.is_empty() {
                sql.push_str(" ON ");
                Expr::and(conditions).render(catalog, sql, params);
            }
        }
    }

    fn render_where(&self, catalog: &Catalog, from: &[TableId], sql: &mut String, params: &mut Vec<SqlValue>) {
        let mut conditions = Self::correlations(catalog, from);
        conditions.extend(self.filters.iter().cloned());
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            Expr::and(conditions).render(catalog, sql, params);
        }
    }

    fn render_list(catalog: &Catalog, exprs: &[Expr], sql: &mut String, params: &mut Vec<SqlValue>) {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            expr.render(catalog, sql, params);
        }
    }

    /// Render to SQL text and bound parameters
    pub fn render(&self, catalog: &Catalog) -> Result<Rendered> {
        let from = self.from_tables(catalog);
        if from.is_empty() && self.left_joins.is_empty() {
            return Err(Error::InvalidQuery("Query has no tables".to_string()));
        }

        let mut sql = String::from("SELECT ");
        let mut params = Vec::new();

        if self.projections.is_empty() {
            let base = self
                .base(catalog, &from)
                .ok_or_else(|| Error::InvalidQuery("Query has nothing to project".to_string()))?;
            self.render_projection(catalog, &Projection::Table(base), &mut sql, &mut params);
        }
        for (i, projection) in self.projections.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            self.render_projection(catalog, projection, &mut sql, &mut params);
        }

        self.render_from(catalog, &from, &mut sql, &mut params);
        self.render_where(catalog, &from, &mut sql, &mut params);

        let group_by = if self.group_by.is_empty() {
            self.implicit_group_by(catalog, &from)
        } else {
            self.group_by.clone()
        };
        if !group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            Self::render_list(catalog, &group_by, &mut sql, &mut params);
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            for (i, (expr, descending)) in self.order_by.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                expr.render(catalog, &mut sql, &mut params);
                if *descending {
                    sql.push_str(" DESC");
                }
            }
        }

        if let Some((limit, offset)) = self.limit {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(limit as i64));
            params.push(SqlValue::Integer(offset as i64));
        }

        tracing::debug!("Rendered query: {}", sql);
        Ok(Rendered { sql, params })
    }

    /// Render a count of distinct base ids. Filters on multi-valued
    /// properties may match an entity more than once; the count does not.
    pub fn render_count(&self, catalog: &Catalog) -> Result<Rendered> {
        let from = self.from_tables(catalog);
        let base = self
            .base(catalog, &from)
            .ok_or_else(|| Error::InvalidQuery("Query has no tables".to_string()))?;

        let mut sql = String::from("SELECT ");
        let mut params = Vec::new();
        Expr::count_distinct(catalog.id_column(base)).render(catalog, &mut sql, &mut params);

        let mut from = from;
        if !from.contains(&base) && !self.is_left_joined(base) {
            from.insert(0, base);
        }
        self.render_from(catalog, &from, &mut sql, &mut params);
        self.render_where(catalog, &from, &mut sql, &mut params);
        Ok(Rendered { sql, params })
    }
}
