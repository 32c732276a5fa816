//! Query Builder - tables, columns, expressions and queries over the local store

pub mod builder;
pub mod catalog;
pub mod expr;
pub mod filter;

pub use builder::{Projection, Query, Rendered};
pub use catalog::{BackRefLink, Catalog, Column, ColumnRef, ColumnRole, Table, TableId, TableRole};
pub use expr::{Expr, Literal, Op};
pub use filter::{FilterTriple, normalize, normalize_json};
