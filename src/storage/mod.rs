//! Storage Layer - SQLite-backed local mirror
//!
//! Tables are derived from the registry:
//! - `e_<type>(id, <one column per single-valued property>, <ref>__type)`
//! - `e_<type>__<list>(owner_id, value[, value_type])`
//! - `e_<type>__<map>(owner_id, key, value)`
//! - `_mirror_checkpoints(scope, checkpoint)`

pub mod schema;
pub mod sqlite;

pub use sqlite::{EntityStats, PrepareReport, SqliteStore, StoreStats};
