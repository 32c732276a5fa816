//! # mirrordb - local mirror of a server-defined object schema
//!
//! mirrordb keeps an on-device SQLite copy of dynamically typed remote data.
//!
//! mirrordb provides:
//! - A metadata registry describing entity types and their typed properties
//! - Lazily loaded typed values that mediate between wire data and stored rows
//! - A programmatic query builder that renders SQL with bound parameters
//! - A storage engine that derives and migrates the local schema, mapping
//!   lists and maps into auxiliary tables
//! - A sync engine that pulls changes from a remote source
//! - A streaming controller that pages a continuous feed with backpressure

pub mod config;
pub mod object;
pub mod query;
pub mod remote;
pub mod schema;
pub mod session;
pub mod storage;
pub mod stream;
pub mod sync;
pub mod ui;
pub mod value;

#[cfg(test)]
mod test_support;

// Re-exports for convenient access
pub use object::EntityInstance;
pub use query::{Catalog, Expr, Query};
pub use remote::{FetchParams, FetchResponse, RecordConverter, RemoteSource};
pub use schema::{EntityType, PropertyDef, PropertyKind, Registry};
pub use session::Session;
pub use storage::SqliteStore;
pub use stream::StreamController;
pub use sync::SyncEngine;
pub use value::{RawEntry, TypedValue};

/// Result type alias for mirrordb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for mirrordb operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Local table for {entity} does not match its definition")]
    SchemaDrift { entity: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Transport failure ({status}): {message}")]
    Transport { status: u16, message: String },

    #[error("Could not write {entity}/{id}: {source}")]
    StorageWrite {
        entity: String,
        id: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Load failed: {0}")]
    LoadFailed(String),

    #[error("Stream aborted")]
    Aborted,

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn transport(status: u16, message: impl Into<String>) -> Self {
        Error::Transport {
            status,
            message: message.into(),
        }
    }
}
