//! Typed Property/Value - raw entries, lazy typed values and their loaders

pub mod format;
pub mod loader;
pub mod raw;
pub mod typed;

pub use format::{Canonical, TIMESTAMP_FORMAT, format_timestamp, parse_timestamp, scalar_entry_from_storage};
pub use loader::PropertyLoader;
pub use raw::{RawEntry, entries_from_wire, is_empty_set, item_from_wire};
pub use typed::TypedValue;
