pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{dim, error, header, info, prepare_report, section, success, summary_row, sync_report, warn};
pub use progress::{Spinner, SyncProgress};
pub use table::{rows_table, stats_table};
pub use theme::{TableState, Theme, theme};
