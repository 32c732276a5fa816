//! Sync Engine - incremental and full pulls with lifecycle signals

pub mod engine;
pub mod signal;

pub use engine::{SyncEngine, SyncOutcome, SyncReport};
pub use signal::{CheckpointPolicy, SyncObserver, SyncSignal};
