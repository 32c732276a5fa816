//! Streaming Controller - paged remote feeds delivered in bounded batches

pub mod controller;

pub use controller::{AbortHandle, DEFAULT_PAGE_DELAY, DEFAULT_QUEUE_CAPACITY, StreamController};
