//! Paged feed controller with backpressure
//!
//! The controller pulls pages of one resource and hands them to its consumer
//! in batches of at most `capacity` records:
//!
//! - records fill a bounded queue; a full queue (or the end of the feed)
//!   makes a batch ready, and surplus records wait in an overflow buffer
//! - a page-metadata record carries the next page cursor; its absence ends
//!   the feed
//! - records already seen in the current or the previous page are dropped,
//!   since a feed may redeliver the tail of one page at the head of the next
//! - `abort` cancels the in-flight fetch and discards everything buffered

use crate::remote::{FetchParams, FetchResponse, Record, RecordConverter, RemoteSource};
use crate::{Error, Result};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Records per delivered batch
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Pause before each page after the first
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
struct AbortSignal {
    aborted: AtomicBool,
    notify: Notify,
}

/// Cancels a controller from another task
#[derive(Debug, Clone)]
pub struct AbortHandle {
    signal: Arc<AbortSignal>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.signal.aborted.store(true, Ordering::SeqCst);
        self.signal.notify.notify_one();
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.aborted.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct StreamState {
    queue: VecDeque<Record>,
    overflow: VecDeque<Record>,
    /// A batch can be delivered
    ready: bool,
    /// The consumer asked for a batch that is not ready yet
    waiting: bool,
    /// A fetch is in flight
    active: bool,
    /// The last page has been ingested
    finished: bool,
    /// Keys of the page generation being ingested
    seen: HashSet<String>,
    /// Keys of the generation before it
    previous_seen: HashSet<String>,
    cursor: Option<String>,
    total: Option<u64>,
    pages: usize,
    delivered: u64,
    duplicates: u64,
}

pub struct StreamController {
    remote: Arc<dyn RemoteSource>,
    converter: Arc<dyn RecordConverter>,
    resource: String,
    params: FetchParams,
    capacity: usize,
    page_delay: Duration,
    state: StreamState,
    in_flight: Option<JoinHandle<Result<FetchResponse>>>,
    signal: Arc<AbortSignal>,
}

impl StreamController {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        converter: Arc<dyn RecordConverter>,
        resource: impl Into<String>,
        params: FetchParams,
    ) -> Self {
        let state = StreamState {
            cursor: params.cursor.clone(),
            ..StreamState::default()
        };
        Self {
            remote,
            converter,
            resource: resource.into(),
            params,
            capacity: DEFAULT_QUEUE_CAPACITY,
            page_delay: DEFAULT_PAGE_DELAY,
            state,
            in_flight: None,
            signal: Arc::new(AbortSignal::default()),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            signal: self.signal.clone(),
        }
    }

    /// Total reported by the first page, if any
    pub fn total_count(&self) -> Option<u64> {
        self.state.total
    }

    pub fn is_ready(&self) -> bool {
        self.state.ready
    }

    pub fn is_waiting(&self) -> bool {
        self.state.waiting
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished
    }

    pub fn pages_fetched(&self) -> usize {
        self.state.pages
    }

    pub fn delivered(&self) -> u64 {
        self.state.delivered
    }

    /// Redelivered records that were dropped
    pub fn duplicates(&self) -> u64 {
        self.state.duplicates
    }

    pub fn buffered(&self) -> usize {
        self.state.queue.len() + self.state.overflow.len()
    }

    fn is_aborted(&self) -> bool {
        self.signal.aborted.load(Ordering::SeqCst)
    }

    /// Start fetching the next page unless a fetch is in flight or the feed
    /// has ended
    pub fn resume(&mut self) {
        if self.state.active || self.state.finished || self.is_aborted() {
            return;
        }
        let remote = self.remote.clone();
        let resource = self.resource.clone();
        let mut params = self.params.clone();
        params.cursor = self.state.cursor.clone();
        let delay = (self.state.pages > 0).then_some(self.page_delay);

        tracing::debug!("Fetching {} page {} (cursor {:?})", resource, self.state.pages + 1, params.cursor);
        self.in_flight = Some(tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            remote.fetch(&resource, &params).await
        }));
        self.state.active = true;
    }

    /// Wait for the next batch. `Ok(None)` once the feed is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Record>>> {
        loop {
            if self.is_aborted() {
                self.clear();
                return Err(Error::Aborted);
            }
            if self.state.ready {
                return Ok(Some(self.push_results()));
            }
            if self.state.finished {
                return Ok(None);
            }

            self.state.waiting = true;
            self.resume();
            let Some(mut handle) = self.in_flight.take() else {
                continue;
            };

            let signal = self.signal.clone();
            let joined = tokio::select! {
                joined = &mut handle => Some(joined),
                _ = signal.notify.notified() => None,
            };
            let Some(joined) = joined else {
                handle.abort();
                self.clear();
                return Err(Error::Aborted);
            };
            self.state.active = false;

            let response = match joined {
                Ok(response) => response?,
                Err(e) if e.is_cancelled() => {
                    self.clear();
                    return Err(Error::Aborted);
                }
                Err(e) => return Err(Error::LoadFailed(format!("fetch task failed: {}", e))),
            };
            self.ingest(response)?;
        }
    }

    /// Classify and enqueue one page
    fn ingest(&mut self, response: FetchResponse) -> Result<()> {
        let state = &mut self.state;
        state.pages += 1;
        if state.total.is_none() {
            state.total = response.total_count;
        }

        let mut next_cursor = None;
        let mut accepted = 0usize;
        for raw in &response.records {
            let record = match self.converter.convert(raw) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("Skipping unreadable record from {}: {}", self.resource, e);
                    continue;
                }
            };
            if record.is_page_meta() {
                next_cursor = record.next_resource().map(str::to_string);
                continue;
            }

            let key = record.key();
            if state.seen.contains(&key) || state.previous_seen.contains(&key) {
                state.duplicates += 1;
                continue;
            }
            state.seen.insert(key);
            accepted += 1;
            if state.queue.len() < self.capacity {
                state.queue.push_back(record);
            } else {
                state.overflow.push_back(record);
            }
        }
        tracing::debug!(
            "Page {} of {}: {} new records, next {:?}",
            state.pages,
            self.resource,
            accepted,
            next_cursor
        );

        // The server does not repeat ids across more than one page boundary
        state.previous_seen = std::mem::take(&mut state.seen);
        match next_cursor {
            Some(cursor) => state.cursor = Some(cursor),
            None => state.finished = true,
        }
        state.ready = state.queue.len() >= self.capacity || (state.finished && !state.queue.is_empty());
        Ok(())
    }

    /// Hand the queued batch to the consumer, refill from overflow and start
    /// prefetching the next page
    fn push_results(&mut self) -> Vec<Record> {
        let state = &mut self.state;
        let batch: Vec<Record> = state.queue.drain(..).collect();
        state.delivered += batch.len() as u64;

        while state.queue.len() < self.capacity {
            match state.overflow.pop_front() {
                Some(record) => state.queue.push_back(record),
                None => break,
            }
        }
        state.ready = state.queue.len() >= self.capacity || (state.finished && !state.queue.is_empty());
        state.waiting = false;

        if state.overflow.is_empty() {
            self.resume();
        }
        batch
    }

    /// Cancel the in-flight fetch and discard everything buffered
    pub fn abort(&mut self) {
        self.abort_handle().abort();
        self.clear();
    }

    fn clear(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
        let state = &mut self.state;
        state.queue.clear();
        state.overflow.clear();
        state.seen.clear();
        state.previous_seen.clear();
        state.ready = false;
        state.waiting = false;
        state.active = false;
        state.finished = true;
        tracing::debug!("Stream of {} stopped", self.resource);
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}
