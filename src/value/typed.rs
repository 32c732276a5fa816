//! Typed values with single-flight lazy loading
//!
//! A `TypedValue` is `Unloaded`, `Loading` (with the callers waiting on the
//! in-flight load) or `Loaded`. Transitions happen under one lock, so a caller
//! either sees loaded data, joins the pending load, or becomes the loader.

use super::format::Canonical;
use super::raw::{RawEntry, is_empty_set};
use crate::schema::{PropertyDef, PropertyKind};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::future::Future;
use tokio::sync::oneshot;

type LoadOutcome = std::result::Result<Vec<RawEntry>, String>;

enum LoadState {
    Unloaded,
    Loading { waiters: Vec<oneshot::Sender<LoadOutcome>> },
    Loaded(Vec<RawEntry>),
}

/// Runtime container for one property's data on one instance
pub struct TypedValue {
    state: Mutex<LoadState>,
    /// Remote location of deferred content, when the record named one
    href: Option<String>,
}

impl std::fmt::Debug for TypedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state.lock() {
            LoadState::Unloaded => "unloaded".to_string(),
            LoadState::Loading { waiters } => format!("loading ({} waiting)", waiters.len()),
            LoadState::Loaded(entries) => format!("loaded ({} entries)", entries.len()),
        };
        f.debug_struct("TypedValue")
            .field("state", &state)
            .field("href", &self.href)
            .finish()
    }
}

/// An empty result is the explicit empty entry, never "unloaded"
fn normalize(entries: Vec<RawEntry>) -> Vec<RawEntry> {
    if entries.is_empty() { vec![RawEntry::empty()] } else { entries }
}

impl TypedValue {
    pub fn unloaded() -> Self {
        Self {
            state: Mutex::new(LoadState::Unloaded),
            href: None,
        }
    }

    pub fn loaded(entries: Vec<RawEntry>) -> Self {
        Self {
            state: Mutex::new(LoadState::Loaded(normalize(entries))),
            href: None,
        }
    }

    /// Build the value of `prop` from whatever entries a record carried.
    ///
    /// `None` means the record did not carry the field at all. Deferred and
    /// non-storable properties always start unloaded and resolve through their
    /// loader; of what the record carried only the href is kept.
    pub fn instantiate(prop: &PropertyDef, entries: Option<Vec<RawEntry>>) -> Self {
        let href = entries
            .as_ref()
            .and_then(|e| e.iter().find_map(|entry| entry.href.clone()));

        let state = match entries {
            _ if prop.kind.is_deferred() || !prop.storable => LoadState::Unloaded,
            Some(entries) if !entries.is_empty() => LoadState::Loaded(entries),
            _ => LoadState::Loaded(vec![RawEntry::empty()]),
        };

        Self {
            state: Mutex::new(state),
            href,
        }
    }

    pub fn href(&self) -> Option<&str> {
        self.href.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.lock(), LoadState::Loaded(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(*self.state.lock(), LoadState::Loading { .. })
    }

    /// Loaded data without triggering a load
    pub fn peek(&self) -> Option<Vec<RawEntry>> {
        match &*self.state.lock() {
            LoadState::Loaded(entries) => Some(entries.clone()),
            _ => None,
        }
    }

    /// Loaded and holding only the explicit empty entry
    pub fn is_empty(&self) -> bool {
        self.peek().is_some_and(|entries| is_empty_set(&entries))
    }

    /// Canonical form of the loaded entries
    pub fn formatted(&self, kind: &PropertyKind) -> Option<Vec<Canonical>> {
        self.peek()
            .map(|entries| entries.iter().map(|entry| kind.format(entry)).collect())
    }

    /// Explicit assignment. Callers waiting on a load receive the assigned data.
    pub fn set(&self, entries: Vec<RawEntry>) {
        let entries = normalize(entries);
        let previous = std::mem::replace(&mut *self.state.lock(), LoadState::Loaded(entries.clone()));
        if let LoadState::Loading { waiters } = previous {
            for waiter in waiters {
                let _ = waiter.send(Ok(entries.clone()));
            }
        }
    }

    /// Forget loaded data so the next read loads again
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        if matches!(*state, LoadState::Loaded(_)) {
            *state = LoadState::Unloaded;
        }
    }

    /// Return the data, running `load` if nothing is loaded yet.
    ///
    /// Concurrent callers share one in-flight load: only the first caller runs
    /// its loader, the rest wait for that result. A failed load leaves the value
    /// unloaded so a later call retries.
    pub async fn value<F, Fut>(&self, load: F) -> Result<Vec<RawEntry>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<RawEntry>>>,
    {
        let waiting = {
            let mut state = self.state.lock();
            match &mut *state {
                LoadState::Loaded(entries) => return Ok(entries.clone()),
                LoadState::Loading { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                LoadState::Unloaded => {
                    *state = LoadState::Loading { waiters: Vec::new() };
                    None
                }
            }
        };

        if let Some(rx) = waiting {
            return match rx.await {
                Ok(Ok(entries)) => Ok(entries),
                Ok(Err(message)) => Err(Error::LoadFailed(message)),
                Err(_) => Err(Error::LoadFailed("load was abandoned".to_string())),
            };
        }

        let mut guard = LoadGuard { value: self, done: false };
        let result = load().await.map(normalize);
        guard.done = true;
        self.complete(result)
    }

    fn complete(&self, result: Result<Vec<RawEntry>>) -> Result<Vec<RawEntry>> {
        let mut state = self.state.lock();
        let waiters = match std::mem::replace(&mut *state, LoadState::Unloaded) {
            LoadState::Loading { waiters } => waiters,
            // Assigned while loading; the assignment wins
            LoadState::Loaded(entries) => {
                *state = LoadState::Loaded(entries.clone());
                return Ok(entries);
            }
            LoadState::Unloaded => Vec::new(),
        };
        if let Ok(entries) = &result {
            *state = LoadState::Loaded(entries.clone());
        }
        drop(state);

        let outcome: LoadOutcome = match &result {
            Ok(entries) => Ok(entries.clone()),
            Err(e) => Err(e.to_string()),
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        result
    }
}

/// Puts an abandoned load back to `Unloaded`; dropped waiters see the failure
struct LoadGuard<'a> {
    value: &'a TypedValue,
    done: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut state = self.value.state.lock();
        if matches!(*state, LoadState::Loading { .. }) {
            *state = LoadState::Unloaded;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ItemKind, ScalarKind};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tags() -> PropertyDef {
        PropertyDef::new("tags", PropertyKind::List { item: ItemKind::Scalar(ScalarKind::Text) })
    }

    #[test]
    fn test_instantiate_defaults() {
        let title = PropertyDef::new("title", PropertyKind::Scalar(ScalarKind::Text));
        let value = TypedValue::instantiate(&title, None);
        assert!(value.is_loaded());
        assert!(value.is_empty());

        let blob = PropertyDef::new("file", PropertyKind::Blob);
        let value = TypedValue::instantiate(&blob, Some(vec![RawEntry::empty().with_href("files/1")]));
        assert!(!value.is_loaded());
        assert_eq!(value.href(), Some("files/1"));

        let hidden = title.clone().not_storable();
        assert!(!TypedValue::instantiate(&hidden, None).is_loaded());
        assert!(!TypedValue::instantiate(&hidden, Some(vec![RawEntry::scalar("x")])).is_loaded());

        let tasks = PropertyDef::new("tasks", PropertyKind::BackReference { target: "Task".into(), via: "project".into() });
        let carried = TypedValue::instantiate(&tasks, Some(vec![RawEntry::reference("Task", "t1")]));
        assert!(!carried.is_loaded());

        let score = PropertyDef::new("score", PropertyKind::Calculated);
        assert!(!TypedValue::instantiate(&score, Some(vec![RawEntry::scalar(3)])).is_loaded());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_load() {
        let value = TypedValue::instantiate(&tags(), None);
        value.invalidate();
        let loads = Arc::new(AtomicUsize::new(0));

        let loader = |loads: Arc<AtomicUsize>| async move {
            loads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(vec![RawEntry::scalar("a"), RawEntry::scalar("b")])
        };

        let (first, second) = tokio::join!(
            value.value(|| loader(loads.clone())),
            value.value(|| loader(loads.clone())),
        );

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(first.unwrap(), second.unwrap());
        assert!(value.is_loaded());
    }

    #[tokio::test]
    async fn test_empty_result_is_explicit_empty() {
        let value = TypedValue::unloaded();
        let entries = value.value(|| async { Ok(Vec::new()) }).await.unwrap();
        assert_eq!(entries, vec![RawEntry::empty()]);
        assert!(value.is_empty());
    }

    #[tokio::test]
    async fn test_failure_reaches_waiters_and_allows_retry() {
        let value = TypedValue::unloaded();
        let (first, second) = tokio::join!(
            value.value(|| async {
                tokio::task::yield_now().await;
                Err(Error::transport(503, "unavailable"))
            }),
            value.value(|| async { Ok(vec![RawEntry::scalar("never")]) }),
        );
        assert!(matches!(first, Err(Error::Transport { status: 503, .. })));
        assert!(matches!(second, Err(Error::LoadFailed(_))));
        assert!(!value.is_loaded());

        let retried = value.value(|| async { Ok(vec![RawEntry::scalar("ok")]) }).await.unwrap();
        assert_eq!(retried, vec![RawEntry::scalar("ok")]);
    }

    #[tokio::test]
    async fn test_assignment_while_loading_wins() {
        let value = TypedValue::unloaded();
        let result = value
            .value(|| async {
                value.set(vec![RawEntry::scalar("assigned")]);
                Ok(vec![RawEntry::scalar("loaded")])
            })
            .await
            .unwrap();
        assert_eq!(result, vec![RawEntry::scalar("assigned")]);
        assert_eq!(value.peek().unwrap(), vec![RawEntry::scalar("assigned")]);
    }
}
