//! Sync Engine - one-directional pulls from the remote into the local store
//!
//! Each entity type has its own guard; a run for a type that is already
//! running returns immediately with [`SyncOutcome::AlreadyRunning`]. Runs are
//! incremental from the stored checkpoint unless `full` is requested or no
//! checkpoint exists. A record that cannot be written is logged and skipped;
//! the progress counters still advance.

use super::signal::{CheckpointPolicy, SyncObserver, SyncSignal, percent};
use crate::object::EntityInstance;
use crate::remote::{FetchParams, Record};
use crate::schema::EntityType;
use crate::session::Session;
use crate::storage::PrepareReport;
use crate::stream::StreamController;
use crate::value::format_timestamp;
use crate::Result;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Summary of one completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub entity: String,
    pub full: bool,
    /// Count announced by the first page, 0 when none was announced
    pub total: u64,
    pub processed: u64,
    pub written: u64,
    pub skipped: u64,
    /// Start time of the run, stored as the type's checkpoint
    pub checkpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    AlreadyRunning,
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::AlreadyRunning => None,
        }
    }
}

pub struct SyncEngine {
    session: Arc<Session>,
    guards: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    observers: RwLock<Vec<Box<dyn SyncObserver>>>,
}

impl SyncEngine {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            guards: Mutex::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn subscribe(&self, observer: impl SyncObserver + 'static) {
        self.observers.write().push(Box::new(observer));
    }

    fn emit(&self, signal: SyncSignal) {
        for observer in self.observers.read().iter() {
            observer.notify(&signal);
        }
    }

    fn guard(&self, entity: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.guards.lock().entry(entity.to_string()).or_default().clone()
    }

    /// Whether a run for `entity` is in progress
    pub fn is_running(&self, entity: &str) -> bool {
        self.guard(entity).try_lock().is_err()
    }

    /// Pull changes for one entity type
    pub async fn update(&self, entity: &str, full: bool) -> Result<SyncOutcome> {
        let guard = self.guard(entity);
        let Ok(_running) = guard.try_lock() else {
            tracing::debug!("Sync of {} already running", entity);
            return Ok(SyncOutcome::AlreadyRunning);
        };
        self.run(entity, full).await.map(SyncOutcome::Completed)
    }

    /// Drop and recreate the tables of one entity type, then pull it in full
    pub async fn reset(&self, entity: &str) -> Result<SyncOutcome> {
        let guard = self.guard(entity);
        let Ok(_running) = guard.try_lock() else {
            return Ok(SyncOutcome::AlreadyRunning);
        };
        let entity_type = self.session.lookup(entity)?;

        tracing::info!("Resetting {}", entity);
        {
            let mut store = self.session.store().await;
            store.drop_entity_tables(self.session.catalog(), entity)?;
            store.clear_checkpoint(entity)?;
        }
        self.session.registry().cache_clear_type(entity);
        entity_type.set_local(false);
        let prepared = self.session.prepare().await?;

        let report = self.run(entity, true).await?;
        for other in prepared.reset.iter().filter(|name| name.as_str() != entity) {
            tracing::info!("{} drifted while resetting {}, pulling it in full", other, entity);
            self.update(other, true).await?;
        }
        Ok(SyncOutcome::Completed(report))
    }

    /// Full pull of every type the last `prepare` reset
    pub async fn resync_drifted(&self, report: &PrepareReport) -> Result<Vec<SyncOutcome>> {
        let mut outcomes = Vec::with_capacity(report.reset.len());
        for entity in &report.reset {
            outcomes.push(self.update(entity, true).await?);
        }
        Ok(outcomes)
    }

    async fn run(&self, entity: &str, full: bool) -> Result<SyncReport> {
        let entity_type = self.session.lookup(entity)?;
        let options = self.session.options();
        let started = format_timestamp(&Utc::now());

        let since = if full {
            None
        } else {
            self.session.store().await.checkpoint(entity)?
        };
        let full = since.is_none();
        if options.checkpoint_policy == CheckpointPolicy::OnStart {
            self.session.store().await.set_checkpoint(entity, &started)?;
        }

        let mut params = FetchParams::default();
        if let Some(since) = &since {
            params = params.since(since.clone());
        }
        tracing::info!(
            "Syncing {} ({})",
            entity,
            since.as_deref().map_or_else(|| "full".to_string(), |s| format!("since {}", s))
        );

        let mut stream = StreamController::new(self.session.remote(), self.session.converter(), entity, params)
            .with_capacity(options.page_size)
            .with_page_delay(options.page_delay);
        let mut report = SyncReport {
            entity: entity.to_string(),
            full,
            total: 0,
            processed: 0,
            written: 0,
            skipped: 0,
            checkpoint: started.clone(),
        };
        let mut begun = false;

        loop {
            let batch = match stream.next_page().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Sync of {} failed after {} records: {}", entity, report.processed, e);
                    return Err(e);
                }
            };
            if !begun {
                report.total = stream.total_count().unwrap_or(0);
                self.emit(SyncSignal::Begin {
                    entity: entity.to_string(),
                    total: report.total,
                });
                begun = true;
            }

            for record in &batch {
                if self.process(&entity_type, record).await {
                    report.written += 1;
                } else {
                    report.skipped += 1;
                }
            }
            report.processed += batch.len() as u64;
            self.emit(SyncSignal::Progress {
                entity: entity.to_string(),
                processed: report.processed,
                total: report.total,
                percent: percent(report.processed, report.total),
            });

            if report.total > 0 && report.processed >= report.total {
                break;
            }
        }
        if !begun {
            self.emit(SyncSignal::Begin {
                entity: entity.to_string(),
                total: 0,
            });
        }

        if options.checkpoint_policy == CheckpointPolicy::OnCompletion {
            self.session.store().await.set_checkpoint(entity, &started)?;
        }
        if full {
            entity_type.set_local(true);
        }

        tracing::info!(
            "Synced {}: {} processed, {} written, {} skipped",
            entity,
            report.processed,
            report.written,
            report.skipped
        );
        self.emit(SyncSignal::End {
            entity: entity.to_string(),
            total: report.total,
            processed: report.processed,
            checkpoint: started,
        });
        Ok(report)
    }

    /// Write one record; false when it was skipped
    async fn process(&self, entity_type: &Arc<EntityType>, record: &Record) -> bool {
        let written = match EntityInstance::from_record(entity_type.clone(), record) {
            Ok(instance) => self.session.write(&instance).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", record.key(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemorySource;
    use crate::session::SessionOptions;
    use crate::storage::SqliteStore;
    use crate::test_support::sample_registry;
    use crate::Error;
    use serde_json::{Value as JsonValue, json};
    use std::time::Duration;

    fn task(id: &str, modified: &str) -> JsonValue {
        json!({"type": "Task", "id": id, "title": id, "tags": ["x"], "modified": modified})
    }

    async fn sync_engine(policy: CheckpointPolicy) -> (SyncEngine, Arc<MemorySource>) {
        let remote = Arc::new(MemorySource::new());
        let options = SessionOptions {
            page_size: 2,
            page_delay: Duration::ZERO,
            checkpoint_policy: policy,
            ..SessionOptions::default()
        };
        let session = Session::new(sample_registry(), SqliteStore::open_in_memory().unwrap(), remote.clone(), options);
        session.prepare().await.unwrap();
        (SyncEngine::new(Arc::new(session)), remote)
    }

    async fn checkpoint(engine: &SyncEngine, entity: &str) -> Option<String> {
        engine.session().store().await.checkpoint(entity).unwrap()
    }

    #[tokio::test]
    async fn test_full_then_incremental() {
        let (engine, remote) = sync_engine(CheckpointPolicy::OnCompletion).await;
        remote.add_page(
            "Task",
            None,
            vec![task("t1", "2000-01-01T00:00:00"), task("t2", "2999-01-01T00:00:00")],
            None,
            Some(2),
        );

        let first = engine.update("Task", false).await.unwrap();
        let first = first.report().unwrap();
        assert!(first.full);
        assert_eq!((first.processed, first.written), (2, 2));
        assert_eq!(checkpoint(&engine, "Task").await.as_deref(), Some(first.checkpoint.as_str()));
        assert!(engine.session().lookup("Task").unwrap().is_local());

        let second = engine.update("Task", false).await.unwrap();
        let second = second.report().unwrap();
        assert!(!second.full);
        assert_eq!(second.processed, 1);
        let (_, params) = remote.calls().pop().unwrap();
        assert_eq!(params.since.as_deref(), Some(first.checkpoint.as_str()));
        assert!(checkpoint(&engine, "Task").await.unwrap() >= first.checkpoint);
    }

    #[tokio::test]
    async fn test_signals_follow_batches() {
        let (engine, remote) = sync_engine(CheckpointPolicy::OnCompletion).await;
        remote.add_page("Task", None, vec![task("t1", "a"), task("t2", "a"), task("t3", "a")], None, Some(3));
        let (tx, rx) = crossbeam::channel::unbounded();
        engine.subscribe(tx);

        engine.update("Task", true).await.unwrap();
        let signals: Vec<SyncSignal> = rx.try_iter().collect();
        assert_eq!(signals.len(), 4);
        assert!(matches!(signals[0], SyncSignal::Begin { total: 3, .. }));
        assert!(matches!(signals[1], SyncSignal::Progress { processed: 2, percent: 66, .. }));
        assert!(matches!(signals[2], SyncSignal::Progress { processed: 3, percent: 100, .. }));
        assert!(matches!(signals[3], SyncSignal::End { processed: 3, total: 3, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_update_is_noop() {
        let (engine, remote) = sync_engine(CheckpointPolicy::OnCompletion).await;
        remote.add_page("Task", None, vec![task("t1", "a")], None, Some(1));

        let (a, b) = tokio::join!(engine.update("Task", true), engine.update("Task", true));
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| **o == SyncOutcome::AlreadyRunning).count(), 1);
        assert_eq!(remote.call_count("Task"), 1);
        assert!(!engine.is_running("Task"));
    }

    #[tokio::test]
    async fn test_unwritable_record_is_skipped() {
        let (engine, remote) = sync_engine(CheckpointPolicy::OnCompletion).await;
        remote.add_page(
            "Task",
            None,
            vec![task("t1", "a"), json!({"type": "User", "id": "u1"}), task("t2", "a")],
            None,
            Some(3),
        );

        let outcome = engine.update("Task", true).await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!((report.processed, report.written, report.skipped), (3, 2, 1));
        assert_eq!(engine.session().count("Task", &[]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_run_and_checkpoint_policy() {
        let (engine, remote) = sync_engine(CheckpointPolicy::OnCompletion).await;
        remote.fail("Task", 503);
        assert!(matches!(engine.update("Task", true).await, Err(Error::Transport { status: 503, .. })));
        assert!(checkpoint(&engine, "Task").await.is_none());

        let (engine, remote) = sync_engine(CheckpointPolicy::OnStart).await;
        remote.fail("Task", 503);
        assert!(engine.update("Task", true).await.is_err());
        assert!(checkpoint(&engine, "Task").await.is_some());
    }

    #[tokio::test]
    async fn test_reset_replaces_local_data() {
        let (engine, remote) = sync_engine(CheckpointPolicy::OnCompletion).await;
        let session = engine.session().clone();
        let stale = EntityInstance::new(session.lookup("Task").unwrap(), "old");
        session.write(&stale).await.unwrap();
        remote.add_page("Task", None, vec![task("t1", "a")], None, Some(1));

        let outcome = engine.reset("Task").await.unwrap();
        assert!(outcome.report().unwrap().full);
        assert!(session.get("Task", "old").await.unwrap().is_none());
        assert!(session.get("Task", "t1").await.unwrap().is_some());
        assert!(session.lookup("Task").unwrap().is_local());

        assert!(matches!(engine.reset("Nope").await, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_reset_resyncs_other_drifted_types() {
        let (engine, remote) = sync_engine(CheckpointPolicy::OnCompletion).await;
        remote.add_page("Task", None, vec![task("t1", "a")], None, Some(1));
        remote.add_page("Project", None, vec![json!({"type": "Project", "id": "p1", "title": "Launch"})], None, Some(1));
        {
            let store = engine.session().store().await;
            store
                .connection()
                .execute_batch("DROP TABLE e_project; CREATE TABLE e_project (id TEXT PRIMARY KEY);")
                .unwrap();
        }

        let outcome = engine.reset("Task").await.unwrap();
        assert_eq!(outcome.report().unwrap().entity, "Task");
        assert_eq!(remote.call_count("Project"), 1);
        let session = engine.session();
        assert!(session.lookup("Project").unwrap().is_local());
        assert!(session.get("Project", "p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_resync_drifted_types() {
        let (engine, remote) = sync_engine(CheckpointPolicy::OnCompletion).await;
        remote.add_page("Task", None, vec![task("t1", "a")], None, Some(1));
        let report = PrepareReport {
            reset: vec!["Task".to_string()],
            ..PrepareReport::default()
        };

        let outcomes = engine.resync_drifted(&report).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].report().unwrap().written, 1);
    }
}
