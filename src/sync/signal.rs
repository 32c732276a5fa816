//! Sync lifecycle signals and checkpoint policy

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Notifications emitted while a type is synchronized. Observers cannot
/// influence the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum SyncSignal {
    Begin {
        entity: String,
        total: u64,
    },
    Progress {
        entity: String,
        processed: u64,
        total: u64,
        percent: u8,
    },
    End {
        entity: String,
        total: u64,
        processed: u64,
        checkpoint: String,
    },
}

impl SyncSignal {
    pub fn entity(&self) -> &str {
        match self {
            SyncSignal::Begin { entity, .. } | SyncSignal::Progress { entity, .. } | SyncSignal::End { entity, .. } => {
                entity
            }
        }
    }
}

/// Percentage of `total` reached, 100 when nothing was announced
pub fn percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (processed.saturating_mul(100) / total).min(100) as u8
}

/// Receiver of sync lifecycle signals
pub trait SyncObserver: Send + Sync {
    fn notify(&self, signal: &SyncSignal);
}

impl SyncObserver for crossbeam::channel::Sender<SyncSignal> {
    fn notify(&self, signal: &SyncSignal) {
        // A dropped receiver only means nobody is watching
        let _ = self.send(signal.clone());
    }
}

/// When the checkpoint of a run is persisted. The stored value is always the
/// time the run started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPolicy {
    /// Before the first fetch; a failed run still advances the checkpoint
    OnStart,
    /// After every page was processed
    #[default]
    OnCompletion,
}

impl CheckpointPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointPolicy::OnStart => "on_start",
            CheckpointPolicy::OnCompletion => "on_completion",
        }
    }
}

impl FromStr for CheckpointPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "on_start" | "start" => Ok(CheckpointPolicy::OnStart),
            "on_completion" | "completion" | "end" => Ok(CheckpointPolicy::OnCompletion),
            _ => Err(Error::InvalidSetting(format!("Unknown checkpoint policy: {}", s))),
        }
    }
}

impl std::fmt::Display for CheckpointPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(5, 4), 100);
    }

    #[test]
    fn test_checkpoint_policy_names() {
        assert_eq!("on-start".parse::<CheckpointPolicy>().unwrap(), CheckpointPolicy::OnStart);
        assert_eq!("ON_COMPLETION".parse::<CheckpointPolicy>().unwrap(), CheckpointPolicy::OnCompletion);
        assert!("never".parse::<CheckpointPolicy>().is_err());
        assert_eq!(CheckpointPolicy::default().to_string(), "on_completion");
    }

    #[test]
    fn test_channel_observer() {
        let (tx, rx) = crossbeam::channel::unbounded();
        tx.notify(&SyncSignal::Begin {
            entity: "Task".into(),
            total: 3,
        });
        assert_eq!(rx.try_recv().unwrap().entity(), "Task");
    }
}
