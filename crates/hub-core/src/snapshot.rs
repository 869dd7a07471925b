//! Polled input state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// One polling cycle's reading. Index `i` is always the same physical
/// channel for a given configured channel count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub digital: Vec<bool>,
    pub analog: Vec<Option<f64>>,
    /// When the reading was taken, `None` for the empty initial snapshot
    #[serde(default)]
    pub taken_at: Option<DateTime<Utc>>,
}

impl InputSnapshot {
    pub fn new(digital: Vec<bool>, analog: Vec<Option<f64>>, taken_at: DateTime<Utc>) -> Self {
        Self {
            digital,
            analog,
            taken_at: Some(taken_at),
        }
    }

    /// Digital channel `index`, `false` when out of range
    #[must_use]
    pub fn digital_at(&self, index: usize) -> bool {
        self.digital.get(index).copied().unwrap_or(false)
    }

    /// Analog channel `index`, `None` when out of range or unreadable
    #[must_use]
    pub fn analog_at(&self, index: usize) -> Option<f64> {
        self.analog.get(index).copied().flatten()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.digital.is_empty() && self.analog.is_empty()
    }
}

/// The two generations rule evaluation compares
#[derive(Debug, Clone, Default)]
pub struct SnapshotPair {
    pub previous: Arc<InputSnapshot>,
    pub current: Arc<InputSnapshot>,
}

/// Latest and previous published snapshots.
///
/// Publishing swaps both generations under the channel's lock, so readers
/// always see a complete pair and never a half-written snapshot.
#[derive(Debug)]
pub struct SnapshotStore {
    tx: watch::Sender<SnapshotPair>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SnapshotPair::default());
        Self { tx }
    }

    /// Replace the current snapshot; the old current becomes previous
    pub fn publish(&self, snapshot: InputSnapshot) {
        self.tx.send_modify(|pair| {
            pair.previous = std::mem::replace(&mut pair.current, Arc::new(snapshot));
        });
    }

    /// Latest published snapshot (empty before the first poll)
    #[must_use]
    pub fn current(&self) -> Arc<InputSnapshot> {
        Arc::clone(&self.tx.borrow().current)
    }

    #[must_use]
    pub fn previous(&self) -> Arc<InputSnapshot> {
        Arc::clone(&self.tx.borrow().previous)
    }

    /// Both generations, read together
    #[must_use]
    pub fn pair(&self) -> SnapshotPair {
        self.tx.borrow().clone()
    }

    /// Receive a notification on every publish
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SnapshotPair> {
        self.tx.subscribe()
    }
}
