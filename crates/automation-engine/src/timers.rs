//! Persisted one-shot revert timers
//!
//! At most one timer is active per target. Every mutation is written to
//! disk; the in-memory set stays authoritative when a write fails.

use crate::error::AutomationError;
use crate::event::AutomationEvent;
use crate::model::{ActiveTimer, RelayOp, TimerJob, TimerOrigin, TimerTarget};
use crate::persistence;
use hub_core::{Clock, LogSink};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

pub struct TimerManager {
    /// Guards the job set; cancel and expiry both remove under this lock
    jobs: Mutex<HashMap<String, TimerJob>>,
    data_path: PathBuf,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<AutomationEvent>,
    log: Arc<dyn LogSink>,
}

impl TimerManager {
    /// Restore persisted jobs. Jobs already past due fire on the first tick.
    pub async fn load(
        data_path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
        event_tx: broadcast::Sender<AutomationEvent>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        let data_path = data_path.into();
        let jobs = match persistence::load_timers(&data_path).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!("Failed to load timers from {:?}: {}", data_path, e);
                log.append(json!({"type": "error", "where": "timers_load", "error": e.to_string()}));
                Vec::new()
            }
        };
        if !jobs.is_empty() {
            tracing::info!("Restored {} timers from {:?}", jobs.len(), data_path);
        }

        Self {
            jobs: Mutex::new(jobs.into_iter().map(|j| (j.id.clone(), j)).collect()),
            data_path,
            clock,
            event_tx,
            log,
        }
    }

    async fn persist(&self, jobs: &HashMap<String, TimerJob>) {
        let mut snapshot: Vec<TimerJob> = jobs.values().cloned().collect();
        snapshot.sort_by(|a, b| a.due_at.cmp(&b.due_at));
        if let Err(e) = persistence::save_timers(&self.data_path, snapshot).await {
            tracing::warn!("Failed to save timers to {:?}: {}", self.data_path, e);
            self.log
                .append(json!({"type": "error", "where": "timers_save", "error": e.to_string()}));
        }
    }

    /// Schedule `undo` on `target` after `duration_seconds`, replacing any
    /// timer already governing that target. Fails without touching the job
    /// set when the due time is not representable.
    pub async fn schedule(
        &self,
        duration_seconds: u64,
        target: TimerTarget,
        action: RelayOp,
        undo: RelayOp,
        origin: TimerOrigin,
    ) -> Result<TimerJob, AutomationError> {
        let now = self.clock.now_utc();
        let due_at = i64::try_from(duration_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|delay| now.checked_add_signed(delay))
            .ok_or_else(|| {
                AutomationError::InvalidAction(format!(
                    "timer duration of {duration_seconds}s is out of range"
                ))
            })?;
        let job = TimerJob {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: now,
            due_at,
            duration_seconds,
            target,
            action,
            undo,
            origin,
        };

        let mut jobs = self.jobs.lock().await;
        let replaced: Vec<String> = jobs
            .values()
            .filter(|j| j.target == target)
            .map(|j| j.id.clone())
            .collect();
        for id in &replaced {
            jobs.remove(id);
            tracing::debug!("Timer {} replaced on {:?}", id, target);
        }
        jobs.insert(job.id.clone(), job.clone());
        self.persist(&jobs).await;
        drop(jobs);

        let _ = self.event_tx.send(AutomationEvent::TimerScheduled {
            timer_id: job.id.clone(),
            target,
            origin: job.origin.clone(),
            due_at: job.due_at,
        });
        tracing::info!(
            "Timer {} scheduled on {:?}: {} in {}s",
            job.id,
            target,
            undo.as_str(),
            duration_seconds
        );
        Ok(job)
    }

    /// Remove a job without running its undo. `false` if it was already
    /// gone, including when it expired first.
    pub async fn cancel(&self, id: &str) -> bool {
        let mut jobs = self.jobs.lock().await;
        if jobs.remove(id).is_none() {
            return false;
        }
        self.persist(&jobs).await;
        drop(jobs);

        let _ = self.event_tx.send(AutomationEvent::TimerCancelled {
            timer_id: id.to_string(),
        });
        tracing::info!("Timer {} cancelled", id);
        true
    }

    /// Active timers, soonest first
    pub async fn list_active(&self) -> Vec<ActiveTimer> {
        let now = self.clock.now_utc();
        let jobs = self.jobs.lock().await;
        let mut active: Vec<&TimerJob> = jobs.values().collect();
        active.sort_by(|a, b| a.due_at.cmp(&b.due_at));
        active.into_iter().map(|j| j.to_active(now)).collect()
    }

    /// Countdown for the timer governing `target`, if any
    pub async fn active_for_target(&self, target: &TimerTarget) -> Option<ActiveTimer> {
        let now = self.clock.now_utc();
        let jobs = self.jobs.lock().await;
        jobs.values()
            .find(|j| j.target == *target)
            .map(|j| j.to_active(now))
    }

    /// Remove every job with `due_at <= now` and run `undo_executor` for
    /// each. Executor failures are logged; they never reach the caller.
    /// Returns the jobs that expired.
    pub async fn tick_and_execute_due<F, Fut>(&self, undo_executor: F) -> Vec<TimerJob>
    where
        F: Fn(RelayOp, TimerTarget) -> Fut,
        Fut: Future<Output = Result<(), AutomationError>>,
    {
        let now = self.clock.now_utc();
        let due: Vec<TimerJob> = {
            let mut jobs = self.jobs.lock().await;
            let mut due_ids: Vec<(chrono::DateTime<chrono::Utc>, String)> = jobs
                .values()
                .filter(|j| j.due_at <= now)
                .map(|j| (j.due_at, j.id.clone()))
                .collect();
            due_ids.sort();
            due_ids
                .into_iter()
                .filter_map(|(_, id)| jobs.remove(&id))
                .collect()
        };
        if due.is_empty() {
            return due;
        }

        for job in &due {
            let result = undo_executor(job.undo, job.target).await;
            let success = result.is_ok();
            match result {
                Ok(()) => {
                    tracing::info!(
                        "Timer {} expired: {} on {:?}",
                        job.id,
                        job.undo.as_str(),
                        job.target
                    );
                    self.log.append(json!({
                        "type": "timer",
                        "timer_id": job.id,
                        "target": job.target,
                        "undo": job.undo,
                        "origin": job.origin,
                    }));
                }
                Err(e) => {
                    tracing::error!("Timer {} undo failed: {}", job.id, e);
                    self.log.append(json!({
                        "type": "error",
                        "where": "undo_apply",
                        "timer_id": job.id,
                        "error": e.to_string(),
                    }));
                }
            }
            let _ = self.event_tx.send(AutomationEvent::TimerExpired {
                timer_id: job.id.clone(),
                target: job.target,
                undo: job.undo,
                success,
            });
        }

        let jobs = self.jobs.lock().await;
        self.persist(&jobs).await;
        due
    }
}
