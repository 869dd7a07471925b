//! Poll loop
//!
//! One task owns the loop: read inputs, publish the snapshot, refresh the
//! weather cache, evaluate rules, expire timers, sleep. Every step reports
//! failures as values; the loop records them and moves on to the next tick.

use crate::engine::RuleEngine;
use crate::executor::ActionExecutor;
use crate::model::{FiredRule, TimerJob};
use crate::timers::TimerManager;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use hub_core::weather::WeatherError;
use hub_core::{
    Clock, DeviceGateway, GatewayError, InputSnapshot, LogSink, SnapshotStore, WeatherCache,
    WeatherSnapshot,
};
use serde::Serialize;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Lower bound on the poll interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll loop settings, fixed at startup
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    /// Wait between connection attempts while the device is unreachable
    pub reconnect_backoff: Duration,
    pub digital_count: usize,
    pub analog_count: usize,
    pub timezone: Tz,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            reconnect_backoff: Duration::from_secs(5),
            digital_count: 32,
            analog_count: 16,
            timezone: chrono_tz::Europe::Brussels,
        }
    }
}

/// A failure inside one tick
#[derive(Error, Debug)]
pub enum TickError {
    #[error("ipx_connect: {0}")]
    Connect(GatewayError),

    #[error("ipx_read: {0}")]
    Read(GatewayError),

    #[error("weather_refresh: {0}")]
    Weather(#[from] WeatherError),

    #[error("poll_loop: tick panicked: {0}")]
    Panicked(String),
}

impl TickError {
    /// Short tag for the log's `where` field
    pub fn location(&self) -> &'static str {
        match self {
            Self::Connect(_) => "ipx_connect",
            Self::Read(_) => "ipx_read",
            Self::Weather(_) => "weather_refresh",
            Self::Panicked(_) => "poll_loop",
        }
    }
}

/// What one tick did
#[derive(Debug, Default)]
pub struct TickReport {
    pub fired: Vec<FiredRule>,
    pub expired: Vec<TimerJob>,
    pub errors: Vec<TickError>,
}

/// Loop status for dashboards and health checks
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubMeta {
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub weather: WeatherSnapshot,
}

/// Read-only view of the running loop
#[derive(Clone)]
pub struct PollerHandle {
    snapshots: Arc<SnapshotStore>,
    meta: Arc<RwLock<HubMeta>>,
}

impl PollerHandle {
    /// Latest published snapshot; stale but valid while the device is down
    pub fn current_state(&self) -> Arc<InputSnapshot> {
        self.snapshots.current()
    }

    pub fn current_meta(&self) -> HubMeta {
        self.meta.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }
}

/// The polling and rule evaluation loop
pub struct Poller {
    config: PollerConfig,
    gateway: Arc<dyn DeviceGateway>,
    snapshots: Arc<SnapshotStore>,
    weather: Arc<WeatherCache>,
    engine: RuleEngine,
    executor: Arc<ActionExecutor>,
    timers: Arc<TimerManager>,
    clock: Arc<dyn Clock>,
    log: Arc<dyn LogSink>,
    meta: Arc<RwLock<HubMeta>>,
    connected: bool,
}

impl Poller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PollerConfig,
        gateway: Arc<dyn DeviceGateway>,
        snapshots: Arc<SnapshotStore>,
        weather: Arc<WeatherCache>,
        engine: RuleEngine,
        executor: Arc<ActionExecutor>,
        clock: Arc<dyn Clock>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        let timers = Arc::clone(executor.timers());
        Self {
            config,
            gateway,
            snapshots,
            weather,
            engine,
            executor,
            timers,
            clock,
            log,
            meta: Arc::new(RwLock::new(HubMeta::default())),
            connected: false,
        }
    }

    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            snapshots: Arc::clone(&self.snapshots),
            meta: Arc::clone(&self.meta),
        }
    }

    /// Loop forever. Connection failures back off; everything else waits
    /// for the remainder of the poll interval.
    pub async fn run(mut self) {
        let interval = self.config.poll_interval.max(MIN_POLL_INTERVAL);
        tracing::info!(
            "Poll loop started (interval {:?}, {} digital / {} analog channels)",
            interval,
            self.config.digital_count,
            self.config.analog_count
        );

        loop {
            let started = Instant::now();

            if !self.connected {
                if let Err(e) = self.connect().await {
                    tracing::warn!("{}; retrying in {:?}", e, self.config.reconnect_backoff);
                    self.record_errors(&[e]);
                    tokio::time::sleep(self.config.reconnect_backoff).await;
                    continue;
                }
            }

            let report = match AssertUnwindSafe(self.tick()).catch_unwind().await {
                Ok(report) => report,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    TickReport {
                        errors: vec![TickError::Panicked(message)],
                        ..Default::default()
                    }
                }
            };
            for e in &report.errors {
                tracing::warn!("{}", e);
            }
            self.record_errors(&report.errors);

            tokio::time::sleep(interval.saturating_sub(started.elapsed())).await;
        }
    }

    async fn connect(&mut self) -> Result<(), TickError> {
        self.gateway.connect().await.map_err(TickError::Connect)?;
        self.connected = true;
        Ok(())
    }

    /// One cycle: read, publish, refresh weather, evaluate, expire timers
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let now = self.clock.now_utc();

        let read = self
            .gateway
            .read_inputs(self.config.digital_count, self.config.analog_count)
            .await;
        let (previous, current) = match read {
            Ok((digital, analog)) => {
                self.snapshots
                    .publish(InputSnapshot::new(digital, analog, now));
                self.write_meta(|meta| meta.last_success = Some(now));
                let pair = self.snapshots.pair();
                (pair.previous, pair.current)
            }
            Err(e) => {
                // Stale state: level conditions still apply, edges cannot
                report.errors.push(TickError::Read(e));
                let current = self.snapshots.current();
                (Arc::clone(&current), current)
            }
        };

        if let Err(e) = self.weather.refresh_if_stale(now).await {
            report.errors.push(TickError::Weather(e));
        }
        let weather = self.weather.snapshot();
        self.write_meta(|meta| meta.weather = weather.clone());

        let local_now = now.with_timezone(&self.config.timezone);
        report.fired = self
            .engine
            .evaluate(&previous, &current, local_now, &weather)
            .await;

        let executor = Arc::clone(&self.executor);
        report.expired = self
            .timers
            .tick_and_execute_due(|undo, target| {
                let executor = Arc::clone(&executor);
                async move { executor.apply_undo(undo, target).await }
            })
            .await;

        report
    }

    fn record_errors(&self, errors: &[TickError]) {
        let Some(last) = errors.last() else {
            return;
        };
        let now = self.clock.now_utc();
        for e in errors {
            self.log.append(json!({
                "type": "error",
                "where": e.location(),
                "error": e.to_string(),
            }));
        }
        self.write_meta(|meta| {
            meta.last_error = Some(last.to_string());
            meta.last_error_at = Some(now);
        });
    }

    fn write_meta(&self, update: impl FnOnce(&mut HubMeta)) {
        let mut meta = self.meta.write().unwrap_or_else(|e| e.into_inner());
        update(&mut meta);
    }
}
