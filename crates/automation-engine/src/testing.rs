//! Test doubles shared by the engine's unit tests

use crate::event::{AutomationEvent, EVENT_CHANNEL_CAPACITY};
use crate::executor::ActionExecutor;
use crate::store::RuleStore;
use crate::timers::TimerManager;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hub_core::weather::{Forecast, WeatherError};
use hub_core::{DeviceGateway, GatewayError, LogSink, ManualClock, WeatherProvider};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

type Reading = (Vec<bool>, Vec<Option<f64>>);

/// Gateway that replays queued readings and records relay writes.
/// Once the queue is empty the last good reading repeats.
#[derive(Default)]
pub struct ScriptedGateway {
    readings: Mutex<VecDeque<Result<Reading, GatewayError>>>,
    last: Mutex<Reading>,
    outputs: Mutex<Vec<bool>>,
    writes: Mutex<Vec<(u16, bool)>>,
    failing_relays: Mutex<HashSet<u16>>,
    connect_failures: AtomicUsize,
    connect_attempts: AtomicUsize,
    panic_next_read: AtomicBool,
}

impl ScriptedGateway {
    pub fn push_reading(&self, digital: Vec<bool>, analog: Vec<Option<f64>>) {
        self.readings.lock().unwrap().push_back(Ok((digital, analog)));
    }

    pub fn push_failure(&self, error: GatewayError) {
        self.readings.lock().unwrap().push_back(Err(error));
    }

    /// Make the next read panic instead of returning
    pub fn panic_on_next_read(&self) {
        self.panic_next_read.store(true, Ordering::SeqCst);
    }

    pub fn fail_writes_to(&self, relay: u16) {
        self.failing_relays.lock().unwrap().insert(relay);
    }

    pub fn fail_connects(&self, times: usize) {
        self.connect_failures.store(times, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<(u16, bool)> {
        self.writes.lock().unwrap().clone()
    }

    fn next_reading(&self) -> Result<Reading, GatewayError> {
        if self.panic_next_read.swap(false, Ordering::SeqCst) {
            panic!("scripted gateway read panicked");
        }
        let next = self.readings.lock().unwrap().pop_front();
        match next {
            Some(Ok(reading)) => {
                *self.last.lock().unwrap() = reading.clone();
                Ok(reading)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }
}

fn sized<T: Clone>(mut values: Vec<T>, count: usize, fill: T) -> Vec<T> {
    values.resize(count, fill);
    values
}

#[async_trait]
impl DeviceGateway for ScriptedGateway {
    async fn connect(&self) -> Result<(), GatewayError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::DeviceUnreachable("connection refused".into()));
        }
        Ok(())
    }

    async fn read_digital_inputs(&self, count: usize) -> Result<Vec<bool>, GatewayError> {
        Ok(sized(self.next_reading()?.0, count, false))
    }

    async fn read_analog_inputs(&self, count: usize) -> Result<Vec<Option<f64>>, GatewayError> {
        Ok(sized(self.next_reading()?.1, count, None))
    }

    async fn read_outputs(&self, count: usize) -> Result<Vec<bool>, GatewayError> {
        Ok(sized(self.outputs.lock().unwrap().clone(), count, false))
    }

    async fn set_output(&self, relay: u16, on: bool) -> Result<(), GatewayError> {
        if self.failing_relays.lock().unwrap().contains(&relay) {
            return Err(GatewayError::DeviceUnreachable(format!("relay {relay} timed out")));
        }
        self.writes.lock().unwrap().push((relay, on));
        let mut outputs = self.outputs.lock().unwrap();
        let slot = usize::from(relay) - 1;
        if outputs.len() <= slot {
            outputs.resize(slot + 1, false);
        }
        outputs[slot] = on;
        Ok(())
    }

    async fn read_inputs(
        &self,
        digital_count: usize,
        analog_count: usize,
    ) -> Result<Reading, GatewayError> {
        let (digital, analog) = self.next_reading()?;
        Ok((
            sized(digital, digital_count, false),
            sized(analog, analog_count, None),
        ))
    }
}

/// Log sink that keeps entries in memory
#[derive(Default)]
pub struct RecordingLog {
    entries: Mutex<Vec<Value>>,
}

impl RecordingLog {
    pub fn entries(&self) -> Vec<Value> {
        self.entries.lock().unwrap().clone()
    }

    pub fn of_type(&self, kind: &str) -> Vec<Value> {
        self.entries()
            .into_iter()
            .filter(|e| e["type"] == kind)
            .collect()
    }
}

impl LogSink for RecordingLog {
    fn append(&self, event: Value) {
        self.entries.lock().unwrap().push(event);
    }
}

/// Weather provider returning a fixed forecast, or failing
pub struct StaticWeather {
    pub forecast: Mutex<Option<Forecast>>,
    pub calls: AtomicUsize,
}

impl StaticWeather {
    pub fn new(forecast: Option<Forecast>) -> Self {
        Self {
            forecast: Mutex::new(forecast),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WeatherProvider for StaticWeather {
    async fn fetch_forecast(&self) -> Result<Forecast, WeatherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.forecast
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| WeatherError::Request("weather offline".into()))
    }
}

/// Loopback HTTP endpoint answering every request with `status`.
/// Request bodies are recorded in arrival order.
pub struct WebhookStub {
    pub url: String,
    pub bodies: Arc<Mutex<Vec<Value>>>,
}

impl WebhookStub {
    pub async fn start(status: u16) -> Self {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let sink = bodies.clone();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                let body_start = loop {
                    let n = stream.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break None;
                    }
                    request.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                        break Some(pos + 4);
                    }
                };
                let Some(body_start) = body_start else {
                    continue;
                };

                let head = String::from_utf8_lossy(&request[..body_start]).to_lowercase();
                let length: usize = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0);
                while request.len() < body_start + length {
                    let n = stream.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&chunk[..n]);
                }
                let end = request.len().min(body_start + length);
                if let Ok(body) = serde_json::from_slice(&request[body_start..end]) {
                    sink.lock().unwrap().push(body);
                }

                let response =
                    format!("HTTP/1.1 {status} Stub\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self { url, bodies }
    }
}

/// Wait until `log` holds an entry of `kind`, for spawned work
pub async fn wait_for_log(log: &RecordingLog, kind: &str) -> Vec<Value> {
    for _ in 0..200 {
        let entries = log.of_type(kind);
        if !entries.is_empty() {
            return entries;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no {kind} entry logged");
}

/// Saturday 2024-06-01 12:00 UTC
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Wired-up store, timers and executor over a temp directory
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<ScriptedGateway>,
    pub log: Arc<RecordingLog>,
    pub store: Arc<RuleStore>,
    pub timers: Arc<TimerManager>,
    pub executor: Arc<ActionExecutor>,
    pub event_tx: broadcast::Sender<AutomationEvent>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_rules(serde_json::json!([])).await
    }

    /// Start with `rules` (a JSON array) already on disk
    pub async fn with_rules(rules: Value) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("rules.json"),
            serde_json::json!({ "rules": rules }).to_string(),
        )
        .unwrap();

        let clock = Arc::new(ManualClock::new(start_time()));
        let gateway = Arc::new(ScriptedGateway::default());
        let log = Arc::new(RecordingLog::default());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let store = Arc::new(RuleStore::load(dir.path().join("rules.json"), event_tx.clone()).await);
        let timers = Arc::new(
            TimerManager::load(
                dir.path().join("timers.json"),
                clock.clone(),
                event_tx.clone(),
                log.clone(),
            )
            .await,
        );
        let executor = Arc::new(
            ActionExecutor::new(
                gateway.clone(),
                timers.clone(),
                log.clone(),
                event_tx.clone(),
                Duration::from_millis(500),
            )
            .unwrap(),
        );

        Self {
            dir,
            clock,
            gateway,
            log,
            store,
            timers,
            executor,
            event_tx,
        }
    }
}
