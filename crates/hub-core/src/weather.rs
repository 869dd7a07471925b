//! Outside weather feed
//!
//! The automation engine only needs the current outside temperature and
//! today's sunrise/sunset. `WeatherCache` keeps the last good reading and
//! refreshes it at most once per TTL.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Open-Meteo forecast endpoint
const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Hourly slots returned by a forecast
pub const FORECAST_HOURS: usize = 18;

/// Default cache lifetime in seconds
pub const DEFAULT_TTL_SECS: i64 = 600;

/// How soon a failed refresh is retried, in seconds
const RETRY_AFTER_FAILURE_SECS: i64 = 60;

/// Weather errors
#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("Weather request failed: {0}")]
    Request(String),

    #[error("Unexpected weather payload: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for WeatherError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e.to_string())
    }
}

/// One hourly forecast slot (local time, `YYYY-MM-DDTHH:MM`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourSlot {
    pub time: String,
    pub temp: Option<f64>,
    /// Precipitation probability in percent
    pub pop: Option<f64>,
    /// WMO weather code
    pub code: Option<i64>,
}

/// Sunrise / sunset for one day, local ISO strings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SunTimes {
    pub sunrise: Option<String>,
    pub sunset: Option<String>,
}

/// Forecast returned by a provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub hours: Vec<HourSlot>,
    pub sun: Vec<SunTimes>,
}

/// Source of forecasts
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn fetch_forecast(&self) -> Result<Forecast, WeatherError>;
}

/// Open-Meteo client
pub struct OpenMeteoProvider {
    http: reqwest::Client,
    base_url: String,
    latitude: f64,
    longitude: f64,
    timezone: Tz,
}

impl OpenMeteoProvider {
    pub fn new(latitude: f64, longitude: f64, timezone: Tz) -> Result<Self, WeatherError> {
        Self::with_base_url(OPEN_METEO_URL, latitude, longitude, timezone)
    }

    /// Create a provider with a custom endpoint (for testing)
    pub fn with_base_url(
        base_url: &str,
        latitude: f64,
        longitude: f64,
        timezone: Tz,
    ) -> Result<Self, WeatherError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(8))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            latitude,
            longitude,
            timezone,
        })
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    async fn fetch_forecast(&self) -> Result<Forecast, WeatherError> {
        let latitude = self.latitude.to_string();
        let longitude = self.longitude.to_string();
        let params = [
            ("latitude", latitude.as_str()),
            ("longitude", longitude.as_str()),
            ("forecast_days", "2"),
            ("hourly", "temperature_2m,precipitation_probability,weathercode"),
            ("daily", "sunrise,sunset"),
            ("timezone", self.timezone.name()),
            ("timeformat", "iso8601"),
        ];

        let response = self
            .http
            .get(&self.base_url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?;
        let payload: OpenMeteoResponse = response
            .json()
            .await
            .map_err(|e| WeatherError::Malformed(e.to_string()))?;

        let now_local = Utc::now().with_timezone(&self.timezone);
        Ok(payload.into_forecast(now_local))
    }
}

#[derive(Debug, Default, Deserialize)]
struct OpenMeteoResponse {
    #[serde(default)]
    hourly: OpenMeteoHourly,
    #[serde(default)]
    daily: OpenMeteoDaily,
}

#[derive(Debug, Default, Deserialize)]
struct OpenMeteoHourly {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_probability: Vec<Option<f64>>,
    #[serde(default)]
    weathercode: Vec<Option<i64>>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenMeteoDaily {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    sunrise: Vec<Option<String>>,
    #[serde(default)]
    sunset: Vec<Option<String>>,
}

impl OpenMeteoResponse {
    /// The next `FORECAST_HOURS` slots from the current local hour, padded
    /// with empty slots, plus today's sunrise and sunset
    fn into_forecast(self, now_local: DateTime<Tz>) -> Forecast {
        let tz = now_local.timezone();
        let start = now_local
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now_local);

        let mut rows: Vec<(DateTime<Tz>, HourSlot)> = self
            .hourly
            .time
            .iter()
            .enumerate()
            .filter_map(|(i, t)| {
                let dt = parse_local_datetime(t, &tz)?.with_timezone(&tz);
                Some((
                    dt,
                    HourSlot {
                        time: dt.format("%Y-%m-%dT%H:%M").to_string(),
                        temp: self.hourly.temperature_2m.get(i).copied().flatten(),
                        pop: self.hourly.precipitation_probability.get(i).copied().flatten(),
                        code: self.hourly.weathercode.get(i).copied().flatten(),
                    },
                ))
            })
            .collect();
        rows.sort_by_key(|(dt, _)| *dt);

        let mut hours: Vec<HourSlot> = rows
            .into_iter()
            .filter(|(dt, _)| *dt >= start)
            .take(FORECAST_HOURS)
            .map(|(_, slot)| slot)
            .collect();

        let mut next = start + Duration::hours(hours.len() as i64);
        while hours.len() < FORECAST_HOURS {
            hours.push(HourSlot {
                time: next.format("%Y-%m-%dT%H:%M").to_string(),
                temp: None,
                pop: None,
                code: None,
            });
            next += Duration::hours(1);
        }

        let today = start.format("%Y-%m-%d").to_string();
        let sun = self
            .daily
            .time
            .iter()
            .position(|d| *d == today)
            .map(|i| SunTimes {
                sunrise: self.daily.sunrise.get(i).cloned().flatten(),
                sunset: self.daily.sunset.get(i).cloned().flatten(),
            })
            .unwrap_or_default();

        Forecast {
            hours,
            sun: vec![sun],
        }
    }
}

/// Parse an ISO timestamp. `Z` and explicit offsets are honored; naive
/// values are taken as local time in `tz`.
pub fn parse_local_datetime(s: &str, tz: &Tz) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .ok()?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Cached outside conditions used by rule evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    /// Outside temperature for the current hour
    pub temp: Option<f64>,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
    /// When this snapshot was fetched, `None` if never
    pub fetched_at: Option<DateTime<Utc>>,
}

impl WeatherSnapshot {
    /// Build a snapshot from a forecast's first hour and first sun entry
    #[must_use]
    pub fn from_forecast(forecast: &Forecast, tz: &Tz, fetched_at: DateTime<Utc>) -> Self {
        let sun = forecast.sun.first();
        let parse = |v: Option<&String>| v.and_then(|s| parse_local_datetime(s, tz));
        Self {
            temp: forecast.hours.first().and_then(|h| h.temp),
            sunrise: parse(sun.and_then(|s| s.sunrise.as_ref())),
            sunset: parse(sun.and_then(|s| s.sunset.as_ref())),
            fetched_at: Some(fetched_at),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    snapshot: WeatherSnapshot,
    forecast: Option<Forecast>,
    last_attempt: Option<DateTime<Utc>>,
}

/// Weather snapshot refreshed at most once per TTL
pub struct WeatherCache {
    provider: Arc<dyn WeatherProvider>,
    timezone: Tz,
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl WeatherCache {
    pub fn new(provider: Arc<dyn WeatherProvider>, timezone: Tz, ttl: Duration) -> Self {
        Self {
            provider,
            timezone,
            ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Current cached snapshot
    pub fn snapshot(&self) -> WeatherSnapshot {
        self.read_state().snapshot.clone()
    }

    /// Last full forecast, if any refresh has succeeded
    pub fn forecast(&self) -> Option<Forecast> {
        self.read_state().forecast.clone()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let state = self.read_state();
        let fresh = state
            .snapshot
            .fetched_at
            .is_some_and(|at| now - at < self.ttl);
        let backing_off = state
            .last_attempt
            .is_some_and(|at| now - at < Duration::seconds(RETRY_AFTER_FAILURE_SECS).min(self.ttl));
        !fresh && !backing_off
    }

    /// Refresh when stale. Returns whether a new snapshot was stored; on
    /// failure the previous snapshot stays in place.
    pub async fn refresh_if_stale(&self, now: DateTime<Utc>) -> Result<bool, WeatherError> {
        if !self.is_stale(now) {
            return Ok(false);
        }

        let result = self.provider.fetch_forecast().await;
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.last_attempt = Some(now);

        let forecast = result?;
        state.snapshot = WeatherSnapshot::from_forecast(&forecast, &self.timezone, now);
        state.forecast = Some(forecast);
        tracing::debug!(
            temp = ?state.snapshot.temp,
            sunrise = ?state.snapshot.sunrise,
            sunset = ?state.snapshot.sunset,
            "Weather refreshed"
        );
        Ok(true)
    }
}
