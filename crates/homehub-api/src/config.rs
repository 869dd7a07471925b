//! Startup configuration from environment variables

use automation_engine::PollerConfig;
use chrono_tz::Tz;
use ipx_protocol::{AnalogMode, AnalogScaling, IpxClientConfig};
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Missing or invalid settings. Fatal: the hub does not start.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Everything read once at startup
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub host: IpAddr,
    pub port: u16,
    pub timezone: Tz,
    pub latitude: f64,
    pub longitude: f64,
    pub poll_interval: Duration,
    pub reconnect_backoff: Duration,
    pub weather_ttl: chrono::Duration,
    pub ipx: IpxClientConfig,
    pub max_buttons: usize,
    pub max_analogs: usize,
    pub max_relays: u16,
    pub analog: AnalogScaling,
    pub webhook_timeout: Duration,
    pub data_dir: PathBuf,
}

impl HubConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        let ipx_host = env
            .string("IPX_HOST")
            .ok_or(ConfigError::Missing("IPX_HOST"))?;
        let mut ipx = IpxClientConfig::new(ipx_host, env.parse("IPX_PORT", 80)?);
        ipx.user = env.string("IPX_USER");
        ipx.password = env.string("IPX_PASS");
        if let Some(path) = env.string("IPX_STATUS_PATH") {
            ipx.status_path = path;
        }
        ipx.timeout = env.seconds("IPX_HTTP_TIMEOUT", 5.0)?;

        let analog = AnalogScaling {
            mode: env.parse("IPX_ANALOG_MODE", AnalogMode::Auto)?,
            vref: env.parse("IPX_ANALOG_VREF", 3.3)?,
            resolution: env.parse("IPX_ANALOG_RESOLUTION", 1023)?,
        };
        if analog.resolution == 0 {
            return Err(ConfigError::Invalid {
                key: "IPX_ANALOG_RESOLUTION",
                reason: "must be greater than 0".to_string(),
            });
        }

        let weather_ttl: u32 = env.parse("WEATHER_TTL_SECONDS", 600)?;

        Ok(Self {
            host: env.parse("HOST", IpAddr::from([0, 0, 0, 0]))?,
            port: env.parse("PORT", 8080)?,
            timezone: env.parse("TIMEZONE", chrono_tz::Europe::Brussels)?,
            latitude: env.parse("LATITUDE", 50.716)?,
            longitude: env.parse("LONGITUDE", 4.519)?,
            poll_interval: env.seconds("POLL_EVERY_SECONDS", 2.0)?,
            reconnect_backoff: env.seconds("RECONNECT_BACKOFF_SECONDS", 5.0)?,
            weather_ttl: chrono::Duration::seconds(i64::from(weather_ttl)),
            ipx,
            max_buttons: env.parse("IPX_MAX_BUTTONS", 32)?,
            max_analogs: env.parse("IPX_MAX_ANALOGS", 16)?,
            max_relays: env.parse("IPX_MAX_RELAYS", 32)?,
            analog,
            webhook_timeout: env.seconds("WEBHOOK_TIMEOUT_SECONDS", 4.0)?,
            data_dir: env
                .string("DATA_DIR")
                .map_or_else(|| PathBuf::from("./data"), PathBuf::from),
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: self.poll_interval,
            reconnect_backoff: self.reconnect_backoff,
            digital_count: self.max_buttons,
            analog_count: self.max_analogs,
            timezone: self.timezone,
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.string(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: format!("{raw:?}: {e}"),
            }),
        }
    }

    /// Non-negative seconds, fractions allowed
    fn seconds(&self, key: &'static str, default: f64) -> Result<Duration, ConfigError> {
        let secs: f64 = self.parse(key, default)?;
        Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        })
    }
}
