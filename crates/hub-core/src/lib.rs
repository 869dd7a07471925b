//! Home hub device layer
//!
//! This crate provides the device gateway contract on top of the IPX800
//! protocol, the polled input snapshot store, the cached weather feed,
//! and the structured log sink shared by the automation engine and API.

pub mod clock;
pub mod gateway;
pub mod logbook;
pub mod persistence;
pub mod snapshot;
pub mod weather;

pub use clock::{Clock, ManualClock, SystemClock};
pub use gateway::{DeviceGateway, GatewayError, IpxGateway};
pub use logbook::{JsonlLogbook, LogSink};
pub use snapshot::{InputSnapshot, SnapshotStore};
pub use weather::{Forecast, OpenMeteoProvider, WeatherCache, WeatherProvider, WeatherSnapshot};
