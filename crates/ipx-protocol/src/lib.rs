//! IPX800 HTTP/XML protocol implementation
//!
//! This crate implements the polling protocol used to talk to GCE
//! Electronics IPX800 relay/IO controllers: the `status.xml` document
//! and the `preset.htm` relay endpoint.

pub mod analog;
pub mod client;
pub mod error;
pub mod status;

pub use analog::{AnalogMode, AnalogScaling};
pub use client::{IpxClient, IpxClientConfig};
pub use error::ProtocolError;
pub use status::{PresentTags, StatusDocument};
