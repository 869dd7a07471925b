//! Protocol error types

use thiserror::Error;

/// Errors raised while talking to the controller
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Controller unreachable: {0}")]
    Unreachable(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Controller returned HTTP {0}")]
    HttpStatus(u16),

    #[error("Empty response from {0}")]
    EmptyResponse(String),

    #[error("Malformed status document: {0}")]
    Malformed(String),

    #[error("Invalid relay number: {0}")]
    InvalidRelay(u16),
}

impl ProtocolError {
    /// Whether the failure is a transport-level problem rather than bad data
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Timeout | Self::HttpStatus(_)
        )
    }
}

impl From<reqwest::Error> for ProtocolError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if let Some(status) = e.status() {
            Self::HttpStatus(status.as_u16())
        } else {
            Self::Unreachable(e.to_string())
        }
    }
}
