//! Error types for the automation engine

use hub_core::GatewayError;
use thiserror::Error;

/// Errors that can occur in the automation engine
#[derive(Error, Debug)]
pub enum AutomationError {
    /// Rule not found
    #[error("Rule not found: {0}")]
    NotFound(String),

    /// Rule fails creation-time validation
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Invalid action configuration
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Invalid time format
    #[error("Invalid time format: {0}")]
    InvalidTimeFormat(String),

    /// A relay write or webhook failed
    #[error("Action execution failed: {0}")]
    ActionExecutionFailed(String),

    /// Device gateway error
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error (persistence)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
