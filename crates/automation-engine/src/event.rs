//! Events published by the engine, executor and timer manager

use crate::model::{RelayOp, TimerOrigin, TimerTarget};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Events emitted on the hub's broadcast channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutomationEvent {
    /// A rule's trigger fired
    RuleTriggered {
        rule_id: String,
        trigger: String,
        reason: String,
    },
    /// An action completed
    ActionExecuted {
        rule_id: String,
        action: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        relay: Option<u16>,
    },
    /// An action failed; remaining actions still run
    ActionFailed {
        rule_id: String,
        action: String,
        error: String,
    },
    TimerScheduled {
        timer_id: String,
        target: TimerTarget,
        origin: TimerOrigin,
        due_at: DateTime<Utc>,
    },
    TimerCancelled {
        timer_id: String,
    },
    /// A timer expired and its undo ran (or failed)
    TimerExpired {
        timer_id: String,
        target: TimerTarget,
        undo: RelayOp,
        success: bool,
    },
    RuleCreated {
        rule_id: String,
    },
    RuleUpdated {
        rule_id: String,
    },
    RuleDeleted {
        rule_id: String,
    },
}

/// Capacity of the hub event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
