//! Data models for the automation engine

use crate::error::AutomationError;
use crate::evaluator::parse_hm;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Priority assigned to rules that do not set one
pub const DEFAULT_PRIORITY: i64 = 100;

/// Longest accepted revert delay (30 days)
pub const MAX_REVERT_SECONDS: u64 = 30 * 24 * 3600;

/// Reject revert delays the timer manager cannot schedule
pub fn check_revert_after(seconds: Option<u64>) -> Result<(), AutomationError> {
    match seconds {
        Some(s) if s > MAX_REVERT_SECONDS => Err(AutomationError::InvalidAction(format!(
            "revert_after_seconds must be at most {MAX_REVERT_SECONDS}, got {s}"
        ))),
        _ => Ok(()),
    }
}

/// A persisted automation rule.
///
/// The shape is flat: which of `index`, `threshold`, `start`/`end` matter
/// depends on the trigger family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier, assigned at creation
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Input family read by digital and analog triggers
    #[serde(default)]
    pub input_type: Option<InputType>,
    /// Channel index (0-based)
    #[serde(default, deserialize_with = "null_as_default")]
    pub index: usize,
    pub trigger: TriggerKind,
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Window start, HH:MM local time
    #[serde(default)]
    pub start: Option<String>,
    /// Window end, HH:MM local time
    #[serde(default)]
    pub end: Option<String>,
    /// Local weekdays the rule applies on (0=Monday, 6=Sunday).
    /// `None` means every day.
    #[serde(default)]
    pub days: Option<Vec<u8>>,
    /// Lower runs first
    #[serde(default = "default_priority", deserialize_with = "null_as_priority")]
    pub priority: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cooldown_seconds: f64,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Input family a rule reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Digital,
    Analog,
}

/// What makes a rule fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    OnRising,
    OnFalling,
    OnChange,
    Above,
    Below,
    CrossUp,
    CrossDown,
    TimeBetween,
    AfterSunrise,
    BeforeSunrise,
    AfterSunset,
    BeforeSunset,
    TempAbove,
    TempBelow,
}

/// Trigger families, each evaluated differently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerFamily {
    Digital,
    Analog,
    Time,
    Sun,
    Temperature,
}

impl TriggerKind {
    pub fn family(self) -> TriggerFamily {
        match self {
            Self::OnRising | Self::OnFalling | Self::OnChange => TriggerFamily::Digital,
            Self::Above | Self::Below | Self::CrossUp | Self::CrossDown => TriggerFamily::Analog,
            Self::TimeBetween => TriggerFamily::Time,
            Self::AfterSunrise | Self::BeforeSunrise | Self::AfterSunset | Self::BeforeSunset => {
                TriggerFamily::Sun
            }
            Self::TempAbove | Self::TempBelow => TriggerFamily::Temperature,
        }
    }

    /// Wire name, e.g. `cross_up`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnRising => "on_rising",
            Self::OnFalling => "on_falling",
            Self::OnChange => "on_change",
            Self::Above => "above",
            Self::Below => "below",
            Self::CrossUp => "cross_up",
            Self::CrossDown => "cross_down",
            Self::TimeBetween => "time_between",
            Self::AfterSunrise => "after_sunrise",
            Self::BeforeSunrise => "before_sunrise",
            Self::AfterSunset => "after_sunset",
            Self::BeforeSunset => "before_sunset",
            Self::TempAbove => "temp_above",
            Self::TempBelow => "temp_below",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One effect performed when a rule fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    SetRelayOn {
        /// 1-based relay number
        relay: u16,
        /// Schedule the inverse operation after this many seconds
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revert_after_seconds: Option<u64>,
    },
    SetRelayOff {
        relay: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revert_after_seconds: Option<u64>,
    },
    ToggleRelay {
        relay: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revert_after_seconds: Option<u64>,
    },
    /// Fire-and-forget HTTP POST
    Webhook {
        url: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

impl Action {
    /// Wire name of the action type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetRelayOn { .. } => "set_relay_on",
            Self::SetRelayOff { .. } => "set_relay_off",
            Self::ToggleRelay { .. } => "toggle_relay",
            Self::Webhook { .. } => "webhook",
        }
    }

    /// Relay number, operation and revert delay for relay actions
    pub fn relay_op(&self) -> Option<(u16, RelayOp, Option<u64>)> {
        match *self {
            Self::SetRelayOn {
                relay,
                revert_after_seconds,
            } => Some((relay, RelayOp::SetOn, revert_after_seconds)),
            Self::SetRelayOff {
                relay,
                revert_after_seconds,
            } => Some((relay, RelayOp::SetOff, revert_after_seconds)),
            Self::ToggleRelay {
                relay,
                revert_after_seconds,
            } => Some((relay, RelayOp::Toggle, revert_after_seconds)),
            Self::Webhook { .. } => None,
        }
    }

    fn validate(&self) -> Result<(), AutomationError> {
        match self {
            Self::Webhook { url, .. } if url.trim().is_empty() => Err(
                AutomationError::InvalidAction("webhook requires a url".to_string()),
            ),
            Self::Webhook { .. } => Ok(()),
            _ => match self.relay_op() {
                Some((0, _, _)) => Err(AutomationError::InvalidAction(format!(
                    "{} requires a relay number >= 1",
                    self.kind()
                ))),
                Some((_, _, revert_after)) => check_revert_after(revert_after),
                None => Ok(()),
            },
        }
    }
}

/// Relay operation descriptor used by timers (`do` / `undo`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayOp {
    #[serde(alias = "set_relay_on")]
    SetOn,
    #[serde(alias = "set_relay_off")]
    SetOff,
    #[serde(alias = "toggle_relay")]
    Toggle,
}

impl RelayOp {
    /// Operation that reverts this one
    pub fn inverse(self) -> Self {
        match self {
            Self::SetOn => Self::SetOff,
            Self::SetOff => Self::SetOn,
            Self::Toggle => Self::Toggle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetOn => "set_on",
            Self::SetOff => "set_off",
            Self::Toggle => "toggle",
        }
    }
}

/// Resource governed by a timer; at most one active timer per target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimerTarget {
    #[serde(alias = "ipx_relay")]
    Relay { relay: u16 },
}

impl TimerTarget {
    pub fn relay(relay: u16) -> Self {
        Self::Relay { relay }
    }
}

/// Who created a timer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerOrigin {
    pub kind: OriginKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    Rule,
    Manual,
    Icon,
    Api,
}

impl TimerOrigin {
    pub fn rule(rule_id: impl Into<String>) -> Self {
        Self {
            kind: OriginKind::Rule,
            id: Some(rule_id.into()),
        }
    }

    pub fn manual() -> Self {
        Self {
            kind: OriginKind::Manual,
            id: None,
        }
    }
}

/// A scheduled, persisted one-shot revert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerJob {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub duration_seconds: u64,
    pub target: TimerTarget,
    /// Operation that was applied when the timer started
    #[serde(rename = "do")]
    pub action: RelayOp,
    /// Operation executed at expiry
    pub undo: RelayOp,
    pub origin: TimerOrigin,
}

impl TimerJob {
    /// Whole seconds left before expiry, never negative
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.due_at - now).num_seconds()).unwrap_or(0)
    }

    pub fn to_active(&self, now: DateTime<Utc>) -> ActiveTimer {
        ActiveTimer {
            id: self.id.clone(),
            target: self.target,
            origin: self.origin.clone(),
            remaining_seconds: self.remaining_seconds(now),
            total_seconds: self.duration_seconds,
        }
    }
}

/// Countdown view of an active timer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveTimer {
    pub id: String,
    pub target: TimerTarget,
    pub origin: TimerOrigin,
    pub remaining_seconds: u64,
    pub total_seconds: u64,
}

/// A rule that fired during an evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiredRule {
    pub rule: Rule,
    pub reason: String,
}

/// Request to create a new rule
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRuleRequest {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub input_type: Option<InputType>,
    #[serde(default)]
    pub index: usize,
    pub trigger: TriggerKind,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub days: Option<Vec<u8>>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub cooldown_seconds: f64,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Request to update a rule; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRuleRequest {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub input_type: Option<Option<InputType>>,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub trigger: Option<TriggerKind>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub threshold: Option<Option<f64>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub start: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub end: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub days: Option<Option<Vec<u8>>>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub cooldown_seconds: Option<f64>,
    #[serde(default)]
    pub actions: Option<Vec<Action>>,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Distinguishes an explicit `null` (clear the field) from an absent one
fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn null_as_priority<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or(DEFAULT_PRIORITY))
}

impl Rule {
    /// Create a new rule from a create request
    pub fn from_request(request: CreateRuleRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            enabled: request.enabled,
            input_type: request.input_type,
            index: request.index,
            trigger: request.trigger,
            threshold: request.threshold,
            start: request.start,
            end: request.end,
            days: request.days,
            priority: request.priority.unwrap_or(DEFAULT_PRIORITY),
            cooldown_seconds: request.cooldown_seconds,
            actions: request.actions,
        }
    }

    /// Apply an update request to this rule
    pub fn apply_update(&mut self, update: UpdateRuleRequest) {
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(input_type) = update.input_type {
            self.input_type = input_type;
        }
        if let Some(index) = update.index {
            self.index = index;
        }
        if let Some(trigger) = update.trigger {
            self.trigger = trigger;
        }
        if let Some(threshold) = update.threshold {
            self.threshold = threshold;
        }
        if let Some(start) = update.start {
            self.start = start;
        }
        if let Some(end) = update.end {
            self.end = end;
        }
        if let Some(days) = update.days {
            self.days = days;
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        if let Some(cooldown) = update.cooldown_seconds {
            self.cooldown_seconds = cooldown;
        }
        if let Some(actions) = update.actions {
            self.actions = actions;
        }
    }

    /// Fill in defaults for rules read from storage: a missing id is
    /// assigned and out-of-range weekdays are dropped.
    pub fn normalize(&mut self) {
        if self.id.trim().is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        if let Some(days) = self.days.as_mut() {
            days.retain(|d| *d <= 6);
        }
    }

    /// Creation-time checks; evaluation never re-validates
    pub fn validate(&self) -> Result<(), AutomationError> {
        let trigger = self.trigger;
        match trigger.family() {
            TriggerFamily::Digital => {
                if self.input_type != Some(InputType::Digital) {
                    return Err(AutomationError::InvalidRule(format!(
                        "{trigger} requires input_type \"digital\""
                    )));
                }
            }
            TriggerFamily::Analog => {
                if self.input_type != Some(InputType::Analog) {
                    return Err(AutomationError::InvalidRule(format!(
                        "{trigger} requires input_type \"analog\""
                    )));
                }
                self.require_threshold()?;
            }
            TriggerFamily::Time => {
                for value in [&self.start, &self.end] {
                    let text = value.as_deref().unwrap_or_default();
                    if parse_hm(text).is_none() {
                        return Err(AutomationError::InvalidTimeFormat(format!(
                            "expected HH:MM, got {text:?}"
                        )));
                    }
                }
            }
            TriggerFamily::Temperature => self.require_threshold()?,
            TriggerFamily::Sun => {}
        }

        if !self.cooldown_seconds.is_finite() || self.cooldown_seconds < 0.0 {
            return Err(AutomationError::InvalidRule(
                "cooldown_seconds must be >= 0".to_string(),
            ));
        }
        if let Some(day) = self.days.iter().flatten().find(|d| **d > 6) {
            return Err(AutomationError::InvalidRule(format!(
                "weekday {day} out of range 0-6"
            )));
        }
        for action in &self.actions {
            action.validate()?;
        }
        Ok(())
    }

    fn require_threshold(&self) -> Result<(), AutomationError> {
        match self.threshold {
            Some(t) if t.is_finite() => Ok(()),
            _ => Err(AutomationError::InvalidRule(format!(
                "{} requires a numeric threshold",
                self.trigger
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> CreateRuleRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_create_defaults() {
        let rule = Rule::from_request(request(json!({
            "input_type": "digital",
            "index": 3,
            "trigger": "on_rising",
            "actions": [{"type": "set_relay_on", "relay": 2}]
        })));
        assert!(!rule.id.is_empty());
        assert!(rule.enabled);
        assert_eq!(rule.priority, DEFAULT_PRIORITY);
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_digital_trigger_requires_digital_input() {
        let rule = Rule::from_request(request(json!({
            "input_type": "analog",
            "trigger": "on_change",
        })));
        assert!(matches!(rule.validate(), Err(AutomationError::InvalidRule(_))));
    }

    #[test]
    fn test_analog_trigger_requires_threshold() {
        let rule = Rule::from_request(request(json!({
            "input_type": "analog",
            "trigger": "cross_up",
        })));
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_time_window_requires_hhmm() {
        let mut rule = Rule::from_request(request(json!({
            "trigger": "time_between",
            "start": "22:00",
            "end": "6h",
        })));
        assert!(matches!(
            rule.validate(),
            Err(AutomationError::InvalidTimeFormat(_))
        ));
        rule.end = Some("06:00".to_string());
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_relay_zero_rejected() {
        let rule = Rule::from_request(request(json!({
            "trigger": "after_sunset",
            "actions": [{"type": "toggle_relay", "relay": 0}]
        })));
        assert!(matches!(rule.validate(), Err(AutomationError::InvalidAction(_))));
    }

    #[test]
    fn test_revert_delay_is_bounded() {
        let mut rule = Rule::from_request(request(json!({
            "trigger": "after_sunset",
            "actions": [{"type": "set_relay_on", "relay": 1, "revert_after_seconds": 100_000_000_000_000u64}]
        })));
        assert!(matches!(rule.validate(), Err(AutomationError::InvalidAction(_))));

        rule.actions = vec![Action::SetRelayOn {
            relay: 1,
            revert_after_seconds: Some(MAX_REVERT_SECONDS),
        }];
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_stored_rule_nulls_take_defaults() {
        let mut rule: Rule = serde_json::from_value(json!({
            "trigger": "temp_above",
            "threshold": 25.0,
            "index": null,
            "priority": null,
            "cooldown_seconds": null,
            "days": [0, 6, 9]
        }))
        .unwrap();
        rule.normalize();
        assert!(!rule.id.is_empty());
        assert_eq!(rule.priority, DEFAULT_PRIORITY);
        assert_eq!(rule.cooldown_seconds, 0.0);
        assert_eq!(rule.days, Some(vec![0, 6]));
    }

    #[test]
    fn test_update_clears_optional_fields() {
        let mut rule = Rule::from_request(request(json!({
            "input_type": "analog",
            "trigger": "above",
            "threshold": 1.5,
            "days": [1, 2]
        })));
        let update: UpdateRuleRequest = serde_json::from_value(json!({
            "days": null,
            "priority": 5
        }))
        .unwrap();
        rule.apply_update(update);
        assert_eq!(rule.days, None);
        assert_eq!(rule.priority, 5);
        assert_eq!(rule.threshold, Some(1.5));
    }

    #[test]
    fn test_undo_descriptor_accepts_action_names() {
        let op: RelayOp = serde_json::from_value(json!({"type": "set_relay_off"})).unwrap();
        assert_eq!(op, RelayOp::SetOff);
        assert_eq!(RelayOp::SetOn.inverse(), RelayOp::SetOff);
        assert_eq!(RelayOp::Toggle.inverse(), RelayOp::Toggle);

        let target: TimerTarget =
            serde_json::from_value(json!({"kind": "ipx_relay", "relay": 2})).unwrap();
        assert_eq!(target, TimerTarget::relay(2));
    }
}
