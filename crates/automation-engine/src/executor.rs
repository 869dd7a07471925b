//! Action executor for rules, manual relay commands and timer reverts

use crate::error::AutomationError;
use crate::event::AutomationEvent;
use crate::model::{check_revert_after, Action, RelayOp, TimerJob, TimerOrigin, TimerTarget};
use crate::timers::TimerManager;
use hub_core::{DeviceGateway, LogSink};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Default timeout for webhook POSTs
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(4);

/// Executor for rule actions
pub struct ActionExecutor {
    gateway: Arc<dyn DeviceGateway>,
    timers: Arc<TimerManager>,
    http: reqwest::Client,
    log: Arc<dyn LogSink>,
    event_tx: broadcast::Sender<AutomationEvent>,
}

impl ActionExecutor {
    /// Create a new action executor
    pub fn new(
        gateway: Arc<dyn DeviceGateway>,
        timers: Arc<TimerManager>,
        log: Arc<dyn LogSink>,
        event_tx: broadcast::Sender<AutomationEvent>,
        webhook_timeout: Duration,
    ) -> Result<Self, AutomationError> {
        let http = reqwest::Client::builder().timeout(webhook_timeout).build()?;
        Ok(Self {
            gateway,
            timers,
            http,
            log,
            event_tx,
        })
    }

    pub fn gateway(&self) -> &Arc<dyn DeviceGateway> {
        &self.gateway
    }

    pub fn timers(&self) -> &Arc<TimerManager> {
        &self.timers
    }

    /// Execute `actions` in order on behalf of `rule_id`.
    ///
    /// A failing action is logged and does not stop the remaining ones.
    /// Returns the failures.
    pub async fn apply_actions(
        &self,
        actions: &[Action],
        reason: &str,
        rule_id: &str,
    ) -> Vec<AutomationError> {
        let mut failures = Vec::new();
        for action in actions {
            match self.execute_action(action, reason, rule_id).await {
                Ok(()) => {
                    let relay = action.relay_op().map(|(relay, _, _)| relay);
                    if relay.is_some() {
                        self.log.append(json!({
                            "type": "action",
                            "rule_id": rule_id,
                            "action": action.kind(),
                            "relay": relay,
                            "reason": reason,
                        }));
                    }
                    let _ = self.event_tx.send(AutomationEvent::ActionExecuted {
                        rule_id: rule_id.to_string(),
                        action: action.kind().to_string(),
                        relay,
                    });
                }
                Err(e) => {
                    tracing::warn!("Rule {} action {} failed: {}", rule_id, action.kind(), e);
                    self.log.append(json!({
                        "type": "error",
                        "rule_id": rule_id,
                        "action": action.kind(),
                        "error": e.to_string(),
                    }));
                    let _ = self.event_tx.send(AutomationEvent::ActionFailed {
                        rule_id: rule_id.to_string(),
                        action: action.kind().to_string(),
                        error: e.to_string(),
                    });
                    failures.push(e);
                }
            }
        }
        failures
    }

    /// Execute a single action
    async fn execute_action(
        &self,
        action: &Action,
        reason: &str,
        rule_id: &str,
    ) -> Result<(), AutomationError> {
        match action {
            Action::Webhook { url, payload } => {
                self.spawn_webhook(url.clone(), payload.clone(), reason, rule_id);
                Ok(())
            }
            _ => {
                let Some((relay, op, revert_after)) = action.relay_op() else {
                    return Ok(());
                };
                // Rules loaded from disk skip validation; never write a
                // relay whose revert cannot be scheduled
                check_revert_after(revert_after)?;
                self.apply_relay_op(relay, op).await?;
                if let Some(seconds) = revert_after.filter(|s| *s > 0) {
                    self.timers
                        .schedule(
                            seconds,
                            TimerTarget::relay(relay),
                            op,
                            op.inverse(),
                            TimerOrigin::rule(rule_id),
                        )
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Send the gateway write for one relay operation
    pub async fn apply_relay_op(&self, relay: u16, op: RelayOp) -> Result<(), AutomationError> {
        if relay == 0 {
            return Err(AutomationError::InvalidAction(
                "relay numbers start at 1".to_string(),
            ));
        }
        let result = match op {
            RelayOp::SetOn => self.gateway.set_output(relay, true).await,
            RelayOp::SetOff => self.gateway.set_output(relay, false).await,
            RelayOp::Toggle => self.gateway.toggle_output(relay).await.map(|_| ()),
        };
        result.map_err(|e| {
            AutomationError::ActionExecutionFailed(format!("relay {relay} {}: {e}", op.as_str()))
        })
    }

    /// Run a timer's undo against its target
    pub async fn apply_undo(&self, undo: RelayOp, target: TimerTarget) -> Result<(), AutomationError> {
        match target {
            TimerTarget::Relay { relay } => self.apply_relay_op(relay, undo).await,
        }
    }

    /// Manual relay command, optionally reverted after `revert_after_seconds`.
    /// Returns the scheduled timer when there is one.
    pub async fn run_relay_command(
        &self,
        relay: u16,
        op: RelayOp,
        revert_after_seconds: Option<u64>,
        origin: TimerOrigin,
    ) -> Result<Option<TimerJob>, AutomationError> {
        check_revert_after(revert_after_seconds)?;
        self.apply_relay_op(relay, op).await?;
        self.log.append(json!({
            "type": "manual",
            "relay": relay,
            "op": op,
            "origin": origin,
            "revert_after_seconds": revert_after_seconds,
        }));

        let Some(seconds) = revert_after_seconds.filter(|s| *s > 0) else {
            return Ok(None);
        };
        let job = self
            .timers
            .schedule(seconds, TimerTarget::relay(relay), op, op.inverse(), origin)
            .await?;
        Ok(Some(job))
    }

    /// POST in the background; the outcome only reaches the log
    fn spawn_webhook(&self, url: String, payload: serde_json::Value, reason: &str, rule_id: &str) {
        let http = self.http.clone();
        let log = Arc::clone(&self.log);
        let reason = reason.to_string();
        let rule_id = rule_id.to_string();
        let body = if payload.is_null() { json!({}) } else { payload };

        tokio::spawn(async move {
            let result = http
                .post(&url)
                .json(&body)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);
            match result {
                Ok(response) => {
                    tracing::debug!("Webhook {} -> {}", url, response.status());
                    log.append(json!({
                        "type": "action",
                        "rule_id": rule_id,
                        "action": "webhook",
                        "url": url,
                        "reason": reason,
                    }));
                }
                Err(e) => {
                    tracing::warn!("Webhook {} for rule {} failed: {}", url, rule_id, e);
                    log.append(json!({
                        "type": "error",
                        "rule_id": rule_id,
                        "action": "webhook",
                        "error": e.to_string(),
                    }));
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wait_for_log, Harness, WebhookStub};
    use crate::model::ActiveTimer;

    #[tokio::test]
    async fn test_actions_run_in_order_and_survive_failures() {
        let h = Harness::new().await;
        h.gateway.fail_writes_to(3);

        let actions = vec![
            Action::SetRelayOn {
                relay: 1,
                revert_after_seconds: None,
            },
            Action::SetRelayOff {
                relay: 3,
                revert_after_seconds: None,
            },
            Action::ToggleRelay {
                relay: 2,
                revert_after_seconds: None,
            },
        ];
        let failures = h.executor.apply_actions(&actions, "test", "r1").await;

        assert_eq!(failures.len(), 1);
        assert_eq!(h.gateway.writes(), vec![(1, true), (2, true)]);
        let errors: Vec<_> = h
            .log
            .entries()
            .into_iter()
            .filter(|e| e["type"] == "error")
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["rule_id"], "r1");
    }

    #[tokio::test]
    async fn test_relay_action_schedules_revert() {
        let h = Harness::new().await;
        let actions = vec![Action::SetRelayOn {
            relay: 5,
            revert_after_seconds: Some(300),
        }];
        h.executor.apply_actions(&actions, "test", "porch").await;

        let active: ActiveTimer = h
            .timers
            .active_for_target(&TimerTarget::relay(5))
            .await
            .unwrap();
        assert_eq!(active.total_seconds, 300);
        assert_eq!(active.origin, TimerOrigin::rule("porch"));
    }

    #[tokio::test]
    async fn test_failed_write_schedules_no_revert() {
        let h = Harness::new().await;
        h.gateway.fail_writes_to(5);
        let actions = vec![Action::SetRelayOn {
            relay: 5,
            revert_after_seconds: Some(300),
        }];
        h.executor.apply_actions(&actions, "test", "porch").await;
        assert!(h.timers.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_manual_command_with_revert() {
        let h = Harness::new().await;
        let job = h
            .executor
            .run_relay_command(2, RelayOp::SetOn, Some(60), TimerOrigin::manual())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.undo, RelayOp::SetOff);
        assert_eq!(h.gateway.writes(), vec![(2, true)]);

        h.executor.apply_undo(job.undo, job.target).await.unwrap();
        assert_eq!(h.gateway.writes(), vec![(2, true), (2, false)]);
    }

    #[tokio::test]
    async fn test_webhook_posts_payload_in_background() {
        let h = Harness::new().await;
        let stub = WebhookStub::start(200).await;
        let actions = vec![Action::Webhook {
            url: stub.url.clone(),
            payload: serde_json::Value::Null,
        }];
        assert!(h.executor.apply_actions(&actions, "test", "r").await.is_empty());

        let logged = wait_for_log(&h.log, "action").await;
        assert_eq!(logged[0]["action"], "webhook");
        assert_eq!(*stub.bodies.lock().unwrap(), vec![serde_json::json!({})]);
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_logged_not_returned() {
        let h = Harness::new().await;
        let stub = WebhookStub::start(500).await;
        let actions = vec![Action::Webhook {
            url: stub.url.clone(),
            payload: serde_json::json!({"room": "hall"}),
        }];
        assert!(h.executor.apply_actions(&actions, "test", "r").await.is_empty());

        let errors = wait_for_log(&h.log, "error").await;
        assert_eq!(errors[0]["action"], "webhook");
        assert_eq!(errors[0]["rule_id"], "r");
    }

    #[tokio::test]
    async fn test_oversized_revert_fails_only_that_action() {
        let h = Harness::new().await;
        let actions = vec![
            Action::SetRelayOn {
                relay: 1,
                revert_after_seconds: Some(100_000_000_000_000),
            },
            Action::SetRelayOn {
                relay: 2,
                revert_after_seconds: None,
            },
        ];
        let failures = h.executor.apply_actions(&actions, "test", "r").await;

        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], AutomationError::InvalidAction(_)));
        // Relay 1 is never switched on without its revert
        assert_eq!(h.gateway.writes(), vec![(2, true)]);
        assert!(h.timers.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_manual_command_rejects_oversized_revert() {
        let h = Harness::new().await;
        let result = h
            .executor
            .run_relay_command(3, RelayOp::SetOn, Some(u64::MAX), TimerOrigin::manual())
            .await;
        assert!(matches!(result, Err(AutomationError::InvalidAction(_))));
        assert!(h.gateway.writes().is_empty());
    }
}
