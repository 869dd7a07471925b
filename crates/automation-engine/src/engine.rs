//! Rule engine
//!
//! Evaluates the enabled rules in `(priority, id)` order and executes each
//! fired rule's actions before moving on, so later rules observe the relay
//! writes of earlier ones within the same pass.

use crate::event::AutomationEvent;
use crate::evaluator::{evaluate_trigger, weekday_matches, SunEdgeState, TriggerContext};
use crate::executor::ActionExecutor;
use crate::model::{FiredRule, Rule};
use crate::store::RuleStore;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use hub_core::{InputSnapshot, LogSink, WeatherSnapshot};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// The rule engine. Cooldown and sun-edge state are private to one
/// instance and start cold on every process start.
pub struct RuleEngine {
    store: Arc<RuleStore>,
    executor: Arc<ActionExecutor>,
    log: Arc<dyn LogSink>,
    event_tx: broadcast::Sender<AutomationEvent>,
    /// Last firing time per rule id
    last_fired: HashMap<String, DateTime<Utc>>,
    sun_edges: SunEdgeState,
}

impl RuleEngine {
    pub fn new(
        store: Arc<RuleStore>,
        executor: Arc<ActionExecutor>,
        log: Arc<dyn LogSink>,
        event_tx: broadcast::Sender<AutomationEvent>,
    ) -> Self {
        Self {
            store,
            executor,
            log,
            event_tx,
            last_fired: HashMap::new(),
            sun_edges: SunEdgeState::new(),
        }
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    /// Subscribe to hub events
    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.event_tx.subscribe()
    }

    /// Run one evaluation pass and execute the actions of every rule that fires
    pub async fn evaluate(
        &mut self,
        previous: &InputSnapshot,
        current: &InputSnapshot,
        now: DateTime<Tz>,
        weather: &WeatherSnapshot,
    ) -> Vec<FiredRule> {
        let ctx = TriggerContext {
            previous,
            current,
            now,
            weather,
        };
        let now_utc = now.with_timezone(&Utc);
        let mut fired = Vec::new();

        for rule in self.store.list() {
            if !rule.enabled || !weekday_matches(rule.days.as_deref(), &now) {
                continue;
            }
            if self.cooling_down(&rule, now_utc) {
                continue;
            }
            let Some(reason) = evaluate_trigger(&rule, &ctx, &mut self.sun_edges) else {
                continue;
            };

            self.last_fired.insert(rule.id.clone(), now_utc);
            tracing::info!(
                rule_id = %rule.id,
                trigger = %rule.trigger,
                reason = %reason,
                "Rule fired"
            );
            self.log.append(json!({
                "type": "trigger",
                "rule_id": rule.id,
                "input_type": rule.input_type,
                "index": rule.index,
                "trigger": rule.trigger,
                "reason": reason,
            }));
            let _ = self.event_tx.send(AutomationEvent::RuleTriggered {
                rule_id: rule.id.clone(),
                trigger: rule.trigger.to_string(),
                reason: reason.clone(),
            });

            self.executor
                .apply_actions(&rule.actions, &reason, &rule.id)
                .await;
            fired.push(FiredRule { rule, reason });
        }
        fired
    }

    fn cooling_down(&self, rule: &Rule, now: DateTime<Utc>) -> bool {
        if rule.cooldown_seconds <= 0.0 {
            return false;
        }
        self.last_fired.get(&rule.id).is_some_and(|last| {
            let elapsed = (now - *last).num_milliseconds() as f64 / 1000.0;
            elapsed < rule.cooldown_seconds
        })
    }
}
