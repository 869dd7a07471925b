//! Rule storage

use crate::error::AutomationError;
use crate::event::AutomationEvent;
use crate::model::{CreateRuleRequest, Rule, UpdateRuleRequest};
use crate::persistence;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, Mutex};

/// In-memory rule set backed by a JSON file
pub struct RuleStore {
    rules: DashMap<String, Rule>,
    data_path: PathBuf,
    /// One writer at a time; each save snapshots the map under the lock
    save_lock: Mutex<()>,
    event_tx: broadcast::Sender<AutomationEvent>,
}

impl RuleStore {
    /// Load rules from `data_path`; a missing file starts empty
    pub async fn load(
        data_path: impl Into<PathBuf>,
        event_tx: broadcast::Sender<AutomationEvent>,
    ) -> Self {
        let data_path = data_path.into();
        let rules = DashMap::new();
        for rule in persistence::load_rules(&data_path).await {
            rules.insert(rule.id.clone(), rule);
        }
        Self {
            rules,
            data_path,
            save_lock: Mutex::new(()),
            event_tx,
        }
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    async fn save(&self) -> Result<(), AutomationError> {
        let _guard = self.save_lock.lock().await;
        let rules = self.list();
        persistence::save_rules(&self.data_path, &rules).await?;
        Ok(())
    }

    /// All rules in execution order: priority, then id
    pub fn list(&self) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        rules
    }

    /// Get rule by ID
    pub fn get(&self, id: &str) -> Option<Rule> {
        self.rules.get(id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Create a new rule
    pub async fn create(&self, request: CreateRuleRequest) -> Result<Rule, AutomationError> {
        let rule = Rule::from_request(request);
        rule.validate()?;

        self.rules.insert(rule.id.clone(), rule.clone());
        self.save().await?;

        let _ = self.event_tx.send(AutomationEvent::RuleCreated {
            rule_id: rule.id.clone(),
        });
        tracing::info!("Created rule {} ({})", rule.id, rule.trigger);
        Ok(rule)
    }

    /// Update a rule; the result must still validate
    pub async fn update(
        &self,
        id: &str,
        request: UpdateRuleRequest,
    ) -> Result<Rule, AutomationError> {
        let mut candidate = self
            .get(id)
            .ok_or_else(|| AutomationError::NotFound(id.to_string()))?;
        candidate.apply_update(request);
        candidate.validate()?;

        match self.rules.get_mut(id) {
            Some(mut entry) => *entry = candidate.clone(),
            None => return Err(AutomationError::NotFound(id.to_string())),
        }
        self.save().await?;

        let _ = self.event_tx.send(AutomationEvent::RuleUpdated {
            rule_id: id.to_string(),
        });
        tracing::info!("Updated rule {}", id);
        Ok(candidate)
    }

    /// Delete a rule
    pub async fn delete(&self, id: &str) -> Result<Rule, AutomationError> {
        let (_, rule) = self
            .rules
            .remove(id)
            .ok_or_else(|| AutomationError::NotFound(id.to_string()))?;
        self.save().await?;

        let _ = self.event_tx.send(AutomationEvent::RuleDeleted {
            rule_id: id.to_string(),
        });
        tracing::info!("Deleted rule {}", id);
        Ok(rule)
    }

    pub async fn enable(&self, id: &str) -> Result<Rule, AutomationError> {
        self.update(
            id,
            UpdateRuleRequest {
                enabled: Some(true),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn disable(&self, id: &str) -> Result<Rule, AutomationError> {
        self.update(
            id,
            UpdateRuleRequest {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TriggerKind;
    use serde_json::json;

    fn create_request(value: serde_json::Value) -> CreateRuleRequest {
        serde_json::from_value(value).unwrap()
    }

    async fn empty_store(dir: &tempfile::TempDir) -> RuleStore {
        let (tx, _) = broadcast::channel(16);
        RuleStore::load(dir.path().join("rules.json"), tx).await
    }

    #[tokio::test]
    async fn test_crud_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;

        let rule = store
            .create(create_request(json!({
                "input_type": "digital",
                "index": 3,
                "trigger": "on_rising",
                "actions": [{"type": "set_relay_on", "relay": 2}]
            })))
            .await
            .unwrap();
        store.disable(&rule.id).await.unwrap();

        let (tx, _) = broadcast::channel(16);
        let reloaded = RuleStore::load(store.data_path().to_path_buf(), tx).await;
        let loaded = reloaded.get(&rule.id).unwrap();
        assert!(!loaded.enabled);
        assert_eq!(loaded.trigger, TriggerKind::OnRising);

        reloaded.delete(&rule.id).await.unwrap();
        assert!(reloaded.is_empty());
        assert!(matches!(
            reloaded.delete(&rule.id).await,
            Err(AutomationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_create_is_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        let result = store
            .create(create_request(json!({"input_type": "digital", "trigger": "above"})))
            .await;
        assert!(matches!(result, Err(AutomationError::InvalidRule(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_update_keeps_previous_rule() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        let rule = store
            .create(create_request(json!({
                "trigger": "time_between", "start": "08:00", "end": "09:00"
            })))
            .await
            .unwrap();

        let update: UpdateRuleRequest = serde_json::from_value(json!({"end": "9"})).unwrap();
        assert!(store.update(&rule.id, update).await.is_err());
        assert_eq!(store.get(&rule.id).unwrap().end.as_deref(), Some("09:00"));
    }

    #[tokio::test]
    async fn test_list_orders_by_priority_then_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("rules.json"),
            r#"{"rules": [
                {"id": "b", "trigger": "after_sunset", "priority": 10},
                {"id": "c", "trigger": "after_sunset"},
                {"id": "a", "trigger": "after_sunset", "priority": 10}
            ]}"#,
        )
        .unwrap();
        let store = empty_store(&dir).await;
        let ids: Vec<String> = store.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_concurrent_writes_all_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let (tx, _) = broadcast::channel(64);
        let store = RuleStore::load(&path, tx.clone()).await;

        let creates = (0..20).map(|n| {
            store.create(create_request(json!({
                "trigger": "after_sunset",
                "priority": n,
                "actions": [{"type": "set_relay_on", "relay": 1}]
            })))
        });
        let results = futures::future::join_all(creates).await;
        assert!(results.iter().all(Result::is_ok));

        let reloaded = RuleStore::load(&path, tx).await;
        assert_eq!(reloaded.len(), 20);
    }
}
