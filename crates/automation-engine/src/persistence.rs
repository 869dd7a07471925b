//! Rule and timer persistence using JSON file storage

use crate::model::{Rule, TimerJob};
use hub_core::persistence::{load_json, save_json};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
struct StoredRules {
    #[serde(default)]
    rules: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct RulesDocument<'a> {
    rules: &'a [Rule],
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TimersDocument {
    #[serde(default)]
    jobs: Vec<TimerJob>,
}

/// Load rules from `{"rules": [...]}`.
///
/// Entries are parsed one by one; an entry that does not parse is skipped
/// with a warning instead of discarding the whole file. Returned rules are
/// normalized.
pub async fn load_rules(path: &Path) -> Vec<Rule> {
    let stored = match load_json::<StoredRules>(path).await {
        Ok(Some(stored)) => stored,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!("Failed to read rules file {:?}: {}", path, e);
            return Vec::new();
        }
    };

    let mut rules = Vec::with_capacity(stored.rules.len());
    for (position, entry) in stored.rules.into_iter().enumerate() {
        match serde_json::from_value::<Rule>(entry) {
            Ok(mut rule) => {
                rule.normalize();
                rules.push(rule);
            }
            Err(e) => tracing::warn!("Skipping rule #{} in {:?}: {}", position, path, e),
        }
    }
    tracing::info!("Loaded {} rules from {:?}", rules.len(), path);
    rules
}

/// Save rules atomically
#[allow(clippy::missing_errors_doc)]
pub async fn save_rules(path: &Path, rules: &[Rule]) -> Result<(), std::io::Error> {
    save_json(path, &RulesDocument { rules }).await
}

/// Load timer jobs from `{"jobs": [...]}`
#[allow(clippy::missing_errors_doc)]
pub async fn load_timers(path: &Path) -> Result<Vec<TimerJob>, std::io::Error> {
    let doc = load_json::<TimersDocument>(path).await?.unwrap_or_default();
    Ok(doc.jobs)
}

/// Save timer jobs atomically
#[allow(clippy::missing_errors_doc)]
pub async fn save_timers(path: &Path, jobs: Vec<TimerJob>) -> Result<(), std::io::Error> {
    save_json(path, &TimersDocument { jobs }).await
}
