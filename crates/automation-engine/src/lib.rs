//! Automation engine for the home hub
//!
//! Polls the relay/IO controller, evaluates rules against digital, analog,
//! time, sun and temperature conditions, executes relay and webhook
//! actions, and reverts relays through persisted timers.

pub mod engine;
pub mod error;
pub mod evaluator;
pub mod event;
pub mod executor;
pub mod model;
pub mod persistence;
pub mod poller;
pub mod store;
pub mod timers;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::RuleEngine;
pub use error::AutomationError;
pub use event::AutomationEvent;
pub use executor::ActionExecutor;
pub use model::*;
pub use poller::{HubMeta, Poller, PollerConfig, PollerHandle, TickError, TickReport};
pub use store::RuleStore;
pub use timers::TimerManager;
