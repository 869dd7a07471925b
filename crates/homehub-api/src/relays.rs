//! Relay and timer handlers

use crate::{failure, ApiResponse, AppState};
use automation_engine::{check_revert_after, ActiveTimer, RelayOp, TimerOrigin, TimerTarget};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use hub_core::DeviceGateway;
use serde::{Deserialize, Serialize};

/// Manual relay operation
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayCommand {
    On,
    Off,
    Toggle,
}

impl From<RelayCommand> for RelayOp {
    fn from(command: RelayCommand) -> Self {
        match command {
            RelayCommand::On => RelayOp::SetOn,
            RelayCommand::Off => RelayOp::SetOff,
            RelayCommand::Toggle => RelayOp::Toggle,
        }
    }
}

/// Manual relay action request
#[derive(Deserialize)]
pub struct RelayActionRequest {
    op: RelayCommand,
    /// Revert after this many seconds
    #[serde(default)]
    revert_after_seconds: Option<u64>,
}

#[derive(Serialize)]
struct RelayStatus {
    relay: u16,
    on: bool,
    timer: Option<ActiveTimer>,
}

/// Live relay states with their countdowns
pub async fn list_relays(State(state): State<AppState>) -> impl IntoResponse {
    let outputs = match state
        .executor
        .gateway()
        .read_outputs(usize::from(state.max_relays))
        .await
    {
        Ok(outputs) => outputs,
        Err(e) => {
            return (
                StatusCode::BAD_GATEWAY,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    };

    let mut relays = Vec::with_capacity(outputs.len());
    for (relay, on) in (1..=state.max_relays).zip(outputs) {
        let timer = state
            .timers
            .active_for_target(&TimerTarget::relay(relay))
            .await;
        relays.push(RelayStatus { relay, on, timer });
    }
    (StatusCode::OK, Json(ApiResponse::success(relays)))
}

/// Apply a relay operation now, optionally reverting it later
pub async fn relay_action(
    State(state): State<AppState>,
    Path(relay): Path<u16>,
    Json(req): Json<RelayActionRequest>,
) -> impl IntoResponse {
    if relay == 0 || relay > state.max_relays {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!(
                "relay must be between 1 and {}",
                state.max_relays
            ))),
        );
    }

    if let Err(e) = check_revert_after(req.revert_after_seconds) {
        return failure(&e);
    }

    let op = RelayOp::from(req.op);
    match state
        .executor
        .run_relay_command(relay, op, req.revert_after_seconds, TimerOrigin::manual())
        .await
    {
        Ok(timer) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "relay": relay,
                "op": op,
                "timer": timer,
            }))),
        ),
        Err(e) => failure(&e),
    }
}

/// Active timers
pub async fn list_timers(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.timers.list_active().await))
}

/// Cancel a timer without running its revert
pub async fn cancel_timer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.timers.cancel(&id).await {
        (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({ "cancelled": id }))),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Timer not found")),
        )
    }
}
