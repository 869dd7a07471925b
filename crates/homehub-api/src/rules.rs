//! Rule handlers

use crate::{failure, ApiResponse, AppState};
use automation_engine::{CreateRuleRequest, UpdateRuleRequest};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

/// List all rules in execution order
pub async fn list_rules(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.store.list()))
}

/// Get a specific rule
pub async fn get_rule(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get(&id) {
        Some(rule) => (StatusCode::OK, Json(ApiResponse::success(rule))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Rule not found")),
        ),
    }
}

/// Create a rule
pub async fn create_rule(
    State(state): State<AppState>,
    Json(req): Json<CreateRuleRequest>,
) -> impl IntoResponse {
    match state.store.create(req).await {
        Ok(rule) => (StatusCode::CREATED, Json(ApiResponse::success(rule))),
        Err(e) => failure(&e),
    }
}

/// Update a rule
pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRuleRequest>,
) -> impl IntoResponse {
    match state.store.update(&id, req).await {
        Ok(rule) => (StatusCode::OK, Json(ApiResponse::success(rule))),
        Err(e) => failure(&e),
    }
}

/// Delete a rule
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete(&id).await {
        Ok(rule) => (StatusCode::OK, Json(ApiResponse::success(rule))),
        Err(e) => failure(&e),
    }
}

pub async fn enable_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.enable(&id).await {
        Ok(rule) => (StatusCode::OK, Json(ApiResponse::success(rule))),
        Err(e) => failure(&e),
    }
}

pub async fn disable_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.disable(&id).await {
        Ok(rule) => (StatusCode::OK, Json(ApiResponse::success(rule))),
        Err(e) => failure(&e),
    }
}

/// Run a rule's actions now, skipping its trigger and cooldown
pub async fn test_rule(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(rule) = state.store.get(&id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Rule not found")),
        );
    };

    let failures = state
        .executor
        .apply_actions(&rule.actions, "manual test", &rule.id)
        .await;
    let errors: Vec<String> = failures.iter().map(ToString::to_string).collect();
    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "rule_id": rule.id,
            "actions": rule.actions.len(),
            "errors": errors,
        }))),
    )
}
