//! Home hub - IPX800 automation API server

use automation_engine::event::EVENT_CHANNEL_CAPACITY;
use automation_engine::{
    ActionExecutor, AutomationError, AutomationEvent, Poller, PollerHandle, RuleEngine, RuleStore,
    TimerManager,
};
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use hub_core::{
    Clock, DeviceGateway, IpxGateway, JsonlLogbook, LogSink, OpenMeteoProvider, SnapshotStore,
    SystemClock, WeatherCache,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod relays;
mod rules;
mod websocket;

use config::HubConfig;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub poller: PollerHandle,
    pub store: Arc<RuleStore>,
    pub executor: Arc<ActionExecutor>,
    pub timers: Arc<TimerManager>,
    pub weather: Arc<WeatherCache>,
    pub logbook: Arc<JsonlLogbook>,
    pub events: broadcast::Sender<AutomationEvent>,
    pub ipx: Arc<IpxGateway>,
    pub max_buttons: usize,
    pub max_analogs: usize,
    pub max_relays: u16,
}

/// API response wrapper using serde_json::Value for flexibility
#[derive(Serialize)]
pub struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: Some(serde_json::to_value(data).unwrap_or(serde_json::Value::Null)),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Status code for an engine error
pub fn error_status(e: &AutomationError) -> StatusCode {
    match e {
        AutomationError::NotFound(_) => StatusCode::NOT_FOUND,
        AutomationError::InvalidRule(_)
        | AutomationError::InvalidAction(_)
        | AutomationError::InvalidTimeFormat(_) => StatusCode::BAD_REQUEST,
        AutomationError::ActionExecutionFailed(_) | AutomationError::Gateway(_) => {
            StatusCode::BAD_GATEWAY
        }
        AutomationError::Http(_) | AutomationError::Io(_) | AutomationError::Json(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Error response for an engine error
pub fn failure(e: &AutomationError) -> (StatusCode, Json<ApiResponse>) {
    (error_status(e), Json(ApiResponse::error(e.to_string())))
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default = "default_log_limit")]
    limit: usize,
}

fn default_log_limit() -> usize {
    200
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Snapshot plus loop status
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.poller.current_state();
    let active_timers = state.timers.list_active().await.len();
    Json(ApiResponse::success(serde_json::json!({
        "state": &*snapshot,
        "meta": state.poller.current_meta(),
        "rules": state.store.len(),
        "timers": active_timers,
    })))
}

/// Latest input snapshot
async fn inputs(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(&*state.poller.current_state()))
}

/// Cached weather snapshot and forecast
async fn weather(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(serde_json::json!({
        "snapshot": state.weather.snapshot(),
        "forecast": state.weather.forecast(),
    })))
}

/// Recent log entries, newest first
async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    let logbook = Arc::clone(&state.logbook);
    let limit = query.limit.clamp(1, 5000);
    match tokio::task::spawn_blocking(move || logbook.recent(limit)).await {
        Ok(entries) => (StatusCode::OK, Json(ApiResponse::success(entries))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Erase the log
async fn clear_logs(State(state): State<AppState>) -> impl IntoResponse {
    let logbook = Arc::clone(&state.logbook);
    match tokio::task::spawn_blocking(move || logbook.clear()).await {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({ "cleared": true }))),
        ),
        Ok(Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Tag families in the controller's status document, for firmware debugging
async fn ipx_tags(State(state): State<AppState>) -> impl IntoResponse {
    match state
        .ipx
        .present_tags(state.max_buttons, state.max_analogs)
        .await
    {
        Ok(tags) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "btn_zero_based": tags.btn_zero_based,
                "btn_one_based": tags.btn_one_based,
                "analog_zero_based": tags.analog_zero_based,
                "analog_one_based": tags.analog_one_based,
            }))),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket::handle_socket(socket, state))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/inputs", get(inputs))
        .route("/api/v1/weather", get(weather))
        // Relays and timers
        .route("/api/v1/relays", get(relays::list_relays))
        .route("/api/v1/relays/:relay", post(relays::relay_action))
        .route("/api/v1/timers", get(relays::list_timers))
        .route("/api/v1/timers/:id", delete(relays::cancel_timer))
        // Rules
        .route("/api/v1/rules", get(rules::list_rules).post(rules::create_rule))
        .route(
            "/api/v1/rules/:id",
            get(rules::get_rule)
                .put(rules::update_rule)
                .delete(rules::delete_rule),
        )
        .route("/api/v1/rules/:id/enable", post(rules::enable_rule))
        .route("/api/v1/rules/:id/disable", post(rules::disable_rule))
        .route("/api/v1/rules/:id/test", post(rules::test_rule))
        // Logs
        .route("/api/v1/logs", get(list_logs).delete(clear_logs))
        // Controller debugging
        .route("/api/v1/ipx/tags", get(ipx_tags))
        // WebSocket
        .route("/ws", get(ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "homehub_api=debug,automation_engine=debug,hub_core=info,info".into()
            }),
        )
        .init();

    tracing::info!("Starting home hub API server");

    let config = HubConfig::from_env()?;
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let logbook = Arc::new(JsonlLogbook::new(config.data_dir.join("logs.jsonl")));
    let log: Arc<dyn LogSink> = logbook.clone();
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    tracing::info!("Using IPX800 at {}", config.ipx.base_url());
    let ipx = Arc::new(IpxGateway::new(config.ipx.clone(), config.analog)?);
    let gateway: Arc<dyn DeviceGateway> = ipx.clone();

    let provider = OpenMeteoProvider::new(config.latitude, config.longitude, config.timezone)?;
    let weather = Arc::new(WeatherCache::new(
        Arc::new(provider),
        config.timezone,
        config.weather_ttl,
    ));

    let store = Arc::new(RuleStore::load(config.data_dir.join("rules.json"), event_tx.clone()).await);
    let timers = Arc::new(
        TimerManager::load(
            config.data_dir.join("timers.json"),
            Arc::clone(&clock),
            event_tx.clone(),
            Arc::clone(&log),
        )
        .await,
    );
    let executor = Arc::new(ActionExecutor::new(
        Arc::clone(&gateway),
        Arc::clone(&timers),
        Arc::clone(&log),
        event_tx.clone(),
        config.webhook_timeout,
    )?);
    tracing::info!(
        "Loaded {} rules, {} pending timers",
        store.len(),
        timers.list_active().await.len()
    );

    let engine = RuleEngine::new(
        Arc::clone(&store),
        Arc::clone(&executor),
        Arc::clone(&log),
        event_tx.clone(),
    );
    let poller = Poller::new(
        config.poller_config(),
        gateway,
        Arc::new(SnapshotStore::new()),
        Arc::clone(&weather),
        engine,
        Arc::clone(&executor),
        clock,
        log,
    );
    let handle = poller.handle();
    tokio::spawn(poller.run());

    let state = AppState {
        poller: handle,
        store,
        executor,
        timers,
        weather,
        logbook,
        events: event_tx,
        ipx,
        max_buttons: config.max_buttons,
        max_analogs: config.max_analogs,
        max_relays: config.max_relays,
    };

    // Start server
    let addr = config.bind_addr();
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}
