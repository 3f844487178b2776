//! HTTP API server.
//!
//! Exposes the pipeline, the subscriber CRUD and the operational views as a
//! JSON API. The scheduler runs inside the same process when enabled.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/update` | Run one ingestion cycle now |
//! | `GET`  | `/api/alerts` | Latest batch with filters (`type`, `level`, `region`, `level_type`) |
//! | `GET`/`POST` | `/api/notification/configs` | List / create configs |
//! | `GET`/`PUT`/`DELETE` | `/api/notification/configs/{id}` | Read / replace / delete a config |
//! | `GET`/`POST` | `/api/notification/rules` | List (optionally `?configId=`) / create rules |
//! | `GET`/`PUT`/`DELETE` | `/api/notification/rules/{id}` | Read / update / delete a rule |
//! | `GET`  | `/api/scheduler/status` | Scheduler state |
//! | `GET`  | `/api/monitor` | Operational overview |
//! | `GET`  | `/health` | Database probe |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "at least one of sendKey or email is required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `no_data` (404),
//! `already_running` (409), `fetch_error` / `parse_error` (502),
//! `persistence_error` (500), `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::{CycleError, SubscriptionError};
use crate::models::{AlertRule, NotificationConfig};
use crate::monitor;
use crate::pipeline::{CycleReport, Pipeline};
use crate::query::{self, AlertFilters, AlertQueryResponse};
use crate::scheduler::{Scheduler, SchedulerStatus};
use crate::subscriptions::{self, ConfigInput, NewRule, RuleUpdate};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    scheduler: Arc<Scheduler>,
    prior_sample: i64,
    started: Instant,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, scheduler: Arc<Scheduler>, prior_sample: i64) -> Self {
        Self {
            pipeline,
            scheduler,
            prior_sample,
            started: Instant::now(),
        }
    }
}

/// Build the router. Separate from [`run_server`] so tests can serve it on
/// an ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/update", post(handle_update))
        .route("/api/alerts", get(handle_alerts))
        .route(
            "/api/notification/configs",
            get(handle_list_configs).post(handle_create_config),
        )
        .route(
            "/api/notification/configs/{id}",
            get(handle_get_config)
                .put(handle_update_config)
                .delete(handle_delete_config),
        )
        .route(
            "/api/notification/rules",
            get(handle_list_rules).post(handle_create_rule),
        )
        .route(
            "/api/notification/rules/{id}",
            get(handle_get_rule)
                .put(handle_update_rule)
                .delete(handle_delete_rule),
        )
        .route("/api/scheduler/status", get(handle_scheduler_status))
        .route("/api/monitor", get(handle_monitor))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`, optionally with the scheduler.
///
/// Runs until Ctrl-C, then stops the scheduler and waits for any cycle in
/// flight to finish.
pub async fn run_server(config: &Config, with_scheduler: bool) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config).await?);
    let scheduler = Arc::new(Scheduler::new(std::time::Duration::from_secs(
        config.scheduler.interval_secs,
    )));

    if with_scheduler {
        scheduler.start(Arc::clone(&pipeline));
    }

    let state = AppState::new(
        Arc::clone(&pipeline),
        Arc::clone(&scheduler),
        config.diff.prior_sample,
    );
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, scheduler = with_scheduler, "HTTP server listening");
    println!("alert-harness listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    scheduler.stop().await;
    pipeline.pool().close().await;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<CycleError> for AppError {
    fn from(err: CycleError) -> Self {
        let status = match &err {
            CycleError::AlreadyRunning => StatusCode::CONFLICT,
            CycleError::Fetch(_) | CycleError::FetchStatus(_) | CycleError::Parse(_) => {
                StatusCode::BAD_GATEWAY
            }
            CycleError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.kind(), err.to_string())
    }
}

impl From<SubscriptionError> for AppError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::Invalid(msg) => AppError::new(StatusCode::BAD_REQUEST, "bad_request", msg),
            SubscriptionError::NotFound(what) => {
                AppError::new(StatusCode::NOT_FOUND, "not_found", format!("{} not found", what))
            }
            SubscriptionError::Database(e) => internal(e.to_string()),
        }
    }
}

// ============ Pipeline ============

async fn handle_update(State(state): State<AppState>) -> Result<Json<CycleReport>, AppError> {
    Ok(Json(state.pipeline.trigger().await?))
}

async fn handle_alerts(
    State(state): State<AppState>,
    Query(filters): Query<AlertFilters>,
) -> Result<Json<AlertQueryResponse>, AppError> {
    let result = query::query_alerts(state.pipeline.pool(), &filters, state.prior_sample)
        .await
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("invalid region level") {
                AppError::new(StatusCode::BAD_REQUEST, "bad_request", msg)
            } else {
                internal(msg)
            }
        })?;

    result
        .map(Json)
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "no_data", "no successful ingestion yet"))
}

async fn handle_scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

// ============ Configs ============

async fn handle_list_configs(
    State(state): State<AppState>,
) -> Result<Json<Vec<NotificationConfig>>, AppError> {
    Ok(Json(subscriptions::list_configs(state.pipeline.pool()).await?))
}

async fn handle_get_config(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<NotificationConfig>, AppError> {
    Ok(Json(subscriptions::get_config(state.pipeline.pool(), id).await?))
}

async fn handle_create_config(
    State(state): State<AppState>,
    Json(input): Json<ConfigInput>,
) -> Result<(StatusCode, Json<NotificationConfig>), AppError> {
    let config = subscriptions::create_config(state.pipeline.pool(), &input).await?;
    Ok((StatusCode::CREATED, Json(config)))
}

async fn handle_update_config(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<ConfigInput>,
) -> Result<Json<NotificationConfig>, AppError> {
    Ok(Json(
        subscriptions::update_config(state.pipeline.pool(), id, &input).await?,
    ))
}

async fn handle_delete_config(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    subscriptions::delete_config(state.pipeline.pool(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Rules ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleListParams {
    config_id: Option<i64>,
}

async fn handle_list_rules(
    State(state): State<AppState>,
    Query(params): Query<RuleListParams>,
) -> Result<Json<Vec<AlertRule>>, AppError> {
    Ok(Json(
        subscriptions::list_rules(state.pipeline.pool(), params.config_id).await?,
    ))
}

async fn handle_get_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<AlertRule>, AppError> {
    Ok(Json(subscriptions::get_rule(state.pipeline.pool(), id).await?))
}

async fn handle_create_rule(
    State(state): State<AppState>,
    Json(input): Json<NewRule>,
) -> Result<(StatusCode, Json<AlertRule>), AppError> {
    let rule = subscriptions::create_rule(state.pipeline.pool(), &input).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn handle_update_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<RuleUpdate>,
) -> Result<Json<AlertRule>, AppError> {
    Ok(Json(
        subscriptions::update_rule(state.pipeline.pool(), id, &update).await?,
    ))
}

async fn handle_delete_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    subscriptions::delete_rule(state.pipeline.pool(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Monitor ============

async fn handle_monitor(State(state): State<AppState>) -> Result<Json<monitor::Overview>, AppError> {
    monitor::overview(state.pipeline.pool())
        .await
        .map(Json)
        .map_err(|e| internal(e.to_string()))
}

async fn handle_health(State(state): State<AppState>) -> Response {
    match monitor::health(state.pipeline.pool(), state.started).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "status": "unhealthy",
                "timestamp": chrono::Utc::now(),
                "error": e.to_string(),
            })),
        )
            .into_response(),
    }
}
