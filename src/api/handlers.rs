use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::alerts::{AlertEvent, ChannelConfig, ChannelConfigError};
use crate::migration::{
    MigrationOrchestrator, MigrationProgress, MigrationState, MigrationTask, TaskError,
};
use crate::monitor::{Monitor, MonitorResult, MonitorRule, MonitorScheduler, RuleError};

/// Application state shared across handlers
pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub scheduler: Arc<MonitorScheduler>,
    pub migrations: Arc<MigrationOrchestrator>,
}

const DEFAULT_HISTORY_PAGE: usize = 100;

#[derive(Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_HISTORY_PAGE)
    }
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub rules: usize,
    pub migrations: usize,
    pub scheduler_running: bool,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        rules: state.monitor.store().len(),
        migrations: state.migrations.store().len(),
        scheduler_running: state.scheduler.is_running().await,
    })
}

// ============================================================================
// Rules
// ============================================================================

#[derive(Serialize)]
pub struct RulesResponse {
    pub rules: Vec<MonitorRule>,
}

pub async fn list_rules(State(state): State<Arc<AppState>>) -> Json<RulesResponse> {
    Json(RulesResponse {
        rules: state.monitor.store().list(),
    })
}

pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(rule): Json<MonitorRule>,
) -> Result<impl IntoResponse, ApiError> {
    state.monitor.store().add(rule.clone())?;
    Ok((StatusCode::CREATED, Json(rule)))
}

#[derive(Serialize)]
pub struct RuleDetail {
    pub rule: MonitorRule,
    pub last_result: Option<MonitorResult>,
    pub next_fire_time: Option<DateTime<Utc>>,
}

pub async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<RuleDetail>, ApiError> {
    let rule = state
        .monitor
        .store()
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("Rule '{}' not found", name)))?;

    Ok(Json(RuleDetail {
        last_result: state.monitor.store().last_result(&name),
        next_fire_time: state.scheduler.next_fire_times().remove(&name),
        rule,
    }))
}

pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.monitor.remove(&name)?;
    Ok(Json(serde_json::json!({ "deleted": name })))
}

pub async fn enable_rule(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.monitor.store().enable(&name)?;
    Ok(Json(serde_json::json!({ "name": name, "enabled": true })))
}

pub async fn disable_rule(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.monitor.store().disable(&name)?;
    Ok(Json(serde_json::json!({ "name": name, "enabled": false })))
}

pub async fn run_rule(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<MonitorResult>, ApiError> {
    Ok(Json(state.monitor.run(&name).await?))
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub rule: String,
    pub results: Vec<MonitorResult>,
}

pub async fn rule_history(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let results = state.monitor.store().history(&name, query.limit())?;
    Ok(Json(HistoryResponse {
        rule: name,
        results,
    }))
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Serialize)]
pub struct SchedulerResponse {
    pub running: bool,
    pub active_rules: Vec<String>,
    pub next_fire_times: HashMap<String, DateTime<Utc>>,
}

pub async fn scheduler_status(State(state): State<Arc<AppState>>) -> Json<SchedulerResponse> {
    Json(SchedulerResponse {
        running: state.scheduler.is_running().await,
        active_rules: state.scheduler.active_rules(),
        next_fire_times: state.scheduler.next_fire_times(),
    })
}

pub async fn start_scheduler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let started = state.scheduler.start().await;
    Json(serde_json::json!({ "running": true, "changed": started }))
}

pub async fn stop_scheduler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let stopped = state.scheduler.stop().await;
    Json(serde_json::json!({ "running": false, "changed": stopped }))
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Serialize)]
pub struct ChannelsResponse {
    pub channels: Vec<String>,
}

pub async fn list_channels(State(state): State<Arc<AppState>>) -> Json<ChannelsResponse> {
    Json(ChannelsResponse {
        channels: state.monitor.dispatcher().channel_names(),
    })
}

pub async fn add_channel(
    State(state): State<Arc<AppState>>,
    Json(config): Json<ChannelConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let name = state.monitor.dispatcher().add_channel_config(&config)?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "name": name }))))
}

#[derive(Serialize)]
pub struct AlertHistoryResponse {
    pub events: Vec<AlertEvent>,
}

pub async fn alert_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Json<AlertHistoryResponse> {
    Json(AlertHistoryResponse {
        events: state.monitor.dispatcher().history(query.limit()),
    })
}

// ============================================================================
// Migrations
// ============================================================================

#[derive(Serialize)]
pub struct MigrationsResponse {
    pub tasks: Vec<MigrationSummary>,
}

#[derive(Serialize)]
pub struct MigrationSummary {
    pub task_id: String,
    pub state: Option<MigrationState>,
    pub progress_percent: f64,
    pub description: Option<String>,
}

pub async fn list_migrations(State(state): State<Arc<AppState>>) -> Json<MigrationsResponse> {
    let tasks = state
        .migrations
        .list()
        .into_iter()
        .map(|task| {
            let progress = state.migrations.progress(&task.task_id);
            MigrationSummary {
                state: progress.as_ref().map(|p| p.state),
                progress_percent: progress.map(|p| p.progress_percent).unwrap_or(0.0),
                task_id: task.task_id,
                description: task.description,
            }
        })
        .collect();

    Json(MigrationsResponse { tasks })
}

pub async fn create_migration(
    State(state): State<Arc<AppState>>,
    Json(task): Json<MigrationTask>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id = task.task_id.clone();
    state.migrations.create(task)?;
    let progress = migration_progress_of(&state, &task_id)?;
    Ok((StatusCode::CREATED, Json(progress)))
}

#[derive(Serialize)]
pub struct MigrationDetail {
    pub task: MigrationTask,
    pub progress: MigrationProgress,
}

pub async fn get_migration(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<MigrationDetail>, ApiError> {
    let task = state
        .migrations
        .get(&task_id)
        .ok_or_else(|| ApiError::NotFound(format!("Migration task '{}' not found", task_id)))?;
    let progress = migration_progress_of(&state, &task_id)?;
    Ok(Json(MigrationDetail { task, progress }))
}

pub async fn migration_progress(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<MigrationProgress>, ApiError> {
    Ok(Json(migration_progress_of(&state, &task_id)?))
}

/// Starts the task in the background; poll its progress for the outcome
pub async fn execute_migration(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.migrations.spawn(&task_id)?;
    let progress = migration_progress_of(&state, &task_id)?;
    Ok((StatusCode::ACCEPTED, Json(progress)))
}

pub async fn cancel_migration(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state_after = state.migrations.cancel(&task_id)?;
    Ok(Json(serde_json::json!({
        "task_id": task_id,
        "state": state_after,
        "cancel_requested": state_after == MigrationState::Running,
    })))
}

pub async fn reset_migration(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<MigrationProgress>, ApiError> {
    state.migrations.reset(&task_id)?;
    Ok(Json(migration_progress_of(&state, &task_id)?))
}

fn migration_progress_of(state: &AppState, task_id: &str) -> Result<MigrationProgress, ApiError> {
    state
        .migrations
        .progress(task_id)
        .ok_or_else(|| ApiError::NotFound(format!("Migration task '{}' not found", task_id)))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
}

impl From<RuleError> for ApiError {
    fn from(e: RuleError) -> Self {
        match e {
            RuleError::NotFound(_) => ApiError::NotFound(e.to_string()),
            RuleError::DuplicateName(_) => ApiError::Conflict(e.to_string()),
            RuleError::InvalidRule(_) => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::NotFound(_) => ApiError::NotFound(e.to_string()),
            TaskError::DuplicateTask(_) | TaskError::InvalidState { .. } => {
                ApiError::Conflict(e.to_string())
            }
            TaskError::InvalidTask { .. } => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<ChannelConfigError> for ApiError {
    fn from(e: ChannelConfigError) -> Self {
        match e {
            ChannelConfigError::DuplicateChannel(_) => ApiError::Conflict(e.to_string()),
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
