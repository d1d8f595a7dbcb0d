use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use utoipa::OpenApi;

use super::{
    dto::{
        AvailableSensorDto, CreateProjectRequest, CreateProjectResponse, SensorDataDto,
        ToggleSensorRequest, ToggleSensorResponse,
    },
    errors::AppError,
    AppState,
};
use crate::{
    db::models::{ProjectSummary, SensorType},
    link_status::{LinkSnapshot, LinkState},
};

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WindowParams {
    /// Lookback in minutes. Defaults to 60.
    pub minutes: Option<i64>,
}

const DEFAULT_WINDOW_MINUTES: i64 = 60;

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

/// List all projects ordered by name.
#[utoipa::path(
    get,
    path = "/api/projects",
    responses(
        (status = 200, description = "All projects", body = Vec<ProjectSummary>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "projects"
)]
pub async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProjectSummary>>, AppError> {
    Ok(Json(state.store.list_projects().await?))
}

/// Create a project, plus one enabled sensor per requested type.
#[utoipa::path(
    post,
    path = "/api/projects",
    request_body = CreateProjectRequest,
    responses(
        (status = 201, description = "Project created", body = CreateProjectResponse),
        (status = 400, description = "Project name missing"),
        (status = 409, description = "Project name already taken"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "projects"
)]
pub async fn create_project(
    State(state): State<AppState>,
    Json(body): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<CreateProjectResponse>), AppError> {
    let name = body
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Project name is required".into()))?;

    let sensor_types: Vec<SensorType> = body
        .sensors
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let id = state
        .store
        .create_project(&name, body.description.as_deref().unwrap_or(""), &sensor_types)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateProjectResponse { success: true, id }),
    ))
}

/// Delete a project together with its sensors and their readings.
#[utoipa::path(
    delete,
    path = "/api/projects/{id}",
    params(("id" = i64, Path, description = "Project id")),
    responses(
        (status = 204, description = "Project deleted"),
        (status = 404, description = "Project not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "projects"
)]
pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    if state.store.delete_project(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("Project not found".into()))
    }
}

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// Every sensor type a project can be created with.
#[utoipa::path(
    get,
    path = "/api/sensors/available",
    responses(
        (status = 200, description = "Known sensor types", body = Vec<AvailableSensorDto>),
    ),
    tag = "sensors"
)]
pub async fn available_sensors() -> Json<Vec<AvailableSensorDto>> {
    Json(SensorType::ALL.into_iter().map(Into::into).collect())
}

/// Enable or disable a sensor. Disabled sensors receive no new readings.
#[utoipa::path(
    post,
    path = "/api/sensors/{id}/toggle",
    params(("id" = i64, Path, description = "Sensor id")),
    request_body = ToggleSensorRequest,
    responses(
        (status = 200, description = "New state", body = ToggleSensorResponse),
        (status = 400, description = "`enabled` missing"),
        (status = 404, description = "Sensor not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "sensors"
)]
pub async fn toggle_sensor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ToggleSensorRequest>,
) -> Result<Json<ToggleSensorResponse>, AppError> {
    let enabled = body
        .enabled
        .ok_or_else(|| AppError::BadRequest("Enabled state not provided".into()))?;

    if !state.store.set_sensor_enabled(id, enabled).await? {
        return Err(AppError::NotFound("Sensor not found".into()));
    }

    Ok(Json(ToggleSensorResponse {
        success: true,
        id,
        enabled,
    }))
}

/// Chart data for one sensor: readings from the last `minutes`, oldest
/// first, capped at 500 points.
#[utoipa::path(
    get,
    path = "/api/sensors/{id}/data",
    params(
        ("id" = i64, Path, description = "Sensor id"),
        ("minutes" = Option<i64>, Query, description = "Lookback window in minutes (default 60)"),
    ),
    responses(
        (status = 200, description = "Sensor readings", body = SensorDataDto),
        (status = 400, description = "Window is not positive or out of range"),
        (status = 404, description = "Sensor not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "sensors"
)]
pub async fn sensor_data(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<WindowParams>,
) -> Result<Json<SensorDataDto>, AppError> {
    let minutes = params.minutes.unwrap_or(DEFAULT_WINDOW_MINUTES);
    if minutes <= 0 {
        return Err(AppError::BadRequest("minutes must be positive".into()));
    }

    let sensor = state
        .store
        .sensor(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Sensor not found".into()))?;

    let points = state.store.recent_readings(id, minutes, Utc::now()).await?;
    tracing::debug!(sensor_id = id, points = points.len(), "Sensor data served");

    Ok(Json(SensorDataDto::new(&sensor, points)))
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// Serial link state and ingestion counters.
#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, description = "Serial link status", body = LinkSnapshot),
    ),
    tag = "system"
)]
pub async fn link_status(State(state): State<AppState>) -> Json<LinkSnapshot> {
    Json(state.link.snapshot().await)
}

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        list_projects,
        create_project,
        delete_project,
        available_sensors,
        toggle_sensor,
        sensor_data,
        link_status,
        health
    ),
    components(schemas(
        ProjectSummary,
        CreateProjectRequest,
        CreateProjectResponse,
        AvailableSensorDto,
        ToggleSensorRequest,
        ToggleSensorResponse,
        SensorDataDto,
        SensorType,
        LinkSnapshot,
        LinkState
    )),
    tags(
        (name = "projects", description = "Project management"),
        (name = "sensors",  description = "Sensor configuration and readings"),
        (name = "system",   description = "System endpoints"),
    ),
    info(
        title = "Sensor Logger API",
        version = "0.1.0",
        description = "REST API for serial sensor readings"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
