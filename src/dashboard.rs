//! Server-rendered dashboard at `GET /`.
//!
//! The page lists projects, the selected project's sensors with enable
//! toggles, and one chart per sensor. Charts pull their points from
//! `/api/sensors/{id}/data`, so the page itself carries no readings.

use anyhow::Context;
use axum::{
    extract::{Query, State},
    response::Html,
};
use handlebars::{handlebars_helper, Handlebars};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    api::{dto::AvailableSensorDto, errors::AppError, AppState},
    db::models::{ProjectSummary, Sensor, SensorType},
};

const TEMPLATE: &str = include_str!("../templates/dashboard.hbs");
const DASHBOARD: &str = "dashboard";

#[derive(Debug, Deserialize)]
pub struct DashboardParams {
    /// Taken as a string so a malformed id falls back to the default project
    /// instead of rejecting the request.
    pub project: Option<String>,
}

#[derive(Serialize)]
struct SensorView {
    id: i64,
    name: String,
    #[serde(rename = "type")]
    sensor_type: SensorType,
    unit: &'static str,
    enabled: bool,
}

impl From<Sensor> for SensorView {
    fn from(sensor: Sensor) -> Self {
        Self {
            id: sensor.id,
            name: sensor.name,
            sensor_type: sensor.sensor_type,
            unit: sensor.sensor_type.unit(),
            enabled: sensor.enabled,
        }
    }
}

#[derive(Serialize)]
struct DashboardContext {
    projects: Vec<ProjectSummary>,
    active_project_id: Option<i64>,
    active_project: Option<ProjectSummary>,
    sensors: Vec<SensorView>,
    sensor_types: Vec<AvailableSensorDto>,
}

pub fn get_handlebars() -> Handlebars<'static> {
    let mut handlebars = Handlebars::new();

    handlebars_helper!(ideq: |a: Value, b: Value| a == b);
    handlebars.register_helper("ideq", Box::new(ideq));

    handlebars
}

/// Registry with the dashboard template parsed and registered.
pub fn templates() -> anyhow::Result<Handlebars<'static>> {
    let mut handlebars = get_handlebars();
    handlebars
        .register_template_string(DASHBOARD, TEMPLATE)
        .context("Failed to parse dashboard template")?;
    Ok(handlebars)
}

pub async fn index(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> Result<Html<String>, AppError> {
    let projects = state.store.list_projects().await?;

    let active_project_id = params
        .project
        .and_then(|p| p.trim().parse::<i64>().ok())
        .or_else(|| projects.first().map(|p| p.id));

    let sensors = match active_project_id {
        Some(id) => state.store.project_sensors(id).await?,
        None => Vec::new(),
    };

    let context = DashboardContext {
        active_project: active_project_id
            .and_then(|id| projects.iter().find(|p| p.id == id).cloned()),
        projects,
        active_project_id,
        sensors: sensors.into_iter().map(SensorView::from).collect(),
        sensor_types: SensorType::ALL.into_iter().map(Into::into).collect(),
    };

    let page = state
        .pages
        .render(DASHBOARD, &context)
        .context("Failed to render dashboard")?;
    Ok(Html(page))
}
