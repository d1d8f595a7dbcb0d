pub mod dto;
pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use handlebars::Handlebars;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::{dashboard, link_status::LinkStatus, store::ReadingStore};
use handlers::ApiDoc;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: ReadingStore,
    pub link: LinkStatus,
    /// Dashboard templates, compiled once at startup.
    pub pages: Arc<Handlebars<'static>>,
}

impl AppState {
    pub fn new(store: ReadingStore, link: LinkStatus) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            link,
            pages: Arc::new(dashboard::templates()?),
        })
    }
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route(
            "/api/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route("/api/projects/{id}", delete(handlers::delete_project))
        .route("/api/sensors/available", get(handlers::available_sensors))
        .route("/api/sensors/{id}/toggle", post(handlers::toggle_sensor))
        .route("/api/sensors/{id}/data", get(handlers::sensor_data))
        .route("/api/status", get(handlers::link_status))
        .route("/", get(dashboard::index))
        .route("/health", get(handlers::health))
        .with_state(state)
        .split_for_parts();

    router.route(
        "/api-docs/openapi.json",
        get(move || async move { axum::Json(api) }),
    )
}
