// SPDX-License-Identifier: GPL-3.0-or-later
pub mod handlers;

use std::sync::Arc;

use arrbiter_realtime::BroadcastHub;
use arrbiter_scheduler::registry::JobRegistry;
use axum::{routing::get, Json, Router};
use handlers::events::{__path_stream_events, stream_events};
use handlers::tasks::{__path_list_tasks, list_tasks, TaskResponse};
use serde::Serialize;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Shared handles the HTTP surface reads from.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<JobRegistry>,
    pub hub: BroadcastHub,
}

impl ApiState {
    pub fn new(registry: Arc<JobRegistry>, hub: BroadcastHub) -> Self {
        Self { registry, hub }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
struct HealthResponse {
    status: &'static str,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(OpenApi)]
#[openapi(
    paths(health, list_tasks, stream_events),
    components(schemas(HealthResponse, TaskResponse)),
    tags(
        (name = "system", description = "System health and status endpoints"),
        (name = "tasks", description = "Scheduled background tasks"),
        (name = "events", description = "Realtime progress stream")
    ),
    info(
        title = "arrbiter API",
        version = "0.1.0",
        description = "Hunt and queue-cleaner automation for *arr services",
    )
)]
struct ApiDoc;

pub fn router(state: ApiState) -> Router {
    info!(target: "api", "building router");

    let api_v1 = Router::new()
        .route("/tasks", get(list_tasks))
        .route("/events", get(stream_events));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}
