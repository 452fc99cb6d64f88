// SPDX-License-Identifier: GPL-3.0-or-later
use axum::{extract::State, Json};
use arrbiter_scheduler::TaskInfo;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::ApiState;

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskResponse {
    /// Registry key, e.g. `hunt:sonarr:missing`.
    pub id: String,
    pub job_type: String,
    pub name: String,
    pub schedule: String,
    pub started_at: DateTime<Utc>,
}

impl From<TaskInfo> for TaskResponse {
    fn from(value: TaskInfo) -> Self {
        Self {
            id: value.job_id,
            job_type: value.job_type.to_string(),
            name: value.name,
            schedule: value.schedule,
            started_at: value.started_at,
        }
    }
}

/// List the background tasks that are currently scheduled.
#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    responses(
        (status = 200, description = "Active tasks ordered by id", body = [TaskResponse])
    ),
    tag = "tasks"
)]
pub async fn list_tasks(State(state): State<ApiState>) -> Json<Vec<TaskResponse>> {
    let tasks = state.registry.active().await;
    Json(tasks.into_iter().map(TaskResponse::from).collect())
}
