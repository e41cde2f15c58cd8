use serde::Deserialize;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use super::AppState;
use crate::error::reject;
use crate::models::{TaskOutcome, TaskSpec, TaskStatus};

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(flatten)]
    pub spec: TaskSpec,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn handle_create(request: CreateTaskRequest, state: AppState) -> Result<impl Reply, Rejection> {
    let task = state
        .tasks
        .enqueue(request.spec, request.tenant_id)
        .await
        .map_err(reject)?;
    Ok(warp::reply::with_status(warp::reply::json(&task), StatusCode::CREATED))
}

pub async fn handle_list(query: ListTasksQuery, state: AppState) -> Result<impl Reply, Rejection> {
    let tasks = state
        .tasks
        .list(query.status, query.limit.min(500))
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&tasks))
}

pub async fn handle_get(id: Uuid, state: AppState) -> Result<impl Reply, Rejection> {
    let task = state.tasks.get(id).await.map_err(reject)?;
    Ok(warp::reply::json(&task))
}

/// Executor callback.
pub async fn handle_report(id: Uuid, outcome: TaskOutcome, state: AppState) -> Result<impl Reply, Rejection> {
    let task = state.tasks.report(id, outcome).await.map_err(reject)?;
    Ok(warp::reply::json(&task))
}

pub async fn handle_retry(id: Uuid, state: AppState) -> Result<impl Reply, Rejection> {
    let task = state.tasks.retry(id).await.map_err(reject)?;
    Ok(warp::reply::with_status(warp::reply::json(&task), StatusCode::CREATED))
}
