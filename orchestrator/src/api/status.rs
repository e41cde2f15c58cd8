use serde_json::json;
use warp::{Rejection, Reply};

use super::AppState;
use crate::error::{reject, ApiError};

pub async fn handle_health() -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&json!({"status": "healthy"})))
}

pub async fn handle_metrics(state: AppState) -> Result<impl Reply, Rejection> {
    let (body, content_type) = state
        .metrics
        .encode()
        .map_err(|e| reject(ApiError::InternalError(e.to_string())))?;
    Ok(warp::reply::with_header(body, "Content-Type", content_type))
}

/// The roster, top of the hierarchy first.
pub async fn handle_agents(state: AppState) -> Result<impl Reply, Rejection> {
    let agents: Vec<_> = state.registry.iter().collect();
    Ok(warp::reply::json(&agents))
}

/// Queue depth by status plus event backlog.
pub async fn handle_stats(state: AppState) -> Result<impl Reply, Rejection> {
    let tasks = state.tasks.counts().await.map_err(reject)?;
    let events = state.processor.counts().await.map_err(reject)?;
    Ok(warp::reply::json(&json!({
        "tasks": tasks,
        "events": events,
    })))
}

#[cfg(test)]
mod tests {
    use crate::api::routes;
    use crate::api::test_support::state;
    use crate::models::Task;
    use crate::models::TaskSpec;
    use crate::store::TaskStore;

    #[tokio::test]
    async fn test_agents_listed_top_down() {
        let (state, _) = state();
        let resp = warp::test::request().path("/api/v1/agents").reply(&routes(state)).await;
        assert_eq!(resp.status(), 200);

        let agents: Vec<serde_json::Value> = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(agents.len(), 8);
        assert_eq!(agents[0]["id"], "cmo");
        assert_eq!(agents[0]["level"], 1);
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = state();
        let resp = warp::test::request().path("/health").reply(&routes(state)).await;
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_stats_counts_tasks_and_events() {
        let (state, store) = state();
        store
            .insert_task(&Task::pending(TaskSpec::new("Weekly digest", "content_writer", 2), None))
            .await
            .unwrap();

        let resp = warp::test::request()
            .path("/api/v1/stats")
            .reply(&routes(state))
            .await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["tasks"]["pending"], 1);
        assert_eq!(body["events"]["unprocessed"], 0);
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let (state, _) = state();
        state.metrics.tasks_created.inc();

        let resp = warp::test::request().path("/metrics").reply(&routes(state)).await;
        assert_eq!(resp.status(), 200);
        let text = String::from_utf8(resp.body().to_vec()).unwrap();
        assert!(text.contains("orchestrator_tasks_created_total 1"));
    }
}
