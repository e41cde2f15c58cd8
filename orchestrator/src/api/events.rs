use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use super::AppState;
use crate::error::reject;
use crate::models::Metadata;

#[derive(Debug, Deserialize)]
pub struct RecordEventRequest {
    pub event_type: String,
    #[serde(default)]
    pub subject_id: Option<Uuid>,
    pub tenant_id: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Decide immediately instead of waiting for the next sweep.
    #[serde(default)]
    pub process_now: bool,
}

pub async fn handle_record(request: RecordEventRequest, state: AppState) -> Result<impl Reply, Rejection> {
    let RecordEventRequest {
        event_type,
        subject_id,
        tenant_id,
        metadata,
        process_now,
    } = request;

    let body = if process_now {
        let (event, outcome) = state
            .processor
            .record_and_process(&state.perceiver, event_type, subject_id, tenant_id, metadata)
            .await
            .map_err(reject)?;
        json!({"event": event, "outcome": outcome})
    } else {
        let event = state
            .perceiver
            .record(event_type, subject_id, tenant_id, metadata)
            .await
            .map_err(reject)?;
        json!({"event": event})
    };

    Ok(warp::reply::with_status(warp::reply::json(&body), StatusCode::CREATED))
}
