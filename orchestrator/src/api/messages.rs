use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use super::AppState;
use crate::error::{reject, ValidationError};
use crate::models::{MessageDraft, MessageFilter};

pub async fn handle_send(draft: MessageDraft, state: AppState) -> Result<impl Reply, Rejection> {
    let message = state.messages.send(draft).await.map_err(reject)?;
    Ok(warp::reply::with_status(warp::reply::json(&message), StatusCode::CREATED))
}

pub async fn handle_list(agent_id: String, filter: MessageFilter, state: AppState) -> Result<impl Reply, Rejection> {
    if !state.registry.contains(&agent_id) {
        return Err(reject(ValidationError::UnknownAgent(agent_id)));
    }
    let messages = state.messages.list_for(&agent_id, &filter).await.map_err(reject)?;
    Ok(warp::reply::json(&messages))
}

pub async fn handle_respond(id: Uuid, state: AppState) -> Result<impl Reply, Rejection> {
    let message = state.messages.mark_responded(id).await.map_err(reject)?;
    Ok(warp::reply::json(&message))
}
