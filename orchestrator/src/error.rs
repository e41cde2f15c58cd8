use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{reject::Reject, Rejection, Reply};

use crate::models::TaskStatus;

/// A proposed message broke the hierarchy rules. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("delegation must flow downward ({from} -> {to})")]
    DelegationMustFlowDownward { from: String, to: String },

    #[error("{message_type} must flow upward ({from} -> {to})")]
    MustFlowUpward {
        message_type: String,
        from: String,
        to: String,
    },
}

/// Durable store failure. Sweeps log it and try again next cycle.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// The task could not be handed to its executor. Distinct from the task itself failing.
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("executor unavailable: {0}")]
    Unavailable(String),

    #[error("executor rejected handoff with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("handoff timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A decision rule could not turn an event into task specs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecisionError {
    #[error("metadata field `{field}` {reason}")]
    InvalidMetadata { field: String, reason: String },

    #[error("task spec names unknown agent: {0}")]
    UnknownAgent(String),

    #[error("collaborator failed: {0}")]
    Collaborator(String),
}

impl DecisionError {
    pub fn missing(field: &str) -> Self {
        DecisionError::InvalidMetadata {
            field: field.to_string(),
            reason: "is required".to_string(),
        }
    }

    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        DecisionError::InvalidMetadata {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("duplicate agent id: {0}")]
    DuplicateAgent(String),

    #[error("agent {0} has level 0; levels start at 1")]
    InvalidLevel(String),

    #[error("agent registry names no agents")]
    Empty,

    #[error("failed to read agent registry: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse agent registry: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum MessageError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("message not found: {0}")]
    NotFound(Uuid),

    #[error("message {0} does not expect a response")]
    NoResponseExpected(Uuid),

    #[error("message {0} was already responded to")]
    AlreadyResponded(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(Uuid),

    #[error("task spec names unknown agent: {0}")]
    UnknownAgent(String),

    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {id} already retried {retries} times (limit {limit})")]
    RetryLimit { id: Uuid, retries: i32, limit: i32 },

    #[error("task {0} has already been re-enqueued")]
    AlreadyRetried(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// HTTP-facing error; every core error funnels through here.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl Reject for ApiError {}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Message(MessageError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Message(MessageError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Message(MessageError::NoResponseExpected(_))
            | ApiError::Message(MessageError::AlreadyResponded(_)) => StatusCode::CONFLICT,
            ApiError::Task(TaskError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Task(TaskError::UnknownAgent(_)) => StatusCode::BAD_REQUEST,
            ApiError::Task(TaskError::InvalidTransition { .. })
            | ApiError::Task(TaskError::RetryLimit { .. })
            | ApiError::Task(TaskError::AlreadyRetried(_)) => StatusCode::CONFLICT,
            ApiError::Message(MessageError::Store(_))
            | ApiError::Task(TaskError::Store(_))
            | ApiError::Store(_)
            | ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub fn reject(err: impl Into<ApiError>) -> Rejection {
    warp::reject::custom(err.into())
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    if let Some(api_err) = err.find::<ApiError>() {
        let code = api_err.status();
        let message = code.canonical_reason().unwrap_or("Error");

        let json = warp::reply::json(&serde_json::json!({
            "error": message,
            "details": api_err.to_string(),
        }));

        Ok(warp::reply::with_status(json, code))
    } else {
        Err(err)
    }
}
