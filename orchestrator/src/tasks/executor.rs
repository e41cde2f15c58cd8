// Executor handoff: the dispatcher's only contact with whoever runs the work.
// Executors acknowledge receipt here and report the outcome later through
// `TaskQueue::report`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::InvocationError;
use crate::models::{Metadata, Task};
use crate::redis_client::RedisClient;

/// What crosses the boundary for each claimed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHandoff {
    pub task_id: Uuid,
    pub agent_id: String,
    pub title: String,
    pub priority: i32,
    pub attempt: i32,
    #[serde(default)]
    pub input: Metadata,
}

impl From<&Task> for TaskHandoff {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            agent_id: task.agent_id.clone(),
            title: task.title.clone(),
            priority: task.priority,
            attempt: task.dispatch_attempts,
            input: task.input.clone(),
        }
    }
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Returns once the executor has accepted the task, not when the work is done.
    async fn submit(&self, handoff: &TaskHandoff) -> Result<(), InvocationError>;
}

/// POSTs the handoff as JSON to an executor endpoint (e.g. a serverless function).
pub struct HttpExecutor {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpExecutor {
    pub fn new(url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self, InvocationError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl TaskExecutor for HttpExecutor {
    async fn submit(&self, handoff: &TaskHandoff) -> Result<(), InvocationError> {
        let mut request = self.client.post(&self.url).json(handoff);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            debug!(task_id = %handoff.task_id, status = status.as_u16(), "Executor accepted task");
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(InvocationError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Pushes the handoff onto a Redis list consumed by executor workers.
pub struct RedisExecutor {
    client: RedisClient,
    queue: String,
}

impl RedisExecutor {
    pub fn new(client: RedisClient, queue: impl Into<String>) -> Self {
        Self {
            client,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl TaskExecutor for RedisExecutor {
    async fn submit(&self, handoff: &TaskHandoff) -> Result<(), InvocationError> {
        let payload = serde_json::to_string(handoff)?;
        let depth = self.client.push(&self.queue, &payload).await?;
        debug!(task_id = %handoff.task_id, queue = %self.queue, depth, "Task queued for executor");
        Ok(())
    }
}

/// In-process handoff over a bounded channel. A full channel applies
/// backpressure, which the dispatcher's handoff timeout turns into an
/// invocation failure.
#[derive(Clone)]
pub struct ChannelExecutor {
    tx: mpsc::Sender<TaskHandoff>,
}

impl ChannelExecutor {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TaskHandoff>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TaskExecutor for ChannelExecutor {
    async fn submit(&self, handoff: &TaskHandoff) -> Result<(), InvocationError> {
        self.tx
            .send(handoff.clone())
            .await
            .map_err(|_| InvocationError::Unavailable("executor channel closed".to_string()))
    }
}
