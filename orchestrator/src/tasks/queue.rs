// Task Queue: creation, executor callbacks and the explicit retry policy

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::AgentRegistry;
use crate::error::TaskError;
use crate::models::{Task, TaskCounts, TaskOutcome, TaskSpec, TaskStatus};
use crate::store::TaskStore;

#[derive(Clone)]
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    registry: Arc<AgentRegistry>,
    max_retries: i32,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<AgentRegistry>, max_retries: i32) -> Self {
        Self {
            store,
            registry,
            max_retries,
        }
    }

    /// Direct creation (user action). The owning agent must exist.
    pub async fn enqueue(&self, spec: TaskSpec, tenant_id: Option<String>) -> Result<Task, TaskError> {
        if !self.registry.contains(&spec.agent_id) {
            return Err(TaskError::UnknownAgent(spec.agent_id));
        }
        let task = Task::pending(spec, tenant_id);
        self.store.insert_task(&task).await?;
        info!(task_id = %task.id, agent = %task.agent_id, priority = task.priority, "Task enqueued");
        Ok(task)
    }

    pub async fn get(&self, id: Uuid) -> Result<Task, TaskError> {
        self.store.get_task(id).await?.ok_or(TaskError::NotFound(id))
    }

    pub async fn list(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>, TaskError> {
        Ok(self.store.list_tasks(status, limit).await?)
    }

    pub async fn counts(&self) -> Result<TaskCounts, TaskError> {
        Ok(self.store.count_tasks().await?)
    }

    /// Executor callback. Only an in-progress task can finish.
    pub async fn report(&self, id: Uuid, outcome: TaskOutcome) -> Result<Task, TaskError> {
        if let Some(task) = self.store.finish_task(id, &outcome).await? {
            match &outcome {
                TaskOutcome::Completed { .. } => info!(task_id = %id, "Task completed"),
                TaskOutcome::Failed { error } => warn!(task_id = %id, error = %error, "Task failed"),
            }
            return Ok(task);
        }

        let current = self.get(id).await?;
        Err(TaskError::InvalidTransition {
            id,
            from: current.status,
            to: outcome.status(),
        })
    }

    /// Creates a fresh pending task for a failed one, leaving the failed record untouched.
    pub async fn retry(&self, failed_id: Uuid) -> Result<Task, TaskError> {
        let failed = self.get(failed_id).await?;
        if failed.status != TaskStatus::Failed {
            return Err(TaskError::InvalidTransition {
                id: failed_id,
                from: failed.status,
                to: TaskStatus::Pending,
            });
        }
        if failed.retry_count >= self.max_retries {
            return Err(TaskError::RetryLimit {
                id: failed_id,
                retries: failed.retry_count,
                limit: self.max_retries,
            });
        }

        let retry = Task::retry_of(&failed);
        if !self.store.insert_retry(&retry).await? {
            return Err(TaskError::AlreadyRetried(failed_id));
        }
        info!(
            task_id = %retry.id,
            retry_of = %failed_id,
            retry_count = retry.retry_count,
            "Failed task re-enqueued"
        );
        Ok(retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn queue() -> (TaskQueue, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let queue = TaskQueue::new(store.clone(), Arc::new(AgentRegistry::marketing_roster()), 1);
        (queue, store)
    }

    async fn claimed(queue: &TaskQueue, store: &MemoryStore, title: &str) -> Task {
        let task = queue.enqueue(TaskSpec::new(title, "content_writer", 5), None).await.unwrap();
        let claimed = store.claim_pending(10).await.unwrap();
        assert_eq!(claimed[0].id, task.id);
        task
    }

    #[tokio::test]
    async fn test_enqueue_rejects_unknown_agent() {
        let (queue, _) = queue();
        let err = queue.enqueue(TaskSpec::new("x", "intern", 1), None).await.unwrap_err();
        assert!(matches!(err, TaskError::UnknownAgent(a) if a == "intern"));
    }

    #[tokio::test]
    async fn test_report_requires_in_progress() {
        let (queue, _) = queue();
        let task = queue.enqueue(TaskSpec::new("Blog draft", "content_writer", 5), None).await.unwrap();

        let err = queue
            .report(task.id, TaskOutcome::Completed { result: None })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TaskError::InvalidTransition { from: TaskStatus::Pending, to: TaskStatus::Completed, .. }
        ));
    }

    #[tokio::test]
    async fn test_report_completed_then_no_further_transition() {
        let (queue, store) = queue();
        let task = claimed(&queue, &store, "Blog draft").await;

        let done = queue
            .report(task.id, TaskOutcome::Completed { result: Some(serde_json::json!({"words": 900})) })
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result, Some(serde_json::json!({"words": 900})));

        let err = queue
            .report(task.id, TaskOutcome::Failed { error: "late".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { from: TaskStatus::Completed, .. }));
    }

    #[tokio::test]
    async fn test_retry_creates_new_record_within_limit() {
        let (queue, store) = queue();
        let task = claimed(&queue, &store, "Scrape competitor ads").await;
        queue
            .report(task.id, TaskOutcome::Failed { error: "captcha".into() })
            .await
            .unwrap();

        let retry = queue.retry(task.id).await.unwrap();
        assert_eq!(retry.retry_of, Some(task.id));
        assert_eq!(retry.status, TaskStatus::Pending);
        assert_eq!(queue.get(task.id).await.unwrap().status, TaskStatus::Failed);

        // Fail the retry too; the limit of 1 is now exhausted.
        store.claim_pending(10).await.unwrap();
        queue
            .report(retry.id, TaskOutcome::Failed { error: "captcha".into() })
            .await
            .unwrap();
        assert!(matches!(queue.retry(retry.id).await, Err(TaskError::RetryLimit { .. })));
    }

    #[tokio::test]
    async fn test_failed_task_is_retried_once() {
        let (queue, store) = queue();
        let task = claimed(&queue, &store, "Refresh ad copy").await;
        queue
            .report(task.id, TaskOutcome::Failed { error: "quota".into() })
            .await
            .unwrap();

        queue.retry(task.id).await.unwrap();
        for _ in 0..3 {
            assert!(matches!(queue.retry(task.id).await, Err(TaskError::AlreadyRetried(id)) if id == task.id));
        }
        assert_eq!(queue.counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_retry_only_failed_tasks() {
        let (queue, _) = queue();
        let task = queue.enqueue(TaskSpec::new("x", "cmo", 1), None).await.unwrap();
        assert!(matches!(queue.retry(task.id).await, Err(TaskError::InvalidTransition { .. })));
        assert!(matches!(queue.retry(Uuid::new_v4()).await, Err(TaskError::NotFound(_))));
    }
}
