// In-process store with the same claim/commit guarantees as Postgres.
// Lock order is events -> tasks wherever both are held.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{EventStore, MessageStore, StoreResult, TaskStore};
use crate::models::{
    Event, EventCounts, Message, MessageFilter, ProcessingResult, ReleaseOutcome, Task, TaskCounts,
    TaskOutcome, TaskStatus,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: RwLock<Vec<Message>>,
    tasks: RwLock<Vec<Task>>,
    events: RwLock<Vec<Event>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn release(task: &mut Task, error: &str, max_attempts: i32, now: DateTime<Utc>) -> ReleaseOutcome {
    task.claimed_at = None;
    task.dispatch_error = Some(error.to_string());
    if task.dispatch_attempts >= max_attempts {
        task.status = TaskStatus::Failed;
        task.error = Some(format!(
            "dispatch abandoned after {} attempts: {}",
            task.dispatch_attempts, error
        ));
        task.finished_at = Some(now);
        ReleaseOutcome::DeadLettered
    } else {
        task.status = TaskStatus::Pending;
        ReleaseOutcome::Requeued
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append_message(&self, message: &Message) -> StoreResult<()> {
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        Ok(self.messages.read().await.iter().find(|m| m.id == id).cloned())
    }

    async fn list_messages(&self, agent_id: &str, filter: &MessageFilter) -> StoreResult<Vec<Message>> {
        let messages = self.messages.read().await;
        let mut found: Vec<Message> = messages
            .iter()
            .filter(|m| filter.matches(agent_id, m))
            .cloned()
            .collect();
        found.sort_by_key(|m| m.created_at);
        if let Some(limit) = filter.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn mark_responded(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut messages = self.messages.write().await;
        match messages.iter_mut().find(|m| m.id == id) {
            Some(m) if m.responded_at.is_none() => {
                m.responded_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_task(&self, task: &Task) -> StoreResult<()> {
        self.tasks.write().await.push(task.clone());
        Ok(())
    }

    async fn insert_retry(&self, task: &Task) -> StoreResult<bool> {
        let mut tasks = self.tasks.write().await;
        if task.retry_of.is_some() && tasks.iter().any(|t| t.retry_of == task.retry_of) {
            return Ok(false);
        }
        tasks.push(task.clone());
        Ok(true)
    }

    async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        Ok(self.tasks.read().await.iter().find(|t| t.id == id).cloned())
    }

    async fn list_tasks(&self, status: Option<TaskStatus>, limit: usize) -> StoreResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut found: Vec<Task> = tasks
            .iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(limit);
        Ok(found)
    }

    async fn claim_pending(&self, limit: usize) -> StoreResult<Vec<Task>> {
        let mut tasks = self.tasks.write().await;
        let now = Utc::now();

        // Insertion order breaks created_at ties; sort_by is stable.
        let mut pending: Vec<usize> = (0..tasks.len())
            .filter(|&i| tasks[i].status == TaskStatus::Pending)
            .collect();
        pending.sort_by(|&a, &b| tasks[a].dispatch_cmp(&tasks[b]));
        pending.truncate(limit);

        Ok(pending
            .into_iter()
            .map(|i| {
                let task = &mut tasks[i];
                task.status = TaskStatus::InProgress;
                task.dispatch_attempts += 1;
                task.claimed_at = Some(now);
                task.clone()
            })
            .collect())
    }

    async fn release_claim(&self, id: Uuid, error: &str, max_attempts: i32) -> StoreResult<ReleaseOutcome> {
        let mut tasks = self.tasks.write().await;
        match tasks
            .iter_mut()
            .find(|t| t.id == id && t.status == TaskStatus::InProgress)
        {
            Some(task) => Ok(release(task, error, max_attempts, Utc::now())),
            None => Ok(ReleaseOutcome::NotClaimed),
        }
    }

    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        max_attempts: i32,
    ) -> StoreResult<(u64, u64)> {
        let mut tasks = self.tasks.write().await;
        let now = Utc::now();
        let (mut requeued, mut dead) = (0, 0);
        for task in tasks.iter_mut().filter(|t| {
            t.status == TaskStatus::InProgress && t.claimed_at.map_or(false, |at| at < claimed_before)
        }) {
            match release(task, "claim lease expired", max_attempts, now) {
                ReleaseOutcome::Requeued => requeued += 1,
                ReleaseOutcome::DeadLettered => dead += 1,
                ReleaseOutcome::NotClaimed | ReleaseOutcome::ReleaseFailed => {}
            }
        }
        Ok((requeued, dead))
    }

    async fn finish_task(&self, id: Uuid, outcome: &TaskOutcome) -> StoreResult<Option<Task>> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks
            .iter_mut()
            .find(|t| t.id == id && t.status == TaskStatus::InProgress)
        else {
            return Ok(None);
        };

        task.status = outcome.status();
        task.finished_at = Some(Utc::now());
        match outcome {
            TaskOutcome::Completed { result } => task.result = result.clone(),
            TaskOutcome::Failed { error } => task.error = Some(error.clone()),
        }
        Ok(Some(task.clone()))
    }

    async fn count_tasks(&self) -> StoreResult<TaskCounts> {
        let mut counts = TaskCounts::default();
        for task in self.tasks.read().await.iter() {
            counts.add(task.status, 1);
        }
        Ok(counts)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        Ok(self.events.read().await.iter().find(|e| e.id == id).cloned())
    }

    async fn unprocessed_events(&self, limit: usize) -> StoreResult<Vec<Event>> {
        let events = self.events.read().await;
        let mut found: Vec<Event> = events.iter().filter(|e| !e.processed).cloned().collect();
        found.sort_by_key(|e| e.created_at);
        found.truncate(limit);
        Ok(found)
    }

    async fn commit_decision(&self, event_id: Uuid, tasks: &[Task], result: &ProcessingResult) -> StoreResult<bool> {
        let mut events = self.events.write().await;
        let Some(event) = events.iter_mut().find(|e| e.id == event_id && !e.processed) else {
            return Ok(false);
        };

        self.tasks.write().await.extend(tasks.iter().cloned());
        event.processed = true;
        event.processing_result = Some(result.clone());
        event.processed_at = Some(Utc::now());
        Ok(true)
    }

    async fn record_event_failure(&self, event_id: Uuid, error: &str) -> StoreResult<Option<i32>> {
        let mut events = self.events.write().await;
        Ok(events
            .iter_mut()
            .find(|e| e.id == event_id && !e.processed)
            .map(|event| {
                event.attempts += 1;
                event.last_error = Some(error.to_string());
                event.attempts
            }))
    }

    async fn count_events(&self) -> StoreResult<EventCounts> {
        let events = self.events.read().await;
        let processed = events.iter().filter(|e| e.processed).count() as u64;
        Ok(EventCounts {
            unprocessed: events.len() as u64 - processed,
            processed,
        })
    }
}
