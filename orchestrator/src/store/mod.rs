//! Durable store seams.
//!
//! The store is the only shared mutable resource: the dispatcher, the event
//! processor and the HTTP handlers never talk to each other directly, only
//! through these traits. [`PgStore`] is the production backend; [`MemoryStore`]
//! gives the same guarantees inside one process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Event, EventCounts, Message, MessageFilter, ProcessingResult, ReleaseOutcome, Task, TaskCounts,
    TaskOutcome, TaskStatus,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_message(&self, message: &Message) -> StoreResult<()>;

    async fn get_message(&self, id: Uuid) -> StoreResult<Option<Message>>;

    /// Oldest first.
    async fn list_messages(&self, agent_id: &str, filter: &MessageFilter) -> StoreResult<Vec<Message>>;

    /// Sets `responded_at` once. Returns false if it was already set or the id is unknown.
    async fn mark_responded(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: &Task) -> StoreResult<()>;

    /// Inserts a retry unless another task already retries `task.retry_of`.
    /// Returns false when nothing was written.
    async fn insert_retry(&self, task: &Task) -> StoreResult<bool>;

    async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>>;

    async fn list_tasks(&self, status: Option<TaskStatus>, limit: usize) -> StoreResult<Vec<Task>>;

    /// Atomically moves up to `limit` pending tasks to in_progress and returns
    /// them in dispatch order (priority desc, then oldest first). A task
    /// returned here is never returned to a concurrent caller.
    async fn claim_pending(&self, limit: usize) -> StoreResult<Vec<Task>>;

    /// Gives a claim back after a failed handoff. Dead-letters the task once
    /// `dispatch_attempts` has reached `max_attempts`.
    async fn release_claim(&self, id: Uuid, error: &str, max_attempts: i32) -> StoreResult<ReleaseOutcome>;

    /// Releases claims older than `claimed_before` under the same attempt budget.
    /// Returns how many tasks went back to pending and how many were dead-lettered.
    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        max_attempts: i32,
    ) -> StoreResult<(u64, u64)>;

    /// in_progress -> completed/failed. Returns the updated task, or None if the
    /// task was not in progress.
    async fn finish_task(&self, id: Uuid, outcome: &TaskOutcome) -> StoreResult<Option<Task>>;

    async fn count_tasks(&self) -> StoreResult<TaskCounts>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: &Event) -> StoreResult<()>;

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>>;

    /// Unprocessed events, oldest first.
    async fn unprocessed_events(&self, limit: usize) -> StoreResult<Vec<Event>>;

    /// Inserts `tasks` and flips the event to processed in one unit. Nothing is
    /// written and false is returned when the event was already processed.
    async fn commit_decision(&self, event_id: Uuid, tasks: &[Task], result: &ProcessingResult) -> StoreResult<bool>;

    /// Records a failed decision attempt on an unprocessed event and returns the
    /// new attempt count. None when the event is unknown or already processed.
    async fn record_event_failure(&self, event_id: Uuid, error: &str) -> StoreResult<Option<i32>>;

    async fn count_events(&self) -> StoreResult<EventCounts>;
}

/// Everything the service needs from one backend.
pub trait Store: MessageStore + TaskStore + EventStore {}

impl<T: MessageStore + TaskStore + EventStore> Store for T {}
