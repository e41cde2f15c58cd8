// Postgres backend. Claims and decision commits are single statements or
// transactions so overlapping sweeps never double-dispatch or double-create.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;
use tracing::debug;
use uuid::Uuid;

use super::{EventStore, MessageStore, StoreResult, TaskStore};
use crate::db::DbPool;
use crate::error::StoreError;
use crate::models::{
    Direction, Event, EventCounts, EventType, Message, MessageFilter, Metadata, ProcessingResult,
    ReleaseOutcome, Task, TaskCounts, TaskOutcome, TaskStatus,
};

const MESSAGE_COLUMNS: &str = "id, from_agent, to_agent, message_type, content, task_id, campaign_id, \
     context, requires_response, responded_at, created_at";

const TASK_COLUMNS: &str = "seq, id, title, agent_id, priority, status, tenant_id, input, source_event_id, \
     retry_of, retry_count, dispatch_attempts, dispatch_error, result, error, created_at, claimed_at, finished_at";

const EVENT_COLUMNS: &str = "id, event_type, subject_id, tenant_id, metadata, processed, processing_result, \
     attempts, last_error, created_at, processed_at";

// Shared by release_claim and release_stale_claims; $1 is the error text, $2 the attempt budget.
const RELEASE_SET: &str = "status = CASE WHEN dispatch_attempts >= $2 THEN 'failed' ELSE 'pending' END, \
     error = CASE WHEN dispatch_attempts >= $2 \
         THEN 'dispatch abandoned after ' || dispatch_attempts || ' attempts: ' || $1 ELSE error END, \
     finished_at = CASE WHEN dispatch_attempts >= $2 THEN NOW() ELSE finished_at END, \
     dispatch_error = $1, \
     claimed_at = NULL";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    from_agent: String,
    to_agent: String,
    message_type: String,
    content: String,
    task_id: Option<Uuid>,
    campaign_id: Option<Uuid>,
    context: Json<Metadata>,
    requires_response: bool,
    responded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let message_type = row
            .message_type
            .parse()
            .map_err(|t| StoreError::Corrupt(format!("message {} has type {t}", row.id)))?;
        Ok(Message {
            id: row.id,
            from_agent: row.from_agent,
            to_agent: row.to_agent,
            message_type,
            content: row.content,
            task_id: row.task_id,
            campaign_id: row.campaign_id,
            context: row.context.0,
            requires_response: row.requires_response,
            responded_at: row.responded_at,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct TaskRow {
    seq: i64,
    id: Uuid,
    title: String,
    agent_id: String,
    priority: i32,
    status: String,
    tenant_id: Option<String>,
    input: Json<Metadata>,
    source_event_id: Option<Uuid>,
    retry_of: Option<Uuid>,
    retry_count: i32,
    dispatch_attempts: i32,
    dispatch_error: Option<String>,
    result: Option<serde_json::Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = parse_status(&row.status)?;
        Ok(Task {
            id: row.id,
            title: row.title,
            agent_id: row.agent_id,
            priority: row.priority,
            status,
            tenant_id: row.tenant_id,
            input: row.input.0,
            source_event_id: row.source_event_id,
            retry_of: row.retry_of,
            retry_count: row.retry_count,
            dispatch_attempts: row.dispatch_attempts,
            dispatch_error: row.dispatch_error,
            result: row.result,
            error: row.error,
            created_at: row.created_at,
            claimed_at: row.claimed_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(FromRow)]
struct EventRow {
    id: Uuid,
    event_type: String,
    subject_id: Option<Uuid>,
    tenant_id: String,
    metadata: Json<Metadata>,
    processed: bool,
    processing_result: Option<Json<ProcessingResult>>,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            event_type: EventType::from(row.event_type),
            subject_id: row.subject_id,
            tenant_id: row.tenant_id,
            metadata: row.metadata.0,
            processed: row.processed,
            processing_result: row.processing_result.map(|r| r.0),
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            processed_at: row.processed_at,
        }
    }
}

fn parse_status(raw: &str) -> StoreResult<TaskStatus> {
    raw.parse()
        .map_err(|s| StoreError::Corrupt(format!("unknown task status {s}")))
}

// `on_conflict` is appended verbatim; returns rows inserted.
async fn insert_task_with<'e, E: PgExecutor<'e>>(executor: E, task: &Task, on_conflict: &str) -> StoreResult<u64> {
    let done = sqlx::query(&format!(
        "INSERT INTO agent_tasks
            (id, title, agent_id, priority, status, tenant_id, input, source_event_id, retry_of,
             retry_count, dispatch_attempts, dispatch_error, result, error, created_at, claimed_at, finished_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
         {on_conflict}"
    ))
    .bind(task.id)
    .bind(&task.title)
    .bind(&task.agent_id)
    .bind(task.priority)
    .bind(task.status.as_str())
    .bind(&task.tenant_id)
    .bind(Json(&task.input))
    .bind(task.source_event_id)
    .bind(task.retry_of)
    .bind(task.retry_count)
    .bind(task.dispatch_attempts)
    .bind(&task.dispatch_error)
    .bind(&task.result)
    .bind(&task.error)
    .bind(task.created_at)
    .bind(task.claimed_at)
    .bind(task.finished_at)
    .execute(executor)
    .await?;
    Ok(done.rows_affected())
}

#[async_trait]
impl MessageStore for PgStore {
    async fn append_message(&self, message: &Message) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO agent_messages
                (id, from_agent, to_agent, message_type, content, task_id, campaign_id, context,
                 requires_response, responded_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(message.id)
        .bind(&message.from_agent)
        .bind(&message.to_agent)
        .bind(message.message_type.as_str())
        .bind(&message.content)
        .bind(message.task_id)
        .bind(message.campaign_id)
        .bind(Json(&message.context))
        .bind(message.requires_response)
        .bind(message.responded_at)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM agent_messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Message::try_from).transpose()
    }

    async fn list_messages(&self, agent_id: &str, filter: &MessageFilter) -> StoreResult<Vec<Message>> {
        let direction = match filter.direction {
            Direction::Inbox => "inbox",
            Direction::Outbox => "outbox",
            Direction::Both => "both",
        };
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM agent_messages
             WHERE (($2 = 'inbox' AND to_agent = $1)
                 OR ($2 = 'outbox' AND from_agent = $1)
                 OR ($2 = 'both' AND (to_agent = $1 OR from_agent = $1)))
               AND ($3::text IS NULL OR message_type = $3)
               AND ($4::uuid IS NULL OR task_id = $4)
               AND ($5::uuid IS NULL OR campaign_id = $5)
               AND (NOT $6 OR (requires_response AND responded_at IS NULL))
             ORDER BY created_at ASC
             LIMIT $7"
        ))
        .bind(agent_id)
        .bind(direction)
        .bind(filter.message_type.map(|t| t.as_str()))
        .bind(filter.task_id)
        .bind(filter.campaign_id)
        .bind(filter.unresponded_only)
        .bind(filter.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Message::try_from).collect()
    }

    async fn mark_responded(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let done = sqlx::query(
            "UPDATE agent_messages SET responded_at = $2 WHERE id = $1 AND responded_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn insert_task(&self, task: &Task) -> StoreResult<()> {
        insert_task_with(&self.pool, task, "").await?;
        Ok(())
    }

    async fn insert_retry(&self, task: &Task) -> StoreResult<bool> {
        // Backed by agent_tasks_retry_of_idx; a second retry of the same task is a no-op.
        let inserted = insert_task_with(
            &self.pool,
            task,
            "ON CONFLICT (retry_of) WHERE retry_of IS NOT NULL DO NOTHING",
        )
        .await?;
        Ok(inserted == 1)
    }

    async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!("SELECT {TASK_COLUMNS} FROM agent_tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Task::try_from).transpose()
    }

    async fn list_tasks(&self, status: Option<TaskStatus>, limit: usize) -> StoreResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM agent_tasks
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at DESC
             LIMIT $2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn claim_pending(&self, limit: usize) -> StoreResult<Vec<Task>> {
        let mut rows = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE agent_tasks
             SET status = 'in_progress',
                 dispatch_attempts = dispatch_attempts + 1,
                 claimed_at = NOW()
             WHERE status = 'pending'
               AND id IN (
                 SELECT id FROM agent_tasks
                 WHERE status = 'pending'
                 ORDER BY priority DESC, created_at ASC, seq ASC
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
               )
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        // RETURNING order is unspecified.
        rows.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.seq.cmp(&b.seq))
        });
        debug!(claimed = rows.len(), "Claimed pending tasks");
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn release_claim(&self, id: Uuid, error: &str, max_attempts: i32) -> StoreResult<ReleaseOutcome> {
        let status: Option<String> = sqlx::query_scalar(&format!(
            "UPDATE agent_tasks SET {RELEASE_SET}
             WHERE id = $3 AND status = 'in_progress'
             RETURNING status"
        ))
        .bind(error)
        .bind(max_attempts)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match status.as_deref().map(parse_status).transpose()? {
            Some(TaskStatus::Failed) => ReleaseOutcome::DeadLettered,
            Some(_) => ReleaseOutcome::Requeued,
            None => ReleaseOutcome::NotClaimed,
        })
    }

    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        max_attempts: i32,
    ) -> StoreResult<(u64, u64)> {
        let statuses: Vec<String> = sqlx::query_scalar(&format!(
            "UPDATE agent_tasks SET {RELEASE_SET}
             WHERE status = 'in_progress' AND claimed_at < $3
             RETURNING status"
        ))
        .bind("claim lease expired")
        .bind(max_attempts)
        .bind(claimed_before)
        .fetch_all(&self.pool)
        .await?;

        let dead = statuses.iter().filter(|s| s.as_str() == "failed").count() as u64;
        Ok((statuses.len() as u64 - dead, dead))
    }

    async fn finish_task(&self, id: Uuid, outcome: &TaskOutcome) -> StoreResult<Option<Task>> {
        let (result, error) = match outcome {
            TaskOutcome::Completed { result } => (result.clone(), None),
            TaskOutcome::Failed { error } => (None, Some(error.as_str())),
        };
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE agent_tasks
             SET status = $2, result = $3, error = COALESCE($4, error), finished_at = NOW()
             WHERE id = $1 AND status = 'in_progress'
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(outcome.status().as_str())
        .bind(result)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Task::try_from).transpose()
    }

    async fn count_tasks(&self) -> StoreResult<TaskCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM agent_tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let mut counts = TaskCounts::default();
        for (status, n) in rows {
            counts.add(parse_status(&status)?, n as u64);
        }
        Ok(counts)
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO agent_events
                (id, event_type, subject_id, tenant_id, metadata, processed, processing_result,
                 attempts, last_error, created_at, processed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(event.id)
        .bind(event.event_type.as_str())
        .bind(event.subject_id)
        .bind(&event.tenant_id)
        .bind(Json(&event.metadata))
        .bind(event.processed)
        .bind(event.processing_result.as_ref().map(Json))
        .bind(event.attempts)
        .bind(&event.last_error)
        .bind(event.created_at)
        .bind(event.processed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(&format!("SELECT {EVENT_COLUMNS} FROM agent_events WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Event::from))
    }

    async fn unprocessed_events(&self, limit: usize) -> StoreResult<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM agent_events
             WHERE processed = FALSE
             ORDER BY created_at ASC
             LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Event::from).collect())
    }

    async fn commit_decision(&self, event_id: Uuid, tasks: &[Task], result: &ProcessingResult) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query(
            "UPDATE agent_events
             SET processed = TRUE, processing_result = $2, processed_at = NOW()
             WHERE id = $1 AND processed = FALSE",
        )
        .bind(event_id)
        .bind(Json(result))
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for task in tasks {
            insert_task_with(&mut *tx, task, "").await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn record_event_failure(&self, event_id: Uuid, error: &str) -> StoreResult<Option<i32>> {
        let attempts: Option<i32> = sqlx::query_scalar(
            "UPDATE agent_events SET attempts = attempts + 1, last_error = $2
             WHERE id = $1 AND processed = FALSE
             RETURNING attempts",
        )
        .bind(event_id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;
        Ok(attempts)
    }

    async fn count_events(&self) -> StoreResult<EventCounts> {
        let (unprocessed, processed): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*) FILTER (WHERE NOT processed), COUNT(*) FILTER (WHERE processed)
             FROM agent_events",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(EventCounts {
            unprocessed: unprocessed as u64,
            processed: processed as u64,
        })
    }
}
