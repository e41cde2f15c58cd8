// PgStore against a live database. Each test gets a fresh, migrated database
// from `#[sqlx::test]`; run with DATABASE_URL set and `--ignored`.

use std::sync::Arc;

use agent_orchestrator::models::{
    Event, MessageDraft, Metadata, ProcessingResult, ReleaseOutcome, Task, TaskSpec, TaskStatus,
};
use agent_orchestrator::store::{EventStore, PgStore, TaskStore};
use agent_orchestrator::{AgentRegistry, CommunicationValidator, MessageLog};
use sqlx::PgPool;
use uuid::Uuid;

async fn seed(store: &PgStore, priorities: &[i32]) -> Vec<Task> {
    let mut tasks = Vec::new();
    for (i, p) in priorities.iter().enumerate() {
        let task = Task::pending(TaskSpec::new(format!("t{}", i + 1), "data_analyst", *p), None);
        store.insert_task(&task).await.unwrap();
        tasks.push(task);
    }
    tasks
}

fn empty_result(task_ids: Vec<Uuid>) -> ProcessingResult {
    ProcessingResult {
        tasks_created: task_ids.len(),
        task_ids,
        error: None,
    }
}

// === Claiming ===

#[sqlx::test]
#[ignore = "Requires Postgres via DATABASE_URL"]
async fn test_claim_orders_by_priority_then_age(pool: PgPool) {
    let store = PgStore::new(pool);
    let tasks = seed(&store, &[5, 1, 5, 3]).await;

    let claimed = store.claim_pending(10).await.unwrap();
    let order: Vec<Uuid> = claimed.iter().map(|t| t.id).collect();
    assert_eq!(order, vec![tasks[0].id, tasks[2].id, tasks[3].id, tasks[1].id]);
    assert!(claimed
        .iter()
        .all(|t| t.status == TaskStatus::InProgress && t.dispatch_attempts == 1 && t.claimed_at.is_some()));
}

#[sqlx::test]
#[ignore = "Requires Postgres via DATABASE_URL"]
async fn test_concurrent_claims_are_disjoint(pool: PgPool) {
    let a = PgStore::new(pool.clone());
    let b = PgStore::new(pool);
    seed(&a, &[3; 12]).await;

    let (ra, rb) = tokio::join!(a.claim_pending(10), b.claim_pending(10));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert!(ra.len() <= 10 && rb.len() <= 10);

    let mut ids: Vec<Uuid> = ra.iter().chain(rb.iter()).map(|t| t.id).collect();
    let claimed = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), claimed);

    // Whatever neither caller took is still there for the next one.
    let rest = a.claim_pending(10).await.unwrap();
    assert_eq!(claimed + rest.len(), 12);
    assert_eq!(a.count_tasks().await.unwrap().in_progress, 12);
}

#[sqlx::test]
#[ignore = "Requires Postgres via DATABASE_URL"]
async fn test_release_requeues_then_dead_letters(pool: PgPool) {
    let store = PgStore::new(pool);
    let task = seed(&store, &[2]).await.remove(0);

    store.claim_pending(1).await.unwrap();
    assert_eq!(
        store.release_claim(task.id, "connection refused", 2).await.unwrap(),
        ReleaseOutcome::Requeued
    );
    let requeued = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(requeued.status, TaskStatus::Pending);
    assert!(requeued.claimed_at.is_none());
    assert_eq!(requeued.dispatch_error.as_deref(), Some("connection refused"));

    store.claim_pending(1).await.unwrap();
    assert_eq!(
        store.release_claim(task.id, "connection refused", 2).await.unwrap(),
        ReleaseOutcome::DeadLettered
    );
    let dead = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(dead.status, TaskStatus::Failed);
    assert_eq!(dead.dispatch_attempts, 2);
    assert!(dead.finished_at.is_some());
    assert!(dead.error.unwrap().contains("dispatch abandoned after 2 attempts"));

    assert_eq!(
        store.release_claim(task.id, "again", 2).await.unwrap(),
        ReleaseOutcome::NotClaimed
    );
}

#[sqlx::test]
#[ignore = "Requires Postgres via DATABASE_URL"]
async fn test_stale_claims_released(pool: PgPool) {
    let store = PgStore::new(pool);
    seed(&store, &[1, 1]).await;
    store.claim_pending(10).await.unwrap();

    let (requeued, dead) = store
        .release_stale_claims(chrono::Utc::now() + chrono::Duration::seconds(5), 1)
        .await
        .unwrap();
    assert_eq!((requeued, dead), (0, 2));
    assert_eq!(store.count_tasks().await.unwrap().failed, 2);
}

#[sqlx::test]
#[ignore = "Requires Postgres via DATABASE_URL"]
async fn test_failed_task_retried_once(pool: PgPool) {
    let store = PgStore::new(pool);
    let mut failed = Task::pending(TaskSpec::new("Scrape ads", "competitive_analyst", 4), None);
    failed.status = TaskStatus::Failed;
    store.insert_task(&failed).await.unwrap();

    assert!(store.insert_retry(&Task::retry_of(&failed)).await.unwrap());
    assert!(!store.insert_retry(&Task::retry_of(&failed)).await.unwrap());
    assert_eq!(store.count_tasks().await.unwrap().pending, 1);
}

// === Events ===

#[sqlx::test]
#[ignore = "Requires Postgres via DATABASE_URL"]
async fn test_commit_decision_only_once(pool: PgPool) {
    let a = PgStore::new(pool.clone());
    let b = PgStore::new(pool);
    let event = Event::new("daily_review".into(), None, "tenant-1", Metadata::new());
    a.insert_event(&event).await.unwrap();

    let first = vec![Task::pending(TaskSpec::new("Review", "data_analyst", 3), None).caused_by(event.id)];
    let second = vec![Task::pending(TaskSpec::new("Review", "data_analyst", 3), None).caused_by(event.id)];
    let first_result = empty_result(vec![first[0].id]);
    let second_result = empty_result(vec![second[0].id]);
    let (ra, rb) = tokio::join!(
        a.commit_decision(event.id, &first, &first_result),
        b.commit_decision(event.id, &second, &second_result),
    );
    assert!(ra.unwrap() ^ rb.unwrap());

    assert_eq!(a.count_tasks().await.unwrap().pending, 1);
    let stored = a.get_event(event.id).await.unwrap().unwrap();
    assert!(stored.processed);
    assert!(stored.processed_at.is_some());
    assert!(a.unprocessed_events(10).await.unwrap().is_empty());
}

#[sqlx::test]
#[ignore = "Requires Postgres via DATABASE_URL"]
async fn test_failure_only_recorded_while_unprocessed(pool: PgPool) {
    let store = PgStore::new(pool);
    let event = Event::new("metrics_alert".into(), None, "tenant-1", Metadata::new());
    store.insert_event(&event).await.unwrap();

    assert_eq!(store.record_event_failure(event.id, "timeout").await.unwrap(), Some(1));
    assert!(store.commit_decision(event.id, &[], &empty_result(vec![])).await.unwrap());
    assert_eq!(store.record_event_failure(event.id, "late").await.unwrap(), None);

    let stored = store.get_event(event.id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.last_error.as_deref(), Some("timeout"));
}

// === Message log ===

#[sqlx::test]
#[ignore = "Requires Postgres via DATABASE_URL"]
async fn test_messages_are_append_only(pool: PgPool) {
    let store = Arc::new(PgStore::new(pool.clone()));
    let log = MessageLog::new(
        CommunicationValidator::new(Arc::new(AgentRegistry::marketing_roster())),
        store,
    );
    let message = log
        .send(MessageDraft {
            from_agent: "content_writer".into(),
            to_agent: "marketing_strategist".into(),
            message_type: "question".into(),
            content: "Which persona leads the launch post?".into(),
            task_id: None,
            campaign_id: None,
            context: Metadata::new(),
        })
        .await
        .unwrap();

    let edit = sqlx::query("UPDATE agent_messages SET content = 'edited' WHERE id = $1")
        .bind(message.id)
        .execute(&pool)
        .await;
    assert!(edit.is_err());

    let delete = sqlx::query("DELETE FROM agent_messages WHERE id = $1")
        .bind(message.id)
        .execute(&pool)
        .await;
    assert!(delete.is_err());

    // The one permitted change: marking the response, once.
    let answered = log.mark_responded(message.id).await.unwrap();
    assert!(answered.responded_at.is_some());
    let again = sqlx::query("UPDATE agent_messages SET responded_at = NOW() WHERE id = $1")
        .bind(message.id)
        .execute(&pool)
        .await;
    assert!(again.is_err());
}
