// Task Dispatcher: periodic claim-and-handoff sweep

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::executor::{TaskExecutor, TaskHandoff};
use crate::error::{InvocationError, StoreError};
use crate::metrics::Metrics;
use crate::models::{ReleaseOutcome, Task};
use crate::store::TaskStore;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub interval: Duration,
    /// Ceiling on tasks claimed per cycle.
    pub batch_size: usize,
    pub handoff_timeout: Duration,
    /// Claims allowed per task before it is dead-lettered.
    pub max_attempts: i32,
    /// In-progress claims older than this are released. None disables recovery.
    pub lease_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 10,
            handoff_timeout: Duration::from_secs(10),
            max_attempts: 5,
            lease_timeout: Some(Duration::from_secs(15 * 60)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Accepted,
    InvocationFailed { error: String, release: ReleaseOutcome },
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    pub task_id: Uuid,
    pub outcome: DispatchOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub stale_requeued: u64,
    pub stale_dead_lettered: u64,
    /// In dispatch order.
    pub records: Vec<DispatchRecord>,
}

impl DispatchReport {
    pub fn accepted(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome == DispatchOutcome::Accepted)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.records.len() - self.accepted()
    }
}

pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn TaskExecutor>,
    config: DispatcherConfig,
    metrics: Option<Arc<Metrics>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn TaskStore>, executor: Arc<dyn TaskExecutor>, config: DispatcherConfig) -> Self {
        Self {
            store,
            executor,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// One dispatch cycle: recover stale claims, claim a batch, hand each task
    /// off concurrently. Handoffs are awaited (bounded by the timeout); the
    /// work itself is not.
    #[instrument(skip(self), fields(batch_size = self.config.batch_size))]
    pub async fn run_cycle(&self) -> Result<DispatchReport, StoreError> {
        let mut report = DispatchReport::default();

        if let Some(lease) = self.config.lease_timeout {
            let lease = chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(365));
            let cutoff = Utc::now() - lease;
            let (requeued, dead) = self
                .store
                .release_stale_claims(cutoff, self.config.max_attempts)
                .await?;
            if requeued + dead > 0 {
                warn!(requeued, dead_lettered = dead, "Released expired task claims");
            }
            report.stale_requeued = requeued;
            report.stale_dead_lettered = dead;
        }

        let claimed = self.store.claim_pending(self.config.batch_size).await?;
        if claimed.is_empty() {
            debug!("No pending tasks");
            return Ok(report);
        }
        info!(claimed = claimed.len(), "Dispatching tasks");

        report.records = join_all(claimed.iter().map(|task| self.dispatch_one(task))).await;

        info!(
            accepted = report.accepted(),
            failed = report.failed(),
            "Dispatch cycle finished"
        );
        Ok(report)
    }

    async fn dispatch_one(&self, task: &Task) -> DispatchRecord {
        let handoff = TaskHandoff::from(task);
        let submitted = match tokio::time::timeout(self.config.handoff_timeout, self.executor.submit(&handoff)).await {
            Ok(result) => result,
            Err(_) => Err(InvocationError::Timeout(self.config.handoff_timeout)),
        };

        let outcome = match submitted {
            Ok(()) => {
                debug!(task_id = %task.id, agent = %task.agent_id, "Task handed to executor");
                DispatchOutcome::Accepted
            }
            Err(e) => self.release(task, e).await,
        };

        if let Some(metrics) = &self.metrics {
            let label = match &outcome {
                DispatchOutcome::Accepted => "accepted",
                DispatchOutcome::InvocationFailed {
                    release: ReleaseOutcome::DeadLettered,
                    ..
                } => "dead_lettered",
                DispatchOutcome::InvocationFailed {
                    release: ReleaseOutcome::ReleaseFailed,
                    ..
                } => "release_failed",
                DispatchOutcome::InvocationFailed { .. } => "invocation_failed",
            };
            metrics.dispatch_outcomes.with_label_values(&[label]).inc();
        }

        DispatchRecord {
            task_id: task.id,
            outcome,
        }
    }

    async fn release(&self, task: &Task, e: InvocationError) -> DispatchOutcome {
        let error = e.to_string();
        let release = match self
            .store
            .release_claim(task.id, &error, self.config.max_attempts)
            .await
        {
            Ok(release) => release,
            Err(store_err) => {
                error!(
                    task_id = %task.id,
                    error = %error,
                    store_error = %store_err,
                    "Executor handoff failed and the claim could not be released; task stays in progress until its lease expires"
                );
                ReleaseOutcome::ReleaseFailed
            }
        };

        match release {
            ReleaseOutcome::DeadLettered => error!(
                task_id = %task.id,
                attempts = task.dispatch_attempts,
                error = %error,
                "Executor handoff failed; task dead-lettered"
            ),
            ReleaseOutcome::ReleaseFailed => {}
            ReleaseOutcome::NotClaimed => warn!(
                task_id = %task.id,
                error = %error,
                "Executor handoff failed; task was no longer claimed"
            ),
            ReleaseOutcome::Requeued => warn!(
                task_id = %task.id,
                attempt = task.dispatch_attempts,
                error = %error,
                "Executor handoff failed; task left pending"
            ),
        }

        DispatchOutcome::InvocationFailed { error, release }
    }

    /// Runs cycles on the configured interval until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.config.interval, "Task dispatcher started");
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Dispatch cycle failed; retrying next tick");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Task dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskCounts, TaskOutcome, TaskSpec, TaskStatus};
    use crate::store::{MemoryStore, StoreResult};
    use crate::tasks::executor::ChannelExecutor;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl TaskExecutor for Unreachable {
        async fn submit(&self, _handoff: &TaskHandoff) -> Result<(), InvocationError> {
            Err(InvocationError::Unavailable("connection refused".into()))
        }
    }

    struct Hangs;

    #[async_trait]
    impl TaskExecutor for Hangs {
        async fn submit(&self, _handoff: &TaskHandoff) -> Result<(), InvocationError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    /// Claims work normally but cannot give a claim back.
    struct StuckReleases(MemoryStore);

    #[async_trait]
    impl TaskStore for StuckReleases {
        async fn insert_task(&self, task: &Task) -> StoreResult<()> {
            self.0.insert_task(task).await
        }

        async fn insert_retry(&self, task: &Task) -> StoreResult<bool> {
            self.0.insert_retry(task).await
        }

        async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
            self.0.get_task(id).await
        }

        async fn list_tasks(&self, status: Option<TaskStatus>, limit: usize) -> StoreResult<Vec<Task>> {
            self.0.list_tasks(status, limit).await
        }

        async fn claim_pending(&self, limit: usize) -> StoreResult<Vec<Task>> {
            self.0.claim_pending(limit).await
        }

        async fn release_claim(&self, _id: Uuid, _error: &str, _max_attempts: i32) -> StoreResult<ReleaseOutcome> {
            Err(StoreError::Corrupt("connection reset".into()))
        }

        async fn release_stale_claims(
            &self,
            claimed_before: chrono::DateTime<chrono::Utc>,
            max_attempts: i32,
        ) -> StoreResult<(u64, u64)> {
            self.0.release_stale_claims(claimed_before, max_attempts).await
        }

        async fn finish_task(&self, id: Uuid, outcome: &TaskOutcome) -> StoreResult<Option<Task>> {
            self.0.finish_task(id, outcome).await
        }

        async fn count_tasks(&self) -> StoreResult<TaskCounts> {
            self.0.count_tasks().await
        }
    }

    fn config(batch_size: usize, max_attempts: i32) -> DispatcherConfig {
        DispatcherConfig {
            batch_size,
            max_attempts,
            handoff_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    async fn seed(store: &MemoryStore, priorities: &[i32]) -> Vec<Task> {
        let mut tasks = Vec::new();
        for (i, p) in priorities.iter().enumerate() {
            let task = Task::pending(TaskSpec::new(format!("t{}", i + 1), "data_analyst", *p), None);
            store.insert_task(&task).await.unwrap();
            tasks.push(task);
        }
        tasks
    }

    #[tokio::test]
    async fn test_cycle_dispatches_in_priority_then_age_order() {
        let store = Arc::new(MemoryStore::new());
        let tasks = seed(&store, &[5, 1, 5, 3]).await;
        let (executor, _rx) = ChannelExecutor::new(16);
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(executor), config(10, 3));

        let report = dispatcher.run_cycle().await.unwrap();
        let order: Vec<Uuid> = report.records.iter().map(|r| r.task_id).collect();
        assert_eq!(order, vec![tasks[0].id, tasks[2].id, tasks[3].id, tasks[1].id]);
        assert_eq!(report.accepted(), 4);
    }

    #[tokio::test]
    async fn test_batch_never_exceeds_ceiling() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, &[1; 25]).await;
        let (executor, _rx) = ChannelExecutor::new(64);
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(executor), config(10, 3));

        let report = dispatcher.run_cycle().await.unwrap();
        assert_eq!(report.records.len(), 10);

        let counts = store.count_tasks().await.unwrap();
        assert_eq!(counts.in_progress, 10);
        assert_eq!(counts.pending, 15);
    }

    #[tokio::test]
    async fn test_concurrent_cycles_claim_each_task_once() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, &[3; 12]).await;
        let (executor, mut rx) = ChannelExecutor::new(64);
        let executor = Arc::new(executor);
        let a = Dispatcher::new(store.clone(), executor.clone(), config(10, 3));
        let b = Dispatcher::new(store.clone(), executor, config(10, 3));

        let (ra, rb) = tokio::join!(a.run_cycle(), b.run_cycle());
        let mut dispatched: Vec<Uuid> = ra
            .unwrap()
            .records
            .into_iter()
            .chain(rb.unwrap().records)
            .map(|r| r.task_id)
            .collect();
        assert_eq!(dispatched.len(), 12);
        dispatched.sort();
        dispatched.dedup();
        assert_eq!(dispatched.len(), 12);

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 12);
    }

    #[tokio::test]
    async fn test_invocation_failure_leaves_task_pending() {
        let store = Arc::new(MemoryStore::new());
        let tasks = seed(&store, &[2]).await;
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(Unreachable), config(10, 3));

        let report = dispatcher.run_cycle().await.unwrap();
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            &report.records[0].outcome,
            DispatchOutcome::InvocationFailed { release: ReleaseOutcome::Requeued, error } if error.contains("connection refused")
        ));

        let stored = store.get_task(tasks[0].id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.dispatch_attempts, 1);
        assert!(stored.dispatch_error.is_some());
    }

    #[tokio::test]
    async fn test_repeated_invocation_failure_dead_letters() {
        let store = Arc::new(MemoryStore::new());
        let tasks = seed(&store, &[2]).await;
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(Unreachable), config(10, 2));

        dispatcher.run_cycle().await.unwrap();
        let report = dispatcher.run_cycle().await.unwrap();
        assert!(matches!(
            report.records[0].outcome,
            DispatchOutcome::InvocationFailed { release: ReleaseOutcome::DeadLettered, .. }
        ));

        // Nothing left to retry.
        assert!(dispatcher.run_cycle().await.unwrap().records.is_empty());
        let stored = store.get_task(tasks[0].id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_handoff_timeout_counts_as_invocation_failure() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, &[1]).await;
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(Hangs), config(10, 3));

        let report = dispatcher.run_cycle().await.unwrap();
        assert!(matches!(
            &report.records[0].outcome,
            DispatchOutcome::InvocationFailed { error, .. } if error.contains("timed out")
        ));
        assert_eq!(store.count_tasks().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_failed_release_is_reported_as_such() {
        let store = Arc::new(StuckReleases(MemoryStore::new()));
        seed(&store.0, &[4]).await;
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(Unreachable), config(10, 3));

        let report = dispatcher.run_cycle().await.unwrap();
        assert!(matches!(
            report.records[0].outcome,
            DispatchOutcome::InvocationFailed { release: ReleaseOutcome::ReleaseFailed, .. }
        ));
        assert_eq!(store.count_tasks().await.unwrap().in_progress, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let store = Arc::new(MemoryStore::new());
        let (executor, _rx) = ChannelExecutor::new(1);
        let dispatcher = Dispatcher::new(store, Arc::new(executor), config(10, 3));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(dispatcher.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
    }
}
