// Event Processor: perception -> decision -> action sweep

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::decision::DecisionTable;
use super::perceiver::EventPerceiver;
use crate::agents::AgentRegistry;
use crate::error::{DecisionError, StoreError};
use crate::metrics::Metrics;
use crate::models::{Event, EventCounts, EventType, Metadata, ProcessingResult, Task, TaskSpec};
use crate::store::EventStore;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub interval: Duration,
    pub batch_size: usize,
    /// Failed decisions allowed before the event is dead-lettered.
    pub max_attempts: i32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            batch_size: 50,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    Processed { tasks_created: usize, task_ids: Vec<Uuid> },
    /// Another processor committed this event first.
    AlreadyProcessed,
    /// Left unprocessed for the next sweep.
    Failed { error: String, attempts: i32 },
    DeadLettered { error: String, attempts: i32 },
}

impl EventOutcome {
    fn label(&self) -> &'static str {
        match self {
            EventOutcome::Processed { .. } => "processed",
            EventOutcome::AlreadyProcessed => "already_processed",
            EventOutcome::Failed { .. } => "failed",
            EventOutcome::DeadLettered { .. } => "dead_lettered",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub event_id: Uuid,
    pub outcome: EventOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub records: Vec<EventRecord>,
    /// Events skipped this sweep because the store failed mid-way.
    pub store_errors: usize,
}

impl SweepReport {
    pub fn tasks_created(&self) -> usize {
        self.records
            .iter()
            .map(|r| match &r.outcome {
                EventOutcome::Processed { tasks_created, .. } => *tasks_created,
                _ => 0,
            })
            .sum()
    }
}

#[derive(Clone)]
pub struct EventProcessor {
    store: Arc<dyn EventStore>,
    rules: DecisionTable,
    registry: Arc<AgentRegistry>,
    config: ProcessorConfig,
    metrics: Option<Arc<Metrics>>,
}

impl EventProcessor {
    pub fn new(
        store: Arc<dyn EventStore>,
        rules: DecisionTable,
        registry: Arc<AgentRegistry>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            rules,
            registry,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Processes one batch of unprocessed events, oldest first. A failure on
    /// one event never stops the rest of the batch.
    #[instrument(skip(self), fields(batch_size = self.config.batch_size))]
    pub async fn run_sweep(&self) -> Result<SweepReport, StoreError> {
        let events = self.store.unprocessed_events(self.config.batch_size).await?;
        let mut report = SweepReport::default();
        if events.is_empty() {
            debug!("No unprocessed events");
            return Ok(report);
        }

        for event in &events {
            match self.process_event(event).await {
                Ok(outcome) => report.records.push(EventRecord {
                    event_id: event.id,
                    outcome,
                }),
                Err(e) => {
                    error!(event_id = %event.id, error = %e, "Store failed while processing event");
                    report.store_errors += 1;
                }
            }
        }

        info!(
            events = events.len(),
            tasks_created = report.tasks_created(),
            store_errors = report.store_errors,
            "Event sweep finished"
        );
        Ok(report)
    }

    /// Decides and commits a single event. Decision errors are recorded on the
    /// event and returned as an outcome; only store failures are `Err`.
    pub async fn process_event(&self, event: &Event) -> Result<EventOutcome, StoreError> {
        let outcome = match self.decide(event).await {
            Ok(specs) => self.commit(event, specs).await?,
            Err(e) => self.fail(event, e).await?,
        };

        if let Some(metrics) = &self.metrics {
            metrics.event_outcomes.with_label_values(&[outcome.label()]).inc();
            if let EventOutcome::Processed { tasks_created, .. } = &outcome {
                metrics.tasks_created.inc_by(*tasks_created as u64);
            }
        }
        Ok(outcome)
    }

    /// Records the event, then processes it right away instead of waiting for
    /// the next sweep. Returns the event as stored after processing.
    pub async fn record_and_process(
        &self,
        perceiver: &EventPerceiver,
        event_type: impl Into<EventType>,
        subject_id: Option<Uuid>,
        tenant_id: impl Into<String>,
        metadata: Metadata,
    ) -> Result<(Event, EventOutcome), StoreError> {
        let recorded = perceiver.record(event_type, subject_id, tenant_id, metadata).await?;
        let outcome = self.process_event(&recorded).await?;
        let current = self.store.get_event(recorded.id).await?.unwrap_or(recorded);
        Ok((current, outcome))
    }

    pub async fn counts(&self) -> Result<EventCounts, StoreError> {
        self.store.count_events().await
    }

    async fn decide(&self, event: &Event) -> Result<Vec<TaskSpec>, DecisionError> {
        let Some(rule) = self.rules.rule_for(&event.event_type) else {
            debug!(event_id = %event.id, event_type = %event.event_type, "No decision rule; nothing to do");
            return Ok(Vec::new());
        };

        let specs = rule.decide(event).await?;
        if let Some(spec) = specs.iter().find(|s| !self.registry.contains(&s.agent_id)) {
            return Err(DecisionError::UnknownAgent(spec.agent_id.clone()));
        }
        Ok(specs)
    }

    async fn commit(&self, event: &Event, specs: Vec<TaskSpec>) -> Result<EventOutcome, StoreError> {
        let tasks: Vec<Task> = specs
            .into_iter()
            .map(|spec| Task::pending(spec, Some(event.tenant_id.clone())).caused_by(event.id))
            .collect();
        let result = ProcessingResult {
            tasks_created: tasks.len(),
            task_ids: tasks.iter().map(|t| t.id).collect(),
            error: None,
        };

        if !self.store.commit_decision(event.id, &tasks, &result).await? {
            debug!(event_id = %event.id, "Event already processed elsewhere");
            return Ok(EventOutcome::AlreadyProcessed);
        }

        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            tasks_created = result.tasks_created,
            "Event processed"
        );
        Ok(EventOutcome::Processed {
            tasks_created: result.tasks_created,
            task_ids: result.task_ids,
        })
    }

    async fn fail(&self, event: &Event, e: DecisionError) -> Result<EventOutcome, StoreError> {
        let error = e.to_string();
        let Some(attempts) = self.store.record_event_failure(event.id, &error).await? else {
            debug!(event_id = %event.id, error = %error, "Decision failed on an event already processed elsewhere");
            return Ok(EventOutcome::AlreadyProcessed);
        };

        if attempts < self.config.max_attempts {
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                attempts,
                error = %error,
                "Decision failed; event left for next sweep"
            );
            return Ok(EventOutcome::Failed { error, attempts });
        }

        let result = ProcessingResult {
            tasks_created: 0,
            task_ids: Vec::new(),
            error: Some(error.clone()),
        };
        if !self.store.commit_decision(event.id, &[], &result).await? {
            return Ok(EventOutcome::AlreadyProcessed);
        }
        error!(
            event_id = %event.id,
            event_type = %event.event_type,
            attempts,
            error = %error,
            "Decision kept failing; event dead-lettered"
        );
        Ok(EventOutcome::DeadLettered { error, attempts })
    }

    /// Sweeps on the configured interval until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.config.interval, rules = self.rules.len(), "Event processor started");
        if self.rules.is_empty() {
            warn!("No decision rules registered; every event will be processed with no tasks");
        }
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_sweep().await {
                        error!(error = %e, "Event sweep failed; retrying next tick");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Event processor stopped");
    }
}
