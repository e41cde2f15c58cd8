use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Crate-owned Prometheus registry, served on `/metrics`.
pub struct Metrics {
    registry: Registry,
    pub dispatch_outcomes: IntCounterVec,
    pub event_outcomes: IntCounterVec,
    pub tasks_created: IntCounter,
    pub messages_sent: IntCounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("orchestrator".to_string()), None)?;

        let dispatch_outcomes = IntCounterVec::new(
            Opts::new("dispatch_outcomes_total", "Per-task dispatch results"),
            &["outcome"],
        )?;
        let event_outcomes = IntCounterVec::new(
            Opts::new("event_outcomes_total", "Per-event processing results"),
            &["outcome"],
        )?;
        let tasks_created = IntCounter::new("tasks_created_total", "Tasks created from events")?;
        let messages_sent = IntCounterVec::new(
            Opts::new("messages_sent_total", "Validated agent messages"),
            &["type"],
        )?;

        registry.register(Box::new(dispatch_outcomes.clone()))?;
        registry.register(Box::new(event_outcomes.clone()))?;
        registry.register(Box::new(tasks_created.clone()))?;
        registry.register(Box::new(messages_sent.clone()))?;

        Ok(Self {
            registry,
            dispatch_outcomes,
            event_outcomes,
            tasks_created,
            messages_sent,
        })
    }

    /// Text exposition format plus its content type.
    pub fn encode(&self) -> prometheus::Result<(Vec<u8>, String)> {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((buffer, encoder.format_type().to_string()))
    }
}
