// Decision rules: event type -> task specifications

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::{
    CAMPAIGN_MANAGER, COMPETITIVE_ANALYST, CONTENT_WRITER, DATA_ANALYST, MARKETING_STRATEGIST,
    SOCIAL_MEDIA_MANAGER,
};
use crate::error::DecisionError;
use crate::models::{Event, EventType, Metadata, TaskSpec};

#[async_trait]
pub trait DecisionRule: Send + Sync {
    /// Yields the tasks an event calls for, in creation order. May be empty.
    async fn decide(&self, event: &Event) -> Result<Vec<TaskSpec>, DecisionError>;
}

pub type BoxedDecision = Pin<Box<dyn Future<Output = Result<Vec<TaskSpec>, DecisionError>> + Send>>;

/// Adapts a closure into a rule. The closure gets an owned copy of the event
/// so it can move it into the returned future.
pub struct FnRule<F>(F);

impl<F> FnRule<F>
where
    F: Fn(Event) -> BoxedDecision + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> DecisionRule for FnRule<F>
where
    F: Fn(Event) -> BoxedDecision + Send + Sync,
{
    async fn decide(&self, event: &Event) -> Result<Vec<TaskSpec>, DecisionError> {
        (self.0)(event.clone()).await
    }
}

/// Synchronous rule over metadata only; the common case.
struct SyncRule(fn(&Event) -> Result<Vec<TaskSpec>, DecisionError>);

#[async_trait]
impl DecisionRule for SyncRule {
    async fn decide(&self, event: &Event) -> Result<Vec<TaskSpec>, DecisionError> {
        (self.0)(event)
    }
}

#[derive(Clone, Default)]
pub struct DecisionTable {
    rules: HashMap<EventType, Arc<dyn DecisionRule>>,
}

impl DecisionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the rule for `event_type`.
    pub fn with_rule(mut self, event_type: impl Into<EventType>, rule: impl DecisionRule + 'static) -> Self {
        self.rules.insert(event_type.into(), Arc::new(rule));
        self
    }

    pub fn rule_for(&self, event_type: &EventType) -> Option<&Arc<dyn DecisionRule>> {
        self.rules.get(event_type)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Built-in rules for the five recognized marketing signals.
    pub fn marketing_defaults() -> Self {
        Self::new()
            .with_rule(EventType::NewCompetitorData, SyncRule(new_competitor_data))
            .with_rule(EventType::CampaignCreated, SyncRule(campaign_created))
            .with_rule(EventType::DailyReview, SyncRule(daily_review))
            .with_rule(EventType::PerformanceDegradation, SyncRule(performance_degradation))
            .with_rule(EventType::MetricsAlert, SyncRule(metrics_alert))
    }
}

// Metadata narrowing. Rules only trust the fields they pull through these.

fn required_str<'a>(metadata: &'a Metadata, field: &str) -> Result<&'a str, DecisionError> {
    match metadata.get(field) {
        None | Some(Value::Null) => Err(DecisionError::missing(field)),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) => Err(DecisionError::invalid(field, "must not be blank")),
        Some(_) => Err(DecisionError::invalid(field, "must be a string")),
    }
}

fn optional_str<'a>(metadata: &'a Metadata, field: &str) -> Result<Option<&'a str>, DecisionError> {
    match metadata.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => required_str(metadata, field).map(Some),
    }
}

fn required_f64(metadata: &Metadata, field: &str) -> Result<f64, DecisionError> {
    match metadata.get(field) {
        None | Some(Value::Null) => Err(DecisionError::missing(field)),
        Some(v) => v
            .as_f64()
            .filter(|n| n.is_finite())
            .ok_or_else(|| DecisionError::invalid(field, "must be a number")),
    }
}

fn subject(event: &Event) -> Value {
    event.subject_id.map_or(Value::Null, |id| Value::String(id.to_string()))
}

fn new_competitor_data(event: &Event) -> Result<Vec<TaskSpec>, DecisionError> {
    let competitor = required_str(&event.metadata, "competitor")?;
    let source = optional_str(&event.metadata, "source")?.unwrap_or("unspecified");

    Ok(vec![
        TaskSpec::new(format!("Analyze new data on {competitor}"), COMPETITIVE_ANALYST, 7)
            .with_input("competitor", competitor)
            .with_input("source", source)
            .with_input("subject_id", subject(event)),
        TaskSpec::new(format!("Review positioning against {competitor}"), MARKETING_STRATEGIST, 5)
            .with_input("competitor", competitor),
    ])
}

fn campaign_created(event: &Event) -> Result<Vec<TaskSpec>, DecisionError> {
    let name = optional_str(&event.metadata, "campaign_name")?.unwrap_or("new campaign");
    let campaign = subject(event);

    Ok(vec![
        TaskSpec::new(format!("Draft launch content for {name}"), CONTENT_WRITER, 6)
            .with_input("campaign_id", campaign.clone()),
        TaskSpec::new(format!("Set up tracking for {name}"), DATA_ANALYST, 5)
            .with_input("campaign_id", campaign.clone()),
        TaskSpec::new(format!("Schedule social posts for {name}"), SOCIAL_MEDIA_MANAGER, 4)
            .with_input("campaign_id", campaign),
    ])
}

fn daily_review(event: &Event) -> Result<Vec<TaskSpec>, DecisionError> {
    let date = optional_str(&event.metadata, "date")?
        .map(str::to_string)
        .unwrap_or_else(|| event.created_at.format("%Y-%m-%d").to_string());

    Ok(vec![
        TaskSpec::new(format!("Compile daily performance report ({date})"), DATA_ANALYST, 3)
            .with_input("date", date.as_str()),
        TaskSpec::new(format!("Review daily priorities ({date})"), MARKETING_STRATEGIST, 2)
            .with_input("date", date.as_str()),
    ])
}

fn performance_degradation(event: &Event) -> Result<Vec<TaskSpec>, DecisionError> {
    let metric = required_str(&event.metadata, "metric")?;
    let drop = required_f64(&event.metadata, "drop_percent")?;
    if drop < 0.0 {
        return Err(DecisionError::invalid("drop_percent", "must not be negative"));
    }

    let priority = if drop >= 50.0 {
        9
    } else if drop >= 25.0 {
        8
    } else {
        6
    };

    let mut specs = vec![TaskSpec::new(
        format!("Diagnose {metric} drop of {drop}%"),
        DATA_ANALYST,
        priority,
    )
    .with_input("metric", metric)
    .with_input("drop_percent", drop)
    .with_input("subject_id", subject(event))];

    if drop >= 25.0 {
        specs.push(
            TaskSpec::new(format!("Adjust campaign plan after {metric} drop"), CAMPAIGN_MANAGER, priority - 1)
                .with_input("metric", metric),
        );
    }
    Ok(specs)
}

fn metrics_alert(event: &Event) -> Result<Vec<TaskSpec>, DecisionError> {
    let metric = required_str(&event.metadata, "metric")?;
    let severity = optional_str(&event.metadata, "severity")?.unwrap_or("medium");
    let priority = match severity {
        "low" => 2,
        "medium" => 4,
        "high" => 7,
        "critical" => 9,
        other => {
            return Err(DecisionError::invalid(
                "severity",
                format!("must be one of low, medium, high, critical (got {other})"),
            ))
        }
    };

    Ok(vec![TaskSpec::new(format!("Investigate {severity} alert on {metric}"), DATA_ANALYST, priority)
        .with_input("metric", metric)
        .with_input("severity", severity)])
}
