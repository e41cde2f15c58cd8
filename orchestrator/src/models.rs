use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schema-less, key-ordered bag used for message context, event metadata and task input.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Delegation,
    Question,
    Result,
    Escalation,
    Update,
}

impl MessageType {
    pub const ALL: [MessageType; 5] = [
        MessageType::Delegation,
        MessageType::Question,
        MessageType::Result,
        MessageType::Escalation,
        MessageType::Update,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Delegation => "delegation",
            MessageType::Question => "question",
            MessageType::Result => "result",
            MessageType::Escalation => "escalation",
            MessageType::Update => "update",
        }
    }

    /// Questions and escalations expect a reply from the recipient.
    pub fn requires_response(self) -> bool {
        matches!(self, MessageType::Question | MessageType::Escalation)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// What a caller proposes to send. Becomes a [`Message`] only after validation.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDraft {
    pub from_agent: String,
    pub to_agent: String,
    pub message_type: String,
    pub content: String,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub campaign_id: Option<Uuid>,
    #[serde(default)]
    pub context: Metadata,
}

/// An entry in the append-only message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub from_agent: String,
    pub to_agent: String,
    pub message_type: MessageType,
    pub content: String,
    pub task_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub context: Metadata,
    pub requires_response: bool,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub(crate) fn from_draft(message_type: MessageType, draft: MessageDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_agent: draft.from_agent,
            to_agent: draft.to_agent,
            message_type,
            content: draft.content,
            task_id: draft.task_id,
            campaign_id: draft.campaign_id,
            context: draft.context,
            requires_response: message_type.requires_response(),
            responded_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn awaiting_response(&self) -> bool {
        self.requires_response && self.responded_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbox,
    Outbox,
    #[default]
    Both,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageFilter {
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, rename = "type")]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub campaign_id: Option<Uuid>,
    #[serde(default)]
    pub unresponded_only: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl MessageFilter {
    pub fn matches(&self, agent_id: &str, message: &Message) -> bool {
        let direction_ok = match self.direction {
            Direction::Inbox => message.to_agent == agent_id,
            Direction::Outbox => message.from_agent == agent_id,
            Direction::Both => message.to_agent == agent_id || message.from_agent == agent_id,
        };
        direction_ok
            && self.message_type.map_or(true, |t| t == message.message_type)
            && self.task_id.map_or(true, |id| message.task_id == Some(id))
            && self.campaign_id.map_or(true, |id| message.campaign_id == Some(id))
            && (!self.unresponded_only || message.awaiting_response())
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(other.to_string()),
        }
    }
}

/// A unit of work requested for an agent, as produced by a decision rule or a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub title: String,
    pub agent_id: String,
    pub priority: i32,
    #[serde(default)]
    pub input: Metadata,
}

impl TaskSpec {
    pub fn new(title: impl Into<String>, agent_id: impl Into<String>, priority: i32) -> Self {
        Self {
            title: title.into(),
            agent_id: agent_id.into(),
            priority,
            input: Metadata::new(),
        }
    }

    pub fn with_input(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.input.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub agent_id: String,
    pub priority: i32,
    pub status: TaskStatus,
    pub tenant_id: Option<String>,
    pub input: Metadata,
    pub source_event_id: Option<Uuid>,
    pub retry_of: Option<Uuid>,
    pub retry_count: i32,
    pub dispatch_attempts: i32,
    pub dispatch_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn pending(spec: TaskSpec, tenant_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: spec.title,
            agent_id: spec.agent_id,
            priority: spec.priority,
            status: TaskStatus::Pending,
            tenant_id,
            input: spec.input,
            source_event_id: None,
            retry_of: None,
            retry_count: 0,
            dispatch_attempts: 0,
            dispatch_error: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            claimed_at: None,
            finished_at: None,
        }
    }

    pub fn caused_by(mut self, event_id: Uuid) -> Self {
        self.source_event_id = Some(event_id);
        self
    }

    /// Dispatch order: priority descending, then oldest first.
    pub fn dispatch_cmp(&self, other: &Task) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
    }

    /// A fresh pending task that re-runs a failed one; the failed record stays as it is.
    pub fn retry_of(failed: &Task) -> Self {
        let spec = TaskSpec {
            title: failed.title.clone(),
            agent_id: failed.agent_id.clone(),
            priority: failed.priority,
            input: failed.input.clone(),
        };
        let mut task = Task::pending(spec, failed.tenant_id.clone());
        task.source_event_id = failed.source_event_id;
        task.retry_of = Some(failed.id);
        task.retry_count = failed.retry_count + 1;
        task
    }
}

/// Terminal report from the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed {
        #[serde(default)]
        result: Option<serde_json::Value>,
    },
    Failed {
        error: String,
    },
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed { .. } => TaskStatus::Completed,
            TaskOutcome::Failed { .. } => TaskStatus::Failed,
        }
    }
}

/// What happened to a claim that could not be handed off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    /// Back to pending for the next cycle.
    Requeued,
    /// Attempt budget exhausted; the task is now failed.
    DeadLettered,
    /// The task was no longer in progress.
    NotClaimed,
    /// The store rejected the release; the claim stands until the lease expires.
    ReleaseFailed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
}

impl TaskCounts {
    pub fn add(&mut self, status: TaskStatus, n: u64) {
        match status {
            TaskStatus::Pending => self.pending += n,
            TaskStatus::InProgress => self.in_progress += n,
            TaskStatus::Completed => self.completed += n,
            TaskStatus::Failed => self.failed += n,
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    NewCompetitorData,
    CampaignCreated,
    DailyReview,
    PerformanceDegradation,
    MetricsAlert,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::NewCompetitorData => "new_competitor_data",
            EventType::CampaignCreated => "campaign_created",
            EventType::DailyReview => "daily_review",
            EventType::PerformanceDegradation => "performance_degradation",
            EventType::MetricsAlert => "metrics_alert",
            EventType::Custom(name) => name,
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "new_competitor_data" => EventType::NewCompetitorData,
            "campaign_created" => EventType::CampaignCreated,
            "daily_review" => EventType::DailyReview,
            "performance_degradation" => EventType::PerformanceDegradation,
            "metrics_alert" => EventType::MetricsAlert,
            _ => EventType::Custom(s),
        }
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        EventType::from(s.to_string())
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        match t {
            EventType::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub tasks_created: usize,
    #[serde(default)]
    pub task_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub subject_id: Option<Uuid>,
    pub tenant_id: String,
    pub metadata: Metadata,
    pub processed: bool,
    pub processing_result: Option<ProcessingResult>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new(
        event_type: EventType,
        subject_id: Option<Uuid>,
        tenant_id: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            subject_id,
            tenant_id: tenant_id.into(),
            metadata,
            processed: false,
            processing_result: None,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub unprocessed: u64,
    pub processed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_response_only_for_questions_and_escalations() {
        let expecting: Vec<_> = MessageType::ALL
            .into_iter()
            .filter(|t| t.requires_response())
            .collect();
        assert_eq!(expecting, vec![MessageType::Question, MessageType::Escalation]);
    }

    #[test]
    fn test_message_type_parse() {
        assert_eq!("escalation".parse::<MessageType>(), Ok(MessageType::Escalation));
        assert!("Delegation".parse::<MessageType>().is_err());
        assert!("broadcast".parse::<MessageType>().is_err());
    }

    #[test]
    fn test_event_type_known_and_custom_serde() {
        let known: EventType = serde_json::from_str("\"daily_review\"").unwrap();
        assert_eq!(known, EventType::DailyReview);

        let custom: EventType = serde_json::from_str("\"budget_exhausted\"").unwrap();
        assert_eq!(custom, EventType::Custom("budget_exhausted".into()));
        assert_eq!(serde_json::to_string(&custom).unwrap(), "\"budget_exhausted\"");
    }

    #[test]
    fn test_task_outcome_tagged_by_status() {
        let outcome: TaskOutcome =
            serde_json::from_str(r#"{"status":"failed","error":"scrape blocked"}"#).unwrap();
        assert_eq!(outcome.status(), TaskStatus::Failed);

        let outcome: TaskOutcome = serde_json::from_str(r#"{"status":"completed"}"#).unwrap();
        assert_eq!(outcome, TaskOutcome::Completed { result: None });
    }

    #[test]
    fn test_retry_links_to_failed_task() {
        let mut failed = Task::pending(TaskSpec::new("Scrape pricing page", "competitive_analyst", 4), None);
        failed.status = TaskStatus::Failed;
        failed.retry_count = 1;

        let retry = Task::retry_of(&failed);
        assert_ne!(retry.id, failed.id);
        assert_eq!(retry.retry_of, Some(failed.id));
        assert_eq!(retry.retry_count, 2);
        assert_eq!(retry.status, TaskStatus::Pending);
        assert_eq!(retry.dispatch_attempts, 0);
    }

    #[test]
    fn test_filter_direction_and_unresponded() {
        let draft = MessageDraft {
            from_agent: "data_analyst".into(),
            to_agent: "cmo".into(),
            message_type: "question".into(),
            content: "Budget for Q3?".into(),
            task_id: None,
            campaign_id: None,
            context: Metadata::new(),
        };
        let mut msg = Message::from_draft(MessageType::Question, draft);

        let inbox = MessageFilter { direction: Direction::Inbox, ..Default::default() };
        assert!(inbox.matches("cmo", &msg));
        assert!(!inbox.matches("data_analyst", &msg));

        let open = MessageFilter { unresponded_only: true, ..Default::default() };
        assert!(open.matches("cmo", &msg));
        msg.responded_at = Some(Utc::now());
        assert!(!open.matches("cmo", &msg));
    }
}
