// Message Log: validated, append-only agent-to-agent messages

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::CommunicationValidator;
use crate::error::{MessageError, StoreError};
use crate::metrics::Metrics;
use crate::models::{Message, MessageDraft, MessageFilter};
use crate::store::MessageStore;

#[derive(Clone)]
pub struct MessageLog {
    validator: CommunicationValidator,
    store: Arc<dyn MessageStore>,
    metrics: Option<Arc<Metrics>>,
}

impl MessageLog {
    pub fn new(validator: CommunicationValidator, store: Arc<dyn MessageStore>) -> Self {
        Self {
            validator,
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validates the draft against the hierarchy and, only if it passes,
    /// creates and stores the message.
    pub async fn send(&self, draft: MessageDraft) -> Result<Message, MessageError> {
        let kind = match self
            .validator
            .validate(&draft.from_agent, &draft.to_agent, &draft.message_type)
        {
            Ok(kind) => kind,
            Err(e) => {
                warn!(
                    from = %draft.from_agent,
                    to = %draft.to_agent,
                    message_type = %draft.message_type,
                    reason = %e,
                    "Message rejected"
                );
                return Err(e.into());
            }
        };

        let message = Message::from_draft(kind, draft);
        self.append(&message).await?;

        info!(
            message_id = %message.id,
            from = %message.from_agent,
            to = %message.to_agent,
            message_type = %message.message_type,
            "Message logged"
        );
        if let Some(metrics) = &self.metrics {
            metrics.messages_sent.with_label_values(&[message.message_type.as_str()]).inc();
        }
        Ok(message)
    }

    pub async fn append(&self, message: &Message) -> Result<Uuid, StoreError> {
        self.store.append_message(message).await?;
        Ok(message.id)
    }

    pub async fn list_for(&self, agent_id: &str, filter: &MessageFilter) -> Result<Vec<Message>, StoreError> {
        self.store.list_messages(agent_id, filter).await
    }

    pub async fn mark_responded(&self, id: Uuid) -> Result<Message, MessageError> {
        let message = self
            .store
            .get_message(id)
            .await?
            .ok_or(MessageError::NotFound(id))?;

        if !message.requires_response {
            return Err(MessageError::NoResponseExpected(id));
        }

        let now = Utc::now();
        if !self.store.mark_responded(id, now).await? {
            return Err(MessageError::AlreadyResponded(id));
        }

        info!(message_id = %id, "Message marked responded");
        Ok(Message {
            responded_at: Some(now),
            ..message
        })
    }
}
