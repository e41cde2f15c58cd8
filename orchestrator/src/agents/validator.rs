// Communication Validator: hierarchy-direction rules for agent messages

use std::sync::Arc;

use super::AgentRegistry;
use crate::error::ValidationError;
use crate::models::MessageType;

/// Holds nothing but a shared, immutable registry, so it can be cloned into any
/// number of handlers and called concurrently.
#[derive(Debug, Clone)]
pub struct CommunicationValidator {
    registry: Arc<AgentRegistry>,
}

impl CommunicationValidator {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    /// Rules apply in order: both agents known, type known, then direction.
    pub fn validate(&self, from: &str, to: &str, message_type: &str) -> Result<MessageType, ValidationError> {
        let from_level = self
            .registry
            .level(from)
            .ok_or_else(|| ValidationError::UnknownAgent(from.to_string()))?;
        let to_level = self
            .registry
            .level(to)
            .ok_or_else(|| ValidationError::UnknownAgent(to.to_string()))?;

        let kind: MessageType = message_type
            .parse()
            .map_err(ValidationError::UnknownType)?;

        match kind {
            MessageType::Delegation if from_level >= to_level => {
                Err(ValidationError::DelegationMustFlowDownward {
                    from: from.to_string(),
                    to: to.to_string(),
                })
            }
            MessageType::Question | MessageType::Escalation if from_level <= to_level => {
                Err(ValidationError::MustFlowUpward {
                    message_type: kind.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                })
            }
            _ => Ok(kind),
        }
    }
}
