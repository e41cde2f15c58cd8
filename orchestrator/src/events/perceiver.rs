// Event Perceiver: records domain signals for the processor to pick up

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Event, EventType, Metadata};
use crate::store::EventStore;

#[derive(Clone)]
pub struct EventPerceiver {
    store: Arc<dyn EventStore>,
}

impl EventPerceiver {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Plain insert; fails only when the store does.
    pub async fn record(
        &self,
        event_type: impl Into<EventType>,
        subject_id: Option<Uuid>,
        tenant_id: impl Into<String>,
        metadata: Metadata,
    ) -> Result<Event, StoreError> {
        let event = Event::new(event_type.into(), subject_id, tenant_id, metadata);
        self.store.insert_event(&event).await?;
        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            tenant_id = %event.tenant_id,
            "Event recorded"
        );
        Ok(event)
    }
}
