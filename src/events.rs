//! Event publishing over NATS.
//!
//! Publishing is best-effort: a missing connection or a failed publish is
//! logged and never fails the operation that produced the event.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::events::DomainEvent;

#[derive(Clone, Default)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
    recorded: Option<Arc<Mutex<Vec<DomainEvent>>>>,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats, recorded: None } }

    /// Keeps every event in memory instead of sending it.
    pub fn recording() -> Self { Self { nats: None, recorded: Some(Arc::default()) } }

    pub async fn recorded(&self) -> Vec<DomainEvent> {
        match &self.recorded {
            Some(log) => log.lock().await.clone(),
            None => Vec::new(),
        }
    }

    pub async fn publish(&self, event: impl Into<DomainEvent>) {
        let event = event.into();
        if let Some(log) = &self.recorded {
            log.lock().await.push(event.clone());
        }
        let Some(client) = &self.nats else { return };
        let subject = event.subject();
        let payload = match serde_json::to_vec(&event) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(%subject, error = %e, "event serialization failed");
                return;
            }
        };
        if let Err(e) = client.publish(subject.clone(), payload.into()).await {
            tracing::warn!(%subject, error = %e, "event publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::SlipEvent;
    use crate::domain::value_objects::SlipId;

    #[tokio::test]
    async fn test_recording_publisher_keeps_events() {
        let events = EventPublisher::recording();
        events.publish(SlipEvent::DeductionUnresolved { slip_id: SlipId(3) }).await;
        assert_eq!(events.recorded().await.len(), 1);
        assert!(EventPublisher::new(None).recorded().await.is_empty());
    }
}
