use crate::source::Publisher;
use async_trait::async_trait;
use bytes::Bytes;
use events::{DomainEvent, EventHandler};
use log::*;

/// Pushes board domain events to live clients.
///
/// The event's entity is serialized as-is and published on the event's topic.
/// Clients get the bare entity JSON with no envelope and tell event kinds
/// apart by shape.
pub struct LiveUpdateHandler {
    publisher: Publisher,
}

impl LiveUpdateHandler {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl EventHandler for LiveUpdateHandler {
    async fn handle(&self, event: &DomainEvent) {
        let payload = match serde_json::to_vec(event.entity()) {
            Ok(json) => Bytes::from(json),
            Err(e) => {
                error!("Failed to serialize {} live update: {e}", event.name());
                return;
            }
        };

        debug!(
            "Publishing {} live update on {} ({} bytes)",
            event.name(),
            event.topic(),
            payload.len()
        );
        self.publisher.publish(event.topic(), payload);
    }
}
