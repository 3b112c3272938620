//! Event system infrastructure for the board service.
//!
//! Write-path code (post and message handlers) emits a [`DomainEvent`] once a
//! write has been persisted. Handlers registered with the [`EventPublisher`]
//! turn those events into side effects; the live-update handler in the
//! `fanout` crate is the main consumer and pushes the serialized entity to
//! every connected client.
//!
//! # Architecture
//!
//! - **DomainEvent**: Enum representing every board change that is pushed live
//! - **EventHandler**: Trait for implementing event handlers
//! - **EventPublisher**: Publishes events to registered handlers
//!
//! This crate has no dependencies on internal crates. Entity data is carried as
//! serialized JSON values so that the persistence layer stays out of the picture.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// A type alias that represents any entity's id field data type.
pub type Id = Uuid;

/// Pub/sub topic carrying new and edited thread posts.
pub const POSTS_TOPIC: &str = "posts";

/// Pub/sub topic carrying new posts inside private message conversations.
pub const MESSAGE_POSTS_TOPIC: &str = "message_posts";

/// Board events that are emitted after a write completes successfully.
///
/// Entity data is carried as `serde_json::Value` and is forwarded to live
/// clients byte-for-byte, so the value must already be in its wire shape.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// A new post was added to a thread.
    PostCreated {
        /// Thread the post belongs to. Used for tracing only.
        thread_id: Id,
        /// Complete serialized post entity.
        post: Value,
    },
    /// The body of an existing post was edited.
    PostEdited {
        thread_id: Id,
        /// Complete serialized post entity with the new body.
        post: Value,
    },
    /// A new post was added to a private message conversation.
    MessagePostCreated {
        message_id: Id,
        message_post: Value,
    },
}

impl DomainEvent {
    /// The pub/sub topic this event is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEvent::PostCreated { .. } | DomainEvent::PostEdited { .. } => POSTS_TOPIC,
            DomainEvent::MessagePostCreated { .. } => MESSAGE_POSTS_TOPIC,
        }
    }

    /// The serialized entity carried by this event.
    pub fn entity(&self) -> &Value {
        match self {
            DomainEvent::PostCreated { post, .. } | DomainEvent::PostEdited { post, .. } => post,
            DomainEvent::MessagePostCreated { message_post, .. } => message_post,
        }
    }

    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::PostCreated { .. } => "post_created",
            DomainEvent::PostEdited { .. } => "post_edited",
            DomainEvent::MessagePostCreated { .. } => "message_post_created",
        }
    }
}

/// Trait for handling domain events.
/// Implementations perform side effects such as pushing live updates.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent);
}

/// Publishes domain events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Note: This creates a new publisher instance with the additional handler.
    /// Store the returned publisher in your application state.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    /// Publish an event to all registered handlers.
    /// Handlers never report failures back to the caller; the write that
    /// produced the event has already been committed.
    pub async fn publish(&self, event: DomainEvent) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &DomainEvent) {
            self.seen.lock().unwrap().push(event.name());
        }
    }

    #[test]
    fn post_events_use_posts_topic() {
        let created = DomainEvent::PostCreated {
            thread_id: Uuid::new_v4(),
            post: json!({"Body": "hi"}),
        };
        let edited = DomainEvent::PostEdited {
            thread_id: Uuid::new_v4(),
            post: json!({"Body": "edited"}),
        };
        assert_eq!(created.topic(), POSTS_TOPIC);
        assert_eq!(edited.topic(), POSTS_TOPIC);
        assert_eq!(edited.entity(), &json!({"Body": "edited"}));
    }

    #[test]
    fn message_post_event_uses_message_posts_topic() {
        let event = DomainEvent::MessagePostCreated {
            message_id: Uuid::new_v4(),
            message_post: json!({"Body": "psst"}),
        };
        assert_eq!(event.topic(), MESSAGE_POSTS_TOPIC);
        assert_eq!(event.name(), "message_post_created");
    }

    #[tokio::test]
    async fn publish_calls_handlers_in_registration_order() {
        let first = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let second = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let publisher = EventPublisher::new()
            .with_handler(first.clone())
            .with_handler(second.clone());
        assert_eq!(publisher.handler_count(), 2);

        publisher
            .publish(DomainEvent::PostCreated {
                thread_id: Uuid::new_v4(),
                post: json!({}),
            })
            .await;

        assert_eq!(*first.seen.lock().unwrap(), vec!["post_created"]);
        assert_eq!(*second.seen.lock().unwrap(), vec!["post_created"]);
    }
}
