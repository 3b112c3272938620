//! Topic-based pub/sub backends that carry payloads between service instances.
//!
//! A [`Broker`] only moves opaque bytes. It has no retry policy of its own;
//! reconnecting after a failure is the job of [`crate::source`].

use crate::error::Error;
use crate::Payload;
use async_trait::async_trait;
use futures::stream::BoxStream;

mod memory;
mod redis_pubsub;

pub use memory::MemoryBroker;
pub use redis_pubsub::RedisBroker;

/// Messages delivered by one upstream subscription, in arrival order.
///
/// The stream ends when the subscription is lost. An `Err` item marks a message
/// or control frame the broker could not make sense of; the subscriber treats it
/// as a failed subscription.
pub type MessageStream = BoxStream<'static, Result<Payload, Error>>;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Open one subscription covering every topic in `topics`.
    async fn subscribe(&self, topics: &[String]) -> Result<MessageStream, Error>;

    /// Publish `payload` on `topic`. Having no subscribers is not an error.
    async fn publish(&self, topic: &str, payload: Payload) -> Result<(), Error>;
}
