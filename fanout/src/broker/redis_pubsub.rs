use super::{Broker, MessageStream};
use crate::error::{BrokerErrorKind, Error};
use crate::Payload;
use async_trait::async_trait;
use futures::StreamExt;
use log::*;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;

/// Redis PUBLISH/SUBSCRIBE backend.
///
/// Every subscription opens its own dedicated connection, as Redis requires.
/// Publishing shares one multiplexed connection that is re-established lazily
/// after a failure.
pub struct RedisBroker {
    client: redis::Client,
    publish_connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisBroker {
    /// Parses the URL; no connection is made until first use.
    pub fn new(redis_url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::broker(BrokerErrorKind::Connect, e))?;
        Ok(Self {
            client,
            publish_connection: Mutex::new(None),
        })
    }

    async fn publish_connection(&self) -> Result<MultiplexedConnection, Error> {
        // Clone out so the lock is never held across a network call
        let cached = self.publish_connection.lock().await.clone();
        if let Some(connection) = cached {
            return Ok(connection);
        }

        let connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::broker(BrokerErrorKind::Connect, e))?;
        debug!("Opened Redis publish connection");
        *self.publish_connection.lock().await = Some(connection.clone());
        Ok(connection)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn subscribe(&self, topics: &[String]) -> Result<MessageStream, Error> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| Error::broker(BrokerErrorKind::Connect, e))?;

        for topic in topics {
            pubsub
                .subscribe(topic.as_str())
                .await
                .map_err(|e| Error::broker(BrokerErrorKind::Subscribe, e))?;
            debug!("Redis subscription > topic:{topic}");
        }

        // The message stream ends once the underlying connection drops
        let messages = pubsub
            .into_on_message()
            .map(|message| Ok(Payload::copy_from_slice(message.get_payload_bytes())));
        Ok(messages.boxed())
    }

    async fn publish(&self, topic: &str, payload: Payload) -> Result<(), Error> {
        let mut connection = self.publish_connection().await?;

        let result: redis::RedisResult<i64> = connection.publish(topic, payload.to_vec()).await;
        match result {
            Ok(receivers) => {
                trace!("Published {} bytes on {topic} to {receivers} subscriber(s)", payload.len());
                Ok(())
            }
            Err(e) => {
                // Force a fresh connection on the next attempt
                *self.publish_connection.lock().await = None;
                Err(Error::broker(BrokerErrorKind::Publish, e))
            }
        }
    }
}
