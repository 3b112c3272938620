use super::{Broker, MessageStream};
use crate::error::Error;
use crate::Payload;
use async_stream::stream;
use async_trait::async_trait;
use log::*;
use std::collections::HashSet;
use tokio::sync::broadcast::{self, error::RecvError};

/// Default number of in-flight messages before slow subscriptions start lagging.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process broker for single-instance deployments and tests.
///
/// Publishing hands the payload straight to local subscriptions, so live
/// updates never reach other service instances.
pub struct MemoryBroker {
    sender: broadcast::Sender<(String, Payload)>,
}

impl MemoryBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscription_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn subscribe(&self, topics: &[String]) -> Result<MessageStream, Error> {
        let topics: HashSet<String> = topics.iter().cloned().collect();
        let mut receiver = self.sender.subscribe();

        let messages = stream! {
            loop {
                match receiver.recv().await {
                    Ok((topic, payload)) => {
                        if topics.contains(&topic) {
                            yield Ok::<Payload, Error>(payload);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("In-memory subscription lagged, {skipped} message(s) skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(messages))
    }

    async fn publish(&self, topic: &str, payload: Payload) -> Result<(), Error> {
        // Err only means nobody is subscribed right now
        if self.sender.send((topic.to_string(), payload)).is_err() {
            trace!("No in-memory subscribers for {topic}");
        }
        Ok(())
    }
}
