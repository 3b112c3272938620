//! Bridges the upstream broker and the in-process [`Manager`].
//!
//! Two long-running loops live here:
//!
//! - the subscribe loop ([`EventSource`]) holds exactly one upstream
//!   subscription and forwards every message to [`Manager::broadcast`],
//!   reconnecting forever after failures;
//! - the publish loop (behind [`Publisher`]) drains an internal queue of
//!   outbound payloads and publishes them, retrying failed items in order.
//!
//! Both stop when the shutdown signal flips to `true`.

use crate::broker::{Broker, MessageStream};
use crate::error::Error;
use crate::manager::Manager;
use crate::Payload;
use futures::StreamExt;
use log::*;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Receiving side of the process-wide shutdown flag.
pub type Shutdown = watch::Receiver<bool>;

/// Resolves once shutdown has been requested or the flag's sender is gone.
async fn shutdown_requested(shutdown: &mut Shutdown) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Where the subscribe loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeState {
    Connecting,
    Subscribed,
    Receiving,
    Failed,
    Stopped,
}

impl fmt::Display for SubscribeState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SubscribeState::Connecting => write!(f, "connecting"),
            SubscribeState::Subscribed => write!(f, "subscribed"),
            SubscribeState::Receiving => write!(f, "receiving"),
            SubscribeState::Failed => write!(f, "failed"),
            SubscribeState::Stopped => write!(f, "stopped"),
        }
    }
}

enum Interrupted {
    Shutdown,
    Failed(String),
}

/// The subscribe side of the event source adapter.
pub struct EventSource {
    broker: Arc<dyn Broker>,
    manager: Arc<Manager>,
    topics: Vec<String>,
    reconnect_delay: Duration,
    state: watch::Sender<SubscribeState>,
}

impl EventSource {
    pub fn new(
        broker: Arc<dyn Broker>,
        manager: Arc<Manager>,
        topics: Vec<String>,
        reconnect_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SubscribeState::Connecting);
        Self {
            broker,
            manager,
            topics,
            reconnect_delay,
            state,
        }
    }

    /// Observe subscribe loop state changes.
    pub fn state(&self) -> watch::Receiver<SubscribeState> {
        self.state.subscribe()
    }

    /// Establish the first upstream subscription, then hand it to the subscribe
    /// loop running on its own task.
    ///
    /// Failing to subscribe here is returned to the caller: the service cannot
    /// start without its broker. Failures after this point are retried forever.
    pub async fn start(self, shutdown: Shutdown) -> Result<JoinHandle<()>, Error> {
        let messages = self.broker.subscribe(&self.topics).await?;
        info!("Subscribed to live update topics {:?}", self.topics);
        self.transition(SubscribeState::Subscribed);

        Ok(tokio::spawn(self.run(messages, shutdown)))
    }

    async fn run(self, first: MessageStream, mut shutdown: Shutdown) {
        let mut upstream = Some(first);

        loop {
            let mut messages = match upstream.take() {
                Some(messages) => messages,
                None => match self.connect(&mut shutdown).await {
                    Some(messages) => messages,
                    None => break,
                },
            };

            match self.forward(&mut messages, &mut shutdown).await {
                Interrupted::Shutdown => break,
                Interrupted::Failed(reason) => {
                    self.transition(SubscribeState::Failed);
                    warn!("Live update subscription failed: {reason}");
                }
            }

            drop(messages);
            if self.pause(&mut shutdown).await {
                break;
            }
        }

        self.transition(SubscribeState::Stopped);
        info!("Live update subscription stopped");
    }

    /// Keep trying to subscribe until it works or shutdown is requested.
    async fn connect(&self, shutdown: &mut Shutdown) -> Option<MessageStream> {
        loop {
            self.transition(SubscribeState::Connecting);

            let attempt = tokio::select! {
                _ = shutdown_requested(shutdown) => return None,
                attempt = self.broker.subscribe(&self.topics) => attempt,
            };

            match attempt {
                Ok(messages) => {
                    info!("Re-subscribed to live update topics {:?}", self.topics);
                    self.transition(SubscribeState::Subscribed);
                    return Some(messages);
                }
                Err(e) => {
                    self.transition(SubscribeState::Failed);
                    warn!("Live update subscription attempt failed: {e}");
                    if self.pause(shutdown).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn forward(&self, messages: &mut MessageStream, shutdown: &mut Shutdown) -> Interrupted {
        loop {
            let next = tokio::select! {
                _ = shutdown_requested(shutdown) => return Interrupted::Shutdown,
                next = messages.next() => next,
            };

            match next {
                Some(Ok(payload)) => {
                    self.transition(SubscribeState::Receiving);
                    self.manager.broadcast(payload);
                }
                Some(Err(e)) => return Interrupted::Failed(e.to_string()),
                None => return Interrupted::Failed("upstream subscription closed".to_string()),
            }
        }
    }

    /// Wait out the reconnect delay. Returns true if shutdown arrived first.
    async fn pause(&self, shutdown: &mut Shutdown) -> bool {
        tokio::select! {
            _ = shutdown_requested(shutdown) => true,
            _ = tokio::time::sleep(self.reconnect_delay) => false,
        }
    }

    fn transition(&self, next: SubscribeState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            trace!("Live update subscription {state} -> {next}");
            *state = next;
            true
        });
    }
}

struct Outbound {
    topic: String,
    payload: Payload,
}

/// Fire-and-forget handle used by the write path to publish live updates.
///
/// Cloning is cheap; every clone feeds the same publish loop.
#[derive(Clone)]
pub struct Publisher {
    queue: mpsc::Sender<Outbound>,
}

impl Publisher {
    /// Spawn the publish loop and return a handle to it.
    pub fn spawn(
        broker: Arc<dyn Broker>,
        capacity: usize,
        retry_delay: Duration,
        shutdown: Shutdown,
    ) -> (Self, JoinHandle<()>) {
        let (queue, pending) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(publish_loop(broker, pending, retry_delay, shutdown));
        (Self { queue }, task)
    }

    /// Queue `payload` for publishing on `topic`. Never blocks and never fails;
    /// if the queue is full the payload is dropped and logged.
    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<Payload>) {
        let outbound = Outbound {
            topic: topic.into(),
            payload: payload.into(),
        };

        match self.queue.try_send(outbound) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(outbound)) => {
                warn!(
                    "Publish queue full, dropping live update for {}",
                    outbound.topic
                );
            }
            Err(mpsc::error::TrySendError::Closed(outbound)) => {
                warn!(
                    "Publish loop stopped, dropping live update for {}",
                    outbound.topic
                );
            }
        }
    }
}

async fn publish_loop(
    broker: Arc<dyn Broker>,
    mut pending: mpsc::Receiver<Outbound>,
    retry_delay: Duration,
    mut shutdown: Shutdown,
) {
    loop {
        let outbound = tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            outbound = pending.recv() => match outbound {
                Some(outbound) => outbound,
                None => break,
            },
        };

        // A failed item stays at the head of the line so per-topic order holds
        let mut attempt: u32 = 1;
        while let Err(e) = broker
            .publish(&outbound.topic, outbound.payload.clone())
            .await
        {
            warn!(
                "Publishing live update on {} failed (attempt {attempt}): {e}",
                outbound.topic
            );
            attempt += 1;

            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Publish loop stopped with an unpublished live update");
                    return;
                }
                _ = tokio::time::sleep(retry_delay) => {}
            }
        }
    }

    info!("Publish loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::error::BrokerErrorKind;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    /// Broker whose subscriptions are handed out from a script, and whose
    /// publishes fail a fixed number of times before succeeding.
    struct ScriptedBroker {
        subscriptions: Mutex<VecDeque<Result<mpsc::UnboundedReceiver<Result<Payload, Error>>, ()>>>,
        publish_failures: Mutex<u32>,
        published: Mutex<Vec<(String, Payload)>>,
    }

    impl ScriptedBroker {
        fn new() -> Self {
            Self {
                subscriptions: Mutex::new(VecDeque::new()),
                publish_failures: Mutex::new(0),
                published: Mutex::new(Vec::new()),
            }
        }

        /// Script one successful subscription and return its feed.
        fn add_subscription(&self) -> mpsc::UnboundedSender<Result<Payload, Error>> {
            let (feed, messages) = mpsc::unbounded_channel();
            self.subscriptions.lock().unwrap().push_back(Ok(messages));
            feed
        }

        fn add_failed_subscription(&self) {
            self.subscriptions.lock().unwrap().push_back(Err(()));
        }
    }

    #[async_trait]
    impl Broker for ScriptedBroker {
        async fn subscribe(&self, _topics: &[String]) -> Result<MessageStream, Error> {
            let next = self.subscriptions.lock().unwrap().pop_front();
            match next {
                Some(Ok(mut messages)) => {
                    let stream = async_stream::stream! {
                        while let Some(message) = messages.recv().await {
                            yield message;
                        }
                    };
                    Ok(Box::pin(stream))
                }
                _ => Err(Error::broker(BrokerErrorKind::Connect, "connection refused")),
            }
        }

        async fn publish(&self, topic: &str, payload: Payload) -> Result<(), Error> {
            {
                let mut failures = self.publish_failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(Error::broker(BrokerErrorKind::Publish, "broken pipe"));
                }
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }
    }

    async fn wait_for_state(state: &mut watch::Receiver<SubscribeState>, wanted: SubscribeState) {
        timeout(WAIT, state.wait_for(|current| *current == wanted))
            .await
            .expect("timed out waiting for subscribe state")
            .expect("event source dropped");
    }

    #[tokio::test]
    async fn start_fails_when_first_subscription_fails() {
        let broker = Arc::new(ScriptedBroker::new());
        broker.add_failed_subscription();
        let (_stop, shutdown) = watch::channel(false);

        let source = EventSource::new(
            broker,
            Arc::new(Manager::new(4)),
            vec!["posts".to_string()],
            Duration::from_millis(10),
        );

        assert!(source.start(shutdown).await.is_err());
    }

    #[tokio::test]
    async fn forwards_upstream_messages_to_connections() {
        let broker = Arc::new(ScriptedBroker::new());
        let feed = broker.add_subscription();
        let manager = Arc::new(Manager::new(4));
        let (_id, mut queue) = manager.open_connection().unwrap();
        let (_stop, shutdown) = watch::channel(false);

        let source = EventSource::new(
            broker,
            manager,
            vec!["posts".to_string()],
            Duration::from_millis(10),
        );
        let _task = source.start(shutdown).await.unwrap();

        feed.send(Ok(Bytes::from_static(b"{\"Body\":\"hello\"}"))).unwrap();

        let received = timeout(WAIT, queue.recv()).await.unwrap().unwrap();
        assert_eq!(received, Bytes::from_static(b"{\"Body\":\"hello\"}"));
    }

    #[tokio::test]
    async fn publish_with_no_connections_is_consumed() {
        let broker = Arc::new(MemoryBroker::default());
        let manager = Arc::new(Manager::new(4));
        let (_stop, shutdown) = watch::channel(false);

        let source = EventSource::new(
            broker.clone(),
            manager.clone(),
            vec!["posts".to_string()],
            Duration::from_millis(10),
        );
        let mut state = source.state();
        let _subscriber = source.start(shutdown.clone()).await.unwrap();
        let (publisher, _publish_task) =
            Publisher::spawn(broker, 16, Duration::from_millis(10), shutdown);

        publisher.publish("posts", Bytes::from_static(b"nobody listening"));
        wait_for_state(&mut state, SubscribeState::Receiving).await;
        assert_eq!(manager.connection_count(), 0);

        // The loop is still alive and delivers to a connection that shows up later
        let (_id, mut queue) = manager.open_connection().unwrap();
        publisher.publish("posts", Bytes::from_static(b"second"));
        let received = timeout(WAIT, queue.recv()).await.unwrap().unwrap();
        assert_eq!(received, Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn reconnects_after_upstream_failure_without_touching_connections() {
        let broker = Arc::new(ScriptedBroker::new());
        let first_feed = broker.add_subscription();
        broker.add_failed_subscription();
        let second_feed = broker.add_subscription();

        let manager = Arc::new(Manager::new(4));
        let (id, mut queue) = manager.open_connection().unwrap();
        let (_stop, shutdown) = watch::channel(false);

        let source = EventSource::new(
            broker,
            manager.clone(),
            vec!["posts".to_string()],
            Duration::from_millis(10),
        );
        let _task = source.start(shutdown).await.unwrap();

        first_feed.send(Ok(Bytes::from_static(b"before"))).unwrap();
        assert_eq!(
            timeout(WAIT, queue.recv()).await.unwrap().unwrap(),
            Bytes::from_static(b"before")
        );

        // Upstream drops; one reconnect attempt fails, the next succeeds
        drop(first_feed);
        second_feed.send(Ok(Bytes::from_static(b"after"))).unwrap();
        assert_eq!(
            timeout(WAIT, queue.recv()).await.unwrap().unwrap(),
            Bytes::from_static(b"after")
        );
        assert!(manager.is_registered(&id));
    }

    #[tokio::test]
    async fn malformed_upstream_frame_triggers_resubscribe() {
        let broker = Arc::new(ScriptedBroker::new());
        let first_feed = broker.add_subscription();
        let second_feed = broker.add_subscription();

        let manager = Arc::new(Manager::new(4));
        let (_id, mut queue) = manager.open_connection().unwrap();
        let (_stop, shutdown) = watch::channel(false);

        let source = EventSource::new(
            broker,
            manager,
            vec!["posts".to_string()],
            Duration::from_millis(10),
        );
        let _task = source.start(shutdown).await.unwrap();

        first_feed
            .send(Err(Error::broker(BrokerErrorKind::Receive, "bad frame")))
            .unwrap();
        second_feed.send(Ok(Bytes::from_static(b"recovered"))).unwrap();

        assert_eq!(
            timeout(WAIT, queue.recv()).await.unwrap().unwrap(),
            Bytes::from_static(b"recovered")
        );
    }

    #[tokio::test]
    async fn shutdown_stops_the_subscribe_loop() {
        let broker = Arc::new(MemoryBroker::default());
        let (stop, shutdown) = watch::channel(false);

        let source = EventSource::new(
            broker.clone(),
            Arc::new(Manager::new(4)),
            vec!["posts".to_string()],
            Duration::from_millis(10),
        );
        let state = source.state();
        let task = source.start(shutdown).await.unwrap();
        assert_eq!(broker.subscription_count(), 1);

        stop.send(true).unwrap();
        timeout(WAIT, task).await.unwrap().unwrap();

        assert_eq!(*state.borrow(), SubscribeState::Stopped);
        assert_eq!(broker.subscription_count(), 0);
    }

    #[tokio::test]
    async fn publisher_round_trips_through_memory_broker() {
        let broker: Arc<MemoryBroker> = Arc::new(MemoryBroker::default());
        let manager = Arc::new(Manager::new(4));
        let (_id, mut queue) = manager.open_connection().unwrap();
        let (_stop, shutdown) = watch::channel(false);

        let source = EventSource::new(
            broker.clone(),
            manager,
            vec!["posts".to_string()],
            Duration::from_millis(10),
        );
        let _subscriber = source.start(shutdown.clone()).await.unwrap();
        let (publisher, _publish_task) =
            Publisher::spawn(broker, 16, Duration::from_millis(10), shutdown);

        publisher.publish("posts", Bytes::from_static(b"{\"Id\":\"p1\"}"));

        assert_eq!(
            timeout(WAIT, queue.recv()).await.unwrap().unwrap(),
            Bytes::from_static(b"{\"Id\":\"p1\"}")
        );
    }

    #[tokio::test]
    async fn failed_publish_is_retried_in_order() {
        let broker = Arc::new(ScriptedBroker::new());
        *broker.publish_failures.lock().unwrap() = 2;
        let (_stop, shutdown) = watch::channel(false);

        let (publisher, _task) =
            Publisher::spawn(broker.clone(), 16, Duration::from_millis(5), shutdown);
        publisher.publish("posts", Bytes::from_static(b"first"));
        publisher.publish("message_posts", Bytes::from_static(b"second"));

        timeout(WAIT, async {
            while broker.published.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let published = broker.published.lock().unwrap().clone();
        assert_eq!(
            published,
            vec![
                ("posts".to_string(), Bytes::from_static(b"first")),
                ("message_posts".to_string(), Bytes::from_static(b"second")),
            ]
        );
    }

    #[tokio::test]
    async fn publish_after_shutdown_is_dropped_quietly() {
        let broker = Arc::new(MemoryBroker::default());
        let (stop, shutdown) = watch::channel(false);
        let (publisher, task) = Publisher::spawn(broker, 1, Duration::from_millis(5), shutdown);

        stop.send(true).unwrap();
        timeout(WAIT, task).await.unwrap().unwrap();

        publisher.publish("posts", Bytes::from_static(b"late"));
    }
}
