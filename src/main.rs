use events::EventPublisher;
use fanout::broker::{Broker, MemoryBroker, RedisBroker};
use fanout::{EventSource, LiveUpdateHandler, Manager, Publisher};
use log::*;
use service::config::{BrokerKind, Config};
use service::logging::Logger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use web::AppState;

/// How long live connections get to flush their close frames on shutdown.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    info!(
        "Starting live update service [{}] with the {} broker...",
        config.runtime_env(),
        config.broker
    );

    let broker: Arc<dyn Broker> = match config.broker {
        BrokerKind::Redis => match RedisBroker::new(config.redis_url()) {
            Ok(broker) => Arc::new(broker),
            Err(e) => {
                error!("Invalid Redis configuration: {e}");
                std::process::exit(1);
            }
        },
        BrokerKind::Memory => Arc::new(MemoryBroker::default()),
    };

    let (stop, shutdown) = watch::channel(false);
    let manager = Arc::new(Manager::new(config.connection_queue_capacity));

    let source = EventSource::new(
        broker.clone(),
        manager.clone(),
        config.topics.clone(),
        config.reconnect_delay(),
    );
    let subscription = source.state();
    let subscribe_task = match source.start(shutdown.clone()).await {
        Ok(task) => task,
        Err(e) => {
            error!("Failed to subscribe to live update topics: {e}");
            std::process::exit(1);
        }
    };

    let (publisher, publish_task) = Publisher::spawn(
        broker,
        config.publish_queue_capacity,
        config.reconnect_delay(),
        shutdown.clone(),
    );
    let events =
        EventPublisher::new().with_handler(Arc::new(LiveUpdateHandler::new(publisher)));

    let pump_tasks = TaskTracker::new();
    let app_state = AppState::new(
        config,
        manager.clone(),
        pump_tasks.clone(),
        events,
        subscription,
        shutdown,
    );

    let signal_manager = manager.clone();
    let on_shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for the shutdown signal: {e}");
            std::future::pending::<()>().await;
        }

        info!("Shutdown requested, closing live connections...");
        let _ = stop.send(true);
        signal_manager.close_all();
    };

    if let Err(e) = web::init_server(app_state, on_shutdown).await {
        error!("Server stopped with an error: {e}");
        std::process::exit(1);
    }

    // Upgraded connections outlive axum's graceful shutdown
    pump_tasks.close();
    if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, pump_tasks.wait())
        .await
        .is_err()
    {
        warn!(
            "{} live connection task(s) still running after {:?}",
            pump_tasks.len(),
            PUMP_DRAIN_TIMEOUT
        );
    }

    let _ = tokio::join!(subscribe_task, publish_task);
    info!("Live update service stopped");
}
