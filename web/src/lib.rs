//! HTTP surface of the board's live update service.
//!
//! Exposes the WebSocket upgrade endpoint that admits live connections and a
//! health check. Write-path routes call into [`AppState::events`] once their
//! write has been persisted.

use events::EventPublisher;
use fanout::{Manager, SubscribeState};
use log::*;
use service::config::Config;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;

mod controller;
pub mod error;
pub mod router;
mod ws;

pub use error::{Error, Result};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub manager: Arc<Manager>,
    /// Connection pumps started by `/ws`, awaited on shutdown.
    pub pump_tasks: TaskTracker,
    /// Domain event entry point for the write path.
    pub events: EventPublisher,
    pub subscription: watch::Receiver<SubscribeState>,
    shutdown: fanout::Shutdown,
}

impl AppState {
    pub fn new(
        config: Config,
        manager: Arc<Manager>,
        pump_tasks: TaskTracker,
        events: EventPublisher,
        subscription: watch::Receiver<SubscribeState>,
        shutdown: fanout::Shutdown,
    ) -> Self {
        Self {
            config,
            manager,
            pump_tasks,
            events,
            subscription,
            shutdown,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn init_server<F>(app_state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listen_address = app_state.config.listen_address();
    let listener = TcpListener::bind(&listen_address)
        .await
        .map_err(Error::bind)?;
    info!("Server starting... listening for connections on http://{listen_address}");

    serve(listener, app_state, shutdown).await
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, app_state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = router::define_routes(app_state);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(Error::serve)
}
