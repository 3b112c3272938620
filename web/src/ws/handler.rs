use crate::error::{Error, Result};
use crate::AppState;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use fanout::pump;
use log::*;

/// WebSocket handler that establishes a long-lived connection for live updates.
/// Every connection receives every event; nothing is sent by the client.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> Result<Response> {
    if app_state.is_shutting_down() {
        return Err(Error::shutting_down());
    }

    debug!("Upgrading live update connection");
    let manager = app_state.manager.clone();
    let pump_tasks = app_state.pump_tasks.clone();
    Ok(ws.on_upgrade(move |socket| pump_tasks.track_future(pump::serve(socket, manager))))
}
