use crate::controller::ApiResponse;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub(crate) struct Health {
    status: &'static str,
    /// Live WebSocket connections held by this instance.
    connections: usize,
    /// State of the upstream live update subscription.
    subscription: String,
}

/// GET liveness of the router plus live update fanout status
pub async fn health_check(State(app_state): State<AppState>) -> impl IntoResponse {
    let health = Health {
        status: "healthy",
        connections: app_state.manager.connection_count(),
        subscription: app_state.subscription.borrow().to_string(),
    };

    Json(ApiResponse::new(StatusCode::OK.into(), health))
}
