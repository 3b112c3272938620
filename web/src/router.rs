use crate::controller::health_check_controller;
use crate::ws::handler::ws_handler;
use crate::AppState;
use axum::http::{HeaderValue, Method};
use axum::{routing::get, Router};
use log::*;
use tower_http::cors::{AllowOrigin, CorsLayer};

pub fn define_routes(app_state: AppState) -> Router {
    let cors = cors_layer(&app_state.config.allowed_origins);

    Router::new()
        .merge(health_routes())
        .merge(live_update_routes())
        .layer(cors)
        .with_state(app_state)
}

fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check_controller::health_check))
}

fn live_update_routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin {origin:?}: {e}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET])
        .allow_credentials(true)
}
