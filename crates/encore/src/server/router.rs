//! HTTP Router
//!
//! Sets up the axum router: the plugin command surface, the host event
//! entry points and the two WebSocket endpoints.

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::{get, post, put},
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handler::{
    handle_events_socket, handle_page_socket, list_plugins, plugins_directory, refresh,
    set_enabled, theme_changed, track_changed,
};
use super::state::{AppState, SessionKind};

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/plugins", get(list_plugins))
        .route("/plugins/directory", get(plugins_directory))
        .route("/plugins/refresh", post(refresh))
        .route("/plugins/:id/enabled", put(set_enabled))
        // Domain events relayed to plugins
        .route("/events/track", post(track_changed))
        .route("/events/theme", post(theme_changed))
        // Change signals for the settings UI
        .route("/events", get(events_upgrade))
        // The hosted page
        .route("/page", get(page_upgrade))
        // Health check for monitoring
        .route("/health", get(health_check))
        // CORS for the settings UI dev server
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn events_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_events_socket(socket, state))
}

async fn page_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_page_socket(socket, state))
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    pages: usize,
    listeners: usize,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        pages: state.session_count(SessionKind::Page),
        listeners: state.session_count(SessionKind::Events),
    })
}
