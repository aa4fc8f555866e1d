//! Request Handlers
//!
//! The plugin command/query surface over HTTP, plus the two WebSocket
//! sessions: `/events` for change signals and `/page` for the hosted page.

use axum::Json;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::protocol::{
    DirectoryResponse, ErrorBody, ErrorCode, PageMessage, ServerMessage, SetEnabledRequest,
    ThemeChangeRequest,
};
use super::state::{AppState, SessionKind};
use crate::bridge::{ChannelPage, PageError, PageHost};
use crate::host::{HostError, PluginSummary};

/// A host error rendered as an HTTP response
pub struct ApiError(HostError);

impl From<HostError> for ApiError {
    fn from(e: HostError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            HostError::UnknownPlugin(_) => (StatusCode::NOT_FOUND, ErrorCode::NotFound),
            HostError::Terminated | HostError::ChannelClosed => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Unavailable)
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError),
        };
        let body = ErrorBody {
            code,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn list_plugins(State(state): State<AppState>) -> ApiResult<Vec<PluginSummary>> {
    Ok(Json(state.host().list_plugins().await?))
}

pub async fn set_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SetEnabledRequest>,
) -> ApiResult<PluginSummary> {
    let summary = state.host().set_enabled(&id, request.enabled).await?;
    Ok(Json(summary))
}

pub async fn plugins_directory(State(state): State<AppState>) -> ApiResult<DirectoryResponse> {
    let path = state.host().plugins_directory().await?;
    Ok(Json(DirectoryResponse {
        path: path.display().to_string(),
    }))
}

pub async fn refresh(State(state): State<AppState>) -> ApiResult<Vec<PluginSummary>> {
    Ok(Json(state.host().refresh().await?))
}

pub async fn track_changed(
    State(state): State<AppState>,
    Json(track): Json<serde_json::Value>,
) -> Result<StatusCode, ApiError> {
    state.host().notify_track_change(track).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn theme_changed(
    State(state): State<AppState>,
    Json(request): Json<ThemeChangeRequest>,
) -> Result<StatusCode, ApiError> {
    state.host().notify_theme_change(request.is_dark).await?;
    Ok(StatusCode::ACCEPTED)
}

fn to_text(message: &ServerMessage) -> Option<Message> {
    serde_json::to_string(message)
        .ok()
        .map(|json| Message::Text(json.into()))
}

/// Push "plugins changed" to a settings UI session
pub async fn handle_events_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let session_id = state.register_session(SessionKind::Events);
    let mut changed = state.host().subscribe();

    if let Some(msg) = to_text(&ServerMessage::connected(session_id.to_string())) {
        let _ = ws_sender.send(msg).await;
    }

    let send_task = tokio::spawn(async move {
        loop {
            match changed.recv().await {
                // A lagged receiver still only needs one nudge
                Ok(()) | Err(RecvError::Lagged(_)) => {
                    let Some(msg) = to_text(&ServerMessage::PluginsChanged) else {
                        continue;
                    };
                    if ws_sender.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    join_session(send_task, recv_task).await;

    state.remove_session(session_id);
}

/// Attach the hosted page as the bridge's collaborator for as long as the
/// socket stays open
pub async fn handle_page_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let session_id = state.register_session(SessionKind::Page);

    if let Some(msg) = to_text(&ServerMessage::connected(session_id.to_string())) {
        let _ = ws_sender.send(msg).await;
    }

    let (page, mut scripts) = ChannelPage::new(session_id.to_string());
    let factory = Box::new(move || -> Result<Box<dyn PageHost>, PageError> { Ok(Box::new(page)) });
    let generation = match state.host().attach_page(factory).await {
        Ok(generation) => generation,
        Err(e) => {
            tracing::warn!("Failed to attach page {}: {}", session_id, e);
            state.remove_session(session_id);
            return;
        }
    };

    // Pongs go out through the same writer as snippets
    let (pong_tx, mut pong_rx) = tokio::sync::mpsc::channel::<ServerMessage>(8);

    let send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                script = scripts.recv() => match script {
                    Some(script) => ServerMessage::execute(script),
                    None => break,
                },
                pong = pong_rx.recv() => match pong {
                    Some(pong) => pong,
                    None => break,
                },
            };
            let Some(msg) = to_text(&message) else {
                continue;
            };
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => handle_page_message(session_id, &text, &pong_tx).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    join_session(send_task, recv_task).await;

    if let Err(e) = state.host().detach_page(generation).await {
        tracing::debug!("Detach after host shutdown: {}", e);
    }
    state.remove_session(session_id);
}

/// Run both halves of a socket until either finishes, then abort the other
async fn join_session(mut send_task: JoinHandle<()>, mut recv_task: JoinHandle<()>) {
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn handle_page_message(
    session_id: uuid::Uuid,
    text: &str,
    pong_tx: &tokio::sync::mpsc::Sender<ServerMessage>,
) {
    let msg: PageMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("Failed to parse page message from {}: {}", session_id, e);
            return;
        }
    };

    match msg {
        PageMessage::Ping { id } => {
            let _ = pong_tx.send(ServerMessage::pong(id)).await;
        }
        PageMessage::ScriptError { plugin_id, message } => match plugin_id {
            Some(plugin) => tracing::warn!(plugin = %plugin, "Page script failed: {}", message),
            None => tracing::warn!("Page script failed: {}", message),
        },
    }
}
