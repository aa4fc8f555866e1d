//! HTTP and WebSocket Protocol Messages
//!
//! Request/response bodies of the command surface, and the frames exchanged
//! over the `/events` and `/page` sockets.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Frames sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Sent on initial connection
    Connected {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "serverVersion")]
        server_version: String,
    },

    /// The plugin list changed; re-query `GET /plugins`
    PluginsChanged,

    /// Run a loader or cleanup snippet in the page
    Execute { script: String },

    /// Pong response to ping
    Pong { id: String },

    /// Error message
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    /// Create a connected message
    pub fn connected(session_id: impl Into<String>) -> Self {
        Self::Connected {
            session_id: session_id.into(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn execute(script: impl Into<String>) -> Self {
        Self::Execute {
            script: script.into(),
        }
    }

    pub fn pong(id: impl Into<String>) -> Self {
        Self::Pong { id: id.into() }
    }
}

/// Frames sent from the hosted page to the server
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PageMessage {
    /// Ping for keep-alive
    Ping { id: String },

    /// A snippet threw inside the page
    ScriptError {
        #[serde(default, rename = "pluginId")]
        plugin_id: Option<String>,
        message: String,
    },
}

/// Error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    NotFound,
    Unavailable,
    InternalError,
}

/// Error body of a failed HTTP request
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// `PUT /plugins/:id/enabled`
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

/// `POST /events/theme`
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ThemeChangeRequest {
    pub is_dark: bool,
}

/// `GET /plugins/directory`
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DirectoryResponse {
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_message_serialize() {
        let json = serde_json::to_value(ServerMessage::PluginsChanged).unwrap();
        assert_eq!(json, serde_json::json!({"type": "pluginsChanged"}));

        let json = serde_json::to_value(ServerMessage::execute("run();")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "execute", "script": "run();"}));

        let json = serde_json::to_string(&ServerMessage::connected("abc")).unwrap();
        assert!(json.contains("\"sessionId\":\"abc\""));
    }

    #[test]
    fn test_page_message_parse() {
        let msg: PageMessage =
            serde_json::from_str(r#"{"type":"scriptError","pluginId":"lyrics","message":"boom"}"#)
                .unwrap();
        assert!(matches!(
            msg,
            PageMessage::ScriptError { plugin_id: Some(id), .. } if id == "lyrics"
        ));

        let msg: PageMessage = serde_json::from_str(r#"{"type":"ping","id":"7"}"#).unwrap();
        assert!(matches!(msg, PageMessage::Ping { id } if id == "7"));
    }

    #[test]
    fn test_request_bodies() {
        let theme: ThemeChangeRequest = serde_json::from_str(r#"{"isDark":true}"#).unwrap();
        assert!(theme.is_dark);
        let enabled: SetEnabledRequest = serde_json::from_str(r#"{"enabled":false}"#).unwrap();
        assert!(!enabled.enabled);
    }
}
